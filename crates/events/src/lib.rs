//! Incident event bus and notification infrastructure.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`IncidentEvent`]: the envelope published for every incident transition.
//! - [`EventPersistence`]: background service writing every event to the
//!   `incident_events` audit table.
//! - [`NotificationRouter`]: forwards notifiable events to a
//!   [`NotificationSink`].

pub mod bus;
pub mod notify;
pub mod persistence;

pub use bus::{EventBus, IncidentEvent};
pub use notify::{LogSink, NotificationRouter, NotificationSink, NotifyError};
pub use persistence::EventPersistence;
