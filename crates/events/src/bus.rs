//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the incident manager
//! that publishes and the persistence and notification loops that consume.

use chrono::Utc;
use dq_core::incident::{Incident, IncidentEventKind, IncidentStatus};
use dq_core::severity::Severity;
use dq_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// IncidentEvent
// ---------------------------------------------------------------------------

/// A lifecycle transition of one incident, with a snapshot of its state
/// after the transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub kind: IncidentEventKind,
    pub incident_id: DbId,
    pub check_id: DbId,
    pub status: IncidentStatus,
    pub severity: Severity,
    /// Set on `severity_changed`.
    pub previous_severity: Option<Severity>,
    pub failure_count: i32,
    /// The incident was muted at the time of the event.
    pub muted: bool,
    /// Free-form JSON payload, e.g. the triggering result's message.
    pub payload: serde_json::Value,
    pub timestamp: Timestamp,
}

impl IncidentEvent {
    /// Snapshot `incident` into a new event of `kind`.
    pub fn new(kind: IncidentEventKind, incident: &Incident) -> Self {
        Self {
            kind,
            incident_id: incident.id,
            check_id: incident.check_id,
            status: incident.status,
            severity: incident.severity,
            previous_severity: None,
            failure_count: incident.failure_count,
            muted: incident.is_muted(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_previous_severity(mut self, severity: Severity) -> Self {
        self.previous_severity = Some(severity);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Dot-separated event name, e.g. `"incident.opened"`.
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use dq_events::bus::EventBus;
///
/// let bus = EventBus::default();
/// let rx = bus.subscribe();
/// assert_eq!(bus.receiver_count(), 1);
/// # drop(rx);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<IncidentEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no active subscribers the event is dropped.
    pub fn publish(&self, event: IncidentEvent) {
        // SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IncidentEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
