//! Event-to-notification routing.
//!
//! [`NotificationRouter`] consumes incident events from the bus and forwards
//! the notifiable ones to a [`NotificationSink`]. Transports live behind the
//! sink trait; [`LogSink`] writes through `tracing`.

use std::sync::Arc;

use async_trait::async_trait;
use dq_core::severity::Severity;
use tokio::sync::broadcast;

use crate::bus::IncidentEvent;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Receives incident events that passed routing filters.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn on_incident_event(&self, event: &IncidentEvent) -> Result<(), NotifyError>;
}

/// Sink that logs each notification.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn on_incident_event(&self, event: &IncidentEvent) -> Result<(), NotifyError> {
        tracing::info!(
            event_type = event.event_type(),
            incident_id = event.incident_id,
            check_id = event.check_id,
            severity = %event.severity,
            priority = event.severity.priority_label(),
            failure_count = event.failure_count,
            "Incident notification"
        );
        Ok(())
    }
}

/// Routes incident events to a sink.
pub struct NotificationRouter {
    sink: Arc<dyn NotificationSink>,
    min_severity: Severity,
}

impl NotificationRouter {
    pub fn new(sink: Arc<dyn NotificationSink>, min_severity: Severity) -> Self {
        Self { sink, min_severity }
    }

    /// Whether `event` should reach the sink.
    ///
    /// Only opened, resolved and severity-changed events are notifiable.
    /// Muted incidents and severities below the threshold are suppressed.
    pub fn should_notify(&self, event: &IncidentEvent) -> bool {
        event.kind.is_notifiable() && !event.muted && event.severity >= self.min_severity
    }

    /// Run the routing loop until the channel closes.
    pub async fn run(self, mut receiver: broadcast::Receiver<IncidentEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if !self.should_notify(&event) {
                        tracing::debug!(
                            event_type = event.event_type(),
                            incident_id = event.incident_id,
                            "Notification suppressed"
                        );
                        continue;
                    }
                    if let Err(e) = self.sink.on_incident_event(&event).await {
                        tracing::error!(
                            error = %e,
                            event_type = event.event_type(),
                            incident_id = event.incident_id,
                            "Failed to route incident event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notification router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification router shutting down");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
