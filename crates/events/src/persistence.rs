//! Durable incident event persistence.
//!
//! [`EventPersistence`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and writes every received [`IncidentEvent`] to `incident_events`. It runs
//! as a long-lived background task and exits when the bus is dropped.

use dq_core::types::DbId;
use dq_db::models::event::NewIncidentEvent;
use dq_db::repositories::EventRepo;
use dq_db::DbPool;
use tokio::sync::broadcast;

use crate::bus::IncidentEvent;

pub struct EventPersistence;

impl EventPersistence {
    /// Run the persistence loop until the channel closes.
    pub async fn run(pool: DbPool, mut receiver: broadcast::Receiver<IncidentEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = Self::persist(&pool, &event).await {
                        tracing::error!(
                            error = %e,
                            event_type = event.event_type(),
                            incident_id = event.incident_id,
                            "Failed to persist incident event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        skipped = n,
                        "Event persistence lagged, some events were not persisted"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, persistence shutting down");
                    break;
                }
            }
        }
    }

    async fn persist(pool: &DbPool, event: &IncidentEvent) -> Result<DbId, sqlx::Error> {
        let payload = serde_json::json!({
            "status": event.status,
            "previous_severity": event.previous_severity,
            "failure_count": event.failure_count,
            "muted": event.muted,
            "occurred_at": event.timestamp,
            "details": event.payload,
        });
        EventRepo::insert(
            pool,
            &NewIncidentEvent {
                incident_id: event.incident_id,
                check_id: event.check_id,
                event_type: event.event_type(),
                severity: Some(event.severity.as_str()),
                payload: &payload,
            },
        )
        .await
    }
}
