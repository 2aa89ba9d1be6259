//! Repository for the `incident_events` audit table.

use dq_core::types::DbId;
use sqlx::PgPool;

use crate::models::event::{IncidentEvent, NewIncidentEvent};

/// Column list for `incident_events` queries.
const COLUMNS: &str = "id, incident_id, check_id, event_type, severity, payload, created_at";

pub struct EventRepo;

impl EventRepo {
    /// Insert an event row, returning the generated ID.
    pub async fn insert(pool: &PgPool, input: &NewIncidentEvent<'_>) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO incident_events (incident_id, check_id, event_type, severity, payload) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(input.incident_id)
        .bind(input.check_id)
        .bind(input.event_type)
        .bind(input.severity)
        .bind(input.payload)
        .fetch_one(pool)
        .await
    }

    /// Events of one incident, oldest first.
    pub async fn list_for_incident(
        pool: &PgPool,
        incident_id: DbId,
    ) -> Result<Vec<IncidentEvent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM incident_events WHERE incident_id = $1 ORDER BY created_at, id"
        );
        sqlx::query_as::<_, IncidentEvent>(&query)
            .bind(incident_id)
            .fetch_all(pool)
            .await
    }
}
