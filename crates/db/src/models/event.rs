//! Incident event audit rows.

use dq_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `incident_events` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct IncidentEvent {
    pub id: DbId,
    pub incident_id: DbId,
    pub check_id: DbId,
    pub event_type: String,
    pub severity: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
}

/// Insert payload for an incident event.
#[derive(Debug, Clone)]
pub struct NewIncidentEvent<'a> {
    pub incident_id: DbId,
    pub check_id: DbId,
    pub event_type: &'a str,
    pub severity: Option<&'a str>,
    pub payload: &'a serde_json::Value,
}
