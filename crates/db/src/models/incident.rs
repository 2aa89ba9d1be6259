//! Incident rows.

use dq_core::error::CoreError;
use dq_core::incident::Incident;
use dq_core::severity::Severity;
use dq_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::{IncidentStatusId, StatusId};

/// A row from the `incidents` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct IncidentRow {
    pub id: DbId,
    pub check_id: DbId,
    pub status_id: StatusId,
    pub severity: String,
    pub failure_count: i32,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub acknowledged_at: Option<Timestamp>,
    pub muted_at: Option<Timestamp>,
    pub resolved_at: Option<Timestamp>,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl IncidentRow {
    pub fn into_domain(self) -> Result<Incident, CoreError> {
        let status = IncidentStatusId::from_id(self.status_id).ok_or_else(|| {
            CoreError::Internal(format!("Unknown incident status id {}", self.status_id))
        })?;
        Ok(Incident {
            id: self.id,
            check_id: self.check_id,
            status: status.into(),
            severity: Severity::parse(&self.severity)?,
            failure_count: self.failure_count,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            acknowledged_at: self.acknowledged_at,
            muted_at: self.muted_at,
            resolved_at: self.resolved_at,
            version: self.version,
        })
    }
}
