//! Check job queue models.

use dq_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `check_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CheckJob {
    pub id: DbId,
    pub check_id: DbId,
    pub status_id: StatusId,
    pub triggered_by: String,
    pub error_message: Option<String>,
    pub submitted_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Who asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Api,
    Schedule,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Api => "api",
            TriggeredBy::Schedule => "schedule",
        }
    }
}
