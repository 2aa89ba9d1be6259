//! Repository for the `incidents` table.
//!
//! The unique partial index on live statuses enforces one live incident per
//! check. Writes to a live incident are compare-and-swap on `version`.

use dq_core::incident::{Incident, NewIncident};
use dq_core::types::DbId;
use sqlx::PgPool;

use crate::models::incident::IncidentRow;
use crate::models::status::{IncidentStatusId, StatusId, LIVE_INCIDENT_STATUSES};

/// Column list for `incidents` queries.
const COLUMNS: &str = "\
    id, check_id, status_id, severity, failure_count, first_seen, last_seen, \
    acknowledged_at, muted_at, resolved_at, version, created_at, updated_at";

/// Maximum page size for incident listing.
const MAX_LIMIT: i64 = 100;

pub struct IncidentRepo;

impl IncidentRepo {
    /// The live incident for a check, if any.
    pub async fn find_live(pool: &PgPool, check_id: DbId) -> Result<Option<IncidentRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM incidents \
             WHERE check_id = $1 AND status_id = ANY($2)"
        );
        sqlx::query_as::<_, IncidentRow>(&query)
            .bind(check_id)
            .bind(&LIVE_INCIDENT_STATUSES[..])
            .fetch_optional(pool)
            .await
    }

    /// Open a new incident.
    ///
    /// Returns `None` when the check already has a live incident.
    pub async fn insert_live(
        pool: &PgPool,
        input: &NewIncident,
    ) -> Result<Option<IncidentRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO incidents (check_id, status_id, severity, failure_count, first_seen, last_seen) \
             VALUES ($1, $2, $3, 1, $4, $4) \
             ON CONFLICT (check_id) WHERE status_id IN (1, 2, 4) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, IncidentRow>(&query)
            .bind(input.check_id)
            .bind(IncidentStatusId::Open.id())
            .bind(input.severity.as_str())
            .bind(input.seen_at)
            .fetch_optional(pool)
            .await
    }

    /// Write `incident` if its stored version still equals `expected_version`.
    ///
    /// Returns `None` on a version mismatch.
    pub async fn update_if_version(
        pool: &PgPool,
        incident: &Incident,
        expected_version: i64,
    ) -> Result<Option<IncidentRow>, sqlx::Error> {
        let query = format!(
            "UPDATE incidents \
             SET status_id = $3, severity = $4, failure_count = $5, last_seen = $6, \
                 acknowledged_at = $7, muted_at = $8, resolved_at = $9, version = version + 1 \
             WHERE id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, IncidentRow>(&query)
            .bind(incident.id)
            .bind(expected_version)
            .bind(IncidentStatusId::from(incident.status).id())
            .bind(incident.severity.as_str())
            .bind(incident.failure_count)
            .bind(incident.last_seen)
            .bind(incident.acknowledged_at)
            .bind(incident.muted_at)
            .bind(incident.resolved_at)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<IncidentRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM incidents WHERE id = $1");
        sqlx::query_as::<_, IncidentRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List incidents newest first, optionally filtered by check and status.
    pub async fn list(
        pool: &PgPool,
        check_id: Option<DbId>,
        status_id: Option<StatusId>,
        limit: i64,
    ) -> Result<Vec<IncidentRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM incidents \
             WHERE ($1::bigint IS NULL OR check_id = $1) \
               AND ($2::smallint IS NULL OR status_id = $2) \
             ORDER BY first_seen DESC \
             LIMIT $3"
        );
        sqlx::query_as::<_, IncidentRow>(&query)
            .bind(check_id)
            .bind(status_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }
}
