//! Repository for the `check_jobs` queue.
//!
//! Uses `JobStatus` from `models::status` for all status transitions.

use dq_core::types::DbId;
use sqlx::PgPool;

use crate::models::job::{CheckJob, TriggeredBy};
use crate::models::status::{JobStatus, StatusId};

/// Column list for `check_jobs` queries.
const COLUMNS: &str = "\
    id, check_id, status_id, triggered_by, error_message, \
    submitted_at, claimed_at, completed_at";

/// Terminal statuses: completed, failed, cancelled.
const TERMINAL_STATUSES: [StatusId; 3] = [
    JobStatus::Completed as StatusId,
    JobStatus::Failed as StatusId,
    JobStatus::Cancelled as StatusId,
];

pub struct CheckJobRepo;

impl CheckJobRepo {
    /// Enqueue a run of `check_id`.
    pub async fn submit(
        pool: &PgPool,
        check_id: DbId,
        triggered_by: TriggeredBy,
    ) -> Result<CheckJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO check_jobs (check_id, status_id, triggered_by) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CheckJob>(&query)
            .bind(check_id)
            .bind(JobStatus::Pending.id())
            .bind(triggered_by.as_str())
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest pending job.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent dispatchers never
    /// claim the same row.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<CheckJob>, sqlx::Error> {
        let query = format!(
            "UPDATE check_jobs \
             SET claimed_at = NOW(), status_id = $1 \
             WHERE id = ( \
                 SELECT id FROM check_jobs \
                 WHERE status_id = $2 \
                 ORDER BY submitted_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CheckJob>(&query)
            .bind(JobStatus::Running.id())
            .bind(JobStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    pub async fn complete(pool: &PgPool, job_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE check_jobs SET status_id = $2, completed_at = NOW() WHERE id = $1")
            .bind(job_id)
            .bind(JobStatus::Completed.id())
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn fail(pool: &PgPool, job_id: DbId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE check_jobs \
             SET status_id = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Cancel a job unless it already finished.
    ///
    /// Returns `true` if the job was cancelled.
    pub async fn cancel(pool: &PgPool, job_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE check_jobs \
             SET status_id = $2, completed_at = NOW() \
             WHERE id = $1 AND status_id <> ALL($3)",
        )
        .bind(job_id)
        .bind(JobStatus::Cancelled.id())
        .bind(&TERMINAL_STATUSES[..])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<CheckJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM check_jobs WHERE id = $1");
        sqlx::query_as::<_, CheckJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
