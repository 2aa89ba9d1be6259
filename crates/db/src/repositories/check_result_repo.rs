//! Repository for the append-only `check_results` table.
//!
//! Baseline queries only consider rows with a numeric value and no
//! execution error.

use dq_core::result::{CheckResult, HistoryWindow};
use dq_core::types::{DbId, Timestamp};
use dq_core::value::SensorValue;
use sqlx::PgPool;

use crate::models::check_result::{BaselineRow, CheckResultRow};

/// Column list for `check_results` queries.
const COLUMNS: &str = "\
    id, check_id, executed_at, sensor_value_num, sensor_value_text, \
    passed, indeterminate, severity, rendered_query, error, message, latency_ms";

/// Predicate selecting rows usable as baselines.
const BASELINE_FILTER: &str = "sensor_value_num IS NOT NULL AND error IS NULL";

pub struct CheckResultRepo;

impl CheckResultRepo {
    /// Append a result, returning its row id.
    pub async fn append(pool: &PgPool, result: &CheckResult) -> Result<DbId, sqlx::Error> {
        let (num, text) = match &result.sensor_value {
            Some(SensorValue::Number(n)) => (Some(*n), None),
            Some(SensorValue::Text(t)) => (None, Some(t.as_str())),
            None => (None, None),
        };
        sqlx::query_scalar(
            "INSERT INTO check_results \
                (check_id, executed_at, sensor_value_num, sensor_value_text, passed, \
                 indeterminate, severity, rendered_query, error, message, latency_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING id",
        )
        .bind(result.check_id)
        .bind(result.executed_at)
        .bind(num)
        .bind(text)
        .bind(result.passed)
        .bind(result.indeterminate)
        .bind(result.severity.map(|s| s.as_str()))
        .bind(&result.rendered_query)
        .bind(&result.error)
        .bind(&result.message)
        .bind(result.latency_ms)
        .fetch_one(pool)
        .await
    }

    /// Most recent baseline point strictly before `before`.
    pub async fn latest_before(
        pool: &PgPool,
        check_id: DbId,
        before: Timestamp,
    ) -> Result<Option<BaselineRow>, sqlx::Error> {
        let query = format!(
            "SELECT executed_at, sensor_value_num AS value FROM check_results \
             WHERE check_id = $1 AND executed_at < $2 AND {BASELINE_FILTER} \
             ORDER BY executed_at DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, BaselineRow>(&query)
            .bind(check_id)
            .bind(before)
            .fetch_optional(pool)
            .await
    }

    /// Earliest baseline point strictly between `after` and `before`.
    pub async fn earliest_between(
        pool: &PgPool,
        check_id: DbId,
        after: Timestamp,
        before: Timestamp,
    ) -> Result<Option<BaselineRow>, sqlx::Error> {
        let query = format!(
            "SELECT executed_at, sensor_value_num AS value FROM check_results \
             WHERE check_id = $1 AND executed_at > $2 AND executed_at < $3 AND {BASELINE_FILTER} \
             ORDER BY executed_at ASC \
             LIMIT 1"
        );
        sqlx::query_as::<_, BaselineRow>(&query)
            .bind(check_id)
            .bind(after)
            .bind(before)
            .fetch_optional(pool)
            .await
    }

    /// The last `limit` baseline points before `before`, oldest first.
    pub async fn window(
        pool: &PgPool,
        check_id: DbId,
        before: Timestamp,
        limit: i64,
    ) -> Result<Vec<BaselineRow>, sqlx::Error> {
        let query = format!(
            "SELECT executed_at, value FROM ( \
                 SELECT executed_at, sensor_value_num AS value FROM check_results \
                 WHERE check_id = $1 AND executed_at < $2 AND {BASELINE_FILTER} \
                 ORDER BY executed_at DESC \
                 LIMIT $3 \
             ) recent \
             ORDER BY executed_at ASC"
        );
        sqlx::query_as::<_, BaselineRow>(&query)
            .bind(check_id)
            .bind(before)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Past results within `window`, newest first.
    pub async fn history(
        pool: &PgPool,
        check_id: DbId,
        window: &HistoryWindow,
    ) -> Result<Vec<CheckResultRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM check_results \
             WHERE check_id = $1 \
               AND ($2::timestamptz IS NULL OR executed_at >= $2) \
               AND ($3::timestamptz IS NULL OR executed_at < $3) \
             ORDER BY executed_at DESC \
             LIMIT $4"
        );
        sqlx::query_as::<_, CheckResultRow>(&query)
            .bind(check_id)
            .bind(window.since)
            .bind(window.until)
            .bind(window.effective_limit() as i64)
            .fetch_all(pool)
            .await
    }
}
