//! Repository for the `checks` table.

use dq_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::check::{Check, CreateCheck};

/// Column list for `checks` queries.
const COLUMNS: &str = "\
    id, name, connection_id, sensor, rule, \
    target_schema, target_table, target_column, \
    mode, time_scale, partition_column, \
    sensor_params, rule_tiers, is_active, created_at, updated_at";

pub struct CheckRepo;

impl CheckRepo {
    /// Insert a check. Callers validate the definition first.
    pub async fn create(pool: &PgPool, input: &CreateCheck) -> Result<Check, sqlx::Error> {
        let query = format!(
            "INSERT INTO checks \
                (name, connection_id, sensor, rule, target_schema, target_table, target_column, \
                 mode, time_scale, partition_column, sensor_params, rule_tiers) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Check>(&query)
            .bind(&input.name)
            .bind(input.connection_id)
            .bind(input.sensor.as_str())
            .bind(input.rule.as_str())
            .bind(&input.target.schema)
            .bind(&input.target.table)
            .bind(&input.target.column)
            .bind(input.mode.as_str())
            .bind(input.time_scale.as_str())
            .bind(&input.partition_column)
            .bind(Json(&input.sensor_params))
            .bind(Json(&input.rule_tiers))
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Check>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM checks WHERE id = $1");
        sqlx::query_as::<_, Check>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All active checks, ordered by id.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<Check>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM checks WHERE is_active ORDER BY id");
        sqlx::query_as::<_, Check>(&query).fetch_all(pool).await
    }

    /// Enable or disable a check. Returns `false` if it does not exist.
    pub async fn set_active(pool: &PgPool, id: DbId, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE checks SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
