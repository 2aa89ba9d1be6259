//! Repository for the `connections` table.

use dq_core::types::DbId;
use sqlx::PgPool;

use crate::models::connection::{Connection, CreateConnection};

/// Column list for `connections` queries.
const COLUMNS: &str = "id, name, dialect, dsn, created_at, updated_at";

pub struct ConnectionRepo;

impl ConnectionRepo {
    pub async fn create(pool: &PgPool, input: &CreateConnection) -> Result<Connection, sqlx::Error> {
        let query = format!(
            "INSERT INTO connections (name, dialect, dsn) VALUES ($1, $2, $3) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Connection>(&query)
            .bind(&input.name)
            .bind(input.dialect.as_str())
            .bind(&input.dsn)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Connection>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM connections WHERE id = $1");
        sqlx::query_as::<_, Connection>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<Connection>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM connections ORDER BY name");
        sqlx::query_as::<_, Connection>(&query).fetch_all(pool).await
    }
}
