//! Warehouse query execution over PostgreSQL-protocol connections.
//!
//! Connection strings come from the `connections` table. One lazily
//! connected pool is kept per connection id. Every rendered query is
//! wrapped so the measured cell comes back as text under the
//! `sensor_value` alias, leaving numeric and hash coercion to the pipeline.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dq_core::dialect::Dialect;
use dq_core::types::DbId;
use dq_core::value::{QueryRows, ScalarValue, SENSOR_VALUE_COLUMN};
use dq_db::repositories::ConnectionRepo;
use dq_db::DbPool;
use dq_pipeline::store::{ExecutorError, QueryExecutor};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::RwLock;

/// Connections per warehouse pool.
const WAREHOUSE_POOL_SIZE: u32 = 4;

/// Time allowed to obtain a warehouse connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PgQueryExecutor {
    catalog: DbPool,
    pools: RwLock<HashMap<DbId, PgPool>>,
}

impl PgQueryExecutor {
    /// `catalog` is the pipeline's own database, where connection strings
    /// are registered.
    pub fn new(catalog: DbPool) -> Self {
        Self {
            catalog,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Number of warehouse pools opened so far.
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    async fn pool_for(&self, connection_id: DbId) -> Result<PgPool, ExecutorError> {
        if let Some(pool) = self.pools.read().await.get(&connection_id) {
            return Ok(pool.clone());
        }

        let connection = ConnectionRepo::find_by_id(&self.catalog, connection_id)
            .await
            .map_err(classify)?
            .ok_or_else(|| ExecutorError::Query(format!("Unknown connection {connection_id}")))?;
        let dialect = connection
            .dialect()
            .map_err(|e| ExecutorError::Query(e.to_string()))?;
        if !speaks_postgres(dialect) {
            return Err(ExecutorError::Query(format!(
                "No executor available for {} connections",
                dialect.as_str()
            )));
        }

        let pool = PgPoolOptions::new()
            .max_connections(WAREHOUSE_POOL_SIZE)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(&connection.dsn)
            .map_err(|e| ExecutorError::Query(format!("Invalid connection string: {e}")))?;

        let mut pools = self.pools.write().await;
        let pool = pools.entry(connection_id).or_insert(pool).clone();
        tracing::info!(connection_id, name = %connection.name, "Opened warehouse pool");
        Ok(pool)
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(
        &self,
        connection_id: DbId,
        query: &str,
        timeout: Duration,
    ) -> Result<QueryRows, ExecutorError> {
        let pool = self.pool_for(connection_id).await?;
        let mut tx = pool.begin().await.map_err(classify)?;

        // Server-side bound; dropping the future alone leaves the statement running.
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            timeout.as_millis().max(1)
        ))
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        let cell: Option<Option<String>> = sqlx::query_scalar(&wrap(query))
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?;
        tx.rollback().await.map_err(classify)?;

        let rows = match cell {
            None => Vec::new(),
            Some(None) => vec![vec![ScalarValue::Null]],
            Some(Some(text)) => vec![vec![ScalarValue::Text(text)]],
        };
        Ok(QueryRows {
            columns: vec![SENSOR_VALUE_COLUMN.to_string()],
            rows,
        })
    }
}

fn speaks_postgres(dialect: Dialect) -> bool {
    matches!(dialect, Dialect::Postgres | Dialect::Redshift)
}

fn wrap(query: &str) -> String {
    format!(
        "SELECT {SENSOR_VALUE_COLUMN}::text AS {SENSOR_VALUE_COLUMN} FROM ({}) AS sensor_query",
        query.trim().trim_end_matches(';')
    )
}

/// Transport failures are transient; everything else is the query's fault.
fn classify(e: sqlx::Error) -> ExecutorError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ExecutorError::Connection(e.to_string()),
        other => ExecutorError::Query(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
