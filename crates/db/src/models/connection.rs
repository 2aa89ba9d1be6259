//! Warehouse connection models.

use dq_core::dialect::Dialect;
use dq_core::error::CoreError;
use dq_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `connections` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Connection {
    pub id: DbId,
    pub name: String,
    pub dialect: String,
    /// Driver connection string. Never logged.
    #[serde(skip_serializing)]
    pub dsn: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Connection {
    pub fn dialect(&self) -> Result<Dialect, CoreError> {
        Dialect::parse(&self.dialect)
    }
}

/// DTO for registering a connection.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateConnection {
    pub name: String,
    pub dialect: Dialect,
    pub dsn: String,
}
