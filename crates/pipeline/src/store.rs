//! Collaborator traits consumed by the pipeline.
//!
//! Production implementations live in `dq-worker` (PostgreSQL); in-process
//! ones live in [`crate::memory`].

use std::time::Duration;

use async_trait::async_trait;
use dq_core::check::CheckDefinition;
use dq_core::dialect::Dialect;
use dq_core::incident::{Incident, NewIncident};
use dq_core::result::{CheckResult, HistoryWindow};
use dq_core::types::{DbId, Timestamp};
use dq_core::value::QueryRows;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a query executor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    /// Transient: the data source could not be reached. Retried.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The data source rejected or failed the query. Not retried.
    #[error("Query error: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown connection {0}")]
    UnknownConnection(DbId),

    #[error("Connection registry unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a results, incident or catalog store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid stored data: {0}")]
    Corrupt(String),
}

/// Failure of a guarded incident write.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IncidentWriteError {
    /// A concurrent writer got there first: a live incident already exists
    /// on insert, or the version moved on update.
    #[error("Incident write conflict")]
    Conflict,

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Runs rendered queries against a data source.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        connection_id: DbId,
        query: &str,
        timeout: Duration,
    ) -> Result<QueryRows, ExecutorError>;
}

/// Maps a connection to the dialect its queries are rendered in.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn resolve(&self, connection_id: DbId) -> Result<Dialect, RegistryError>;
}

/// A numeric measurement from result history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselinePoint {
    pub executed_at: Timestamp,
    pub value: f64,
}

/// Append-only result history.
///
/// Baseline queries return only results with a numeric value and no
/// execution error.
#[async_trait]
pub trait ResultsStore: Send + Sync {
    async fn append(&self, result: &CheckResult) -> Result<(), StoreError>;

    /// Most recent baseline point with `executed_at < before`.
    async fn query_latest_before(
        &self,
        check_id: DbId,
        before: Timestamp,
    ) -> Result<Option<BaselinePoint>, StoreError>;

    /// Earliest baseline point with `after < executed_at < before`.
    async fn query_earliest_between(
        &self,
        check_id: DbId,
        after: Timestamp,
        before: Timestamp,
    ) -> Result<Option<BaselinePoint>, StoreError>;

    /// Up to `limit` most recent baseline points with `executed_at < before`,
    /// oldest first.
    async fn query_window(
        &self,
        check_id: DbId,
        limit: usize,
        before: Timestamp,
    ) -> Result<Vec<BaselinePoint>, StoreError>;

    /// Results within `window`, newest first.
    async fn list_history(
        &self,
        check_id: DbId,
        window: &HistoryWindow,
    ) -> Result<Vec<CheckResult>, StoreError>;
}

/// Incident persistence with an atomic one-live-incident-per-check guard.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn find_live(&self, check_id: DbId) -> Result<Option<Incident>, StoreError>;

    /// Insert an open incident. Fails with [`IncidentWriteError::Conflict`]
    /// when the check already has a live incident.
    async fn insert_live(&self, incident: &NewIncident) -> Result<Incident, IncidentWriteError>;

    /// Persist `incident` if the stored version equals `expected_version`.
    /// The returned incident carries the bumped version.
    async fn update(
        &self,
        incident: &Incident,
        expected_version: i64,
    ) -> Result<Incident, IncidentWriteError>;

    async fn get(&self, incident_id: DbId) -> Result<Option<Incident>, StoreError>;

    /// Incidents newest first, optionally for one check.
    async fn list(&self, check_id: Option<DbId>) -> Result<Vec<Incident>, StoreError>;
}

/// Source of check definitions.
#[async_trait]
pub trait CheckCatalog: Send + Sync {
    async fn get_check(&self, check_id: DbId) -> Result<Option<CheckDefinition>, StoreError>;
}
