//! PostgreSQL implementations of the pipeline's collaborator traits.
//!
//! Each adapter is a thin shell over a `dq-db` repository. Driver failures
//! become [`StoreError::Unavailable`]; rows that no longer decode into
//! domain types become [`StoreError::Corrupt`].

use async_trait::async_trait;
use dq_core::check::CheckDefinition;
use dq_core::dialect::Dialect;
use dq_core::error::CoreError;
use dq_core::incident::{Incident, NewIncident};
use dq_core::result::{CheckResult, HistoryWindow};
use dq_core::types::{DbId, Timestamp};
use dq_db::repositories::{CheckRepo, CheckResultRepo, ConnectionRepo, IncidentRepo};
use dq_db::DbPool;
use dq_pipeline::store::{
    BaselinePoint, CheckCatalog, ConnectionRegistry, IncidentStore, IncidentWriteError,
    RegistryError, ResultsStore, StoreError,
};

/// Incidents returned by an unfiltered listing.
const INCIDENT_LIST_LIMIT: i64 = 100;

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn corrupt(e: CoreError) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

pub struct PgResultsStore {
    pool: DbPool,
}

impl PgResultsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultsStore for PgResultsStore {
    async fn append(&self, result: &CheckResult) -> Result<(), StoreError> {
        CheckResultRepo::append(&self.pool, result)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn query_latest_before(
        &self,
        check_id: DbId,
        before: Timestamp,
    ) -> Result<Option<BaselinePoint>, StoreError> {
        let row = CheckResultRepo::latest_before(&self.pool, check_id, before)
            .await
            .map_err(unavailable)?;
        Ok(row.map(|r| BaselinePoint {
            executed_at: r.executed_at,
            value: r.value,
        }))
    }

    async fn query_earliest_between(
        &self,
        check_id: DbId,
        after: Timestamp,
        before: Timestamp,
    ) -> Result<Option<BaselinePoint>, StoreError> {
        let row = CheckResultRepo::earliest_between(&self.pool, check_id, after, before)
            .await
            .map_err(unavailable)?;
        Ok(row.map(|r| BaselinePoint {
            executed_at: r.executed_at,
            value: r.value,
        }))
    }

    async fn query_window(
        &self,
        check_id: DbId,
        limit: usize,
        before: Timestamp,
    ) -> Result<Vec<BaselinePoint>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = CheckResultRepo::window(&self.pool, check_id, before, limit)
            .await
            .map_err(unavailable)?;
        Ok(rows
            .into_iter()
            .map(|r| BaselinePoint {
                executed_at: r.executed_at,
                value: r.value,
            })
            .collect())
    }

    async fn list_history(
        &self,
        check_id: DbId,
        window: &HistoryWindow,
    ) -> Result<Vec<CheckResult>, StoreError> {
        CheckResultRepo::history(&self.pool, check_id, window)
            .await
            .map_err(unavailable)?
            .into_iter()
            .map(|row| row.into_domain().map_err(corrupt))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

pub struct PgIncidentStore {
    pool: DbPool,
}

impl PgIncidentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    async fn find_live(&self, check_id: DbId) -> Result<Option<Incident>, StoreError> {
        IncidentRepo::find_live(&self.pool, check_id)
            .await
            .map_err(unavailable)?
            .map(|row| row.into_domain().map_err(corrupt))
            .transpose()
    }

    async fn insert_live(&self, incident: &NewIncident) -> Result<Incident, IncidentWriteError> {
        match IncidentRepo::insert_live(&self.pool, incident)
            .await
            .map_err(unavailable)?
        {
            Some(row) => Ok(row.into_domain().map_err(corrupt)?),
            None => Err(IncidentWriteError::Conflict),
        }
    }

    async fn update(
        &self,
        incident: &Incident,
        expected_version: i64,
    ) -> Result<Incident, IncidentWriteError> {
        match IncidentRepo::update_if_version(&self.pool, incident, expected_version)
            .await
            .map_err(unavailable)?
        {
            Some(row) => Ok(row.into_domain().map_err(corrupt)?),
            None => Err(IncidentWriteError::Conflict),
        }
    }

    async fn get(&self, incident_id: DbId) -> Result<Option<Incident>, StoreError> {
        IncidentRepo::find_by_id(&self.pool, incident_id)
            .await
            .map_err(unavailable)?
            .map(|row| row.into_domain().map_err(corrupt))
            .transpose()
    }

    async fn list(&self, check_id: Option<DbId>) -> Result<Vec<Incident>, StoreError> {
        IncidentRepo::list(&self.pool, check_id, None, INCIDENT_LIST_LIMIT)
            .await
            .map_err(unavailable)?
            .into_iter()
            .map(|row| row.into_domain().map_err(corrupt))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Catalog and registry
// ---------------------------------------------------------------------------

pub struct PgCheckCatalog {
    pool: DbPool,
}

impl PgCheckCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckCatalog for PgCheckCatalog {
    async fn get_check(&self, check_id: DbId) -> Result<Option<CheckDefinition>, StoreError> {
        CheckRepo::find_by_id(&self.pool, check_id)
            .await
            .map_err(unavailable)?
            .map(|row| row.into_definition().map_err(corrupt))
            .transpose()
    }
}

pub struct PgConnectionRegistry {
    pool: DbPool,
}

impl PgConnectionRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionRegistry for PgConnectionRegistry {
    async fn resolve(&self, connection_id: DbId) -> Result<Dialect, RegistryError> {
        let connection = ConnectionRepo::find_by_id(&self.pool, connection_id)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?
            .ok_or(RegistryError::UnknownConnection(connection_id))?;
        connection
            .dialect()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))
    }
}
