//! In-process implementations of the collaborator traits.
//!
//! Used by tests and by embedders that do not need durability. The incident
//! store enforces the same one-live-incident and version guards as the
//! PostgreSQL implementation, under a single mutex.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use dq_core::check::CheckDefinition;
use dq_core::dialect::Dialect;
use dq_core::incident::{Incident, IncidentStatus, NewIncident};
use dq_core::result::{CheckResult, HistoryWindow};
use dq_core::types::{DbId, Timestamp};
use tokio::sync::{Mutex, RwLock};

use crate::store::{
    BaselinePoint, CheckCatalog, ConnectionRegistry, IncidentStore, IncidentWriteError,
    RegistryError, ResultsStore, StoreError,
};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryResultsStore {
    results: RwLock<Vec<CheckResult>>,
}

impl InMemoryResultsStore {
    /// Append without going through the trait.
    pub async fn push(&self, result: CheckResult) {
        self.results.write().await.push(result);
    }

    /// All results of a check in insertion order.
    pub async fn all_for(&self, check_id: DbId) -> Vec<CheckResult> {
        self.results
            .read()
            .await
            .iter()
            .filter(|r| r.check_id == check_id)
            .cloned()
            .collect()
    }

    /// Baseline points before `before`, oldest first.
    async fn points_before(&self, check_id: DbId, before: Timestamp) -> Vec<BaselinePoint> {
        let mut points: Vec<BaselinePoint> = self
            .results
            .read()
            .await
            .iter()
            .filter(|r| r.check_id == check_id && r.executed_at < before)
            .filter_map(|r| {
                r.baseline_value().map(|value| BaselinePoint {
                    executed_at: r.executed_at,
                    value,
                })
            })
            .collect();
        points.sort_by_key(|p| p.executed_at);
        points
    }
}

#[async_trait]
impl ResultsStore for InMemoryResultsStore {
    async fn append(&self, result: &CheckResult) -> Result<(), StoreError> {
        self.push(result.clone()).await;
        Ok(())
    }

    async fn query_latest_before(
        &self,
        check_id: DbId,
        before: Timestamp,
    ) -> Result<Option<BaselinePoint>, StoreError> {
        Ok(self.points_before(check_id, before).await.pop())
    }

    async fn query_earliest_between(
        &self,
        check_id: DbId,
        after: Timestamp,
        before: Timestamp,
    ) -> Result<Option<BaselinePoint>, StoreError> {
        Ok(self
            .points_before(check_id, before)
            .await
            .into_iter()
            .find(|p| p.executed_at > after))
    }

    async fn query_window(
        &self,
        check_id: DbId,
        limit: usize,
        before: Timestamp,
    ) -> Result<Vec<BaselinePoint>, StoreError> {
        let mut points = self.points_before(check_id, before).await;
        let skip = points.len().saturating_sub(limit);
        Ok(points.split_off(skip))
    }

    async fn list_history(
        &self,
        check_id: DbId,
        window: &HistoryWindow,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let mut matching: Vec<CheckResult> = self
            .results
            .read()
            .await
            .iter()
            .filter(|r| r.check_id == check_id && window.contains(r.executed_at))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        matching.truncate(window.effective_limit());
        Ok(matching)
    }
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

#[derive(Default)]
struct IncidentTable {
    next_id: DbId,
    incidents: BTreeMap<DbId, Incident>,
}

#[derive(Default)]
pub struct InMemoryIncidentStore {
    table: Mutex<IncidentTable>,
}

impl InMemoryIncidentStore {
    /// Live incidents of a check. More than one means the guard failed.
    pub async fn live_count(&self, check_id: DbId) -> usize {
        self.table
            .lock()
            .await
            .incidents
            .values()
            .filter(|i| i.check_id == check_id && i.status.is_live())
            .count()
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn find_live(&self, check_id: DbId) -> Result<Option<Incident>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .incidents
            .values()
            .find(|i| i.check_id == check_id && i.status.is_live())
            .cloned())
    }

    async fn insert_live(&self, input: &NewIncident) -> Result<Incident, IncidentWriteError> {
        let mut table = self.table.lock().await;
        let exists = table
            .incidents
            .values()
            .any(|i| i.check_id == input.check_id && i.status.is_live());
        if exists {
            return Err(IncidentWriteError::Conflict);
        }

        table.next_id += 1;
        let incident = Incident {
            id: table.next_id,
            check_id: input.check_id,
            status: IncidentStatus::Open,
            severity: input.severity,
            failure_count: 1,
            first_seen: input.seen_at,
            last_seen: input.seen_at,
            acknowledged_at: None,
            muted_at: None,
            resolved_at: None,
            version: 1,
        };
        table.incidents.insert(incident.id, incident.clone());
        Ok(incident)
    }

    async fn update(
        &self,
        incident: &Incident,
        expected_version: i64,
    ) -> Result<Incident, IncidentWriteError> {
        let mut table = self.table.lock().await;
        let stored = table.incidents.get_mut(&incident.id).ok_or_else(|| {
            IncidentWriteError::Store(StoreError::Corrupt(format!(
                "Incident {} does not exist",
                incident.id
            )))
        })?;
        if stored.version != expected_version {
            return Err(IncidentWriteError::Conflict);
        }
        let mut updated = incident.clone();
        updated.version = expected_version + 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn get(&self, incident_id: DbId) -> Result<Option<Incident>, StoreError> {
        Ok(self.table.lock().await.incidents.get(&incident_id).cloned())
    }

    async fn list(&self, check_id: Option<DbId>) -> Result<Vec<Incident>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .incidents
            .values()
            .rev()
            .filter(|i| check_id.map_or(true, |c| i.check_id == c))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Catalog and registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryCheckCatalog {
    checks: RwLock<HashMap<DbId, CheckDefinition>>,
}

impl InMemoryCheckCatalog {
    pub async fn insert(&self, check: CheckDefinition) {
        self.checks.write().await.insert(check.id, check);
    }
}

#[async_trait]
impl CheckCatalog for InMemoryCheckCatalog {
    async fn get_check(&self, check_id: DbId) -> Result<Option<CheckDefinition>, StoreError> {
        Ok(self.checks.read().await.get(&check_id).cloned())
    }
}

/// Fixed connection-to-dialect map.
#[derive(Debug, Default, Clone)]
pub struct StaticConnectionRegistry {
    dialects: HashMap<DbId, Dialect>,
}

impl StaticConnectionRegistry {
    pub fn with(mut self, connection_id: DbId, dialect: Dialect) -> Self {
        self.dialects.insert(connection_id, dialect);
        self
    }
}

#[async_trait]
impl ConnectionRegistry for StaticConnectionRegistry {
    async fn resolve(&self, connection_id: DbId) -> Result<Dialect, RegistryError> {
        self.dialects
            .get(&connection_id)
            .copied()
            .ok_or(RegistryError::UnknownConnection(connection_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
