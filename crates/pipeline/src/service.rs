//! Caller-facing facade over the orchestrator and incident manager.

use std::sync::Arc;

use dq_core::check::CheckDefinition;
use dq_core::result::{CheckResult, HistoryWindow};
use dq_core::types::DbId;

use crate::incident_manager::IncidentManager;
use crate::keyed_lock::KeyedMutex;
use crate::orchestrator::CheckOrchestrator;
use crate::store::{CheckCatalog, ResultsStore, StoreError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("Check {0} not found")]
    NotFound(DbId),

    #[error("Check {0} is inactive")]
    Inactive(DbId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job was cancelled before it ran")]
    Cancelled,

    #[error("Worker pool is shutting down")]
    ShuttingDown,
}

pub struct CheckService {
    catalog: Arc<dyn CheckCatalog>,
    results: Arc<dyn ResultsStore>,
    orchestrator: CheckOrchestrator,
    incidents: IncidentManager,
    executions: KeyedMutex,
}

impl CheckService {
    pub fn new(
        catalog: Arc<dyn CheckCatalog>,
        results: Arc<dyn ResultsStore>,
        orchestrator: CheckOrchestrator,
        incidents: IncidentManager,
    ) -> Self {
        Self {
            catalog,
            results,
            orchestrator,
            incidents,
            executions: KeyedMutex::default(),
        }
    }

    pub fn incidents(&self) -> &IncidentManager {
        &self.incidents
    }

    /// Run a check synchronously and return its result.
    ///
    /// Execution failures are not errors here: they come back as a result
    /// with `error` set. Only lookup problems are surfaced as `Err`.
    pub async fn execute_check(&self, check_id: DbId) -> Result<CheckResult, ServiceError> {
        let check = self
            .catalog
            .get_check(check_id)
            .await?
            .ok_or(ServiceError::NotFound(check_id))?;
        if !check.is_active {
            return Err(ServiceError::Inactive(check_id));
        }
        Ok(self.run(&check).await)
    }

    /// Run an already-loaded definition.
    ///
    /// Runs of the same check are serialized from execution through the
    /// incident update, so results reach the incident manager in
    /// `executed_at` order.
    pub async fn run(&self, check: &CheckDefinition) -> CheckResult {
        let _guard = self.executions.lock(check.id).await;
        let result = self.orchestrator.execute(check).await;
        if let Err(e) = self.incidents.on_result(&result).await {
            tracing::error!(check_id = check.id, error = %e, "Failed to apply result to incident");
        }
        result
    }

    /// Past results of a check, newest first.
    pub async fn list_result_history(
        &self,
        check_id: DbId,
        window: &HistoryWindow,
    ) -> Result<Vec<CheckResult>, ServiceError> {
        Ok(self.results.list_history(check_id, window).await?)
    }
}
