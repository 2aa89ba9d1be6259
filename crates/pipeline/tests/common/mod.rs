//! Shared fakes for pipeline integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dq_core::check::{CheckDefinition, CheckMode, RuleTiers, TargetDescriptor};
use dq_core::dialect::Dialect;
use dq_core::incident::IncidentPolicy;
use dq_core::params::ParamMap;
use dq_core::partition::TimeScale;
use dq_core::rules::RuleKind;
use dq_core::sensor::SensorKind;
use dq_core::types::DbId;
use dq_core::value::{QueryRows, ScalarValue};
use dq_events::EventBus;
use dq_pipeline::memory::{
    InMemoryCheckCatalog, InMemoryIncidentStore, InMemoryResultsStore, StaticConnectionRegistry,
};
use dq_pipeline::store::{ExecutorError, QueryExecutor};
use dq_pipeline::{CheckOrchestrator, CheckService, ExecutionConfig, IncidentManager};
use tokio::sync::Mutex;

pub const CONNECTION_ID: DbId = 1;

/// One scripted executor response.
#[derive(Debug, Clone)]
pub enum Step {
    Value(f64),
    Null,
    Fail(ExecutorError),
    /// Sleep, then return the value.
    Slow(Duration, f64),
}

/// Executor replaying scripted steps, then repeating `fallback`.
pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub queries: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self::with_fallback(steps, Step::Value(0.0))
    }

    pub fn with_fallback(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn values(values: &[f64]) -> Self {
        Self::new(values.iter().map(|v| Step::Value(*v)))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn rows(value: ScalarValue) -> QueryRows {
    QueryRows {
        columns: vec!["sensor_value".into()],
        rows: vec![vec![value]],
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _connection_id: DbId,
        query: &str,
        _timeout: Duration,
    ) -> Result<QueryRows, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().await.push(query.to_string());
        let step = self
            .steps
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let outcome = match step {
            Step::Value(v) => Ok(rows(ScalarValue::Float(v))),
            Step::Null => Ok(rows(ScalarValue::Null)),
            Step::Fail(e) => Err(e),
            Step::Slow(delay, v) => {
                tokio::time::sleep(delay).await;
                Ok(rows(ScalarValue::Float(v)))
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Everything wired together over in-memory stores.
pub struct Harness {
    pub executor: Arc<ScriptedExecutor>,
    pub results: Arc<InMemoryResultsStore>,
    pub incidents: Arc<InMemoryIncidentStore>,
    pub catalog: Arc<InMemoryCheckCatalog>,
    pub bus: Arc<EventBus>,
    pub service: Arc<CheckService>,
}

impl Harness {
    pub fn new(executor: ScriptedExecutor) -> Self {
        Self::with_config(executor, ExecutionConfig::default(), IncidentPolicy::default())
    }

    pub fn with_config(
        executor: ScriptedExecutor,
        config: ExecutionConfig,
        policy: IncidentPolicy,
    ) -> Self {
        let executor = Arc::new(executor);
        let results = Arc::new(InMemoryResultsStore::default());
        let incidents = Arc::new(InMemoryIncidentStore::default());
        let catalog = Arc::new(InMemoryCheckCatalog::default());
        let bus = Arc::new(EventBus::default());
        let registry = StaticConnectionRegistry::default().with(CONNECTION_ID, Dialect::Postgres);

        let orchestrator =
            CheckOrchestrator::new(Arc::new(registry), executor.clone(), results.clone(), config);
        let manager = IncidentManager::new(incidents.clone(), bus.clone(), policy);
        let service = Arc::new(CheckService::new(
            catalog.clone(),
            results.clone(),
            orchestrator,
            manager,
        ));

        Self {
            executor,
            results,
            incidents,
            catalog,
            bus,
            service,
        }
    }

    /// An orchestrator sharing this harness's executor and results store.
    pub fn orchestrator(&self, config: ExecutionConfig) -> CheckOrchestrator {
        let registry = StaticConnectionRegistry::default().with(CONNECTION_ID, Dialect::Postgres);
        CheckOrchestrator::new(
            Arc::new(registry),
            self.executor.clone(),
            self.results.clone(),
            config,
        )
    }
}

pub fn tiers(value: serde_json::Value) -> RuleTiers {
    serde_json::from_value(value).expect("valid tiers")
}

/// `nulls_percent` on `public.customers.email` with warning 5 / error 10.
pub fn nulls_check(id: DbId) -> CheckDefinition {
    CheckDefinition {
        id,
        name: format!("email nulls #{id}"),
        connection_id: CONNECTION_ID,
        sensor: SensorKind::NullsPercent,
        rule: RuleKind::MaxPercent,
        target: TargetDescriptor {
            schema: "public".into(),
            table: "customers".into(),
            column: Some("email".into()),
        },
        mode: CheckMode::Monitoring,
        time_scale: TimeScale::Daily,
        partition_column: None,
        sensor_params: ParamMap::new(),
        rule_tiers: tiers(serde_json::json!({
            "warning": {"max_percent": 5},
            "error": {"max_percent": 10},
        })),
        is_active: true,
    }
}

/// `row_count` on `public.orders` with the given rule and tiers.
pub fn row_count_check(id: DbId, rule: RuleKind, rule_tiers: RuleTiers) -> CheckDefinition {
    CheckDefinition {
        id,
        name: format!("orders rows #{id}"),
        connection_id: CONNECTION_ID,
        sensor: SensorKind::RowCount,
        rule,
        target: TargetDescriptor {
            schema: "public".into(),
            table: "orders".into(),
            column: None,
        },
        mode: CheckMode::Monitoring,
        time_scale: TimeScale::Daily,
        partition_column: None,
        sensor_params: ParamMap::new(),
        rule_tiers,
        is_active: true,
    }
}
