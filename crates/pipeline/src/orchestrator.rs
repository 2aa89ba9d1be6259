//! Drives one check execution end to end.
//!
//! Every call to [`CheckOrchestrator::execute`] produces exactly one
//! [`CheckResult`] and attempts to append it to the results store. Failures
//! anywhere along the way (invalid definition, render, connection, query,
//! timeout, coercion, evaluation) become a result with `error` populated,
//! `passed = false` and `severity = error`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dq_core::check::CheckDefinition;
use dq_core::render::{render, TemplateError};
use dq_core::resolver::{baseline_needs, resolve, Resolution};
use dq_core::result::CheckResult;
use dq_core::rules::{Baseline, RuleError};
use dq_core::types::{DbId, Timestamp};
use dq_core::value::{coerce, CoercionError, QueryRows, SensorValue};

use crate::baseline::BaselineProvider;
use crate::store::{ConnectionRegistry, ExecutorError, QueryExecutor, ResultsStore};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Exponential backoff for transient connection errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay following `current`, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Budget for the whole dispatch, retries and backoff included.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an execution produced no measurement.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Invalid check definition: {0}")]
    Definition(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Coercion error: {0}")]
    Coercion(#[from] CoercionError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] RuleError),
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Definition(_) => "definition",
            ExecutionError::Template(_) => "template",
            ExecutionError::Connection(_) => "connection",
            ExecutionError::Query(_) => "query",
            ExecutionError::Timeout(_) => "timeout",
            ExecutionError::Coercion(_) => "coercion",
            ExecutionError::Evaluation(_) => "evaluation",
        }
    }
}

/// A successful measurement and its evaluation.
struct Measurement {
    value: Option<SensorValue>,
    resolution: Resolution,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct CheckOrchestrator {
    registry: Arc<dyn ConnectionRegistry>,
    executor: Arc<dyn QueryExecutor>,
    results: Arc<dyn ResultsStore>,
    baselines: BaselineProvider,
    config: ExecutionConfig,
}

impl CheckOrchestrator {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        executor: Arc<dyn QueryExecutor>,
        results: Arc<dyn ResultsStore>,
        config: ExecutionConfig,
    ) -> Self {
        let baselines = BaselineProvider::new(Arc::clone(&results));
        Self {
            registry,
            executor,
            results,
            baselines,
            config,
        }
    }

    pub fn with_baselines(mut self, baselines: BaselineProvider) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Execute `check` now.
    pub async fn execute(&self, check: &CheckDefinition) -> CheckResult {
        self.execute_at(check, Utc::now()).await
    }

    /// Execute `check` as of `now`, which becomes the result's `executed_at`
    /// and anchors partition bounds and baseline lookups.
    pub async fn execute_at(&self, check: &CheckDefinition, now: Timestamp) -> CheckResult {
        let started = Instant::now();
        let mut rendered_query = String::new();
        let outcome = self.measure(check, now, &mut rendered_query).await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let result = match outcome {
            Ok(m) => CheckResult::evaluated(
                check.id,
                now,
                m.value,
                m.resolution,
                rendered_query,
                latency_ms,
            ),
            Err(e) => {
                tracing::warn!(
                    check_id = check.id,
                    error_kind = e.kind(),
                    error = %e,
                    "Check execution failed"
                );
                CheckResult::execution_failed(check.id, now, rendered_query, e.to_string(), latency_ms)
            }
        };

        tracing::info!(
            check_id = check.id,
            passed = result.passed,
            indeterminate = result.indeterminate,
            severity = result.severity.map(|s| s.as_str()),
            latency_ms,
            "Check executed"
        );

        if let Err(e) = self.results.append(&result).await {
            tracing::error!(check_id = check.id, error = %e, "Failed to persist check result");
        }
        result
    }

    async fn measure(
        &self,
        check: &CheckDefinition,
        now: Timestamp,
        rendered_query: &mut String,
    ) -> Result<Measurement, ExecutionError> {
        check
            .validate()
            .map_err(|e| ExecutionError::Definition(e.to_string()))?;

        let dialect = self
            .registry
            .resolve(check.connection_id)
            .await
            .map_err(|e| ExecutionError::Connection(e.to_string()))?;

        let partition = check.partition_window(now);
        *rendered_query = render(
            dialect,
            check.sensor,
            &check.target,
            &check.sensor_params,
            partition.as_ref(),
        )?;

        let rows = self.dispatch(check.connection_id, rendered_query).await?;
        let value = coerce(rows.scalar(), check.sensor.return_type())?;

        let tiers = check.tier_rules();
        let needs = baseline_needs(&tiers);
        let baseline = if needs.is_empty() {
            Baseline::default()
        } else {
            self.baselines.fetch(check.id, now, &needs).await
        };

        let resolution = resolve(&tiers, value.as_ref(), &baseline)?;
        Ok(Measurement { value, resolution })
    }

    /// Run the query under the configured timeout.
    ///
    /// Expiry drops the in-flight executor future, cancelling the call.
    async fn dispatch(&self, connection_id: DbId, query: &str) -> Result<QueryRows, ExecutionError> {
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.dispatch_with_retry(connection_id, query)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ExecutionError::Timeout(timeout)),
        }
    }

    async fn dispatch_with_retry(
        &self,
        connection_id: DbId,
        query: &str,
    ) -> Result<QueryRows, ExecutionError> {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut delay = policy.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self
                .executor
                .execute(connection_id, query, self.config.timeout)
                .await
            {
                Ok(rows) => return Ok(rows),
                Err(ExecutorError::Connection(msg)) if attempt < max_attempts => {
                    tracing::warn!(
                        connection_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "Connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = policy.next_delay(delay);
                }
                Err(ExecutorError::Connection(msg)) => return Err(ExecutionError::Connection(msg)),
                Err(ExecutorError::Query(msg)) => return Err(ExecutionError::Query(msg)),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
