//! Orchestrator behaviour: one result per run, retries, timeouts, baselines.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::{nulls_check, row_count_check, tiers, Harness, ScriptedExecutor, Step};
use dq_core::check::{CheckMode, TargetDescriptor};
use dq_core::dialect::Dialect;
use dq_core::rules::RuleKind;
use dq_core::sensor::SensorKind;
use dq_core::severity::Severity;
use dq_core::types::Timestamp;
use dq_core::value::SensorValue;
use dq_pipeline::memory::StaticConnectionRegistry;
use dq_pipeline::store::ExecutorError;
use dq_pipeline::{CheckOrchestrator, ExecutionConfig, RetryPolicy};
use serde_json::json;
use std::sync::Arc;

fn day(d: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 4, d, 6, 0, 0).unwrap()
}

fn quick_retry(max_attempts: u32) -> ExecutionConfig {
    ExecutionConfig {
        timeout: Duration::from_secs(60),
        retry: RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        },
    }
}

// -- evaluation ----------------------------------------------------------------

#[tokio::test]
async fn severity_follows_most_severe_failing_tier() {
    let h = Harness::new(ScriptedExecutor::values(&[12.0, 7.0, 3.0]));
    let orch = h.orchestrator(ExecutionConfig::default());
    let check = nulls_check(1);

    let severities: Vec<Option<Severity>> = [
        orch.execute_at(&check, day(1)).await,
        orch.execute_at(&check, day(2)).await,
        orch.execute_at(&check, day(3)).await,
    ]
    .iter()
    .map(|r| r.severity)
    .collect();

    assert_eq!(severities, vec![Some(Severity::Error), Some(Severity::Warning), None]);
    assert_eq!(h.results.all_for(1).await.len(), 3);
}

#[tokio::test]
async fn rendered_query_is_recorded() {
    let h = Harness::new(ScriptedExecutor::values(&[1.0]));
    let r = h.orchestrator(ExecutionConfig::default()).execute_at(&nulls_check(1), day(1)).await;
    assert!(r.rendered_query.contains("AS sensor_value"));
    assert!(r.rendered_query.contains("\"customers\""));
    assert_eq!(h.executor.queries.lock().await[0], r.rendered_query);
}

#[tokio::test]
async fn partitioned_run_scopes_to_current_day() {
    let h = Harness::new(ScriptedExecutor::values(&[1.0]));
    let mut check = nulls_check(1);
    check.mode = CheckMode::Partitioned;
    check.partition_column = Some("loaded_at".into());

    let r = h.orchestrator(ExecutionConfig::default()).execute_at(&check, day(9)).await;
    assert!(r.error.is_none(), "unexpected error: {:?}", r.error);
    assert!(r.rendered_query.contains("\"loaded_at\""));
    assert!(r.rendered_query.contains("2024-04-09"));
    assert!(r.rendered_query.contains("2024-04-10"));
}

#[tokio::test]
async fn change_rule_without_history_is_skipped() {
    let check = row_count_check(
        2,
        RuleKind::ChangePercent,
        tiers(json!({"error": {"max_change_percent": 10}})),
    );
    let h = Harness::new(ScriptedExecutor::values(&[100.0, 150.0, 155.0]));
    let orch = h.orchestrator(ExecutionConfig::default());

    let first = orch.execute_at(&check, day(1)).await;
    assert!(first.passed);
    assert_eq!(first.severity, None);

    let second = orch.execute_at(&check, day(2)).await;
    assert!(!second.passed, "50% change must fail the 10% tier");
    assert_eq!(second.severity, Some(Severity::Error));

    let third = orch.execute_at(&check, day(3)).await;
    assert!(third.passed, "155 vs 150 is within 10%");
}

#[tokio::test]
async fn anomaly_is_indeterminate_until_history_grows() {
    let check = row_count_check(
        3,
        RuleKind::AnomalyPercentile,
        tiers(json!({"warning": {"sensitivity": "medium"}})),
    );
    let history = [10.0, 11.0, 9.0, 10.0, 12.0, 10.0, 11.0];
    let mut values = history.to_vec();
    values.push(50.0);
    let h = Harness::new(ScriptedExecutor::values(&values));
    let orch = h.orchestrator(ExecutionConfig::default());

    for (i, _) in history.iter().enumerate() {
        let r = orch.execute_at(&check, day(i as u32 + 1)).await;
        assert!(r.indeterminate, "run {i} should lack history");
        assert_eq!(r.severity, None);
        assert_eq!(r.signal(), None);
    }

    let outlier = orch.execute_at(&check, day(8)).await;
    assert!(!outlier.indeterminate);
    assert_eq!(outlier.severity, Some(Severity::Warning));
}

// -- failures ------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_connection_errors_are_retried() {
    let h = Harness::new(ScriptedExecutor::new([
        Step::Fail(ExecutorError::Connection("reset".into())),
        Step::Fail(ExecutorError::Connection("reset".into())),
        Step::Value(2.0),
    ]));
    let r = h.orchestrator(quick_retry(3)).execute_at(&nulls_check(1), day(1)).await;
    assert!(r.passed);
    assert_eq!(r.sensor_value, Some(SensorValue::Number(2.0)));
    assert_eq!(h.executor.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_record_error_result() {
    let h = Harness::new(ScriptedExecutor::with_fallback(
        [],
        Step::Fail(ExecutorError::Connection("refused".into())),
    ));
    let r = h.orchestrator(quick_retry(3)).execute_at(&nulls_check(1), day(1)).await;
    assert!(!r.passed);
    assert_eq!(r.severity, Some(Severity::Error));
    assert_eq!(r.sensor_value, None);
    assert!(r.error.as_deref().unwrap_or_default().contains("refused"));
    assert_eq!(h.executor.call_count(), 3);
    assert_eq!(h.results.all_for(1).await.len(), 1);
}

#[tokio::test]
async fn query_errors_are_not_retried() {
    let h = Harness::new(ScriptedExecutor::new([Step::Fail(ExecutorError::Query(
        "relation does not exist".into(),
    ))]));
    let r = h.orchestrator(quick_retry(3)).execute_at(&nulls_check(1), day(1)).await;
    assert!(!r.passed);
    assert!(r.error.as_deref().unwrap_or_default().contains("relation does not exist"));
    assert_eq!(h.executor.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_records_error_result() {
    let h = Harness::new(ScriptedExecutor::new([Step::Slow(Duration::from_secs(600), 1.0)]));
    let config = ExecutionConfig {
        timeout: Duration::from_secs(5),
        retry: RetryPolicy::default(),
    };
    let r = h.orchestrator(config).execute_at(&nulls_check(1), day(1)).await;
    assert!(!r.passed);
    assert_eq!(r.severity, Some(Severity::Error));
    assert!(r.error.as_deref().unwrap_or_default().contains("timed out"));
    assert_eq!(h.executor.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn template_error_never_reaches_executor() {
    let h = Harness::new(ScriptedExecutor::values(&[1.0]));
    let registry = StaticConnectionRegistry::default().with(common::CONNECTION_ID, Dialect::MySql);
    let orch = CheckOrchestrator::new(
        Arc::new(registry),
        h.executor.clone(),
        h.results.clone(),
        ExecutionConfig::default(),
    );
    let mut check = row_count_check(4, RuleKind::MaxValue, tiers(json!({"error": {"max_value": 100}})));
    check.sensor = SensorKind::MedianValue;
    check.target = TargetDescriptor {
        schema: "sales".into(),
        table: "orders".into(),
        column: Some("amount".into()),
    };

    let r = orch.execute_at(&check, day(1)).await;
    assert!(!r.passed);
    assert!(r.rendered_query.is_empty());
    assert!(r.error.as_deref().unwrap_or_default().contains("Template error"));
    assert_eq!(h.executor.call_count(), 0);
    assert_eq!(h.results.all_for(4).await.len(), 1);
}

#[tokio::test]
async fn invalid_definition_still_yields_result() {
    let h = Harness::new(ScriptedExecutor::values(&[1.0]));
    let mut check = nulls_check(5);
    check.target.column = None;
    let r = h.orchestrator(ExecutionConfig::default()).execute_at(&check, day(1)).await;
    assert!(!r.passed);
    assert!(r.error.is_some());
    assert_eq!(h.executor.call_count(), 0);
}

#[tokio::test]
async fn null_measurement_fails_range_rule() {
    let h = Harness::new(ScriptedExecutor::new([Step::Null]));
    let r = h.orchestrator(ExecutionConfig::default()).execute_at(&nulls_check(1), day(1)).await;
    assert!(r.error.is_none());
    assert_eq!(r.sensor_value, None);
    assert!(!r.passed);
    assert_eq!(r.severity, Some(Severity::Error));
}
