//! The immutable record produced by every check execution.

use serde::{Deserialize, Serialize};

use crate::resolver::Resolution;
use crate::severity::Severity;
use crate::types::{DbId, Timestamp};
use crate::value::SensorValue;

/// Upper bound on rows returned by a history query.
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Default number of rows returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One execution of one check. Append-only.
///
/// Serialized field names (`executedAt`, `sensorValue`, `passed`,
/// `severity`, `renderedQuery`, `error`) are a stable contract for
/// downstream consumers. An `indeterminate` result also reports
/// `passed = true` with no severity; consumers that count passes must check
/// `indeterminate` first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub check_id: DbId,
    pub executed_at: Timestamp,
    pub sensor_value: Option<SensorValue>,
    pub passed: bool,
    /// No tier could decide for lack of history. Such results carry no
    /// severity and never touch incidents.
    #[serde(default)]
    pub indeterminate: bool,
    pub severity: Option<Severity>,
    pub rendered_query: String,
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub latency_ms: i64,
}

/// What an incident manager needs to know about a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSignal {
    Passed,
    Failed(Severity),
}

impl CheckResult {
    /// Build a result from a resolved evaluation.
    pub fn evaluated(
        check_id: DbId,
        executed_at: Timestamp,
        sensor_value: Option<SensorValue>,
        resolution: Resolution,
        rendered_query: String,
        latency_ms: i64,
    ) -> Self {
        let (passed, indeterminate, severity, message) = match resolution {
            Resolution::Passed { message } => (true, false, None, message),
            Resolution::Failed { severity, message } => (false, false, Some(severity), Some(message)),
            Resolution::Indeterminate { message } => (true, true, None, Some(message)),
        };
        Self {
            check_id,
            executed_at,
            sensor_value,
            passed,
            indeterminate,
            severity,
            rendered_query,
            error: None,
            message,
            latency_ms,
        }
    }

    /// Build the result of an execution that never produced a measurement.
    ///
    /// Failed executions are recorded with `severity = error`.
    pub fn execution_failed(
        check_id: DbId,
        executed_at: Timestamp,
        rendered_query: String,
        error: String,
        latency_ms: i64,
    ) -> Self {
        Self {
            check_id,
            executed_at,
            sensor_value: None,
            passed: false,
            indeterminate: false,
            severity: Some(Severity::Error),
            rendered_query,
            error: Some(error),
            message: None,
            latency_ms,
        }
    }

    /// `None` for indeterminate results, which must not move incident state.
    pub fn signal(&self) -> Option<ResultSignal> {
        if self.indeterminate {
            return None;
        }
        match (self.passed, self.severity) {
            (true, _) => Some(ResultSignal::Passed),
            (false, Some(severity)) => Some(ResultSignal::Failed(severity)),
            (false, None) => Some(ResultSignal::Failed(Severity::Error)),
        }
    }

    /// Numeric value usable as a baseline point.
    pub fn baseline_value(&self) -> Option<f64> {
        if self.error.is_some() {
            return None;
        }
        self.sensor_value.as_ref().and_then(SensorValue::as_f64)
    }
}

/// Window for listing past results, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub limit: usize,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl HistoryWindow {
    pub fn last(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Limit clamped to `1..=MAX_HISTORY_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_HISTORY_LIMIT)
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.since.map_or(true, |s| ts >= s) && self.until.map_or(true, |u| ts < u)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn failed_resolution_carries_severity() {
        let r = CheckResult::evaluated(
            1,
            ts(),
            Some(SensorValue::Number(12.0)),
            Resolution::Failed {
                severity: Severity::Error,
                message: "too many".into(),
            },
            "SELECT 1".into(),
            5,
        );
        assert!(!r.passed);
        assert_eq!(r.severity, Some(Severity::Error));
        assert_eq!(r.signal(), Some(ResultSignal::Failed(Severity::Error)));
    }

    #[test]
    fn indeterminate_has_no_signal() {
        let r = CheckResult::evaluated(
            1,
            ts(),
            Some(SensorValue::Number(1.0)),
            Resolution::Indeterminate {
                message: "short history".into(),
            },
            "SELECT 1".into(),
            5,
        );
        assert!(r.indeterminate);
        assert!(r.passed);
        assert_eq!(r.severity, None);
        assert_eq!(r.signal(), None);
        assert_eq!(r.baseline_value(), Some(1.0));
    }

    #[test]
    fn execution_failure_shape() {
        let r = CheckResult::execution_failed(1, ts(), "SELECT".into(), "boom".into(), 3);
        assert!(!r.passed);
        assert_eq!(r.severity, Some(Severity::Error));
        assert_eq!(r.sensor_value, None);
        assert_eq!(r.baseline_value(), None);
    }

    #[test]
    fn indeterminate_flag_is_serialized() {
        let r = CheckResult::evaluated(
            1,
            ts(),
            Some(SensorValue::Number(1.0)),
            Resolution::Indeterminate {
                message: "short history".into(),
            },
            "SELECT 1".into(),
            5,
        );
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["indeterminate"], true);
        assert_eq!(json["passed"], true);
        assert!(json["severity"].is_null());
    }

    #[test]
    fn serialized_field_names_are_stable() {
        let r = CheckResult::execution_failed(9, ts(), "SELECT".into(), "boom".into(), 3);
        let json = serde_json::to_value(&r).unwrap();
        for key in ["executedAt", "sensorValue", "passed", "severity", "renderedQuery", "error"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["severity"], "error");
    }

    #[test]
    fn history_limit_is_clamped() {
        assert_eq!(HistoryWindow::last(0).effective_limit(), 1);
        assert_eq!(HistoryWindow::last(5000).effective_limit(), MAX_HISTORY_LIMIT);
        assert_eq!(HistoryWindow::default().effective_limit(), DEFAULT_HISTORY_LIMIT);
    }
}
