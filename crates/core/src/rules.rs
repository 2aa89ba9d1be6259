//! Closed rule catalog and single-tier evaluation.
//!
//! A rule is a pure function of the measured value, its tier parameters and
//! (for change and anomaly rules) a [`Baseline`] of historical values.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::anomaly::{self, Sensitivity, DEFAULT_ANOMALY_WINDOW, MIN_ANOMALY_POINTS};
use crate::error::CoreError;
use crate::params::{self, ParamError, ParamMap};
use crate::value::{ReturnType, SensorValue};

// ---------------------------------------------------------------------------
// Parameter names
// ---------------------------------------------------------------------------

pub const PARAM_MIN_VALUE: &str = "min_value";
pub const PARAM_MAX_VALUE: &str = "max_value";
pub const PARAM_MIN_PERCENT: &str = "min_percent";
pub const PARAM_MAX_PERCENT: &str = "max_percent";
pub const PARAM_MIN_COUNT: &str = "min_count";
pub const PARAM_MAX_COUNT: &str = "max_count";
pub const PARAM_MAX_CHANGE_PERCENT: &str = "max_change_percent";
pub const PARAM_EXPECTED_VALUE: &str = "expected_value";
pub const PARAM_FORBIDDEN_VALUE: &str = "forbidden_value";
pub const PARAM_SENSITIVITY: &str = "sensitivity";
pub const PARAM_WINDOW_SIZE: &str = "window_size";

/// Absolute tolerance for numeric equality.
pub const FLOAT_TOLERANCE: f64 = 1e-9;

/// Floor for the change-percent denominator so a zero baseline stays finite.
pub const CHANGE_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// RuleKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    MinValue,
    MaxValue,
    MinMaxValue,
    MinPercent,
    MaxPercent,
    MinMaxPercent,
    MinCount,
    MaxCount,
    MinMaxCount,
    /// Change against the value one day earlier.
    ChangePercent,
    #[serde(rename = "change_percent_7_days")]
    ChangePercent7Days,
    #[serde(rename = "change_percent_30_days")]
    ChangePercent30Days,
    EqualTo,
    NotEqualTo,
    IsTrue,
    IsFalse,
    AnomalyPercentile,
}

/// Every rule, in catalog order.
pub const ALL_RULES: [RuleKind; 17] = [
    RuleKind::MinValue,
    RuleKind::MaxValue,
    RuleKind::MinMaxValue,
    RuleKind::MinPercent,
    RuleKind::MaxPercent,
    RuleKind::MinMaxPercent,
    RuleKind::MinCount,
    RuleKind::MaxCount,
    RuleKind::MinMaxCount,
    RuleKind::ChangePercent,
    RuleKind::ChangePercent7Days,
    RuleKind::ChangePercent30Days,
    RuleKind::EqualTo,
    RuleKind::NotEqualTo,
    RuleKind::IsTrue,
    RuleKind::IsFalse,
    RuleKind::AnomalyPercentile,
];

/// History a rule needs before it can be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineNeed {
    None,
    /// One value from `days` before the current execution.
    Offset { days: u32 },
    /// Up to `size` most recent prior values.
    Window { size: usize },
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::MinValue => "min_value",
            RuleKind::MaxValue => "max_value",
            RuleKind::MinMaxValue => "min_max_value",
            RuleKind::MinPercent => "min_percent",
            RuleKind::MaxPercent => "max_percent",
            RuleKind::MinMaxPercent => "min_max_percent",
            RuleKind::MinCount => "min_count",
            RuleKind::MaxCount => "max_count",
            RuleKind::MinMaxCount => "min_max_count",
            RuleKind::ChangePercent => "change_percent",
            RuleKind::ChangePercent7Days => "change_percent_7_days",
            RuleKind::ChangePercent30Days => "change_percent_30_days",
            RuleKind::EqualTo => "equal_to",
            RuleKind::NotEqualTo => "not_equal_to",
            RuleKind::IsTrue => "is_true",
            RuleKind::IsFalse => "is_false",
            RuleKind::AnomalyPercentile => "anomaly_percentile",
        }
    }

    pub fn from_id(id: &str) -> Result<Self, CoreError> {
        static INDEX: OnceLock<HashMap<&'static str, RuleKind>> = OnceLock::new();
        INDEX
            .get_or_init(|| ALL_RULES.iter().map(|r| (r.as_str(), *r)).collect())
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("Unknown rule: '{id}'")))
    }

    /// Parameter names of the lower and upper bound for range rules.
    fn bound_keys(self) -> Option<(Option<&'static str>, Option<&'static str>)> {
        match self {
            RuleKind::MinValue => Some((Some(PARAM_MIN_VALUE), None)),
            RuleKind::MaxValue => Some((None, Some(PARAM_MAX_VALUE))),
            RuleKind::MinMaxValue => Some((Some(PARAM_MIN_VALUE), Some(PARAM_MAX_VALUE))),
            RuleKind::MinPercent => Some((Some(PARAM_MIN_PERCENT), None)),
            RuleKind::MaxPercent => Some((None, Some(PARAM_MAX_PERCENT))),
            RuleKind::MinMaxPercent => Some((Some(PARAM_MIN_PERCENT), Some(PARAM_MAX_PERCENT))),
            RuleKind::MinCount => Some((Some(PARAM_MIN_COUNT), None)),
            RuleKind::MaxCount => Some((None, Some(PARAM_MAX_COUNT))),
            RuleKind::MinMaxCount => Some((Some(PARAM_MIN_COUNT), Some(PARAM_MAX_COUNT))),
            _ => None,
        }
    }

    fn change_offset_days(self) -> Option<u32> {
        match self {
            RuleKind::ChangePercent => Some(1),
            RuleKind::ChangePercent7Days => Some(7),
            RuleKind::ChangePercent30Days => Some(30),
            _ => None,
        }
    }

    /// What history this rule needs, given one tier's parameters.
    pub fn baseline_need(self, params: &ParamMap) -> BaselineNeed {
        if let Some(days) = self.change_offset_days() {
            return BaselineNeed::Offset { days };
        }
        if self == RuleKind::AnomalyPercentile {
            let size = params::get_usize(params, PARAM_WINDOW_SIZE)
                .ok()
                .flatten()
                .unwrap_or(DEFAULT_ANOMALY_WINDOW);
            return BaselineNeed::Window { size };
        }
        BaselineNeed::None
    }

    /// Whether this rule can evaluate sensors of the given return type.
    pub fn accepts(self, return_type: ReturnType) -> bool {
        match self {
            RuleKind::EqualTo | RuleKind::NotEqualTo => true,
            _ => return_type != ReturnType::Hash,
        }
    }

    /// Check one tier's parameters without evaluating anything.
    pub fn validate_params(self, params: &ParamMap) -> Result<(), RuleError> {
        let rule = self.as_str();
        let wrap = |source| RuleError::Param { rule, source };

        if let Some((min_key, max_key)) = self.bound_keys() {
            let min = match min_key {
                Some(k) => params::get_f64(params, k).map_err(wrap)?,
                None => None,
            };
            let max = match max_key {
                Some(k) => params::get_f64(params, k).map_err(wrap)?,
                None => None,
            };
            match (min_key, max_key) {
                (Some(k), None) if min.is_none() => return Err(wrap(ParamError::Missing(k.into()))),
                (None, Some(k)) if max.is_none() => return Err(wrap(ParamError::Missing(k.into()))),
                (Some(lo), Some(hi)) if min.is_none() && max.is_none() => {
                    return Err(RuleError::Invalid {
                        rule,
                        message: format!("at least one of '{lo}' or '{hi}' is required"),
                    });
                }
                _ => {}
            }
            if let (Some(lo), Some(hi)) = (min, max) {
                if lo > hi {
                    return Err(RuleError::Invalid {
                        rule,
                        message: format!("lower bound {lo} exceeds upper bound {hi}"),
                    });
                }
            }
            return Ok(());
        }

        match self {
            RuleKind::ChangePercent | RuleKind::ChangePercent7Days | RuleKind::ChangePercent30Days => {
                let max = params::require_f64(params, PARAM_MAX_CHANGE_PERCENT).map_err(wrap)?;
                if max < 0.0 {
                    return Err(RuleError::Invalid {
                        rule,
                        message: format!("'{PARAM_MAX_CHANGE_PERCENT}' must be >= 0, got {max}"),
                    });
                }
            }
            RuleKind::EqualTo => {
                expected_param(params, PARAM_EXPECTED_VALUE).map_err(wrap)?;
            }
            RuleKind::NotEqualTo => {
                expected_param(params, PARAM_FORBIDDEN_VALUE).map_err(wrap)?;
            }
            RuleKind::AnomalyPercentile => {
                sensitivity(params).map_err(|e| RuleError::Invalid {
                    rule,
                    message: e.to_string(),
                })?;
                if let Some(size) = params::get_usize(params, PARAM_WINDOW_SIZE).map_err(wrap)? {
                    if size < MIN_ANOMALY_POINTS {
                        return Err(RuleError::Invalid {
                            rule,
                            message: format!(
                                "'{PARAM_WINDOW_SIZE}' must be at least {MIN_ANOMALY_POINTS}, got {size}"
                            ),
                        });
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("rule '{rule}': {source}")]
    Param {
        rule: &'static str,
        #[source]
        source: ParamError,
    },

    #[error("rule '{rule}': {message}")]
    Invalid { rule: &'static str, message: String },

    #[error("rule '{rule}' cannot evaluate the text value '{value}'")]
    NotNumeric { rule: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

/// Historical values available to one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    offsets: BTreeMap<u32, f64>,
    window: Option<Vec<f64>>,
}

impl Baseline {
    pub fn with_offset(mut self, days: u32, value: f64) -> Self {
        self.offsets.insert(days, value);
        self
    }

    /// Set the window, oldest first.
    pub fn with_window(mut self, values: Vec<f64>) -> Self {
        self.window = Some(values);
        self
    }

    pub fn offset(&self, days: u32) -> Option<f64> {
        self.offsets.get(&days).copied()
    }

    /// The most recent `size` window values, oldest first.
    pub fn window(&self, size: usize) -> &[f64] {
        match &self.window {
            Some(values) => &values[values.len().saturating_sub(size)..],
            None => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierVerdict {
    Passed,
    Failed,
    /// Baseline missing; counts as passed.
    Skipped,
    /// Not enough history to decide.
    Indeterminate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierEvaluation {
    pub verdict: TierVerdict,
    pub message: String,
}

impl TierEvaluation {
    fn new(verdict: TierVerdict, message: impl Into<String>) -> Self {
        Self {
            verdict,
            message: message.into(),
        }
    }

    fn check(ok: bool, message: impl Into<String>) -> Self {
        let verdict = if ok { TierVerdict::Passed } else { TierVerdict::Failed };
        Self::new(verdict, message)
    }
}

/// Evaluate one tier of `rule` against a measured value.
pub fn evaluate_tier(
    rule: RuleKind,
    params: &ParamMap,
    value: Option<&SensorValue>,
    baseline: &Baseline,
) -> Result<TierEvaluation, RuleError> {
    rule.validate_params(params)?;

    if let Some((min_key, max_key)) = rule.bound_keys() {
        let Some(v) = numeric(rule, value)? else {
            return Ok(no_value());
        };
        let min = min_key.and_then(|k| params::get_f64(params, k).ok().flatten());
        let max = max_key.and_then(|k| params::get_f64(params, k).ok().flatten());
        if let Some(lo) = min {
            if v < lo {
                return Ok(TierEvaluation::check(false, format!("value {v} is below minimum {lo}")));
            }
        }
        if let Some(hi) = max {
            if v > hi {
                return Ok(TierEvaluation::check(false, format!("value {v} is above maximum {hi}")));
            }
        }
        return Ok(TierEvaluation::check(true, format!("value {v} is within bounds")));
    }

    if let Some(days) = rule.change_offset_days() {
        let Some(v) = numeric(rule, value)? else {
            return Ok(no_value());
        };
        let Some(b) = baseline.offset(days) else {
            return Ok(TierEvaluation::new(
                TierVerdict::Skipped,
                format!("no baseline from {days} day(s) earlier"),
            ));
        };
        let limit = params::require_f64(params, PARAM_MAX_CHANGE_PERCENT)
            .map_err(|source| RuleError::Param { rule: rule.as_str(), source })?;
        let pct = (v - b).abs() / b.abs().max(CHANGE_EPSILON) * 100.0;
        return Ok(TierEvaluation::check(
            pct <= limit,
            format!("changed {pct:.2}% from {b} (limit {limit}%)"),
        ));
    }

    let evaluation = match rule {
        RuleKind::EqualTo => {
            let expected = expected_param(params, PARAM_EXPECTED_VALUE)
                .map_err(|source| RuleError::Param { rule: rule.as_str(), source })?;
            match value {
                None => no_value(),
                Some(v) => TierEvaluation::check(
                    values_equal(v, expected),
                    format!("value {v} compared to expected {}", display_json(expected)),
                ),
            }
        }
        RuleKind::NotEqualTo => {
            let forbidden = expected_param(params, PARAM_FORBIDDEN_VALUE)
                .map_err(|source| RuleError::Param { rule: rule.as_str(), source })?;
            match value {
                None => TierEvaluation::check(true, "no value measured"),
                Some(v) => TierEvaluation::check(
                    !values_equal(v, forbidden),
                    format!("value {v} compared to forbidden {}", display_json(forbidden)),
                ),
            }
        }
        RuleKind::IsTrue => match numeric(rule, value)? {
            None => no_value(),
            Some(v) => TierEvaluation::check(v != 0.0, format!("value {v} expected true")),
        },
        RuleKind::IsFalse => match numeric(rule, value)? {
            None => TierEvaluation::check(true, "no value measured"),
            Some(v) => TierEvaluation::check(v == 0.0, format!("value {v} expected false")),
        },
        RuleKind::AnomalyPercentile => {
            let Some(v) = numeric(rule, value)? else {
                return Ok(no_value());
            };
            let size = match rule.baseline_need(params) {
                BaselineNeed::Window { size } => size,
                _ => DEFAULT_ANOMALY_WINDOW,
            };
            let history = baseline.window(size);
            let k = sensitivity(params)
                .map_err(|e| RuleError::Invalid { rule: rule.as_str(), message: e.to_string() })?
                .k();
            match anomaly::iqr_fences(history, k) {
                None => TierEvaluation::new(
                    TierVerdict::Indeterminate,
                    format!(
                        "{} historical point(s), at least {MIN_ANOMALY_POINTS} required",
                        history.len()
                    ),
                ),
                Some(f) => TierEvaluation::check(
                    f.contains(v),
                    format!("value {v} against fences [{}, {}]", f.lower, f.upper),
                ),
            }
        }
        _ => {
            return Err(RuleError::Invalid {
                rule: rule.as_str(),
                message: "rule has no evaluator".into(),
            })
        }
    };
    Ok(evaluation)
}

fn no_value() -> TierEvaluation {
    TierEvaluation::check(false, "no value measured")
}

fn numeric(rule: RuleKind, value: Option<&SensorValue>) -> Result<Option<f64>, RuleError> {
    match value {
        None => Ok(None),
        Some(SensorValue::Number(v)) => Ok(Some(*v)),
        Some(SensorValue::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| RuleError::NotNumeric {
                rule: rule.as_str(),
                value: s.clone(),
            }),
    }
}

fn expected_param<'a>(params: &'a ParamMap, name: &str) -> Result<&'a serde_json::Value, ParamError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Err(ParamError::Missing(name.to_string())),
        Some(v @ (serde_json::Value::Number(_) | serde_json::Value::String(_) | serde_json::Value::Bool(_))) => {
            Ok(v)
        }
        Some(_) => Err(ParamError::Invalid {
            name: name.to_string(),
            expected: "a number, string or boolean",
        }),
    }
}

fn sensitivity(params: &ParamMap) -> Result<Sensitivity, CoreError> {
    match params::get_str(params, PARAM_SENSITIVITY) {
        Ok(None) => Ok(Sensitivity::default()),
        Ok(Some(s)) => Sensitivity::parse(s),
        Err(e) => Err(CoreError::Validation(e.to_string())),
    }
}

/// Numbers compare within [`FLOAT_TOLERANCE`]; text compares exactly.
/// A number and a string compare numerically when the string parses.
fn values_equal(value: &SensorValue, expected: &serde_json::Value) -> bool {
    let expected_num = match expected {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        SensorValue::Text(s) => match expected {
            serde_json::Value::String(e) => s == e,
            _ => match (s.trim().parse::<f64>().ok(), expected_num) {
                (Some(a), Some(b)) => (a - b).abs() <= FLOAT_TOLERANCE,
                _ => false,
            },
        },
        SensorValue::Number(v) => match expected_num {
            Some(e) => (v - e).abs() <= FLOAT_TOLERANCE,
            None => false,
        },
    }
}

fn display_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
