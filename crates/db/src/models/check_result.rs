//! Check result rows.

use dq_core::error::CoreError;
use dq_core::result::CheckResult;
use dq_core::severity::Severity;
use dq_core::types::{DbId, Timestamp};
use dq_core::value::SensorValue;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `check_results` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CheckResultRow {
    pub id: DbId,
    pub check_id: DbId,
    pub executed_at: Timestamp,
    pub sensor_value_num: Option<f64>,
    pub sensor_value_text: Option<String>,
    pub passed: bool,
    pub indeterminate: bool,
    pub severity: Option<String>,
    pub rendered_query: String,
    pub error: Option<String>,
    pub message: Option<String>,
    pub latency_ms: i64,
}

impl CheckResultRow {
    pub fn into_domain(self) -> Result<CheckResult, CoreError> {
        let sensor_value = match (self.sensor_value_num, self.sensor_value_text) {
            (Some(n), _) => Some(SensorValue::Number(n)),
            (None, Some(t)) => Some(SensorValue::Text(t)),
            (None, None) => None,
        };
        let severity = self.severity.as_deref().map(Severity::parse).transpose()?;
        Ok(CheckResult {
            check_id: self.check_id,
            executed_at: self.executed_at,
            sensor_value,
            passed: self.passed,
            indeterminate: self.indeterminate,
            severity,
            rendered_query: self.rendered_query,
            error: self.error,
            message: self.message,
            latency_ms: self.latency_ms,
        })
    }
}

/// A numeric point from result history, used as a baseline.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct BaselineRow {
    pub executed_at: Timestamp,
    pub value: f64,
}
