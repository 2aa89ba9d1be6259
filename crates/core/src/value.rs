//! Measured values and their coercion from raw query output.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Return types
// ---------------------------------------------------------------------------

/// Shape of the single value a sensor produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    Numeric,
    Boolean,
    Hash,
}

impl ReturnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnType::Numeric => "numeric",
            ReturnType::Boolean => "boolean",
            ReturnType::Hash => "hash",
        }
    }
}

// ---------------------------------------------------------------------------
// SensorValue
// ---------------------------------------------------------------------------

/// A coerced measurement. Booleans are stored as `1.0` / `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

impl SensorValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Number(v) => Some(*v),
            SensorValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SensorValue::Text(s) => Some(s),
            SensorValue::Number(_) => None,
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(v) => write!(f, "{v}"),
            SensorValue::Text(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw query output
// ---------------------------------------------------------------------------

/// One cell as returned by a query executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Tabular query output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ScalarValue>>,
}

/// Column alias every rendered sensor query selects into.
pub const SENSOR_VALUE_COLUMN: &str = "sensor_value";

impl QueryRows {
    /// The measured cell: the `sensor_value` column of the first row, or the
    /// first column when no such alias exists. `None` for an empty result.
    pub fn scalar(&self) -> Option<&ScalarValue> {
        let row = self.rows.first()?;
        let index = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(SENSOR_VALUE_COLUMN))
            .unwrap_or(0);
        row.get(index)
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot coerce {found} to a {expected} sensor value")]
pub struct CoercionError {
    pub expected: &'static str,
    pub found: String,
}

/// Coerce a raw cell to the sensor's declared return type.
///
/// SQL `NULL` (and an empty result set) becomes `None`.
pub fn coerce(raw: Option<&ScalarValue>, return_type: ReturnType) -> Result<Option<SensorValue>, CoercionError> {
    let raw = match raw {
        None | Some(ScalarValue::Null) => return Ok(None),
        Some(raw) => raw,
    };
    let fail = || CoercionError {
        expected: return_type.as_str(),
        found: format!("{raw:?}"),
    };

    let value = match return_type {
        ReturnType::Numeric => match raw {
            ScalarValue::Int(v) => SensorValue::Number(*v as f64),
            ScalarValue::Float(v) if v.is_finite() => SensorValue::Number(*v),
            ScalarValue::Bool(b) => SensorValue::Number(if *b { 1.0 } else { 0.0 }),
            ScalarValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(SensorValue::Number)
                .ok_or_else(fail)?,
            _ => return Err(fail()),
        },
        ReturnType::Boolean => {
            let truth = match raw {
                ScalarValue::Bool(b) => *b,
                ScalarValue::Int(v) => *v != 0,
                ScalarValue::Float(v) => *v != 0.0,
                ScalarValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" | "yes" => true,
                    "false" | "f" | "0" | "no" => false,
                    _ => return Err(fail()),
                },
                ScalarValue::Null => return Ok(None),
            };
            SensorValue::Number(if truth { 1.0 } else { 0.0 })
        }
        ReturnType::Hash => match raw {
            ScalarValue::Text(s) => SensorValue::Text(s.clone()),
            ScalarValue::Int(v) => SensorValue::Text(v.to_string()),
            _ => return Err(fail()),
        },
    };
    Ok(Some(value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(columns: &[&str], values: Vec<ScalarValue>) -> QueryRows {
        QueryRows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: vec![values],
        }
    }

    // -- scalar ----------------------------------------------------------------

    #[test]
    fn scalar_prefers_sensor_value_alias() {
        let r = rows(
            &["other", "SENSOR_VALUE"],
            vec![ScalarValue::Int(1), ScalarValue::Int(2)],
        );
        assert_eq!(r.scalar(), Some(&ScalarValue::Int(2)));
    }

    #[test]
    fn scalar_falls_back_to_first_column() {
        let r = rows(&["count"], vec![ScalarValue::Int(9)]);
        assert_eq!(r.scalar(), Some(&ScalarValue::Int(9)));
    }

    #[test]
    fn empty_result_has_no_scalar() {
        assert_eq!(QueryRows::default().scalar(), None);
    }

    // -- coerce ----------------------------------------------------------------

    #[test]
    fn numeric_from_text_decimal() {
        let v = coerce(Some(&ScalarValue::Text("12.50".into())), ReturnType::Numeric).unwrap();
        assert_eq!(v, Some(SensorValue::Number(12.5)));
    }

    #[test]
    fn null_becomes_none() {
        assert_eq!(coerce(Some(&ScalarValue::Null), ReturnType::Numeric).unwrap(), None);
        assert_eq!(coerce(None, ReturnType::Hash).unwrap(), None);
    }

    #[test]
    fn boolean_accepts_text_and_numbers() {
        assert_eq!(
            coerce(Some(&ScalarValue::Text("t".into())), ReturnType::Boolean).unwrap(),
            Some(SensorValue::Number(1.0))
        );
        assert_eq!(
            coerce(Some(&ScalarValue::Int(0)), ReturnType::Boolean).unwrap(),
            Some(SensorValue::Number(0.0))
        );
    }

    #[test]
    fn garbage_text_is_a_coercion_error() {
        assert!(coerce(Some(&ScalarValue::Text("n/a".into())), ReturnType::Numeric).is_err());
        assert!(coerce(Some(&ScalarValue::Text("maybe".into())), ReturnType::Boolean).is_err());
    }

    #[test]
    fn hash_keeps_text() {
        let v = coerce(Some(&ScalarValue::Text("abc123".into())), ReturnType::Hash).unwrap();
        assert_eq!(v, Some(SensorValue::Text("abc123".into())));
    }

    #[test]
    fn sensor_value_serializes_untagged() {
        assert_eq!(serde_json::to_string(&SensorValue::Number(3.5)).unwrap(), "3.5");
        assert_eq!(
            serde_json::to_string(&SensorValue::Text("h".into())).unwrap(),
            "\"h\""
        );
    }
}
