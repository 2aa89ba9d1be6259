//! Typed accessors over free-form JSON parameter maps.
//!
//! Sensor and rule parameters are stored as JSON objects. These helpers pull
//! typed values out of them and report which key was wrong.

use std::collections::BTreeMap;

/// Parameter map for a sensor or a single rule tier.
///
/// A `BTreeMap` keeps iteration order stable, which keeps rendered queries
/// and stored JSON byte-identical across runs.
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// A parameter that is missing or has the wrong shape.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("missing required parameter '{0}'")]
    Missing(String),

    #[error("parameter '{name}' must be {expected}")]
    Invalid { name: String, expected: &'static str },
}

/// Read an optional number. Accepts JSON numbers and numeric strings.
pub fn get_f64(params: &ParamMap, name: &str) -> Result<Option<f64>, ParamError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(name, "a finite number")),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(name, "a finite number")),
        Some(_) => Err(invalid(name, "a finite number")),
    }
}

/// Read a required number.
pub fn require_f64(params: &ParamMap, name: &str) -> Result<f64, ParamError> {
    get_f64(params, name)?.ok_or_else(|| ParamError::Missing(name.to_string()))
}

/// Read an optional string.
pub fn get_str<'a>(params: &'a ParamMap, name: &str) -> Result<Option<&'a str>, ParamError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(name, "a string")),
    }
}

/// Read a required, non-empty string.
pub fn require_str<'a>(params: &'a ParamMap, name: &str) -> Result<&'a str, ParamError> {
    match get_str(params, name)? {
        Some(s) if !s.is_empty() => Ok(s),
        Some(_) => Err(invalid(name, "a non-empty string")),
        None => Err(ParamError::Missing(name.to_string())),
    }
}

/// Read an optional positive integer.
pub fn get_usize(params: &ParamMap, name: &str) -> Result<Option<usize>, ParamError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .filter(|v| *v > 0)
            .map(|v| Some(v as usize))
            .ok_or_else(|| invalid(name, "a positive integer")),
        Some(_) => Err(invalid(name, "a positive integer")),
    }
}

/// Read a required, non-empty list of strings.
pub fn require_str_list(params: &ParamMap, name: &str) -> Result<Vec<String>, ParamError> {
    let items = match params.get(name) {
        None | Some(serde_json::Value::Null) => return Err(ParamError::Missing(name.to_string())),
        Some(serde_json::Value::Array(items)) => items,
        Some(_) => return Err(invalid(name, "a non-empty list of strings")),
    };
    if items.is_empty() {
        return Err(invalid(name, "a non-empty list of strings"));
    }
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(name, "a non-empty list of strings"))
        })
        .collect()
}

fn invalid(name: &str, expected: &'static str) -> ParamError {
    ParamError::Invalid {
        name: name.to_string(),
        expected,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> ParamMap {
        serde_json::from_value(value).unwrap()
    }

    // -- get_f64 ---------------------------------------------------------------

    #[test]
    fn number_and_numeric_string_accepted() {
        let p = params(json!({"a": 5, "b": "7.5", "c": null}));
        assert_eq!(get_f64(&p, "a").unwrap(), Some(5.0));
        assert_eq!(get_f64(&p, "b").unwrap(), Some(7.5));
        assert_eq!(get_f64(&p, "c").unwrap(), None);
        assert_eq!(get_f64(&p, "missing").unwrap(), None);
    }

    #[test]
    fn non_numeric_rejected() {
        let p = params(json!({"a": "five", "b": true}));
        assert!(get_f64(&p, "a").is_err());
        assert!(get_f64(&p, "b").is_err());
    }

    #[test]
    fn require_reports_missing_name() {
        let p = ParamMap::new();
        assert_eq!(
            require_f64(&p, "max_percent"),
            Err(ParamError::Missing("max_percent".into()))
        );
    }

    // -- strings ---------------------------------------------------------------

    #[test]
    fn empty_string_is_invalid_when_required() {
        let p = params(json!({"regex": ""}));
        assert!(matches!(
            require_str(&p, "regex"),
            Err(ParamError::Invalid { .. })
        ));
    }

    #[test]
    fn string_list_parsed() {
        let p = params(json!({"expected_values": ["a", "b"]}));
        assert_eq!(require_str_list(&p, "expected_values").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn string_list_rejects_mixed_and_empty() {
        let p = params(json!({"x": ["a", 1], "y": []}));
        assert!(require_str_list(&p, "x").is_err());
        assert!(require_str_list(&p, "y").is_err());
    }

    // -- get_usize -------------------------------------------------------------

    #[test]
    fn usize_requires_positive() {
        let p = params(json!({"n": 30, "z": 0, "neg": -1}));
        assert_eq!(get_usize(&p, "n").unwrap(), Some(30));
        assert!(get_usize(&p, "z").is_err());
        assert!(get_usize(&p, "neg").is_err());
    }
}
