//! Failure severity tiers shared by rules, results and incidents.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity of a failing check, ordered `Warning < Error < Fatal`.
///
/// A passing result carries no severity, so `Option<Severity>` encodes the
/// pass/fail split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Tier evaluation order: most severe first.
    pub const DESCENDING: [Severity; 3] = [Severity::Fatal, Severity::Error, Severity::Warning];

    /// String representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            other => Err(CoreError::Validation(format!(
                "Unknown severity: '{other}'. Valid severities: warning, error, fatal"
            ))),
        }
    }

    /// Numeric rank used by notification filters (warning=1 .. fatal=3).
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Warning => 1,
            Severity::Error => 2,
            Severity::Fatal => 3,
        }
    }

    /// Incident priority label shown to responders.
    pub fn priority_label(&self) -> &'static str {
        match self {
            Severity::Warning => "low",
            Severity::Error => "medium",
            Severity::Fatal => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_escalation() {
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
        assert_eq!(Severity::Warning.max(Severity::Fatal), Severity::Fatal);
    }

    #[test]
    fn parse_accepts_stored_names() {
        for s in Severity::DESCENDING {
            assert_eq!(Severity::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(Severity::parse("critical").is_err());
        assert!(Severity::parse("").is_err());
    }

    #[test]
    fn priority_labels() {
        assert_eq!(Severity::Warning.priority_label(), "low");
        assert_eq!(Severity::Error.priority_label(), "medium");
        assert_eq!(Severity::Fatal.priority_label(), "high");
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Fatal).unwrap();
        assert_eq!(json, "\"fatal\"");
    }
}
