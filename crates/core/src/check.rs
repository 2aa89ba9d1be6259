//! Check definitions and their structural invariants.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::params::ParamMap;
use crate::partition::{PartitionWindow, TimeScale};
use crate::resolver::TierRule;
use crate::rules::RuleKind;
use crate::sensor::{SensorKind, SensorLevel};
use crate::severity::Severity;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// What a sensor measures: a table, optionally narrowed to one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub schema: String,
    pub table: String,
    pub column: Option<String>,
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// How a check scopes its data.
///
/// Profiling and monitoring both scan the whole table; they differ only in
/// how often the external scheduler triggers them. Partitioned checks scan
/// the current day or month of a partition column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    Profiling,
    Monitoring,
    Partitioned,
}

impl CheckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckMode::Profiling => "profiling",
            CheckMode::Monitoring => "monitoring",
            CheckMode::Partitioned => "partitioned",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "profiling" => Ok(CheckMode::Profiling),
            "monitoring" => Ok(CheckMode::Monitoring),
            "partitioned" => Ok(CheckMode::Partitioned),
            other => Err(CoreError::Validation(format!("Unknown check mode: '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Per-tier rule parameters. An absent tier is not evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleTiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<ParamMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ParamMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<ParamMap>,
}

impl RuleTiers {
    pub fn get(&self, severity: Severity) -> Option<&ParamMap> {
        match severity {
            Severity::Warning => self.warning.as_ref(),
            Severity::Error => self.error.as_ref(),
            Severity::Fatal => self.fatal.as_ref(),
        }
    }

    /// Configured tiers, most severe first.
    pub fn configured(&self) -> impl Iterator<Item = (Severity, &ParamMap)> + '_ {
        Severity::DESCENDING
            .into_iter()
            .filter_map(move |s| self.get(s).map(|p| (s, p)))
    }

    pub fn is_empty(&self) -> bool {
        self.configured().next().is_none()
    }
}

// ---------------------------------------------------------------------------
// CheckDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub id: DbId,
    pub name: String,
    pub connection_id: DbId,
    pub sensor: SensorKind,
    pub rule: RuleKind,
    pub target: TargetDescriptor,
    pub mode: CheckMode,
    pub time_scale: TimeScale,
    pub partition_column: Option<String>,
    #[serde(default)]
    pub sensor_params: ParamMap,
    pub rule_tiers: RuleTiers,
    pub is_active: bool,
}

impl CheckDefinition {
    /// Validate the structural invariants of a definition.
    pub fn validate(&self) -> Result<(), CoreError> {
        let spec = self.sensor.spec();

        match (spec.level, &self.target.column) {
            (SensorLevel::Column, None) => {
                return Err(CoreError::Validation(format!(
                    "Sensor '{}' is column-level and requires a column",
                    spec.id
                )));
            }
            (SensorLevel::Table, Some(c)) => {
                return Err(CoreError::Validation(format!(
                    "Sensor '{}' is table-level but column '{c}' was given",
                    spec.id
                )));
            }
            _ => {}
        }
        if self.target.schema.is_empty() || self.target.table.is_empty() {
            return Err(CoreError::Validation(
                "Target schema and table must be non-empty".into(),
            ));
        }

        match (self.mode, &self.partition_column) {
            (CheckMode::Partitioned, None) => {
                return Err(CoreError::Validation(
                    "Partitioned checks require a partition column".into(),
                ));
            }
            (CheckMode::Partitioned, Some(_)) if !spec.partitionable => {
                return Err(CoreError::Validation(format!(
                    "Sensor '{}' cannot run in partitioned mode",
                    spec.id
                )));
            }
            (CheckMode::Profiling | CheckMode::Monitoring, Some(_)) => {
                return Err(CoreError::Validation(format!(
                    "A partition column is only allowed in partitioned mode, not {}",
                    self.mode.as_str()
                )));
            }
            _ => {}
        }

        for name in spec.required_params {
            if !self.sensor_params.contains_key(*name) {
                return Err(CoreError::Validation(format!(
                    "Sensor '{}' requires parameter '{name}'",
                    spec.id
                )));
            }
        }

        if !self.rule.accepts(spec.return_type) {
            return Err(CoreError::Validation(format!(
                "Rule '{}' cannot evaluate {} output of sensor '{}'",
                self.rule,
                spec.return_type.as_str(),
                spec.id
            )));
        }

        if self.rule_tiers.is_empty() {
            return Err(CoreError::Validation(
                "At least one of the warning, error or fatal tiers must be configured".into(),
            ));
        }
        for (_, params) in self.rule_tiers.configured() {
            self.rule
                .validate_params(params)
                .map_err(|e| CoreError::Validation(e.to_string()))?;
        }
        Ok(())
    }

    /// Tier rules in evaluation order (fatal, error, warning).
    pub fn tier_rules(&self) -> Vec<TierRule> {
        self.rule_tiers
            .configured()
            .map(|(severity, params)| TierRule {
                severity,
                rule: self.rule,
                params: params.clone(),
            })
            .collect()
    }

    /// The partition window for an execution at `now`, if partitioned.
    pub fn partition_window(&self, now: Timestamp) -> Option<PartitionWindow> {
        match (self.mode, &self.partition_column) {
            (CheckMode::Partitioned, Some(column)) => {
                Some(PartitionWindow::current(column.clone(), self.time_scale, now))
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn tiers(value: serde_json::Value) -> RuleTiers {
        serde_json::from_value(value).unwrap()
    }

    fn nulls_check() -> CheckDefinition {
        CheckDefinition {
            id: 1,
            name: "email nulls".into(),
            connection_id: 7,
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
            rule_tiers: tiers(json!({"warning": {"max_percent": 5}, "error": {"max_percent": 10}})),
            is_active: true,
        }
    }

    // -- validate --------------------------------------------------------------

    #[test]
    fn valid_definition_accepted() {
        assert!(nulls_check().validate().is_ok());
    }

    #[test]
    fn column_sensor_requires_column() {
        let mut c = nulls_check();
        c.target.column = None;
        assert!(c.validate().is_err());
    }

    #[test]
    fn table_sensor_rejects_column() {
        let mut c = nulls_check();
        c.sensor = SensorKind::RowCount;
        c.rule = RuleKind::MinCount;
        c.rule_tiers = tiers(json!({"error": {"min_count": 1}}));
        assert!(c.validate().is_err());
        c.target.column = None;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partition_column_iff_partitioned() {
        let mut c = nulls_check();
        c.mode = CheckMode::Partitioned;
        assert!(c.validate().is_err());
        c.partition_column = Some("created_at".into());
        assert!(c.validate().is_ok());
        c.mode = CheckMode::Profiling;
        assert!(c.validate().is_err());
    }

    #[test]
    fn empty_tiers_rejected() {
        let mut c = nulls_check();
        c.rule_tiers = RuleTiers::default();
        assert!(c.validate().is_err());
    }

    #[test]
    fn invalid_tier_params_rejected() {
        let mut c = nulls_check();
        c.rule_tiers = tiers(json!({"fatal": {"max_count": 3}}));
        assert!(c.validate().is_err());
    }

    #[test]
    fn hash_sensor_requires_equality_rule() {
        let mut c = nulls_check();
        c.sensor = SensorKind::ColumnListHash;
        c.target.column = None;
        assert!(c.validate().is_err());
        c.rule = RuleKind::EqualTo;
        c.rule_tiers = tiers(json!({"error": {"expected_value": "abc"}}));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn missing_sensor_param_rejected() {
        let mut c = nulls_check();
        c.sensor = SensorKind::RegexMatchPercent;
        c.rule = RuleKind::MinPercent;
        c.rule_tiers = tiers(json!({"warning": {"min_percent": 99}}));
        assert!(c.validate().is_err());
        c.sensor_params.insert("regex".into(), json!("^a"));
        assert!(c.validate().is_ok());
    }

    // -- tier_rules ------------------------------------------------------------

    #[test]
    fn tier_rules_ordered_most_severe_first() {
        let mut c = nulls_check();
        c.rule_tiers = tiers(json!({
            "warning": {"max_percent": 5},
            "fatal": {"max_percent": 50},
            "error": {"max_percent": 10},
        }));
        let order: Vec<Severity> = c.tier_rules().iter().map(|t| t.severity).collect();
        assert_eq!(order, vec![Severity::Fatal, Severity::Error, Severity::Warning]);
    }

    // -- partition_window ------------------------------------------------------

    #[test]
    fn partition_window_only_in_partitioned_mode() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let mut c = nulls_check();
        assert!(c.partition_window(now).is_none());
        c.mode = CheckMode::Partitioned;
        c.partition_column = Some("loaded_at".into());
        let w = c.partition_window(now).unwrap();
        assert_eq!(w.column, "loaded_at");
        assert!(w.contains(now));
    }
}
