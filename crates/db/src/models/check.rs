//! Check definition rows.

use dq_core::check::{CheckDefinition, CheckMode, RuleTiers, TargetDescriptor};
use dq_core::error::CoreError;
use dq_core::params::ParamMap;
use dq_core::partition::TimeScale;
use dq_core::rules::RuleKind;
use dq_core::sensor::SensorKind;
use dq_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `checks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Check {
    pub id: DbId,
    pub name: String,
    pub connection_id: DbId,
    pub sensor: String,
    pub rule: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: Option<String>,
    pub mode: String,
    pub time_scale: String,
    pub partition_column: Option<String>,
    pub sensor_params: serde_json::Value,
    pub rule_tiers: serde_json::Value,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Check {
    /// Convert to the domain definition, rejecting unknown catalog ids and
    /// malformed JSON columns.
    pub fn into_definition(self) -> Result<CheckDefinition, CoreError> {
        let sensor_params: ParamMap = serde_json::from_value(self.sensor_params)
            .map_err(|e| CoreError::Validation(format!("Invalid sensor_params: {e}")))?;
        let rule_tiers: RuleTiers = serde_json::from_value(self.rule_tiers)
            .map_err(|e| CoreError::Validation(format!("Invalid rule_tiers: {e}")))?;

        Ok(CheckDefinition {
            id: self.id,
            name: self.name,
            connection_id: self.connection_id,
            sensor: SensorKind::from_id(&self.sensor)?,
            rule: RuleKind::from_id(&self.rule)?,
            target: TargetDescriptor {
                schema: self.target_schema,
                table: self.target_table,
                column: self.target_column,
            },
            mode: CheckMode::parse(&self.mode)?,
            time_scale: TimeScale::parse(&self.time_scale)?,
            partition_column: self.partition_column,
            sensor_params,
            rule_tiers,
            is_active: self.is_active,
        })
    }
}

/// DTO for creating a check.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCheck {
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
}

impl CreateCheck {
    /// Validate by building the definition it would produce.
    pub fn validate(&self) -> Result<(), CoreError> {
        CheckDefinition {
            id: 0,
            name: self.name.clone(),
            connection_id: self.connection_id,
            sensor: self.sensor,
            rule: self.rule,
            target: self.target.clone(),
            mode: self.mode,
            time_scale: self.time_scale,
            partition_column: self.partition_column.clone(),
            sensor_params: self.sensor_params.clone(),
            rule_tiers: self.rule_tiers.clone(),
            is_active: true,
        }
        .validate()
    }
}
