//! Closed sensor catalog.
//!
//! Every sensor the pipeline can run is a [`SensorKind`] variant with a
//! static [`SensorSpec`]. Lookup by identifier goes through a table built
//! once on first use.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::value::ReturnType;
use crate::value::ReturnType::{Boolean, Numeric};

// ---------------------------------------------------------------------------
// SensorSpec
// ---------------------------------------------------------------------------

/// Whether a sensor measures a whole table or a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorLevel {
    Table,
    Column,
}

/// Static description of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSpec {
    pub id: &'static str,
    pub level: SensorLevel,
    pub return_type: ReturnType,
    pub required_params: &'static [&'static str],
    /// `false` for metadata sensors that read the information schema rather
    /// than table rows; a row-range filter has nothing to apply to.
    pub partitionable: bool,
}

// ---------------------------------------------------------------------------
// SensorKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    // Table level
    RowCount,
    ColumnCount,
    TableAvailability,
    ColumnListHash,
    ColumnListOrOrderHash,
    ColumnTypesHash,
    // Column level
    ColumnExists,
    DataFreshness,
    NullsCount,
    NullsPercent,
    NotNullsCount,
    NotNullsPercent,
    DistinctCount,
    DistinctPercent,
    DuplicateCount,
    DuplicatePercent,
    MinValue,
    MaxValue,
    SumValue,
    MeanValue,
    MedianValue,
    StddevSample,
    TextMinLength,
    TextMaxLength,
    TextMeanLength,
    EmptyTextCount,
    RegexMatchPercent,
    RegexNotMatchCount,
    NegativeValueCount,
    NumberInRangePercent,
    TruePercent,
    FutureDateCount,
    TextInSetPercent,
}

/// Every sensor, in catalog order.
pub const ALL_SENSORS: [SensorKind; 33] = [
    SensorKind::RowCount,
    SensorKind::ColumnCount,
    SensorKind::TableAvailability,
    SensorKind::ColumnListHash,
    SensorKind::ColumnListOrOrderHash,
    SensorKind::ColumnTypesHash,
    SensorKind::ColumnExists,
    SensorKind::DataFreshness,
    SensorKind::NullsCount,
    SensorKind::NullsPercent,
    SensorKind::NotNullsCount,
    SensorKind::NotNullsPercent,
    SensorKind::DistinctCount,
    SensorKind::DistinctPercent,
    SensorKind::DuplicateCount,
    SensorKind::DuplicatePercent,
    SensorKind::MinValue,
    SensorKind::MaxValue,
    SensorKind::SumValue,
    SensorKind::MeanValue,
    SensorKind::MedianValue,
    SensorKind::StddevSample,
    SensorKind::TextMinLength,
    SensorKind::TextMaxLength,
    SensorKind::TextMeanLength,
    SensorKind::EmptyTextCount,
    SensorKind::RegexMatchPercent,
    SensorKind::RegexNotMatchCount,
    SensorKind::NegativeValueCount,
    SensorKind::NumberInRangePercent,
    SensorKind::TruePercent,
    SensorKind::FutureDateCount,
    SensorKind::TextInSetPercent,
];

/// Sensor parameter: regular expression pattern.
pub const PARAM_REGEX: &str = "regex";
/// Sensor parameter: inclusive lower bound.
pub const PARAM_MIN_VALUE: &str = "min_value";
/// Sensor parameter: inclusive upper bound.
pub const PARAM_MAX_VALUE: &str = "max_value";
/// Sensor parameter: accepted text values.
pub const PARAM_EXPECTED_VALUES: &str = "expected_values";

const fn table(id: &'static str, return_type: ReturnType, partitionable: bool) -> SensorSpec {
    SensorSpec {
        id,
        level: SensorLevel::Table,
        return_type,
        required_params: &[],
        partitionable,
    }
}

const fn column(id: &'static str, return_type: ReturnType) -> SensorSpec {
    SensorSpec {
        id,
        level: SensorLevel::Column,
        return_type,
        required_params: &[],
        partitionable: true,
    }
}

const fn column_with(
    id: &'static str,
    return_type: ReturnType,
    required_params: &'static [&'static str],
) -> SensorSpec {
    SensorSpec {
        id,
        level: SensorLevel::Column,
        return_type,
        required_params,
        partitionable: true,
    }
}

static SPECS: [SensorSpec; 33] = [
    table("row_count", Numeric, true),
    table("column_count", Numeric, false),
    table("table_availability", Boolean, false),
    table("column_list_hash", ReturnType::Hash, false),
    table("column_list_or_order_hash", ReturnType::Hash, false),
    table("column_types_hash", ReturnType::Hash, false),
    SensorSpec {
        id: "column_exists",
        level: SensorLevel::Column,
        return_type: Boolean,
        required_params: &[],
        partitionable: false,
    },
    column("data_freshness", Numeric),
    column("nulls_count", Numeric),
    column("nulls_percent", Numeric),
    column("not_nulls_count", Numeric),
    column("not_nulls_percent", Numeric),
    column("distinct_count", Numeric),
    column("distinct_percent", Numeric),
    column("duplicate_count", Numeric),
    column("duplicate_percent", Numeric),
    column("min_value", Numeric),
    column("max_value", Numeric),
    column("sum_value", Numeric),
    column("mean_value", Numeric),
    column("median_value", Numeric),
    column("stddev_sample", Numeric),
    column("text_min_length", Numeric),
    column("text_max_length", Numeric),
    column("text_mean_length", Numeric),
    column("empty_text_count", Numeric),
    column_with("regex_match_percent", Numeric, &[PARAM_REGEX]),
    column_with("regex_not_match_count", Numeric, &[PARAM_REGEX]),
    column("negative_value_count", Numeric),
    column_with(
        "number_in_range_percent",
        Numeric,
        &[PARAM_MIN_VALUE, PARAM_MAX_VALUE],
    ),
    column("true_percent", Numeric),
    column("future_date_count", Numeric),
    column_with("text_in_set_percent", Numeric, &[PARAM_EXPECTED_VALUES]),
];

impl SensorKind {
    pub fn spec(self) -> &'static SensorSpec {
        &SPECS[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        self.spec().id
    }

    pub fn level(self) -> SensorLevel {
        self.spec().level
    }

    pub fn return_type(self) -> ReturnType {
        self.spec().return_type
    }

    /// Look a sensor up by identifier.
    pub fn from_id(id: &str) -> Result<Self, CoreError> {
        sensor_index()
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("Unknown sensor: '{id}'")))
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn sensor_index() -> &'static HashMap<&'static str, SensorKind> {
    static INDEX: OnceLock<HashMap<&'static str, SensorKind>> = OnceLock::new();
    INDEX.get_or_init(|| ALL_SENSORS.iter().map(|k| (k.as_str(), *k)).collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_table_lines_up_with_variants() {
        for kind in ALL_SENSORS {
            // serde's snake_case name must agree with the catalog id.
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn from_id_roundtrips() {
        for kind in ALL_SENSORS {
            assert_eq!(SensorKind::from_id(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_sensor_rejected() {
        assert!(SensorKind::from_id("row_count_change_1_day").is_err());
    }

    #[test]
    fn levels_and_return_types() {
        assert_eq!(SensorKind::RowCount.level(), SensorLevel::Table);
        assert_eq!(SensorKind::NullsPercent.level(), SensorLevel::Column);
        assert_eq!(SensorKind::ColumnListHash.return_type(), ReturnType::Hash);
        assert_eq!(SensorKind::ColumnExists.return_type(), ReturnType::Boolean);
    }

    #[test]
    fn metadata_sensors_are_not_partitionable() {
        assert!(!SensorKind::ColumnCount.spec().partitionable);
        assert!(!SensorKind::ColumnExists.spec().partitionable);
        assert!(SensorKind::RowCount.spec().partitionable);
    }

    #[test]
    fn parameterized_sensors_list_requirements() {
        assert_eq!(SensorKind::RegexMatchPercent.spec().required_params, &[PARAM_REGEX]);
        assert_eq!(
            SensorKind::NumberInRangePercent.spec().required_params,
            &[PARAM_MIN_VALUE, PARAM_MAX_VALUE]
        );
    }
}
