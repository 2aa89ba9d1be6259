//! Sensor query renderer.
//!
//! [`render`] turns a sensor, a target and sensor parameters into a single
//! `SELECT ... AS sensor_value` statement for one dialect. The function is
//! pure: identical inputs always yield byte-identical text, which is stored
//! on every result for audit.
//!
//! Identifiers go through [`Dialect::quote_identifier`] and every
//! user-supplied value goes through [`Dialect::quote_literal`] or
//! [`Dialect::number_literal`]. Nothing is spliced in raw.

use crate::check::TargetDescriptor;
use crate::dialect::{Capability, Dialect};
use crate::params::{self, ParamError, ParamMap};
use crate::partition::PartitionWindow;
use crate::sensor::{
    SensorKind, SensorLevel, PARAM_EXPECTED_VALUES, PARAM_MAX_VALUE, PARAM_MIN_VALUE, PARAM_REGEX,
};
use crate::value::SENSOR_VALUE_COLUMN;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Rendering failure. Fatal to the execution and never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("sensor '{sensor}': {source}")]
    Param {
        sensor: &'static str,
        #[source]
        source: ParamError,
    },

    #[error("sensor '{0}' is column-level but no column was specified")]
    MissingColumn(&'static str),

    #[error("sensor '{0}' is table-level and does not accept a column")]
    UnexpectedColumn(&'static str),

    #[error("sensor '{0}' does not support partitioned execution")]
    NotPartitionable(&'static str),

    #[error("{dialect} does not support {feature}")]
    Unsupported {
        dialect: &'static str,
        feature: &'static str,
    },

    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("invalid literal: {0}")]
    InvalidLiteral(String),
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

/// Render the query for one sensor execution.
pub fn render(
    dialect: Dialect,
    sensor: SensorKind,
    target: &TargetDescriptor,
    params: &ParamMap,
    partition: Option<&PartitionWindow>,
) -> Result<String, TemplateError> {
    let spec = sensor.spec();
    let param_err = |source| TemplateError::Param {
        sensor: spec.id,
        source,
    };

    for name in spec.required_params {
        if !params.contains_key(*name) {
            return Err(param_err(ParamError::Missing(name.to_string())));
        }
    }

    let column = match (spec.level, target.column.as_deref()) {
        (SensorLevel::Column, None) => return Err(TemplateError::MissingColumn(spec.id)),
        (SensorLevel::Column, Some(c)) => Some(dialect.quote_identifier(c)?),
        (SensorLevel::Table, Some(_)) => return Err(TemplateError::UnexpectedColumn(spec.id)),
        (SensorLevel::Table, None) => None,
    };
    if partition.is_some() && !spec.partitionable {
        return Err(TemplateError::NotPartitionable(spec.id));
    }

    let ctx = Ctx {
        dialect,
        col: column.unwrap_or_default(),
    };
    let mut q = Select::new(dialect.table_ref(&target.schema, &target.table)?);

    let expr = match sensor {
        SensorKind::RowCount => "COUNT(*)".to_string(),
        SensorKind::TableAvailability => "CASE WHEN COUNT(*) >= 0 THEN 1 ELSE 0 END".to_string(),

        SensorKind::ColumnCount
        | SensorKind::ColumnListHash
        | SensorKind::ColumnListOrOrderHash
        | SensorKind::ColumnTypesHash
        | SensorKind::ColumnExists => {
            return render_metadata(dialect, sensor, target);
        }

        SensorKind::DataFreshness => dialect.seconds_since(&format!("MAX({})", ctx.col)),
        SensorKind::NullsCount => format!("COUNT(*) - COUNT({})", ctx.col),
        SensorKind::NullsPercent => {
            percent_of("COUNT(*)", &format!("COUNT(*) - COUNT({})", ctx.col))
        }
        SensorKind::NotNullsCount => format!("COUNT({})", ctx.col),
        SensorKind::NotNullsPercent => percent_of("COUNT(*)", &format!("COUNT({})", ctx.col)),
        SensorKind::DistinctCount => format!("COUNT(DISTINCT {})", ctx.col),
        SensorKind::DistinctPercent => {
            percent_of("COUNT(*)", &format!("COUNT(DISTINCT {})", ctx.col))
        }
        SensorKind::DuplicateCount => {
            format!("COUNT({c}) - COUNT(DISTINCT {c})", c = ctx.col)
        }
        SensorKind::DuplicatePercent => percent_of(
            &format!("COUNT({})", ctx.col),
            &format!("COUNT({c}) - COUNT(DISTINCT {c})", c = ctx.col),
        ),
        SensorKind::MinValue => format!("MIN({})", ctx.col),
        SensorKind::MaxValue => format!("MAX({})", ctx.col),
        SensorKind::SumValue => format!("SUM({})", ctx.col),
        SensorKind::MeanValue => format!("AVG(1.0 * {})", ctx.col),
        SensorKind::MedianValue => dialect
            .median(&ctx.col)
            .ok_or_else(|| unsupported(dialect, Capability::Median))?,
        SensorKind::StddevSample => format!("{}({})", dialect.stddev_fn(), ctx.col),
        SensorKind::TextMinLength => format!("MIN({}({}))", dialect.length_fn(), ctx.col),
        SensorKind::TextMaxLength => format!("MAX({}({}))", dialect.length_fn(), ctx.col),
        SensorKind::TextMeanLength => {
            format!("AVG(1.0 * {}({}))", dialect.length_fn(), ctx.col)
        }
        SensorKind::EmptyTextCount => ctx.count_where(&format!("{} = ''", ctx.col)),
        SensorKind::RegexMatchPercent => {
            let pattern = ctx.regex_predicate(params).map_err(|e| e.for_sensor(spec.id))?;
            ctx.percent_of_non_null(&pattern)
        }
        SensorKind::RegexNotMatchCount => {
            let pattern = ctx.regex_predicate(params).map_err(|e| e.for_sensor(spec.id))?;
            ctx.count_where(&format!("{} IS NOT NULL AND NOT ({pattern})", ctx.col))
        }
        SensorKind::NegativeValueCount => ctx.count_where(&format!("{} < 0", ctx.col)),
        SensorKind::NumberInRangePercent => {
            let min = params::require_f64(params, PARAM_MIN_VALUE).map_err(param_err)?;
            let max = params::require_f64(params, PARAM_MAX_VALUE).map_err(param_err)?;
            let predicate = format!(
                "{c} >= {} AND {c} <= {}",
                dialect.number_literal(min)?,
                dialect.number_literal(max)?,
                c = ctx.col
            );
            ctx.percent_of_non_null(&predicate)
        }
        SensorKind::TruePercent => {
            ctx.percent_of_non_null(&format!("{} = {}", ctx.col, dialect.true_literal()))
        }
        SensorKind::FutureDateCount => {
            ctx.count_where(&format!("{} > {}", ctx.col, dialect.current_timestamp()))
        }
        SensorKind::TextInSetPercent => {
            let values = params::require_str_list(params, PARAM_EXPECTED_VALUES).map_err(param_err)?;
            let literals = values
                .iter()
                .map(|v| dialect.quote_literal(v))
                .collect::<Result<Vec<_>, _>>()?;
            ctx.percent_of_non_null(&format!("{} IN ({})", ctx.col, literals.join(", ")))
        }
    };

    if let Some(window) = partition {
        let col = dialect.quote_identifier(&window.column)?;
        q.filter(format!("{col} >= {}", dialect.timestamp_literal(window.from)));
        q.filter(format!("{col} < {}", dialect.timestamp_literal(window.to)));
    }

    Ok(q.finish(&expr))
}

/// Sensors answered from the engine's column metadata. Only called for the
/// metadata variants matched in [`render`].
fn render_metadata(
    dialect: Dialect,
    sensor: SensorKind,
    target: &TargetDescriptor,
) -> Result<String, TemplateError> {
    let catalog = dialect.column_catalog(&target.schema, &target.table)?;
    let name = catalog.name_column.to_string();
    let mut q = Select::new(catalog.relation.clone());
    q.filter(catalog.filter.clone());

    let expr = match sensor {
        SensorKind::ColumnCount => "COUNT(*)".to_string(),
        SensorKind::ColumnListHash => dialect.md5_aggregate(&name, &name),
        SensorKind::ColumnListOrOrderHash => {
            dialect.md5_aggregate(&name, catalog.ordinal_column)
        }
        SensorKind::ColumnTypesHash => {
            let pair = dialect.concat(&[
                name.clone(),
                "':'".to_string(),
                catalog.type_column.to_string(),
            ]);
            dialect.md5_aggregate(&pair, &name)
        }
        SensorKind::ColumnExists => {
            // Caller guarantees a column for this column-level sensor.
            let column = target.column.as_deref().unwrap_or_default();
            let column = if dialect == Dialect::Oracle {
                column.to_uppercase()
            } else {
                column.to_string()
            };
            q.filter(format!("{name} = {}", dialect.quote_literal(&column)?));
            "CASE WHEN COUNT(*) > 0 THEN 1 ELSE 0 END".to_string()
        }
        _ => "COUNT(*)".to_string(),
    };

    Ok(q.finish(&expr))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Ctx {
    dialect: Dialect,
    col: String,
}

impl Ctx {
    fn count_where(&self, predicate: &str) -> String {
        format!("COALESCE(SUM(CASE WHEN {predicate} THEN 1 ELSE 0 END), 0)")
    }

    fn percent_of_non_null(&self, predicate: &str) -> String {
        percent_of(
            &format!("COUNT({})", self.col),
            &format!("SUM(CASE WHEN {predicate} THEN 1 ELSE 0 END)"),
        )
    }

    fn regex_predicate(&self, params: &ParamMap) -> Result<String, RegexError> {
        let pattern = params::require_str(params, PARAM_REGEX).map_err(RegexError::Param)?;
        let literal = self.dialect.quote_literal(pattern).map_err(RegexError::Template)?;
        self.dialect
            .regex_match(&self.col, &literal)
            .ok_or(RegexError::Template(unsupported(self.dialect, Capability::RegexMatch)))
    }
}

enum RegexError {
    Param(ParamError),
    Template(TemplateError),
}

impl RegexError {
    fn for_sensor(self, sensor: &'static str) -> TemplateError {
        match self {
            RegexError::Param(source) => TemplateError::Param { sensor, source },
            RegexError::Template(e) => e,
        }
    }
}

fn percent_of(denominator: &str, numerator: &str) -> String {
    format!("CASE WHEN {denominator} = 0 THEN 0.0 ELSE 100.0 * ({numerator}) / {denominator} END")
}

fn unsupported(dialect: Dialect, capability: Capability) -> TemplateError {
    TemplateError::Unsupported {
        dialect: dialect.as_str(),
        feature: capability.as_str(),
    }
}

/// Minimal single-expression `SELECT` builder.
struct Select {
    from: String,
    filters: Vec<String>,
}

impl Select {
    fn new(from: String) -> Self {
        Self {
            from,
            filters: Vec::new(),
        }
    }

    fn filter(&mut self, predicate: String) {
        self.filters.push(predicate);
    }

    fn finish(self, expr: &str) -> String {
        let mut sql = format!("SELECT {expr} AS {SENSOR_VALUE_COLUMN}\nFROM {}", self.from);
        if !self.filters.is_empty() {
            sql.push_str("\nWHERE ");
            sql.push_str(&self.filters.join("\n  AND "));
        }
        sql
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
