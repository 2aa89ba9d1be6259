//! SQL dialect rules used by the sensor renderer.
//!
//! A [`Dialect`] knows how to quote identifiers and literals for its engine
//! and how to spell the handful of functions sensors need. Functions an engine
//! lacks are reported through [`Dialect::supports`] so rendering can fail
//! with a clear error instead of emitting SQL the source will reject.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::render::TemplateError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Dialect
// ---------------------------------------------------------------------------

/// Target database engine of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Redshift,
    Snowflake,
    MySql,
    SqlServer,
    BigQuery,
    Databricks,
    Oracle,
}

/// Optional SQL features that not every engine provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Exact or approximate median aggregate.
    Median,
    /// Regular-expression predicate.
    RegexMatch,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Median => "median",
            Capability::RegexMatch => "regex matching",
        }
    }
}

/// All supported dialects.
pub const ALL_DIALECTS: [Dialect; 8] = [
    Dialect::Postgres,
    Dialect::Redshift,
    Dialect::Snowflake,
    Dialect::MySql,
    Dialect::SqlServer,
    Dialect::BigQuery,
    Dialect::Databricks,
    Dialect::Oracle,
];

impl Dialect {
    /// String representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Redshift => "redshift",
            Dialect::Snowflake => "snowflake",
            Dialect::MySql => "mysql",
            Dialect::SqlServer => "sqlserver",
            Dialect::BigQuery => "bigquery",
            Dialect::Databricks => "databricks",
            Dialect::Oracle => "oracle",
        }
    }

    /// Parse from the stored string form. `postgresql` is accepted as an alias.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s == "postgresql" {
            return Ok(Dialect::Postgres);
        }
        ALL_DIALECTS
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown dialect: '{s}'")))
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Median => !matches!(self, Dialect::MySql | Dialect::SqlServer),
            Capability::RegexMatch => !matches!(self, Dialect::SqlServer),
        }
    }

    // -- quoting --------------------------------------------------------------

    /// Quote an identifier, escaping the closing quote character by doubling.
    pub fn quote_identifier(&self, ident: &str) -> Result<String, TemplateError> {
        if ident.is_empty() || ident.contains('\0') {
            return Err(TemplateError::InvalidIdentifier(ident.to_string()));
        }
        Ok(match self {
            Dialect::Postgres | Dialect::Redshift | Dialect::Snowflake => {
                format!("\"{}\"", ident.replace('"', "\"\""))
            }
            Dialect::Oracle => format!("\"{}\"", ident.to_uppercase().replace('"', "\"\"")),
            Dialect::MySql | Dialect::BigQuery | Dialect::Databricks => {
                format!("`{}`", ident.replace('`', "``"))
            }
            Dialect::SqlServer => format!("[{}]", ident.replace(']', "]]")),
        })
    }

    /// Quote a string literal.
    ///
    /// Single quotes are doubled everywhere. Engines that treat backslash as
    /// an escape character inside literals get backslashes doubled as well.
    pub fn quote_literal(&self, value: &str) -> Result<String, TemplateError> {
        if value.contains('\0') {
            return Err(TemplateError::InvalidLiteral(
                "string literal contains a NUL byte".into(),
            ));
        }
        let mut escaped = String::with_capacity(value.len() + 2);
        escaped.push('\'');
        for ch in value.chars() {
            match ch {
                '\'' => escaped.push_str("''"),
                '\\' if self.backslash_escapes() => escaped.push_str("\\\\"),
                other => escaped.push(other),
            }
        }
        escaped.push('\'');
        Ok(escaped)
    }

    /// Render a finite number as a SQL numeric literal.
    pub fn number_literal(&self, value: f64) -> Result<String, TemplateError> {
        if !value.is_finite() {
            return Err(TemplateError::InvalidLiteral(format!(
                "numeric literal must be finite, got {value}"
            )));
        }
        Ok(format!("{value}"))
    }

    /// Render a UTC timestamp literal.
    pub fn timestamp_literal(&self, ts: Timestamp) -> String {
        match self {
            Dialect::SqlServer => {
                format!("CAST('{}' AS DATETIME2)", ts.format("%Y-%m-%dT%H:%M:%S"))
            }
            _ => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }

    /// Fully qualified, quoted `schema.table` reference.
    pub fn table_ref(&self, schema: &str, table: &str) -> Result<String, TemplateError> {
        Ok(format!(
            "{}.{}",
            self.quote_identifier(schema)?,
            self.quote_identifier(table)?
        ))
    }

    fn backslash_escapes(&self) -> bool {
        matches!(self, Dialect::MySql | Dialect::BigQuery | Dialect::Databricks)
    }

    // -- functions ------------------------------------------------------------

    pub fn length_fn(&self) -> &'static str {
        match self {
            Dialect::MySql => "CHAR_LENGTH",
            Dialect::SqlServer => "LEN",
            _ => "LENGTH",
        }
    }

    pub fn stddev_fn(&self) -> &'static str {
        match self {
            Dialect::SqlServer => "STDEV",
            _ => "STDDEV_SAMP",
        }
    }

    pub fn current_timestamp(&self) -> &'static str {
        match self {
            Dialect::BigQuery | Dialect::Snowflake | Dialect::Databricks => "CURRENT_TIMESTAMP()",
            _ => "CURRENT_TIMESTAMP",
        }
    }

    /// Literal that compares equal to a boolean true column value.
    pub fn true_literal(&self) -> &'static str {
        match self {
            Dialect::SqlServer | Dialect::Oracle => "1",
            _ => "TRUE",
        }
    }

    /// Suffix for a `SELECT` that reads no table.
    pub fn dual_suffix(&self) -> &'static str {
        match self {
            Dialect::Oracle => " FROM DUAL",
            _ => "",
        }
    }

    /// Median of `expr`, or `None` when the engine has no median aggregate.
    pub fn median(&self, expr: &str) -> Option<String> {
        match self {
            Dialect::Postgres | Dialect::Redshift | Dialect::Snowflake => {
                Some(format!("PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY {expr})"))
            }
            Dialect::Oracle => Some(format!("MEDIAN({expr})")),
            Dialect::BigQuery => Some(format!("APPROX_QUANTILES({expr}, 2)[OFFSET(1)]")),
            Dialect::Databricks => Some(format!("PERCENTILE({expr}, 0.5)")),
            Dialect::MySql | Dialect::SqlServer => None,
        }
    }

    /// Predicate testing `expr` against an already-quoted pattern literal.
    pub fn regex_match(&self, expr: &str, pattern: &str) -> Option<String> {
        match self {
            Dialect::Postgres | Dialect::Redshift => Some(format!("{expr} ~ {pattern}")),
            Dialect::MySql => Some(format!("{expr} REGEXP {pattern}")),
            Dialect::Snowflake | Dialect::Oracle => Some(format!("REGEXP_LIKE({expr}, {pattern})")),
            Dialect::BigQuery => Some(format!("REGEXP_CONTAINS(CAST({expr} AS STRING), {pattern})")),
            Dialect::Databricks => Some(format!("{expr} RLIKE {pattern}")),
            Dialect::SqlServer => None,
        }
    }

    /// Seconds elapsed between `expr` and now.
    pub fn seconds_since(&self, expr: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Redshift => {
                format!("EXTRACT(EPOCH FROM (CURRENT_TIMESTAMP - {expr}))")
            }
            Dialect::MySql => format!("TIMESTAMPDIFF(SECOND, {expr}, CURRENT_TIMESTAMP)"),
            Dialect::SqlServer => format!("DATEDIFF(SECOND, {expr}, SYSUTCDATETIME())"),
            Dialect::BigQuery => format!("TIMESTAMP_DIFF(CURRENT_TIMESTAMP(), {expr}, SECOND)"),
            Dialect::Snowflake => format!("DATEDIFF('second', {expr}, CURRENT_TIMESTAMP())"),
            Dialect::Databricks => {
                format!("UNIX_TIMESTAMP(CURRENT_TIMESTAMP()) - UNIX_TIMESTAMP({expr})")
            }
            Dialect::Oracle => {
                format!("(CAST(SYSTIMESTAMP AS DATE) - CAST({expr} AS DATE)) * 86400")
            }
        }
    }

    /// String concatenation of already-rendered expressions.
    pub fn concat(&self, parts: &[String]) -> String {
        match self {
            Dialect::MySql | Dialect::BigQuery => format!("CONCAT({})", parts.join(", ")),
            Dialect::SqlServer => parts.join(" + "),
            _ => parts.join(" || "),
        }
    }

    /// Lowercase hex MD5 of `expr` values joined by commas in `order_by` order.
    pub fn md5_aggregate(&self, expr: &str, order_by: &str) -> String {
        match self {
            Dialect::Postgres => format!("MD5(STRING_AGG({expr}, ',' ORDER BY {order_by}))"),
            Dialect::Redshift | Dialect::Snowflake => {
                format!("MD5(LISTAGG({expr}, ',') WITHIN GROUP (ORDER BY {order_by}))")
            }
            Dialect::MySql => {
                format!("MD5(GROUP_CONCAT({expr} ORDER BY {order_by} SEPARATOR ','))")
            }
            Dialect::SqlServer => format!(
                "LOWER(CONVERT(VARCHAR(32), HASHBYTES('MD5', STRING_AGG({expr}, ',') \
                 WITHIN GROUP (ORDER BY {order_by})), 2))"
            ),
            Dialect::BigQuery => {
                format!("TO_HEX(MD5(STRING_AGG({expr}, ',' ORDER BY {order_by})))")
            }
            Dialect::Databricks => format!(
                "MD5(ARRAY_JOIN(TRANSFORM(ARRAY_SORT(COLLECT_LIST(\
                 NAMED_STRUCT('k', {order_by}, 'v', {expr}))), x -> x.v), ','))"
            ),
            Dialect::Oracle => format!(
                "LOWER(RAWTOHEX(STANDARD_HASH(LISTAGG({expr}, ',') \
                 WITHIN GROUP (ORDER BY {order_by}), 'MD5')))"
            ),
        }
    }

    // -- information schema ---------------------------------------------------

    /// Column metadata relation and the predicate selecting one table's rows.
    pub fn column_catalog(&self, schema: &str, table: &str) -> Result<ColumnCatalog, TemplateError> {
        let catalog = match self {
            Dialect::Oracle => ColumnCatalog {
                relation: "ALL_TAB_COLUMNS".to_string(),
                filter: format!(
                    "OWNER = {} AND TABLE_NAME = {}",
                    self.quote_literal(&schema.to_uppercase())?,
                    self.quote_literal(&table.to_uppercase())?
                ),
                name_column: "COLUMN_NAME",
                type_column: "DATA_TYPE",
                ordinal_column: "COLUMN_ID",
            },
            Dialect::BigQuery => ColumnCatalog {
                relation: format!("{}.INFORMATION_SCHEMA.COLUMNS", self.quote_identifier(schema)?),
                filter: format!("table_name = {}", self.quote_literal(table)?),
                name_column: "column_name",
                type_column: "data_type",
                ordinal_column: "ordinal_position",
            },
            _ => ColumnCatalog {
                relation: "information_schema.columns".to_string(),
                filter: format!(
                    "table_schema = {} AND table_name = {}",
                    self.quote_literal(schema)?,
                    self.quote_literal(table)?
                ),
                name_column: "column_name",
                type_column: "data_type",
                ordinal_column: "ordinal_position",
            },
        };
        Ok(catalog)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an engine exposes column metadata for a table.
#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    pub relation: String,
    pub filter: String,
    pub name_column: &'static str,
    pub type_column: &'static str,
    pub ordinal_column: &'static str,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // -- quote_identifier -----------------------------------------------------

    #[test]
    fn identifiers_quoted_per_engine() {
        assert_eq!(Dialect::Postgres.quote_identifier("orders").unwrap(), "\"orders\"");
        assert_eq!(Dialect::MySql.quote_identifier("orders").unwrap(), "`orders`");
        assert_eq!(Dialect::SqlServer.quote_identifier("orders").unwrap(), "[orders]");
        assert_eq!(Dialect::Oracle.quote_identifier("orders").unwrap(), "\"ORDERS\"");
    }

    #[test]
    fn embedded_quote_characters_are_doubled() {
        assert_eq!(
            Dialect::Postgres.quote_identifier("we\"ird").unwrap(),
            "\"we\"\"ird\""
        );
        assert_eq!(Dialect::BigQuery.quote_identifier("a`b").unwrap(), "`a``b`");
        assert_eq!(Dialect::SqlServer.quote_identifier("a]b").unwrap(), "[a]]b]");
    }

    #[test]
    fn empty_identifier_rejected() {
        assert!(Dialect::Postgres.quote_identifier("").is_err());
        assert!(Dialect::Postgres.quote_identifier("a\0b").is_err());
    }

    // -- quote_literal --------------------------------------------------------

    #[test]
    fn single_quotes_doubled() {
        assert_eq!(
            Dialect::Postgres.quote_literal("it's").unwrap(),
            "'it''s'"
        );
    }

    #[test]
    fn backslash_escaped_only_where_meaningful() {
        assert_eq!(Dialect::MySql.quote_literal(r"a\b").unwrap(), r"'a\\b'");
        assert_eq!(Dialect::Postgres.quote_literal(r"a\b").unwrap(), r"'a\b'");
    }

    #[test]
    fn injection_attempt_stays_inside_literal() {
        let lit = Dialect::MySql.quote_literal(r"x\'; DROP TABLE t; --").unwrap();
        assert_eq!(lit, r"'x\\''; DROP TABLE t; --'");
    }

    // -- literals -------------------------------------------------------------

    #[test]
    fn non_finite_number_rejected() {
        assert!(Dialect::Postgres.number_literal(f64::NAN).is_err());
        assert_eq!(Dialect::Postgres.number_literal(2.5).unwrap(), "2.5");
        assert_eq!(Dialect::Postgres.number_literal(10.0).unwrap(), "10");
    }

    #[test]
    fn timestamp_literal_forms() {
        let ts = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(
            Dialect::Postgres.timestamp_literal(ts),
            "TIMESTAMP '2024-05-01 00:00:00'"
        );
        assert_eq!(
            Dialect::SqlServer.timestamp_literal(ts),
            "CAST('2024-05-01T00:00:00' AS DATETIME2)"
        );
    }

    // -- capabilities ---------------------------------------------------------

    #[test]
    fn capability_matrix() {
        assert!(!Dialect::MySql.supports(Capability::Median));
        assert!(Dialect::MySql.supports(Capability::RegexMatch));
        assert!(!Dialect::SqlServer.supports(Capability::RegexMatch));
        assert!(Dialect::Postgres.median("x").is_some());
        assert!(Dialect::SqlServer.regex_match("x", "'a'").is_none());
    }

    // -- parse ----------------------------------------------------------------

    #[test]
    fn parse_roundtrips_and_accepts_alias() {
        for d in ALL_DIALECTS {
            assert_eq!(Dialect::parse(d.as_str()).unwrap(), d);
        }
        assert_eq!(Dialect::parse("postgresql").unwrap(), Dialect::Postgres);
        assert!(Dialect::parse("sqlite").is_err());
    }
}
