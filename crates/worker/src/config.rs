//! Worker configuration loaded from environment variables.

use std::time::Duration;

use dq_core::incident::IncidentPolicy;
use dq_core::severity::Severity;
use dq_pipeline::{ExecutionConfig, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Everything the worker binary needs to start.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Upper bound on concurrently running checks.
    pub max_concurrent_checks: usize,
    pub execution: ExecutionConfig,
    /// Half-width of the window around a baseline's target time.
    pub baseline_tolerance: Duration,
    pub incident_policy: IncidentPolicy,
    /// How often the dispatcher polls `check_jobs`.
    pub dispatch_poll_interval: Duration,
    /// Least severe incident event that is forwarded to notification sinks.
    pub notify_min_severity: Severity,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                        | Default   |
    /// |--------------------------------|-----------|
    /// | `DATABASE_URL`                 | required  |
    /// | `DQ_MAX_CONCURRENT_CHECKS`     | `10`      |
    /// | `DQ_CHECK_TIMEOUT_SECS`        | `300`     |
    /// | `DQ_RETRY_MAX_ATTEMPTS`        | `3`       |
    /// | `DQ_RETRY_BASE_DELAY_MS`       | `500`     |
    /// | `DQ_BASELINE_TOLERANCE_HOURS`  | `12`      |
    /// | `DQ_OPEN_INCIDENT_ON_WARNING`  | `true`    |
    /// | `DQ_DISPATCH_POLL_MS`          | `1000`    |
    /// | `DQ_NOTIFY_MIN_SEVERITY`       | `warning` |
    /// | `DQ_LOG_FORMAT`                | `text`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// or `None` when unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let database_url = env
            .raw("DATABASE_URL")
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let max_concurrent_checks: usize = env.parsed("DQ_MAX_CONCURRENT_CHECKS", 10)?;
        if max_concurrent_checks == 0 {
            return Err(ConfigError::Invalid {
                name: "DQ_MAX_CONCURRENT_CHECKS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let retry = RetryPolicy {
            max_attempts: env.parsed("DQ_RETRY_MAX_ATTEMPTS", 3)?,
            initial_delay: Duration::from_millis(env.parsed("DQ_RETRY_BASE_DELAY_MS", 500)?),
            ..RetryPolicy::default()
        };
        let execution = ExecutionConfig {
            timeout: Duration::from_secs(env.parsed("DQ_CHECK_TIMEOUT_SECS", 300)?),
            retry,
        };

        let tolerance_hours: u64 = env.parsed("DQ_BASELINE_TOLERANCE_HOURS", 12)?;

        let notify_min_severity = match env.raw("DQ_NOTIFY_MIN_SEVERITY") {
            None => Severity::Warning,
            Some(value) => Severity::parse(&value).map_err(|e| ConfigError::Invalid {
                name: "DQ_NOTIFY_MIN_SEVERITY",
                value,
                reason: e.to_string(),
            })?,
        };

        let log_format = match env.raw("DQ_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "DQ_LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected 'text' or 'json'".into(),
                })
            }
        };

        Ok(Self {
            database_url,
            max_concurrent_checks,
            execution,
            baseline_tolerance: Duration::from_secs(tolerance_hours * 3600),
            incident_policy: IncidentPolicy {
                open_on_warning: env.parsed("DQ_OPEN_INCIDENT_ON_WARNING", true)?,
            },
            dispatch_poll_interval: Duration::from_millis(env.parsed("DQ_DISPATCH_POLL_MS", 1000)?),
            notify_min_severity,
            log_format,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let c = load(&[("DATABASE_URL", "postgres://localhost/dq")]).unwrap();
        assert_eq!(c.max_concurrent_checks, 10);
        assert_eq!(c.execution.timeout, Duration::from_secs(300));
        assert_eq!(c.execution.retry.max_attempts, 3);
        assert_eq!(c.execution.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(c.baseline_tolerance, Duration::from_secs(12 * 3600));
        assert!(c.incident_policy.open_on_warning);
        assert_eq!(c.dispatch_poll_interval, Duration::from_secs(1));
        assert_eq!(c.notify_min_severity, Severity::Warning);
        assert_eq!(c.log_format, LogFormat::Text);
    }

    #[test]
    fn database_url_is_required() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
        assert_matches!(
            load(&[("DATABASE_URL", "  ")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let c = load(&[
            ("DATABASE_URL", "postgres://db/dq"),
            ("DQ_MAX_CONCURRENT_CHECKS", "4"),
            ("DQ_CHECK_TIMEOUT_SECS", "30"),
            ("DQ_RETRY_MAX_ATTEMPTS", "5"),
            ("DQ_OPEN_INCIDENT_ON_WARNING", "false"),
            ("DQ_NOTIFY_MIN_SEVERITY", "fatal"),
            ("DQ_LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(c.max_concurrent_checks, 4);
        assert_eq!(c.execution.timeout, Duration::from_secs(30));
        assert_eq!(c.execution.retry.max_attempts, 5);
        assert!(!c.incident_policy.open_on_warning);
        assert_eq!(c.notify_min_severity, Severity::Fatal);
        assert_eq!(c.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[("DATABASE_URL", "x"), ("DQ_CHECK_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { name: "DQ_CHECK_TIMEOUT_SECS", .. });

        let err = load(&[("DATABASE_URL", "x"), ("DQ_MAX_CONCURRENT_CHECKS", "0")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { name: "DQ_MAX_CONCURRENT_CHECKS", .. });

        let err = load(&[("DATABASE_URL", "x"), ("DQ_LOG_FORMAT", "xml")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { name: "DQ_LOG_FORMAT", .. });

        let err = load(&[("DATABASE_URL", "x"), ("DQ_NOTIFY_MIN_SEVERITY", "info")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { name: "DQ_NOTIFY_MIN_SEVERITY", .. });
    }
}
