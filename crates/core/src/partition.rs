//! Partition windows for partitioned check execution.

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

/// Granularity of one partitioned execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeScale {
    Daily,
    Monthly,
}

impl TimeScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeScale::Daily => "daily",
            TimeScale::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "daily" => Ok(TimeScale::Daily),
            "monthly" => Ok(TimeScale::Monthly),
            other => Err(CoreError::Validation(format!("Unknown time scale: '{other}'"))),
        }
    }
}

/// Half-open `[from, to)` range on a partition column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionWindow {
    pub column: String,
    pub from: Timestamp,
    pub to: Timestamp,
}

impl PartitionWindow {
    /// The current day or month containing `now`, in UTC.
    pub fn current(column: impl Into<String>, scale: TimeScale, now: Timestamp) -> Self {
        let today = now.date_naive();
        let (start, end) = match scale {
            TimeScale::Daily => (today, today.succ_opt().unwrap_or(NaiveDate::MAX)),
            TimeScale::Monthly => {
                let first = today.with_day(1).unwrap_or(today);
                let next = if first.month() == 12 {
                    NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
                };
                (first, next.unwrap_or(NaiveDate::MAX))
            }
        };
        Self {
            column: column.into(),
            from: midnight(start),
            to: midnight(end),
        }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.from <= ts && ts < self.to
    }
}

fn midnight(date: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
