//! Historical values for change-detection and anomaly rules.
//!
//! Missing history is never an error here: an unavailable offset leaves the
//! change tier skipped, and a short window leaves the anomaly tier
//! indeterminate. Store failures are logged and treated the same way.

use std::sync::Arc;

use chrono::Duration;
use dq_core::rules::{Baseline, BaselineNeed};
use dq_core::types::{DbId, Timestamp};

use crate::store::ResultsStore;

/// Default half-width of the window accepted around an offset target.
pub const DEFAULT_OFFSET_TOLERANCE_HOURS: i64 = 12;

pub struct BaselineProvider {
    results: Arc<dyn ResultsStore>,
    tolerance: Duration,
}

impl BaselineProvider {
    pub fn new(results: Arc<dyn ResultsStore>) -> Self {
        Self {
            results,
            tolerance: Duration::hours(DEFAULT_OFFSET_TOLERANCE_HOURS),
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Value recorded about `days` before `now`, with `target = now - days`.
    ///
    /// The latest point in `[target - tolerance, target]` wins. Only when
    /// there is none does the earliest point in
    /// `(target, min(target + tolerance, now))` stand in for it.
    pub async fn offset_value(&self, check_id: DbId, now: Timestamp, days: u32) -> Option<f64> {
        let target = now - Duration::days(i64::from(days));
        let lower = target - self.tolerance;
        let upper = (target + self.tolerance).min(now);

        // Stored timestamps have microsecond precision.
        let at_or_before = (target + Duration::microseconds(1)).min(now);
        let earlier = match self.results.query_latest_before(check_id, at_or_before).await {
            Ok(point) => point.filter(|p| p.executed_at >= lower),
            Err(e) => {
                tracing::warn!(check_id, days, error = %e, "Baseline lookup failed");
                return None;
            }
        };
        if let Some(point) = earlier {
            return Some(point.value);
        }

        match self.results.query_earliest_between(check_id, target, upper).await {
            Ok(Some(point)) => Some(point.value),
            Ok(None) => {
                tracing::debug!(check_id, days, "No baseline within tolerance");
                None
            }
            Err(e) => {
                tracing::warn!(check_id, days, error = %e, "Baseline lookup failed");
                None
            }
        }
    }

    /// Up to `size` values strictly before `now`, oldest first.
    pub async fn window_values(&self, check_id: DbId, now: Timestamp, size: usize) -> Vec<f64> {
        match self.results.query_window(check_id, size, now).await {
            Ok(points) => points.into_iter().map(|p| p.value).collect(),
            Err(e) => {
                tracing::warn!(check_id, size, error = %e, "Baseline window lookup failed");
                Vec::new()
            }
        }
    }

    /// Gather everything `needs` asks for into one [`Baseline`].
    ///
    /// Window needs share a single query sized to the largest request.
    pub async fn fetch(&self, check_id: DbId, now: Timestamp, needs: &[BaselineNeed]) -> Baseline {
        let mut baseline = Baseline::default();
        let mut window_size = 0usize;

        for need in needs {
            match *need {
                BaselineNeed::None => {}
                BaselineNeed::Offset { days } => {
                    if let Some(value) = self.offset_value(check_id, now, days).await {
                        baseline = baseline.with_offset(days, value);
                    }
                }
                BaselineNeed::Window { size } => window_size = window_size.max(size),
            }
        }

        if window_size > 0 {
            let values = self.window_values(check_id, now, window_size).await;
            baseline = baseline.with_window(values);
        }
        baseline
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryResultsStore;
    use chrono::{TimeZone, Utc};
    use dq_core::result::CheckResult;
    use dq_core::value::SensorValue;

    fn day(d: u32, h: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    fn point(check_id: DbId, at: Timestamp, v: f64) -> CheckResult {
        CheckResult {
            check_id,
            executed_at: at,
            sensor_value: Some(SensorValue::Number(v)),
            passed: true,
            indeterminate: false,
            severity: None,
            rendered_query: String::new(),
            error: None,
            message: None,
            latency_ms: 1,
        }
    }

    async fn provider_with(points: &[(Timestamp, f64)]) -> BaselineProvider {
        let store = Arc::new(InMemoryResultsStore::default());
        for (at, v) in points {
            store.push(point(1, *at, *v)).await;
        }
        BaselineProvider::new(store)
    }

    // -- offset_value ----------------------------------------------------------

    #[tokio::test]
    async fn offset_within_tolerance_found() {
        let p = provider_with(&[(day(9, 20), 100.0), (day(3, 0), 5.0)]).await;
        // Target is day 10 06:00 minus one day = day 9 06:00; day 9 20:00 is 14h late.
        assert_eq!(p.offset_value(1, day(10, 6), 1).await, None);
        assert_eq!(p.offset_value(1, day(10, 12), 1).await, Some(100.0));
    }

    #[tokio::test]
    async fn offset_prefers_point_at_or_before_target() {
        let just_before = Utc.with_ymd_and_hms(2024, 3, 9, 5, 59, 0).unwrap();
        let p = provider_with(&[(just_before, 100.0), (day(9, 17), 999.0)]).await;
        assert_eq!(p.offset_value(1, day(10, 6), 1).await, Some(100.0));
    }

    #[tokio::test]
    async fn offset_exactly_at_target_counts_as_before() {
        let p = provider_with(&[(day(9, 6), 50.0), (day(9, 7), 60.0)]).await;
        assert_eq!(p.offset_value(1, day(10, 6), 1).await, Some(50.0));
    }

    #[tokio::test]
    async fn offset_falls_back_to_nearest_later_point() {
        let p = provider_with(&[(day(8, 12), 1.0), (day(9, 8), 20.0), (day(9, 15), 30.0)]).await;
        // day 8 12:00 is 18h before the day 9 06:00 target, outside tolerance.
        assert_eq!(p.offset_value(1, day(10, 6), 1).await, Some(20.0));
    }

    #[tokio::test]
    async fn offset_too_old_is_absent() {
        let p = provider_with(&[(day(1, 0), 10.0)]).await;
        assert_eq!(p.offset_value(1, day(10, 0), 7).await, None);
    }

    #[tokio::test]
    async fn offset_never_reads_future_points() {
        let p = provider_with(&[(day(10, 1), 10.0)]).await;
        assert_eq!(p.offset_value(1, day(10, 0), 0).await, None);
    }

    // -- window / fetch --------------------------------------------------------

    #[tokio::test]
    async fn window_is_ascending_and_bounded() {
        let pts: Vec<(Timestamp, f64)> = (1..=9).map(|d| (day(d, 0), d as f64)).collect();
        let p = provider_with(&pts).await;
        assert_eq!(p.window_values(1, day(9, 0), 3).await, vec![6.0, 7.0, 8.0]);
    }

    #[tokio::test]
    async fn fetch_merges_needs() {
        let pts: Vec<(Timestamp, f64)> = (1..=9).map(|d| (day(d, 0), d as f64)).collect();
        let p = provider_with(&pts).await;
        let b = p
            .fetch(
                1,
                day(10, 0),
                &[
                    BaselineNeed::Offset { days: 1 },
                    BaselineNeed::Window { size: 4 },
                    BaselineNeed::Window { size: 2 },
                ],
            )
            .await;
        assert_eq!(b.offset(1), Some(9.0));
        assert_eq!(b.window(10), &[6.0, 7.0, 8.0, 9.0]);
        assert_eq!(b.window(2), &[8.0, 9.0]);
    }
}
