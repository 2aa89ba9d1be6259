//! Interquartile-range outlier detection over a check's own history.

use crate::error::CoreError;

/// Fewer historical points than this leaves an anomaly rule indeterminate.
pub const MIN_ANOMALY_POINTS: usize = 7;

/// History length used when a rule does not set `window_size`.
pub const DEFAULT_ANOMALY_WINDOW: usize = 30;

/// How eagerly values are flagged. Maps to the IQR fence multiplier `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "low" => Ok(Sensitivity::Low),
            "medium" => Ok(Sensitivity::Medium),
            "high" => Ok(Sensitivity::High),
            other => Err(CoreError::Validation(format!(
                "Unknown sensitivity: '{other}'. Valid values: low, medium, high"
            ))),
        }
    }

    /// Fence multiplier. Higher sensitivity means tighter fences.
    pub fn k(&self) -> f64 {
        match self {
            Sensitivity::Low => 3.0,
            Sensitivity::Medium => 1.5,
            Sensitivity::High => 1.0,
        }
    }
}

/// Quartiles and the fences derived from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fences {
    pub q1: f64,
    pub q3: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Fences {
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Quantile `p` of an ascending slice using linear interpolation between
/// the order statistics at `floor(p*(n-1))` and `ceil(p*(n-1))`.
///
/// Returns `None` for an empty slice.
pub fn quantile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = p.clamp(0.0, 1.0) * last as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Compute IQR fences for `history`, or `None` when fewer than
/// [`MIN_ANOMALY_POINTS`] finite values are available.
pub fn iqr_fences(history: &[f64], k: f64) -> Option<Fences> {
    let mut sorted: Vec<f64> = history.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.len() < MIN_ANOMALY_POINTS {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let q1 = quantile(&sorted, 0.25)?;
    let q3 = quantile(&sorted, 0.75)?;
    let iqr = q3 - q1;
    Some(Fences {
        q1,
        q3,
        lower: q1 - k * iqr,
        upper: q3 + k * iqr,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
