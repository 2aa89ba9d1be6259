//! Multi-tier severity resolution.
//!
//! A check carries up to three independently parameterized tiers. They are
//! evaluated fatal, then error, then warning, and the first failing tier
//! decides the severity. Tiers are not a cascading range: a value can fail
//! the warning tier while passing the error tier, or vice versa.

use crate::params::ParamMap;
use crate::rules::{evaluate_tier, Baseline, BaselineNeed, RuleError, RuleKind, TierVerdict};
use crate::severity::Severity;
use crate::value::SensorValue;

/// One tier of a check: the severity it assigns and how it is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct TierRule {
    pub severity: Severity,
    pub rule: RuleKind,
    pub params: ParamMap,
}

/// Overall outcome of a measurement against all tiers.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Passed { message: Option<String> },
    Failed { severity: Severity, message: String },
    /// Every tier lacked the history it needs.
    Indeterminate { message: String },
}

impl Resolution {
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Resolution::Failed { severity, .. } => Some(*severity),
            _ => None,
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, Resolution::Passed { .. })
    }
}

/// Baseline requests needed by a tier list, deduplicated.
pub fn baseline_needs(tiers: &[TierRule]) -> Vec<BaselineNeed> {
    let mut needs: Vec<BaselineNeed> = Vec::new();
    for tier in tiers {
        let need = tier.rule.baseline_need(&tier.params);
        if need != BaselineNeed::None && !needs.contains(&need) {
            needs.push(need);
        }
    }
    needs
}

/// Resolve the overall outcome. `tiers` must be ordered most severe first.
///
/// A skipped tier counts as passed. The result is indeterminate only when no
/// tier failed and no tier could actually be decided.
pub fn resolve(
    tiers: &[TierRule],
    value: Option<&SensorValue>,
    baseline: &Baseline,
) -> Result<Resolution, RuleError> {
    let mut decided: Vec<String> = Vec::new();
    let mut undecided: Vec<String> = Vec::new();

    for tier in tiers {
        let eval = evaluate_tier(tier.rule, &tier.params, value, baseline)?;
        match eval.verdict {
            TierVerdict::Failed => {
                return Ok(Resolution::Failed {
                    severity: tier.severity,
                    message: format!("{}: {}", tier.severity, eval.message),
                });
            }
            TierVerdict::Passed | TierVerdict::Skipped => {
                decided.push(format!("{}: {}", tier.severity, eval.message));
            }
            TierVerdict::Indeterminate => {
                undecided.push(format!("{}: {}", tier.severity, eval.message));
            }
        }
    }

    if decided.is_empty() && !undecided.is_empty() {
        return Ok(Resolution::Indeterminate {
            message: undecided.join("; "),
        });
    }
    let message = (!decided.is_empty()).then(|| decided.join("; "));
    Ok(Resolution::Passed { message })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
