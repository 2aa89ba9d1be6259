//! Incident lifecycle state machine.
//!
//! ```text
//! OPEN ──manual──▶ ACKNOWLEDGED
//! {OPEN, ACKNOWLEDGED} ──manual──▶ MUTED
//! {OPEN, ACKNOWLEDGED, MUTED} ──passing result / manual──▶ RESOLVED
//! ```
//!
//! A check has at most one *live* incident (open, acknowledged or muted).
//! Failing results update it; the first passing result resolves it. This
//! module only plans transitions; stores apply them atomically.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::result::ResultSignal;
use crate::severity::Severity;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
    Muted,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Muted => "muted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "open" => Ok(IncidentStatus::Open),
            "acknowledged" => Ok(IncidentStatus::Acknowledged),
            "resolved" => Ok(IncidentStatus::Resolved),
            "muted" => Ok(IncidentStatus::Muted),
            other => Err(CoreError::Validation(format!("Unknown incident status: '{other}'"))),
        }
    }

    /// Open or acknowledged.
    pub fn is_active(&self) -> bool {
        matches!(self, IncidentStatus::Open | IncidentStatus::Acknowledged)
    }

    /// Not yet resolved. At most one live incident exists per check.
    pub fn is_live(&self) -> bool {
        !matches!(self, IncidentStatus::Resolved)
    }
}

// ---------------------------------------------------------------------------
// Incident
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: DbId,
    pub check_id: DbId,
    pub status: IncidentStatus,
    /// Highest severity observed while live.
    pub severity: Severity,
    pub failure_count: i32,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub acknowledged_at: Option<Timestamp>,
    pub muted_at: Option<Timestamp>,
    pub resolved_at: Option<Timestamp>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
}

/// Insert payload for a freshly opened incident.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIncident {
    pub check_id: DbId,
    pub severity: Severity,
    pub seen_at: Timestamp,
}

impl Incident {
    pub fn acknowledge(&mut self, at: Timestamp) -> Result<(), CoreError> {
        if self.status != IncidentStatus::Open {
            return Err(self.invalid("acknowledge"));
        }
        self.status = IncidentStatus::Acknowledged;
        self.acknowledged_at = Some(at);
        Ok(())
    }

    pub fn mute(&mut self, at: Timestamp) -> Result<(), CoreError> {
        if !self.status.is_active() {
            return Err(self.invalid("mute"));
        }
        self.status = IncidentStatus::Muted;
        self.muted_at = Some(at);
        Ok(())
    }

    pub fn resolve(&mut self, at: Timestamp) -> Result<(), CoreError> {
        if !self.status.is_live() {
            return Err(self.invalid("resolve"));
        }
        self.status = IncidentStatus::Resolved;
        self.resolved_at = Some(at);
        Ok(())
    }

    pub fn is_muted(&self) -> bool {
        self.muted_at.is_some()
    }

    fn invalid(&self, action: &str) -> CoreError {
        CoreError::Conflict(format!(
            "Cannot {action} incident {} in status {}",
            self.id,
            self.status.as_str()
        ))
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Behaviour switches for the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncidentPolicy {
    /// When `false`, a warning-only failure never opens an incident. It still
    /// counts against an incident that is already live.
    pub open_on_warning: bool,
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        Self {
            open_on_warning: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// The change a result should cause.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentTransition {
    Open(NewIncident),
    /// Live incident updated in place. `escalated_from` is set when the
    /// severity increased.
    Update {
        incident: Incident,
        escalated_from: Option<Severity>,
    },
    Resolve(Incident),
    None,
}

/// Plan the transition for a result observed at `executed_at`.
///
/// `live` is the check's current live incident, if any. Results older than
/// the live incident's `last_seen` are stale and ignored.
pub fn plan_transition(
    live: Option<&Incident>,
    check_id: DbId,
    signal: ResultSignal,
    executed_at: Timestamp,
    policy: IncidentPolicy,
) -> IncidentTransition {
    if let Some(incident) = live {
        if executed_at < incident.last_seen {
            return IncidentTransition::None;
        }
    }

    match (live, signal) {
        (None, ResultSignal::Passed) => IncidentTransition::None,
        (Some(incident), ResultSignal::Passed) => {
            let mut resolved = incident.clone();
            resolved.status = IncidentStatus::Resolved;
            resolved.resolved_at = Some(executed_at);
            IncidentTransition::Resolve(resolved)
        }
        (None, ResultSignal::Failed(severity)) => {
            if severity == Severity::Warning && !policy.open_on_warning {
                return IncidentTransition::None;
            }
            IncidentTransition::Open(NewIncident {
                check_id,
                severity,
                seen_at: executed_at,
            })
        }
        (Some(incident), ResultSignal::Failed(severity)) => {
            let mut updated = incident.clone();
            updated.failure_count += 1;
            updated.last_seen = executed_at;
            let escalated_from = (severity > incident.severity).then_some(incident.severity);
            updated.severity = incident.severity.max(severity);
            IncidentTransition::Update {
                incident: updated,
                escalated_from,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Lifecycle events published for each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentEventKind {
    Opened,
    Resolved,
    SeverityChanged,
    Acknowledged,
    Muted,
}

impl IncidentEventKind {
    /// Dot-separated event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            IncidentEventKind::Opened => "incident.opened",
            IncidentEventKind::Resolved => "incident.resolved",
            IncidentEventKind::SeverityChanged => "incident.severity_changed",
            IncidentEventKind::Acknowledged => "incident.acknowledged",
            IncidentEventKind::Muted => "incident.muted",
        }
    }

    pub fn from_event_type(s: &str) -> Option<Self> {
        match s {
            "incident.opened" => Some(IncidentEventKind::Opened),
            "incident.resolved" => Some(IncidentEventKind::Resolved),
            "incident.severity_changed" => Some(IncidentEventKind::SeverityChanged),
            "incident.acknowledged" => Some(IncidentEventKind::Acknowledged),
            "incident.muted" => Some(IncidentEventKind::Muted),
            _ => None,
        }
    }

    /// Whether responders are notified of this kind.
    pub fn is_notifiable(&self) -> bool {
        matches!(
            self,
            IncidentEventKind::Opened | IncidentEventKind::Resolved | IncidentEventKind::SeverityChanged
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone, Utc};

    fn t(minutes: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn open_incident(severity: Severity) -> Incident {
        Incident {
            id: 10,
            check_id: 1,
            status: IncidentStatus::Open,
            severity,
            failure_count: 1,
            first_seen: t(0),
            last_seen: t(0),
            acknowledged_at: None,
            muted_at: None,
            resolved_at: None,
            version: 1,
        }
    }

    // -- plan_transition -------------------------------------------------------

    #[test]
    fn first_failure_opens() {
        let tr = plan_transition(
            None,
            1,
            ResultSignal::Failed(Severity::Warning),
            t(5),
            IncidentPolicy::default(),
        );
        assert_eq!(
            tr,
            IncidentTransition::Open(NewIncident {
                check_id: 1,
                severity: Severity::Warning,
                seen_at: t(5)
            })
        );
    }

    #[test]
    fn warning_policy_suppresses_open() {
        let policy = IncidentPolicy {
            open_on_warning: false,
        };
        let tr = plan_transition(None, 1, ResultSignal::Failed(Severity::Warning), t(5), policy);
        assert_eq!(tr, IncidentTransition::None);
        let tr = plan_transition(None, 1, ResultSignal::Failed(Severity::Error), t(5), policy);
        assert_matches!(tr, IncidentTransition::Open(_));
    }

    #[test]
    fn warning_still_updates_live_incident_when_suppressed() {
        let policy = IncidentPolicy {
            open_on_warning: false,
        };
        let live = open_incident(Severity::Error);
        let tr = plan_transition(Some(&live), 1, ResultSignal::Failed(Severity::Warning), t(5), policy);
        assert_matches!(tr, IncidentTransition::Update { ref incident, escalated_from: None } => {
            assert_eq!(incident.failure_count, 2);
            assert_eq!(incident.severity, Severity::Error);
        });
    }

    #[test]
    fn repeated_failure_escalates_and_counts() {
        let live = open_incident(Severity::Warning);
        let tr = plan_transition(
            Some(&live),
            1,
            ResultSignal::Failed(Severity::Error),
            t(10),
            IncidentPolicy::default(),
        );
        assert_matches!(tr, IncidentTransition::Update { incident, escalated_from: Some(Severity::Warning) } => {
            assert_eq!(incident.failure_count, 2);
            assert_eq!(incident.severity, Severity::Error);
            assert_eq!(incident.last_seen, t(10));
            assert_eq!(incident.first_seen, t(0));
        });
    }

    #[test]
    fn severity_never_decreases() {
        let live = open_incident(Severity::Fatal);
        let tr = plan_transition(
            Some(&live),
            1,
            ResultSignal::Failed(Severity::Warning),
            t(10),
            IncidentPolicy::default(),
        );
        assert_matches!(tr, IncidentTransition::Update { incident, escalated_from: None } => {
            assert_eq!(incident.severity, Severity::Fatal);
        });
    }

    #[test]
    fn pass_resolves_live_incident() {
        let mut live = open_incident(Severity::Error);
        live.status = IncidentStatus::Muted;
        let tr = plan_transition(Some(&live), 1, ResultSignal::Passed, t(20), IncidentPolicy::default());
        assert_matches!(tr, IncidentTransition::Resolve(incident) => {
            assert_eq!(incident.status, IncidentStatus::Resolved);
            assert_eq!(incident.resolved_at, Some(t(20)));
        });
    }

    #[test]
    fn pass_without_incident_is_noop() {
        let tr = plan_transition(None, 1, ResultSignal::Passed, t(20), IncidentPolicy::default());
        assert_eq!(tr, IncidentTransition::None);
    }

    #[test]
    fn stale_result_ignored() {
        let mut live = open_incident(Severity::Error);
        live.last_seen = t(30);
        let tr = plan_transition(Some(&live), 1, ResultSignal::Passed, t(20), IncidentPolicy::default());
        assert_eq!(tr, IncidentTransition::None);
    }

    // -- manual transitions ----------------------------------------------------

    #[test]
    fn acknowledge_only_from_open() {
        let mut i = open_incident(Severity::Error);
        i.acknowledge(t(1)).unwrap();
        assert_eq!(i.status, IncidentStatus::Acknowledged);
        assert_matches!(i.acknowledge(t(2)), Err(CoreError::Conflict(_)));
    }

    #[test]
    fn mute_from_active_states() {
        let mut i = open_incident(Severity::Error);
        i.acknowledge(t(1)).unwrap();
        i.mute(t(2)).unwrap();
        assert_eq!(i.status, IncidentStatus::Muted);
        assert!(i.is_muted());
        assert!(i.mute(t(3)).is_err());
    }

    #[test]
    fn resolved_is_terminal() {
        let mut i = open_incident(Severity::Error);
        i.resolve(t(1)).unwrap();
        assert!(i.resolve(t(2)).is_err());
        assert!(i.acknowledge(t(2)).is_err());
        assert!(i.mute(t(2)).is_err());
    }

    // -- status ----------------------------------------------------------------

    #[test]
    fn live_and_active_sets() {
        assert!(IncidentStatus::Muted.is_live());
        assert!(!IncidentStatus::Muted.is_active());
        assert!(IncidentStatus::Acknowledged.is_active());
        assert!(!IncidentStatus::Resolved.is_live());
    }

    #[test]
    fn event_types_roundtrip() {
        for kind in [
            IncidentEventKind::Opened,
            IncidentEventKind::Resolved,
            IncidentEventKind::SeverityChanged,
            IncidentEventKind::Acknowledged,
            IncidentEventKind::Muted,
        ] {
            assert_eq!(IncidentEventKind::from_event_type(kind.event_type()), Some(kind));
        }
        assert!(!IncidentEventKind::Muted.is_notifiable());
    }
}
