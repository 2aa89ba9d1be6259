//! Folds check results into per-check incident state.
//!
//! Writes for one check are serialized by a [`KeyedMutex`]; the store's
//! live-incident guard and version check make the read-modify-write atomic
//! even across processes. A lost race re-reads and re-plans.

use std::sync::Arc;

use chrono::Utc;
use dq_core::error::CoreError;
use dq_core::incident::{
    plan_transition, Incident, IncidentEventKind, IncidentPolicy, IncidentTransition,
};
use dq_core::result::CheckResult;
use dq_core::severity::Severity;
use dq_core::types::{DbId, Timestamp};
use dq_events::{EventBus, IncidentEvent};

use crate::keyed_lock::KeyedMutex;
use crate::store::{IncidentStore, IncidentWriteError, StoreError};

/// Re-plans allowed after losing a write race.
const MAX_WRITE_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum IncidentError {
    #[error("Incident {0} not found")]
    NotFound(DbId),

    #[error(transparent)]
    Transition(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Gave up after {attempts} conflicting incident writes for check {check_id}")]
    Contention { check_id: DbId, attempts: u32 },
}

/// What a result did to the check's incident.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentOutcome {
    Unchanged,
    Opened(Incident),
    Updated(Incident),
    Escalated { incident: Incident, from: Severity },
    Resolved(Incident),
}

pub struct IncidentManager {
    store: Arc<dyn IncidentStore>,
    bus: Arc<EventBus>,
    policy: IncidentPolicy,
    locks: KeyedMutex,
}

impl IncidentManager {
    pub fn new(store: Arc<dyn IncidentStore>, bus: Arc<EventBus>, policy: IncidentPolicy) -> Self {
        Self {
            store,
            bus,
            policy,
            locks: KeyedMutex::default(),
        }
    }

    pub fn policy(&self) -> IncidentPolicy {
        self.policy
    }

    /// Apply one result. Indeterminate results never touch incidents.
    pub async fn on_result(&self, result: &CheckResult) -> Result<IncidentOutcome, IncidentError> {
        let Some(signal) = result.signal() else {
            tracing::debug!(check_id = result.check_id, "Indeterminate result, incident untouched");
            return Ok(IncidentOutcome::Unchanged);
        };
        let check_id = result.check_id;
        let _guard = self.locks.lock(check_id).await;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let live = self.store.find_live(check_id).await?;
            let transition =
                plan_transition(live.as_ref(), check_id, signal, result.executed_at, self.policy);

            let written = match transition {
                IncidentTransition::None => return Ok(IncidentOutcome::Unchanged),
                IncidentTransition::Open(new) => self
                    .store
                    .insert_live(&new)
                    .await
                    .map(IncidentOutcome::Opened),
                IncidentTransition::Update {
                    incident,
                    escalated_from,
                } => self
                    .store
                    .update(&incident, incident.version)
                    .await
                    .map(|saved| match escalated_from {
                        Some(from) => IncidentOutcome::Escalated { incident: saved, from },
                        None => IncidentOutcome::Updated(saved),
                    }),
                IncidentTransition::Resolve(incident) => self
                    .store
                    .update(&incident, incident.version)
                    .await
                    .map(IncidentOutcome::Resolved),
            };

            match written {
                Ok(outcome) => {
                    self.announce(&outcome, result);
                    return Ok(outcome);
                }
                Err(IncidentWriteError::Conflict) => {
                    tracing::debug!(check_id, attempt, "Incident write conflict, re-planning");
                }
                Err(IncidentWriteError::Store(e)) => return Err(e.into()),
            }
        }

        Err(IncidentError::Contention {
            check_id,
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    // -----------------------------------------------------------------------
    // Manual transitions
    // -----------------------------------------------------------------------

    pub async fn acknowledge(&self, incident_id: DbId) -> Result<Incident, IncidentError> {
        self.manual(incident_id, IncidentEventKind::Acknowledged, Incident::acknowledge)
            .await
    }

    pub async fn mute(&self, incident_id: DbId) -> Result<Incident, IncidentError> {
        self.manual(incident_id, IncidentEventKind::Muted, Incident::mute)
            .await
    }

    pub async fn resolve(&self, incident_id: DbId) -> Result<Incident, IncidentError> {
        self.manual(incident_id, IncidentEventKind::Resolved, Incident::resolve)
            .await
    }

    pub async fn live_incident(&self, check_id: DbId) -> Result<Option<Incident>, IncidentError> {
        Ok(self.store.find_live(check_id).await?)
    }

    pub async fn list(&self, check_id: Option<DbId>) -> Result<Vec<Incident>, IncidentError> {
        Ok(self.store.list(check_id).await?)
    }

    async fn manual(
        &self,
        incident_id: DbId,
        kind: IncidentEventKind,
        apply: fn(&mut Incident, Timestamp) -> Result<(), CoreError>,
    ) -> Result<Incident, IncidentError> {
        let current = self
            .store
            .get(incident_id)
            .await?
            .ok_or(IncidentError::NotFound(incident_id))?;
        let check_id = current.check_id;
        let _guard = self.locks.lock(check_id).await;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut incident = self
                .store
                .get(incident_id)
                .await?
                .ok_or(IncidentError::NotFound(incident_id))?;
            let expected = incident.version;
            apply(&mut incident, Utc::now())?;

            match self.store.update(&incident, expected).await {
                Ok(saved) => {
                    tracing::info!(
                        incident_id,
                        check_id,
                        event_type = kind.event_type(),
                        "Incident updated manually"
                    );
                    self.bus.publish(IncidentEvent::new(kind, &saved));
                    return Ok(saved);
                }
                Err(IncidentWriteError::Conflict) => continue,
                Err(IncidentWriteError::Store(e)) => return Err(e.into()),
            }
        }

        Err(IncidentError::Contention {
            check_id,
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    fn announce(&self, outcome: &IncidentOutcome, result: &CheckResult) {
        let payload = serde_json::json!({
            "executed_at": result.executed_at,
            "sensor_value": result.sensor_value,
            "message": result.message,
            "error": result.error,
        });
        let event = match outcome {
            IncidentOutcome::Unchanged | IncidentOutcome::Updated(_) => return,
            IncidentOutcome::Opened(incident) => {
                IncidentEvent::new(IncidentEventKind::Opened, incident)
            }
            IncidentOutcome::Escalated { incident, from } => {
                IncidentEvent::new(IncidentEventKind::SeverityChanged, incident)
                    .with_previous_severity(*from)
            }
            IncidentOutcome::Resolved(incident) => {
                IncidentEvent::new(IncidentEventKind::Resolved, incident)
            }
        };
        tracing::info!(
            incident_id = event.incident_id,
            check_id = event.check_id,
            severity = %event.severity,
            event_type = event.event_type(),
            "Incident transition"
        );
        self.bus.publish(event.with_payload(payload));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIncidentStore;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone};
    use dq_core::incident::IncidentStatus;
    use dq_core::resolver::Resolution;
    use dq_core::value::SensorValue;

    fn at(minutes: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn result(minutes: i64, severity: Option<Severity>) -> CheckResult {
        let resolution = match severity {
            Some(severity) => Resolution::Failed {
                severity,
                message: "threshold exceeded".into(),
            },
            None => Resolution::Passed { message: None },
        };
        CheckResult::evaluated(
            7,
            at(minutes),
            Some(SensorValue::Number(1.0)),
            resolution,
            "SELECT 1".into(),
            1,
        )
    }

    fn manager(policy: IncidentPolicy) -> (IncidentManager, Arc<InMemoryIncidentStore>, Arc<EventBus>) {
        let store = Arc::new(InMemoryIncidentStore::default());
        let bus = Arc::new(EventBus::default());
        (IncidentManager::new(store.clone(), bus.clone(), policy), store, bus)
    }

    // -- on_result -------------------------------------------------------------

    #[tokio::test]
    async fn open_escalate_resolve_emits_events() {
        let (m, _store, bus) = manager(IncidentPolicy::default());
        let mut rx = bus.subscribe();

        assert_matches!(m.on_result(&result(0, Some(Severity::Warning))).await.unwrap(), IncidentOutcome::Opened(_));
        assert_matches!(
            m.on_result(&result(1, Some(Severity::Error))).await.unwrap(),
            IncidentOutcome::Escalated { from: Severity::Warning, .. }
        );
        assert_matches!(m.on_result(&result(2, Some(Severity::Warning))).await.unwrap(), IncidentOutcome::Updated(ref i) => {
            assert_eq!(i.failure_count, 3);
            assert_eq!(i.severity, Severity::Error);
        });
        assert_matches!(m.on_result(&result(3, None)).await.unwrap(), IncidentOutcome::Resolved(ref i) => {
            assert_eq!(i.resolved_at, Some(at(3)));
        });
        assert_eq!(m.on_result(&result(4, None)).await.unwrap(), IncidentOutcome::Unchanged);

        let kinds: Vec<IncidentEventKind> = std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                IncidentEventKind::Opened,
                IncidentEventKind::SeverityChanged,
                IncidentEventKind::Resolved
            ]
        );
    }

    #[tokio::test]
    async fn indeterminate_result_is_ignored() {
        let (m, store, _bus) = manager(IncidentPolicy::default());
        let r = CheckResult::evaluated(
            7,
            at(0),
            Some(SensorValue::Number(1.0)),
            Resolution::Indeterminate {
                message: "short history".into(),
            },
            String::new(),
            1,
        );
        assert_eq!(m.on_result(&r).await.unwrap(), IncidentOutcome::Unchanged);
        assert_eq!(store.live_count(7).await, 0);
    }

    #[tokio::test]
    async fn warning_policy_respected() {
        let (m, store, _bus) = manager(IncidentPolicy {
            open_on_warning: false,
        });
        m.on_result(&result(0, Some(Severity::Warning))).await.unwrap();
        assert_eq!(store.live_count(7).await, 0);
        m.on_result(&result(1, Some(Severity::Fatal))).await.unwrap();
        assert_eq!(store.live_count(7).await, 1);
    }

    #[tokio::test]
    async fn concurrent_failures_open_one_incident() {
        let (m, store, _bus) = manager(IncidentPolicy::default());
        let m = Arc::new(m);
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let m = m.clone();
            tasks.push(tokio::spawn(async move {
                m.on_result(&result(0, Some(Severity::Error))).await.unwrap()
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(store.live_count(7).await, 1);
        let live = m.live_incident(7).await.unwrap().unwrap();
        assert_eq!(live.failure_count, 16);
    }

    // -- manual ----------------------------------------------------------------

    #[tokio::test]
    async fn muted_incident_still_auto_resolves() {
        let (m, _store, bus) = manager(IncidentPolicy::default());
        let IncidentOutcome::Opened(incident) = m.on_result(&result(0, Some(Severity::Error))).await.unwrap() else {
            panic!("expected an opened incident");
        };
        let mut rx = bus.subscribe();

        let muted = m.mute(incident.id).await.unwrap();
        assert_eq!(muted.status, IncidentStatus::Muted);
        assert_matches!(m.on_result(&result(5, None)).await.unwrap(), IncidentOutcome::Resolved(_));

        assert_eq!(rx.try_recv().unwrap().kind, IncidentEventKind::Muted);
        let resolved = rx.try_recv().unwrap();
        assert_eq!(resolved.kind, IncidentEventKind::Resolved);
        assert!(resolved.muted);
    }

    #[tokio::test]
    async fn invalid_manual_transition_rejected() {
        let (m, _store, _bus) = manager(IncidentPolicy::default());
        let IncidentOutcome::Opened(incident) = m.on_result(&result(0, Some(Severity::Error))).await.unwrap() else {
            panic!("expected an opened incident");
        };
        m.resolve(incident.id).await.unwrap();
        assert_matches!(m.acknowledge(incident.id).await, Err(IncidentError::Transition(_)));
        assert_matches!(m.mute(999).await, Err(IncidentError::NotFound(999)));
    }
}
