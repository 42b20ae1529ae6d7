use std::sync::Arc;

use audit_ledger::{AuditAction, AuditError, AuditEvent, AuditRecord, AuditSink};
use clock::Clock;
use core_types::{KeyedLocks, LockTimeout, Score};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::evidence::{Evidence, EvidenceError, RawEvidence};
use crate::incident::{
    Incident, IncidentRef, IncidentSnapshot, IncidentStatus, Stage, StageTransition,
};
use crate::store::{IncidentStore, StoreError};

const COMPONENT: &str = "incident_engine";

/// Highest confidence an incident backed by a single evidence item may hold.
pub const SINGLE_EVIDENCE_CEILING: Score =
    Score::from_hundredths(Stage::PROBABLE_FLOOR.hundredths() - 1);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("evidence rejected: {0}")]
    Invalid(#[from] EvidenceError),
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),
    #[error("incident store error: {0}")]
    Store(#[from] StoreError),
    #[error("audit write failed: {0}")]
    Audit(#[from] AuditError),
    #[error("incident {0} not found")]
    NotFound(String),
    #[error("incident {0} is already closed")]
    AlreadyClosed(String),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::LockTimeout(_) => true,
            IngestError::Store(e) => e.is_retryable(),
            IngestError::Audit(e) => matches!(e, AuditError::Io(_) | AuditError::Unavailable(_)),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Invalid(e) => e.kind(),
            IngestError::LockTimeout(_) => "lock_timeout",
            IngestError::Store(_) => "store_error",
            IngestError::Audit(_) => "audit_error",
            IngestError::NotFound(_) => "not_found",
            IngestError::AlreadyClosed(_) => "already_closed",
        }
    }
}

/// Confidence and stage engine.
///
/// Every mutation of one `dedup_key` runs inside that key's exclusive
/// section, is audited first and then committed to the store in one write.
/// If the audit append fails nothing is committed. If the commit fails after
/// the audit entry landed, an `incident_commit_failed` entry naming it is
/// appended, best effort.
pub struct IncidentEngine {
    config: EngineConfig,
    store: Arc<dyn IncidentStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl IncidentEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn IncidentStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            audit,
            clock,
            locks: KeyedLocks::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Attach one evidence item, creating an incident if no open incident
    /// for its dedup key lies within the window.
    pub fn ingest(&self, raw: RawEvidence) -> Result<IncidentRef, IngestError> {
        let evidence = match Evidence::try_from(raw.clone()) {
            Ok(ev) => ev,
            Err(e) => {
                self.record_rejection(&raw.event_id, raw.machine_id.as_deref(), &e);
                return Err(e.into());
            }
        };

        let key = evidence.dedup_key();
        let outcome = self
            .locks
            .with_key(&key, self.config.lock_timeout(), || {
                self.apply_locked(&key, evidence)
            })
            .map_err(|e| {
                warn!(dedup_key = %key, waited_ms = e.waited_ms, "ingest lock timeout");
                IngestError::from(e)
            })?;

        if let Err(e) = &outcome {
            if !matches!(e, IngestError::Invalid(_)) {
                error!(dedup_key = %key, kind = e.kind(), error = %e, "ingest failed");
            }
        }
        outcome
    }

    fn apply_locked(&self, key: &str, evidence: Evidence) -> Result<IncidentRef, IngestError> {
        let current = self
            .store
            .latest_for_key(key)?
            .filter(|inc| inc.is_open() && self.within_window(inc, &evidence));

        match current {
            Some(incident) => self.update(incident, evidence),
            None if evidence.contradicts => {
                let err = EvidenceError::OrphanContradiction {
                    dedup_key: key.to_string(),
                };
                self.record_rejection(&evidence.event_id, Some(&evidence.machine_id), &err);
                Err(err.into())
            }
            None => self.create(key, evidence),
        }
    }

    fn within_window(&self, incident: &Incident, evidence: &Evidence) -> bool {
        let delta = evidence
            .observed_at
            .signed_duration_since(incident.first_observed_at)
            .num_seconds()
            .unsigned_abs();
        delta <= self.config.dedup_window_secs
    }

    fn create(&self, key: &str, evidence: Evidence) -> Result<IncidentRef, IngestError> {
        let weight = self.config.weights.weight(evidence.signal_type);
        let confidence = weight.min(SINGLE_EVIDENCE_CEILING);
        let transition = StageTransition {
            from: None,
            to: Stage::Suspicious,
            at: evidence.observed_at,
            confidence,
        };

        let incident = Incident {
            incident_id: core_types::derive_id("inc", &[key, evidence.event_id.as_str()]),
            machine_id: evidence.machine_id.clone(),
            dedup_key: key.to_string(),
            confidence_score: confidence,
            stage: Stage::Suspicious,
            first_observed_at: evidence.observed_at,
            last_observed_at: evidence.observed_at,
            stage_history: vec![transition.clone()],
            evidence: vec![evidence],
            status: IncidentStatus::Open,
            version: 1,
        };

        let audited = self.audit.append(
            AuditEvent::new(
                COMPONENT,
                AuditAction::IncidentCreated,
                "incident",
                &incident.incident_id,
            )
            .with_payload(json!({
                "dedup_key": incident.dedup_key,
                "machine_id": incident.machine_id,
                "event_id": incident.evidence[0].event_id,
                "signal_type": incident.evidence[0].signal_type,
                "confidence_score": confidence,
                "stage": incident.stage,
                "version": incident.version,
            })),
        )?;
        self.commit_audited(&incident, None, &audited)?;

        info!(
            incident_id = %incident.incident_id,
            dedup_key = %key,
            confidence = %confidence,
            "incident created"
        );
        Ok(IncidentRef {
            snapshot: incident.snapshot(),
            created: true,
            transition: Some(transition),
        })
    }

    fn update(&self, mut incident: Incident, evidence: Evidence) -> Result<IncidentRef, IngestError> {
        if incident.has_event(&evidence.event_id) {
            let err = EvidenceError::DuplicateEvent {
                event_id: evidence.event_id.clone(),
                incident_id: incident.incident_id.clone(),
            };
            self.record_rejection(&evidence.event_id, Some(&evidence.machine_id), &err);
            return Err(err.into());
        }

        let read_version = incident.version;
        let previous = incident.confidence_score;
        let confidence = if evidence.contradicts {
            previous.saturating_sub(self.config.contradiction_decay)
        } else {
            previous.saturating_add(self.config.weights.weight(evidence.signal_type))
        };

        // Contradicting evidence only decays confidence; the stage holds.
        let stage = if evidence.contradicts {
            incident.stage
        } else {
            Stage::advance(incident.stage, confidence)
        };
        let transition = (stage != incident.stage).then(|| StageTransition {
            from: Some(incident.stage),
            to: stage,
            at: evidence.observed_at,
            confidence,
        });

        incident.confidence_score = confidence;
        incident.stage = stage;
        incident.first_observed_at = incident.first_observed_at.min(evidence.observed_at);
        incident.last_observed_at = incident.last_observed_at.max(evidence.observed_at);
        if let Some(t) = &transition {
            incident.stage_history.push(t.clone());
        }
        let event_id = evidence.event_id.clone();
        let signal_type = evidence.signal_type;
        let contradicts = evidence.contradicts;
        incident.evidence.push(evidence);
        incident.version = read_version + 1;

        let audited = self.audit.append(
            AuditEvent::new(
                COMPONENT,
                AuditAction::IncidentUpdated,
                "incident",
                &incident.incident_id,
            )
            .with_payload(json!({
                "event_id": event_id,
                "signal_type": signal_type,
                "contradicts": contradicts,
                "previous_confidence": previous,
                "confidence_score": confidence,
                "stage": stage,
                "transition": transition,
                "version": incident.version,
            })),
        )?;
        self.commit_audited(&incident, Some(read_version), &audited)?;

        match &transition {
            Some(t) => info!(
                incident_id = %incident.incident_id,
                from = ?t.from,
                to = %t.to,
                confidence = %confidence,
                "incident stage advanced"
            ),
            None => debug!(
                incident_id = %incident.incident_id,
                confidence = %confidence,
                contradicts,
                "incident updated"
            ),
        }

        Ok(IncidentRef {
            snapshot: incident.snapshot(),
            created: false,
            transition,
        })
    }

    /// Mark an incident closed. Later evidence for its key opens a new incident.
    pub fn close(&self, incident_id: &str, actor: &str) -> Result<IncidentSnapshot, IngestError> {
        let key = self
            .store
            .get(incident_id)?
            .ok_or_else(|| IngestError::NotFound(incident_id.to_string()))?
            .dedup_key;

        self.locks
            .with_key(&key, self.config.lock_timeout(), || {
                let mut incident = self
                    .store
                    .get(incident_id)?
                    .ok_or_else(|| IngestError::NotFound(incident_id.to_string()))?;
                if !incident.is_open() {
                    return Err(IngestError::AlreadyClosed(incident_id.to_string()));
                }

                let read_version = incident.version;
                let closed_at = self.clock.now();
                incident.status = IncidentStatus::Closed {
                    closed_at,
                    closed_by: actor.to_string(),
                };
                incident.version = read_version + 1;

                let audited = self.audit.append(
                    AuditEvent::new(COMPONENT, AuditAction::IncidentClosed, "incident", incident_id)
                        .with_payload(json!({
                            "closed_by": actor,
                            "closed_at": closed_at,
                            "stage": incident.stage,
                            "confidence_score": incident.confidence_score,
                            "version": incident.version,
                        })),
                )?;
                self.commit_audited(&incident, Some(read_version), &audited)?;

                info!(incident_id, actor, "incident closed");
                Ok(incident.snapshot())
            })
            .map_err(IngestError::from)?
    }

    pub fn incident(&self, incident_id: &str) -> Result<Option<Incident>, IngestError> {
        Ok(self.store.get(incident_id)?)
    }

    pub fn snapshot(&self, incident_id: &str) -> Result<IncidentSnapshot, IngestError> {
        self.store
            .get(incident_id)?
            .map(|i| i.snapshot())
            .ok_or_else(|| IngestError::NotFound(incident_id.to_string()))
    }

    fn commit_audited(
        &self,
        incident: &Incident,
        expected_version: Option<u64>,
        audited: &AuditRecord,
    ) -> Result<(), IngestError> {
        let Err(e) = self.store.commit(incident, expected_version) else {
            return Ok(());
        };
        error!(
            incident_id = %incident.incident_id,
            entry_id = %audited.entry_id,
            error = %e,
            "incident commit failed after audit"
        );
        let event = AuditEvent::new(
            COMPONENT,
            AuditAction::IncidentCommitFailed,
            "incident",
            &incident.incident_id,
        )
        .with_payload(json!({
            "audit_entry_id": audited.entry_id,
            "audited_action": audited.action,
            "version": incident.version,
            "reason": e.to_string(),
        }));
        if let Err(audit_err) = self.audit.append(event) {
            error!(incident_id = %incident.incident_id, error = %audit_err, "could not audit failed commit");
        }
        Err(e.into())
    }

    /// Best effort: the caller is already being told the evidence was rejected.
    fn record_rejection(&self, event_id: &str, machine_id: Option<&str>, err: &EvidenceError) {
        warn!(event_id, machine_id = ?machine_id, kind = err.kind(), error = %err, "evidence rejected");
        let event = AuditEvent::new(COMPONENT, AuditAction::EvidenceRejected, "evidence", event_id)
            .with_payload(json!({
                "machine_id": machine_id,
                "kind": err.kind(),
                "reason": err.to_string(),
            }));
        if let Err(e) = self.audit.append(event) {
            error!(event_id, error = %e, "could not audit evidence rejection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryIncidentStore;
    use crate::SignalType;
    use audit_ledger::{AuditRecord, MemoryLedger};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use clock::ManualClock;

    struct Harness {
        engine: IncidentEngine,
        ledger: Arc<MemoryLedger>,
    }

    fn harness_with(config: EngineConfig) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_unix(1_700_000_000));
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let engine = IncidentEngine::new(
            config,
            Arc::new(MemoryIncidentStore::new()),
            ledger.clone(),
            clock,
        )
        .unwrap();
        Harness { engine, ledger }
    }

    fn harness() -> Harness {
        harness_with(EngineConfig::default())
    }

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(offset_secs)
    }

    fn raw(event_id: &str, signal: &str, at: i64) -> RawEvidence {
        RawEvidence {
            event_id: event_id.into(),
            machine_id: Some("host-a".into()),
            signal_type: signal.into(),
            observed_at: t(at),
            contradicts: false,
            pattern_class: None,
        }
    }

    #[test]
    fn accumulates_to_confirmed() {
        let h = harness();
        let steps = [
            ("e1", "CORRELATION_PATTERN", 1000, Stage::Suspicious),
            ("e2", "PROCESS_ACTIVITY", 2500, Stage::Suspicious),
            ("e3", "FLOW_SIGNAL", 4500, Stage::Probable),
            ("e4", "DECEPTION_TRIGGER", 7000, Stage::Confirmed),
        ];
        let mut ids = Vec::new();
        for (i, (ev, signal, conf, stage)) in steps.into_iter().enumerate() {
            let r = h.engine.ingest(raw(ev, signal, i as i64 * 60)).unwrap();
            assert_eq!(r.snapshot.confidence_score, Score::from_hundredths(conf));
            assert_eq!(r.snapshot.stage, stage);
            assert_eq!(r.created, i == 0);
            ids.push(r.snapshot.incident_id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let incident = h.engine.incident(&ids[0]).unwrap().unwrap();
        let history: Vec<Stage> = incident.stage_history.iter().map(|t| t.to).collect();
        assert_eq!(history, vec![Stage::Suspicious, Stage::Probable, Stage::Confirmed]);
        assert_eq!(incident.evidence.len(), 4);
        assert_eq!(h.ledger.by_action(AuditAction::IncidentCreated).len(), 1);
        assert_eq!(h.ledger.by_action(AuditAction::IncidentUpdated).len(), 3);
    }

    #[test]
    fn single_evidence_is_pinned_below_probable() {
        let h = harness_with(EngineConfig {
            weights: crate::SignalWeights {
                deception_trigger: 95,
                ..Default::default()
            },
            ..EngineConfig::default()
        });
        let r = h.engine.ingest(raw("e1", "DECEPTION_TRIGGER", 0)).unwrap();
        assert_eq!(r.snapshot.stage, Stage::Suspicious);
        assert_eq!(r.snapshot.confidence_score, SINGLE_EVIDENCE_CEILING);
        assert_eq!(SINGLE_EVIDENCE_CEILING.to_string(), "29.99");
    }

    #[test]
    fn big_jump_advances_one_stage_per_update() {
        let h = harness_with(EngineConfig {
            weights: crate::SignalWeights {
                deception_trigger: 80,
                ..Default::default()
            },
            ..EngineConfig::default()
        });
        h.engine.ingest(raw("e1", "DNS_QUERY", 0)).unwrap();
        let r = h.engine.ingest(raw("e2", "DECEPTION_TRIGGER", 10)).unwrap();
        assert_eq!(r.snapshot.confidence_score, Score::from_points(88));
        assert_eq!(r.snapshot.stage, Stage::Probable);

        let r = h.engine.ingest(raw("e3", "DNS_QUERY", 20)).unwrap();
        assert_eq!(r.snapshot.stage, Stage::Confirmed);
    }

    #[test]
    fn contradiction_decays_without_regressing_stage() {
        let h = harness();
        h.engine.ingest(raw("e1", "FLOW_SIGNAL", 0)).unwrap();
        let r = h.engine.ingest(raw("e2", "FLOW_SIGNAL", 10)).unwrap();
        assert_eq!(r.snapshot.stage, Stage::Probable);
        assert_eq!(r.snapshot.confidence_score, Score::from_points(40));

        let mut contra = raw("e3", "MODEL_SIGNAL", 20);
        contra.contradicts = true;
        let r = h.engine.ingest(contra).unwrap();
        assert_eq!(r.snapshot.confidence_score, Score::from_points(30));
        assert_eq!(r.snapshot.contradiction_count, 1);

        let mut contra = raw("e4", "MODEL_SIGNAL", 30);
        contra.contradicts = true;
        let r = h.engine.ingest(contra).unwrap();
        assert_eq!(r.snapshot.confidence_score, Score::from_points(20));
        assert_eq!(r.snapshot.stage, Stage::Probable);
        assert!(r.transition.is_none());
    }

    #[test]
    fn contradiction_never_raises_the_stage() {
        let h = harness_with(EngineConfig {
            weights: crate::SignalWeights {
                deception_trigger: 80,
                ..Default::default()
            },
            ..EngineConfig::default()
        });
        h.engine.ingest(raw("e1", "DNS_QUERY", 0)).unwrap();
        let r = h.engine.ingest(raw("e2", "DECEPTION_TRIGGER", 10)).unwrap();
        assert_eq!(r.snapshot.confidence_score, Score::from_points(88));
        assert_eq!(r.snapshot.stage, Stage::Probable);

        let mut contra = raw("e3", "FLOW_SIGNAL", 20);
        contra.contradicts = true;
        let r = h.engine.ingest(contra).unwrap();
        assert_eq!(r.snapshot.confidence_score, Score::from_points(78));
        assert_eq!(r.snapshot.stage, Stage::Probable);
        assert!(r.transition.is_none());

        let incident = h.engine.incident(r.incident_id()).unwrap().unwrap();
        let history: Vec<Stage> = incident.stage_history.iter().map(|t| t.to).collect();
        assert_eq!(history, vec![Stage::Suspicious, Stage::Probable]);

        // The next supporting item still advances from where the stage held.
        let r = h.engine.ingest(raw("e4", "DNS_QUERY", 30)).unwrap();
        assert_eq!(r.snapshot.stage, Stage::Confirmed);
    }

    #[test]
    fn contradiction_without_incident_is_rejected() {
        let h = harness();
        let mut contra = raw("e1", "FLOW_SIGNAL", 0);
        contra.contradicts = true;
        let err = h.engine.ingest(contra).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Invalid(EvidenceError::OrphanContradiction { .. })
        ));
        assert_eq!(h.ledger.by_action(AuditAction::EvidenceRejected).len(), 1);
        assert!(h.ledger.by_action(AuditAction::IncidentCreated).is_empty());
    }

    #[test]
    fn malformed_evidence_mutates_nothing() {
        let h = harness();
        let first = h.engine.ingest(raw("e1", "FLOW_SIGNAL", 0)).unwrap();

        let mut no_machine = raw("e2", "FLOW_SIGNAL", 5);
        no_machine.machine_id = None;
        assert!(matches!(
            h.engine.ingest(no_machine),
            Err(IngestError::Invalid(EvidenceError::MissingMachineId))
        ));
        assert!(matches!(
            h.engine.ingest(raw("e3", "NOT_A_SIGNAL", 5)),
            Err(IngestError::Invalid(EvidenceError::UnknownSignalType(_)))
        ));

        let after = h.engine.snapshot(first.incident_id()).unwrap();
        assert_eq!(after, first.snapshot);
    }

    #[test]
    fn duplicate_event_is_rejected() {
        let h = harness();
        h.engine.ingest(raw("e1", "FLOW_SIGNAL", 0)).unwrap();
        let err = h.engine.ingest(raw("e1", "FLOW_SIGNAL", 1)).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Invalid(EvidenceError::DuplicateEvent { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn evidence_outside_window_opens_new_incident() {
        let h = harness();
        let a = h.engine.ingest(raw("e1", "FLOW_SIGNAL", 0)).unwrap();
        let b = h.engine.ingest(raw("e2", "FLOW_SIGNAL", 3600)).unwrap();
        assert_eq!(a.incident_id(), b.incident_id());

        let c = h.engine.ingest(raw("e3", "FLOW_SIGNAL", 3601)).unwrap();
        assert!(c.created);
        assert_ne!(a.incident_id(), c.incident_id());
    }

    #[test]
    fn pattern_class_separates_incidents() {
        let h = harness();
        let mut a = raw("e1", "PROCESS_ACTIVITY", 0);
        a.pattern_class = Some("pid-1".into());
        let mut b = raw("e2", "PROCESS_ACTIVITY", 0);
        b.pattern_class = Some("pid-2".into());
        let ra = h.engine.ingest(a).unwrap();
        let rb = h.engine.ingest(b).unwrap();
        assert!(ra.created && rb.created);
        assert_ne!(ra.incident_id(), rb.incident_id());
    }

    #[test]
    fn closed_incident_stops_absorbing() {
        let h = harness();
        let a = h.engine.ingest(raw("e1", "FLOW_SIGNAL", 0)).unwrap();
        let closed = h.engine.close(a.incident_id(), "analyst@soc").unwrap();
        assert_eq!(closed.version, a.snapshot.version + 1);
        assert!(matches!(
            h.engine.close(a.incident_id(), "analyst@soc"),
            Err(IngestError::AlreadyClosed(_))
        ));

        let b = h.engine.ingest(raw("e2", "FLOW_SIGNAL", 10)).unwrap();
        assert!(b.created);
        assert_ne!(a.incident_id(), b.incident_id());
        assert_eq!(h.ledger.by_action(AuditAction::IncidentClosed).len(), 1);
    }

    #[test]
    fn snapshot_lists_distinct_signals() {
        let h = harness();
        h.engine.ingest(raw("e1", "FLOW_SIGNAL", 0)).unwrap();
        h.engine.ingest(raw("e2", "DNS_QUERY", 1)).unwrap();
        let r = h.engine.ingest(raw("e3", "FLOW_SIGNAL", 2)).unwrap();
        assert_eq!(
            r.snapshot.signal_types,
            vec![SignalType::FlowSignal, SignalType::DnsQuery]
        );
        assert_eq!(r.snapshot.evidence_count, 3);
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn append(&self, _event: AuditEvent) -> Result<AuditRecord, AuditError> {
            Err(AuditError::Unavailable("ledger offline".into()))
        }
    }

    struct ConflictingStore;

    impl IncidentStore for ConflictingStore {
        fn get(&self, _incident_id: &str) -> Result<Option<Incident>, StoreError> {
            Ok(None)
        }

        fn latest_for_key(&self, _dedup_key: &str) -> Result<Option<Incident>, StoreError> {
            Ok(None)
        }

        fn commit(&self, incident: &Incident, _expected: Option<u64>) -> Result<(), StoreError> {
            Err(StoreError::Conflict {
                incident_id: incident.incident_id.clone(),
                expected: 0,
                found: 1,
            })
        }

        fn list(&self) -> Result<Vec<Incident>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn failed_commit_is_marked_in_the_ledger() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_unix(0));
        let ledger = Arc::new(MemoryLedger::new(clock.clone()));
        let engine = IncidentEngine::new(
            EngineConfig::default(),
            Arc::new(ConflictingStore),
            ledger.clone(),
            clock,
        )
        .unwrap();

        let err = engine.ingest(raw("e1", "FLOW_SIGNAL", 0)).unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::Conflict { .. })));
        assert!(err.is_retryable());

        let created = ledger.by_action(AuditAction::IncidentCreated);
        let failed = ledger.by_action(AuditAction::IncidentCommitFailed);
        assert_eq!(created.len(), 1);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].subject_id, created[0].subject_id);
        assert_eq!(failed[0].payload["audit_entry_id"], created[0].entry_id.as_str());
        assert_eq!(failed[0].payload["audited_action"], "incident_created");
    }

    #[test]
    fn audit_failure_blocks_commit() {
        let store = Arc::new(MemoryIncidentStore::new());
        let engine = IncidentEngine::new(
            EngineConfig::default(),
            store.clone(),
            Arc::new(FailingSink),
            Arc::new(ManualClock::at_unix(0)),
        )
        .unwrap();
        let err = engine.ingest(raw("e1", "FLOW_SIGNAL", 0)).unwrap_err();
        assert!(matches!(err, IngestError::Audit(_)));
        assert!(err.is_retryable());
        assert!(store.list().unwrap().is_empty());
    }
}
