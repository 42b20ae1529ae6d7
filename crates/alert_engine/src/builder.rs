use std::sync::Arc;
use std::time::Duration;

use audit_ledger::{AuditAction, AuditError, AuditEvent, AuditSink};
use clock::Clock;
use core_types::{KeyedLocks, LockTimeout, Score, ROOT_HASH};
use incident_engine::{ConfigError, IncidentSnapshot};
use policy_engine::RoutingDecision;
use policy_store::Action;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chain::{verify_chain, ChainReport};
use crate::model::{
    Alert, AlertOutcome, DuplicateNotice, Emission, Escalation, ReasonCode, Suppression,
};
use crate::store::{AlertStore, AlertStoreError};

const COMPONENT: &str = "alert_engine";

/// Widest risk bucket: the whole 0..=100 score range.
pub const MAX_RISK_BUCKET_WIDTH: u32 = 100;

/// External explanation subsystem. Escalation only records an id it hands
/// back; nothing is generated here.
pub trait ExplanationSource: Send + Sync {
    fn explanation_for(&self, incident_id: &str, template_id: Option<&str>) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Width of a risk score bucket in points. Risk changes inside one
    /// bucket do not produce a new alert.
    pub risk_bucket_width: u32,
    pub lock_timeout_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            risk_bucket_width: 10,
            lock_timeout_ms: 2000,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_RISK_BUCKET_WIDTH).contains(&self.risk_bucket_width) {
            return Err(ConfigError::Invalid(format!(
                "risk_bucket_width must be within 1..={MAX_RISK_BUCKET_WIDTH}, got {}",
                self.risk_bucket_width
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("lock_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn risk_bucket(&self, risk: Score) -> u32 {
        let width = self.risk_bucket_width.clamp(1, MAX_RISK_BUCKET_WIDTH);
        risk.hundredths() / (width * 100)
    }
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("decision {decision_id} is for incident {decision_incident}, not {snapshot_incident}")]
    IncidentMismatch {
        decision_id: String,
        decision_incident: String,
        snapshot_incident: String,
    },
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),
    #[error("alert store error: {0}")]
    Store(#[from] AlertStoreError),
    #[error("audit write failed: {0}")]
    Audit(#[from] AuditError),
    #[error("alert hashing failed: {0}")]
    Hash(#[source] serde_json::Error),
    #[error("alert {0} not found")]
    UnknownAlert(String),
    #[error("snapshot v{snapshot_version} of incident {incident_id} is older than its last alert (v{emitted_version})")]
    StaleSnapshot {
        incident_id: String,
        snapshot_version: u64,
        emitted_version: u64,
    },
}

impl EmitError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmitError::LockTimeout(_) => true,
            EmitError::Store(e) => e.is_retryable(),
            EmitError::Audit(e) => matches!(e, AuditError::Io(_) | AuditError::Unavailable(_)),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EmitError::IncidentMismatch { .. } => "incident_mismatch",
            EmitError::LockTimeout(_) => "lock_timeout",
            EmitError::Store(_) => "store_error",
            EmitError::Audit(_) => "audit_error",
            EmitError::Hash(_) => "hash_error",
            EmitError::UnknownAlert(_) => "unknown_alert",
            EmitError::StaleSnapshot { .. } => "stale_snapshot",
        }
    }
}

/// Turns routing decisions into immutable alert facts.
///
/// Emission for one incident is serialised by a per-incident section, so the
/// chain order is the emission order. A snapshot older than the one behind
/// the incident's last alert is refused, so the chain head never goes back
/// to an earlier incident state. Each emission is audited first and then
/// written to the store as one record.
pub struct AlertBuilder {
    config: AlertConfig,
    store: Arc<dyn AlertStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    explanations: Option<Arc<dyn ExplanationSource>>,
    locks: KeyedLocks,
}

impl AlertBuilder {
    pub fn new(
        config: AlertConfig,
        store: Arc<dyn AlertStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            audit,
            clock,
            explanations: None,
            locks: KeyedLocks::new(),
        })
    }

    pub fn with_explanations(mut self, source: Arc<dyn ExplanationSource>) -> Self {
        self.explanations = Some(source);
        self
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Content identity of the alert a decision would produce. Time plays no part.
    pub fn dedup_hash(&self, decision: &RoutingDecision) -> String {
        let bucket = self.config.risk_bucket(decision.risk_score).to_string();
        core_types::hash_fields(&[
            decision.incident_id.as_str(),
            decision.matched_rule_id.as_deref().unwrap_or(""),
            decision.severity.as_str(),
            bucket.as_str(),
        ])
    }

    pub fn emit(
        &self,
        snapshot: &IncidentSnapshot,
        decision: &RoutingDecision,
    ) -> Result<AlertOutcome, EmitError> {
        if snapshot.incident_id != decision.incident_id {
            return Err(EmitError::IncidentMismatch {
                decision_id: decision.decision_id.clone(),
                decision_incident: decision.incident_id.clone(),
                snapshot_incident: snapshot.incident_id.clone(),
            });
        }

        let incident_id = snapshot.incident_id.as_str();
        let outcome = self
            .locks
            .with_key(incident_id, self.config.lock_timeout(), || {
                self.emit_locked(snapshot, decision)
            })
            .map_err(|e| {
                warn!(incident_id, waited_ms = e.waited_ms, "alert emission lock timeout");
                EmitError::from(e)
            })?;

        if let Err(e) = &outcome {
            error!(incident_id, kind = e.kind(), error = %e, "alert emission failed");
        }
        outcome
    }

    fn emit_locked(
        &self,
        snapshot: &IncidentSnapshot,
        decision: &RoutingDecision,
    ) -> Result<AlertOutcome, EmitError> {
        let incident_id = snapshot.incident_id.as_str();
        let last = self.store.last_alert(incident_id)?;
        if let Some(last) = &last {
            if snapshot.version < last.snapshot_version {
                warn!(
                    incident_id,
                    snapshot_version = snapshot.version,
                    emitted_version = last.snapshot_version,
                    "stale snapshot refused"
                );
                return Err(EmitError::StaleSnapshot {
                    incident_id: incident_id.to_string(),
                    snapshot_version: snapshot.version,
                    emitted_version: last.snapshot_version,
                });
            }
        }

        let dedup_hash = self.dedup_hash(decision);
        let now = self.clock.now();

        if let Some(original) = self.store.find_by_dedup(incident_id, &dedup_hash)? {
            let notice = DuplicateNotice {
                notice_id: core_types::derive_id(
                    "dup",
                    &[incident_id, dedup_hash.as_str(), decision.decision_id.as_str()],
                ),
                incident_id: incident_id.to_string(),
                dedup_hash,
                original_alert_id: original.alert_id,
                routing_decision_id: decision.decision_id.clone(),
                detected_at: now,
            };
            self.audit.append(
                AuditEvent::new(
                    COMPONENT,
                    AuditAction::AlertDuplicateDetected,
                    "alert",
                    &notice.original_alert_id,
                )
                .with_payload(json!({
                    "incident_id": notice.incident_id,
                    "dedup_hash": notice.dedup_hash,
                    "routing_decision_id": notice.routing_decision_id,
                })),
            )?;
            let outcome = AlertOutcome::Duplicate(notice);
            self.store.record(&Emission::from(&outcome))?;
            debug!(incident_id, "duplicate alert collapsed");
            return Ok(outcome);
        }

        let prev_alert_hash = last
            .map(|a| a.content_hash)
            .unwrap_or_else(|| ROOT_HASH.to_string());

        let mut alert = Alert {
            alert_id: core_types::derive_id("alert", &[incident_id, dedup_hash.as_str()]),
            incident_id: incident_id.to_string(),
            policy_rule_id: decision.matched_rule_id.clone(),
            action: decision.action,
            severity: decision.severity,
            risk_score_at_emit: decision.risk_score,
            authority_required: decision.required_authority,
            routing_decision_id: decision.decision_id.clone(),
            snapshot_version: snapshot.version,
            emitted_at: now,
            dedup_hash,
            prev_alert_hash,
            content_hash: String::new(),
        };
        alert.content_hash = alert.compute_content_hash().map_err(EmitError::Hash)?;

        let (outcome, action) = match decision.action {
            Action::Suppress => {
                let suppression = Suppression {
                    suppression_id: core_types::derive_id("sup", &[alert.alert_id.as_str()]),
                    alert_id: alert.alert_id.clone(),
                    incident_id: alert.incident_id.clone(),
                    reason: ReasonCode::PolicySuppression,
                    actor: format!(
                        "policy:{}",
                        decision.matched_rule_id.as_deref().unwrap_or("default")
                    ),
                    note: Some(format!("{}@{}", decision.bundle_id, decision.bundle_version)),
                    created_at: now,
                };
                (
                    AlertOutcome::Suppressed(alert, suppression),
                    AuditAction::AlertSuppressed,
                )
            }
            Action::Escalate => match self.explanation_for(decision) {
                Some(explanation_bundle_id) => {
                    let escalation = Escalation {
                        escalation_id: core_types::derive_id("esc", &[alert.alert_id.as_str()]),
                        alert_id: alert.alert_id.clone(),
                        incident_id: alert.incident_id.clone(),
                        reason: ReasonCode::PolicyEscalation,
                        explanation_bundle_id,
                        authority_required: decision.required_authority,
                        created_at: now,
                    };
                    (
                        AlertOutcome::Escalated(alert, escalation),
                        AuditAction::AlertEscalated,
                    )
                }
                None => {
                    warn!(
                        incident_id,
                        rule_id = ?decision.matched_rule_id,
                        "escalation withheld: no explanation bundle available"
                    );
                    (AlertOutcome::Alert(alert), AuditAction::EscalationWithheld)
                }
            },
            Action::Route | Action::Notify => (AlertOutcome::Alert(alert), AuditAction::AlertEmitted),
        };

        self.audit_outcome(action, &outcome)?;
        self.store.record(&Emission::from(&outcome))?;

        if let Some(alert) = outcome.alert() {
            info!(
                incident_id,
                alert_id = %alert.alert_id,
                outcome = outcome.kind(),
                severity = %alert.severity.as_str(),
                "alert emitted"
            );
        }
        Ok(outcome)
    }

    fn explanation_for(&self, decision: &RoutingDecision) -> Option<String> {
        self.explanations
            .as_ref()?
            .explanation_for(
                &decision.incident_id,
                decision.explanation_template_id.as_deref(),
            )
            .filter(|id| !id.trim().is_empty())
    }

    fn audit_outcome(&self, action: AuditAction, outcome: &AlertOutcome) -> Result<(), EmitError> {
        let Some(alert) = outcome.alert() else {
            return Ok(());
        };
        let mut payload = json!({
            "incident_id": alert.incident_id,
            "policy_rule_id": alert.policy_rule_id,
            "action": alert.action,
            "severity": alert.severity,
            "risk_score_at_emit": alert.risk_score_at_emit,
            "authority_required": alert.authority_required,
            "routing_decision_id": alert.routing_decision_id,
            "content_hash": alert.content_hash,
            "prev_alert_hash": alert.prev_alert_hash,
        });
        match outcome {
            AlertOutcome::Suppressed(_, s) => {
                payload["suppression_id"] = json!(s.suppression_id);
                payload["reason"] = json!(s.reason);
            }
            AlertOutcome::Escalated(_, e) => {
                payload["escalation_id"] = json!(e.escalation_id);
                payload["explanation_bundle_id"] = json!(e.explanation_bundle_id);
            }
            _ => {}
        }
        self.audit
            .append(AuditEvent::new(COMPONENT, action, "alert", &alert.alert_id).with_payload(payload))?;
        Ok(())
    }

    /// Attach a manual suppression to an existing alert. The alert itself is
    /// left untouched.
    pub fn suppress(
        &self,
        alert_id: &str,
        reason: ReasonCode,
        actor: &str,
        note: Option<String>,
    ) -> Result<Suppression, EmitError> {
        let alert = self
            .store
            .get(alert_id)?
            .ok_or_else(|| EmitError::UnknownAlert(alert_id.to_string()))?;

        self.locks
            .with_key(&alert.incident_id, self.config.lock_timeout(), || {
                self.suppress_locked(&alert, reason, actor, note)
            })?
    }

    fn suppress_locked(
        &self,
        alert: &Alert,
        reason: ReasonCode,
        actor: &str,
        note: Option<String>,
    ) -> Result<Suppression, EmitError> {
        let suppression = Suppression {
            suppression_id: core_types::new_id(),
            alert_id: alert.alert_id.clone(),
            incident_id: alert.incident_id.clone(),
            reason,
            actor: actor.to_string(),
            note,
            created_at: self.clock.now(),
        };
        self.audit.append(
            AuditEvent::new(COMPONENT, AuditAction::AlertSuppressed, "alert", &alert.alert_id)
                .with_payload(json!({
                    "incident_id": suppression.incident_id,
                    "suppression_id": suppression.suppression_id,
                    "reason": suppression.reason,
                    "actor": suppression.actor,
                })),
        )?;
        self.store.record(&Emission::ManualSuppression {
            suppression: suppression.clone(),
        })?;
        info!(alert_id = %alert.alert_id, reason = %reason, actor, "alert suppressed");
        Ok(suppression)
    }

    pub fn alerts(&self, incident_id: &str) -> Result<Vec<Alert>, EmitError> {
        Ok(self.store.alerts_for(incident_id)?)
    }

    pub fn verify_incident(&self, incident_id: &str) -> Result<ChainReport, EmitError> {
        Ok(verify_chain(&self.store.alerts_for(incident_id)?))
    }
}
