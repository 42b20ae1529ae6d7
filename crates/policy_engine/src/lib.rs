//! Deterministic rule evaluation: one incident snapshot plus one bundle
//! snapshot gives exactly one routing decision.

pub mod fields;

use std::sync::Arc;

use audit_ledger::{AuditAction, AuditError, AuditEvent, AuditSink};
use chrono::{DateTime, Utc};
use core_types::Score;
use incident_engine::IncidentSnapshot;
use policy_store::{
    Action, Authority, NoActiveBundle, PolicyBundle, PolicyRule, PolicyStore, Predicate, Severity,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::fields::{compare, resolve};

/// Outcome of evaluating one incident snapshot against one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub decision_id: String,
    pub incident_id: String,
    /// `None` when no rule matched and the default decision was taken.
    pub matched_rule_id: Option<String>,
    pub action: Action,
    pub required_authority: Authority,
    pub explanation_template_id: Option<String>,
    pub severity: Severity,
    pub risk_score: Score,
    pub bundle_id: String,
    pub bundle_version: String,
    pub snapshot_version: u64,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    pub fn is_default(&self) -> bool {
        self.matched_rule_id.is_none()
    }
}

/// Walk `bundle.rules` in ascending priority; the first rule whose
/// predicate and thresholds hold decides. With no match the decision is
/// `route` with no authority required.
///
/// Pure: the decision id and timestamp are derived from the inputs, so
/// repeated calls return identical decisions.
pub fn evaluate(snapshot: &IncidentSnapshot, bundle: &PolicyBundle) -> RoutingDecision {
    let severity = Severity::from_risk_score(snapshot.risk_score);
    let matched = bundle
        .rules_by_priority()
        .into_iter()
        .find(|rule| rule_matches(rule, snapshot, severity));

    let bundle_version = bundle.version.to_string();
    let snapshot_version = snapshot.version.to_string();
    let decision_id = core_types::derive_id(
        "dec",
        &[
            snapshot.incident_id.as_str(),
            snapshot_version.as_str(),
            bundle.bundle_id.as_str(),
            bundle_version.as_str(),
        ],
    );

    let (matched_rule_id, action, required_authority, explanation_template_id) = match matched {
        Some(rule) => (
            Some(rule.rule_id.clone()),
            rule.primary_action().unwrap_or(Action::Route),
            rule.required_authority,
            Some(rule.explanation_template_id.clone()),
        ),
        None => (None, Action::Route, Authority::None, None),
    };

    RoutingDecision {
        decision_id,
        incident_id: snapshot.incident_id.clone(),
        matched_rule_id,
        action,
        required_authority,
        explanation_template_id,
        severity,
        risk_score: snapshot.risk_score,
        bundle_id: bundle.bundle_id.clone(),
        bundle_version,
        snapshot_version: snapshot.version,
        decided_at: snapshot.last_observed_at,
    }
}

fn rule_matches(rule: &PolicyRule, snapshot: &IncidentSnapshot, severity: Severity) -> bool {
    if let Some(range) = &rule.severity_thresholds {
        if !range.contains(severity) {
            return false;
        }
    }
    if let Some(range) = &rule.risk_score_thresholds {
        if !range.contains(snapshot.risk_score) {
            return false;
        }
    }
    predicate_matches(&rule.match_conditions, snapshot, severity)
}

pub fn predicate_matches(
    predicate: &Predicate,
    snapshot: &IncidentSnapshot,
    severity: Severity,
) -> bool {
    match predicate {
        Predicate::All { conditions } => conditions
            .iter()
            .all(|c| predicate_matches(c, snapshot, severity)),
        Predicate::Any { conditions } => conditions
            .iter()
            .any(|c| predicate_matches(c, snapshot, severity)),
        Predicate::Compare { field, op, value } => match resolve(field, snapshot, severity) {
            Some(resolved) => compare(&resolved, *op, value),
            None => false,
        },
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error(transparent)]
    NoActiveBundle(#[from] NoActiveBundle),
    #[error("audit write failed: {0}")]
    Audit(#[from] AuditError),
}

impl RoutingError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RoutingError::Audit(AuditError::Io(_) | AuditError::Unavailable(_))
        )
    }
}

/// Evaluates against whatever bundle is active for one scope and audits the
/// decision. A missing bundle is an error, never an implicit default.
pub struct Router {
    store: Arc<PolicyStore>,
    scope: String,
    audit: Arc<dyn AuditSink>,
}

impl Router {
    pub fn new(store: Arc<PolicyStore>, scope: impl Into<String>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            scope: scope.into(),
            audit,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn route(&self, snapshot: &IncidentSnapshot) -> Result<RoutingDecision, RoutingError> {
        let bundle = self.store.active(&self.scope).map_err(|e| {
            error!(incident_id = %snapshot.incident_id, scope = %self.scope, "no active policy bundle");
            e
        })?;
        let decision = evaluate(snapshot, &bundle);

        self.audit.append(
            AuditEvent::new(
                "policy_engine",
                AuditAction::RoutingDecided,
                "incident",
                &decision.incident_id,
            )
            .with_payload(json!({
                "decision_id": decision.decision_id,
                "matched_rule_id": decision.matched_rule_id,
                "action": decision.action,
                "required_authority": decision.required_authority,
                "severity": decision.severity,
                "risk_score": decision.risk_score,
                "bundle_id": decision.bundle_id,
                "bundle_version": decision.bundle_version,
                "snapshot_version": decision.snapshot_version,
            })),
        )?;

        debug!(
            incident_id = %decision.incident_id,
            rule_id = ?decision.matched_rule_id,
            action = %decision.action,
            bundle_id = %decision.bundle_id,
            "routing decided"
        );
        Ok(decision)
    }
}
