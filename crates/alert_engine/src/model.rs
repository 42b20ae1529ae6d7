use std::fmt;

use chrono::{DateTime, Utc};
use core_types::Score;
use policy_store::{Action, Authority, Severity};
use serde::{Deserialize, Serialize};

/// Coded reason carried by suppression and escalation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    FalsePositive,
    Duplicate,
    PolicySuppression,
    HumanOverride,
    RiskAcceptance,
    PolicyEscalation,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::FalsePositive => "false_positive",
            ReasonCode::Duplicate => "duplicate",
            ReasonCode::PolicySuppression => "policy_suppression",
            ReasonCode::HumanOverride => "human_override",
            ReasonCode::RiskAcceptance => "risk_acceptance",
            ReasonCode::PolicyEscalation => "policy_escalation",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_lowercase()))
            .map_err(|_| format!("unknown reason code '{s}'"))
    }
}

/// Immutable alert fact. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub incident_id: String,
    pub policy_rule_id: Option<String>,
    pub action: Action,
    pub severity: Severity,
    pub risk_score_at_emit: Score,
    pub authority_required: Authority,
    pub routing_decision_id: String,
    /// Version of the incident snapshot the alert was built from.
    #[serde(default)]
    pub snapshot_version: u64,
    pub emitted_at: DateTime<Utc>,
    /// Content identity used for deduplication.
    pub dedup_hash: String,
    /// `content_hash` of the previous alert for this incident, or the root hash.
    pub prev_alert_hash: String,
    /// SHA-256 over every other field, `prev_alert_hash` included.
    pub content_hash: String,
}

impl Alert {
    pub fn compute_content_hash(&self) -> Result<String, serde_json::Error> {
        let mut hashable = self.clone();
        hashable.content_hash = String::new();
        core_types::canonical_hash(&hashable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    pub suppression_id: String,
    pub alert_id: String,
    pub incident_id: String,
    pub reason: ReasonCode,
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub escalation_id: String,
    pub alert_id: String,
    pub incident_id: String,
    pub reason: ReasonCode,
    pub explanation_bundle_id: String,
    /// Downstream systems must satisfy this before acting on the escalation.
    pub authority_required: Authority,
    pub created_at: DateTime<Utc>,
}

/// Recorded when an emission collapses onto an existing alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateNotice {
    pub notice_id: String,
    pub incident_id: String,
    pub dedup_hash: String,
    pub original_alert_id: String,
    pub routing_decision_id: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    Alert(Alert),
    Suppressed(Alert, Suppression),
    Escalated(Alert, Escalation),
    Duplicate(DuplicateNotice),
}

impl AlertOutcome {
    /// The alert recorded by this call; `None` for a duplicate.
    pub fn alert(&self) -> Option<&Alert> {
        match self {
            AlertOutcome::Alert(a) | AlertOutcome::Suppressed(a, _) | AlertOutcome::Escalated(a, _) => {
                Some(a)
            }
            AlertOutcome::Duplicate(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AlertOutcome::Alert(_) => "alert",
            AlertOutcome::Suppressed(..) => "suppressed",
            AlertOutcome::Escalated(..) => "escalated",
            AlertOutcome::Duplicate(_) => "duplicate",
        }
    }
}

/// One atomic write to an alert store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Emission {
    Alert {
        alert: Alert,
        #[serde(default)]
        suppression: Option<Suppression>,
        #[serde(default)]
        escalation: Option<Escalation>,
    },
    Duplicate { notice: DuplicateNotice },
    ManualSuppression { suppression: Suppression },
}

impl From<&AlertOutcome> for Emission {
    fn from(outcome: &AlertOutcome) -> Self {
        match outcome {
            AlertOutcome::Alert(a) => Emission::Alert {
                alert: a.clone(),
                suppression: None,
                escalation: None,
            },
            AlertOutcome::Suppressed(a, s) => Emission::Alert {
                alert: a.clone(),
                suppression: Some(s.clone()),
                escalation: None,
            },
            AlertOutcome::Escalated(a, e) => Emission::Alert {
                alert: a.clone(),
                suppression: None,
                escalation: Some(e.clone()),
            },
            AlertOutcome::Duplicate(n) => Emission::Duplicate { notice: n.clone() },
        }
    }
}
