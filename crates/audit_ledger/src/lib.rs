// Audit ledger
// Append-only, hash-chained and signed record of every state change in the core.

pub mod file;
pub mod signer;
pub mod verify;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clock::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use file::{read_records, FileLedger};
pub use signer::LedgerSigner;
pub use verify::{verify_ledger, LedgerError, LedgerReport};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit ledger io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
    #[error("invalid ledger signing key: {0}")]
    InvalidKey(String),
}

/// Kinds of state change mirrored into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    IncidentCreated,
    IncidentUpdated,
    IncidentClosed,
    /// The store refused a change whose audit entry was already written.
    IncidentCommitFailed,
    EvidenceRejected,
    BundleLoaded,
    BundleRejected,
    RoutingDecided,
    AlertEmitted,
    AlertSuppressed,
    AlertEscalated,
    AlertDuplicateDetected,
    EscalationWithheld,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::IncidentCreated => "incident_created",
            AuditAction::IncidentUpdated => "incident_updated",
            AuditAction::IncidentClosed => "incident_closed",
            AuditAction::IncidentCommitFailed => "incident_commit_failed",
            AuditAction::EvidenceRejected => "evidence_rejected",
            AuditAction::BundleLoaded => "bundle_loaded",
            AuditAction::BundleRejected => "bundle_rejected",
            AuditAction::RoutingDecided => "routing_decided",
            AuditAction::AlertEmitted => "alert_emitted",
            AuditAction::AlertSuppressed => "alert_suppressed",
            AuditAction::AlertEscalated => "alert_escalated",
            AuditAction::AlertDuplicateDetected => "alert_duplicate_detected",
            AuditAction::EscalationWithheld => "escalation_withheld",
        }
    }
}

/// What a component asks the ledger to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub component: String,
    pub action: AuditAction,
    pub subject_type: String,
    pub subject_id: String,
    #[serde(default)]
    pub payload: Value,
}

impl AuditEvent {
    pub fn new(
        component: impl Into<String>,
        action: AuditAction,
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            action,
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Sealed ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub entry_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub action: AuditAction,
    pub subject_type: String,
    pub subject_id: String,
    #[serde(default)]
    pub payload: Value,
    /// Empty for the first entry of a ledger.
    pub prev_entry_hash: String,
    pub entry_hash: String,
    #[serde(default)]
    pub signing_key_id: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl AuditRecord {
    /// Hash over every field except `entry_hash` and `signature`.
    pub fn compute_entry_hash(&self) -> Result<String, serde_json::Error> {
        let mut hashable = self.clone();
        hashable.entry_hash = String::new();
        hashable.signature = None;
        core_types::canonical_hash(&hashable)
    }
}

/// Append-only audit destination. Callers treat an error as failure of the
/// whole operation being audited.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent) -> Result<AuditRecord, AuditError>;
}

/// Build the next record in a chain and sign it.
pub(crate) fn seal(
    prev: Option<&AuditRecord>,
    event: AuditEvent,
    timestamp: DateTime<Utc>,
    signer: Option<&LedgerSigner>,
) -> Result<AuditRecord, AuditError> {
    let (sequence, prev_entry_hash) = match prev {
        Some(p) => (p.sequence + 1, p.entry_hash.clone()),
        None => (0, String::new()),
    };

    let mut record = AuditRecord {
        entry_id: core_types::new_id(),
        sequence,
        timestamp,
        component: event.component,
        action: event.action,
        subject_type: event.subject_type,
        subject_id: event.subject_id,
        payload: event.payload,
        prev_entry_hash,
        entry_hash: String::new(),
        signing_key_id: signer.map(|s| s.key_id().to_string()),
        signature: None,
    };

    record.entry_hash = record.compute_entry_hash()?;
    record.signature = signer.map(|s| s.sign_hex(record.entry_hash.as_bytes()));
    Ok(record)
}

/// In-process ledger. Keeps every record in memory.
pub struct MemoryLedger {
    records: Mutex<Vec<AuditRecord>>,
    signer: Option<LedgerSigner>,
    clock: Arc<dyn Clock>,
}

impl MemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            signer: None,
            clock,
        }
    }

    pub fn with_signer(mut self, signer: LedgerSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Records with the given action, in append order.
    pub fn by_action(&self, action: AuditAction) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryLedger {
    fn append(&self, event: AuditEvent) -> Result<AuditRecord, AuditError> {
        let mut records = self.records.lock();
        let record = seal(records.last(), event, self.clock.now(), self.signer.as_ref())?;
        records.push(record.clone());
        Ok(record)
    }
}
