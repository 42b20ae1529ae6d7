use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signal::SignalType;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvidenceError {
    #[error("evidence has no machine id")]
    MissingMachineId,
    #[error("evidence has no event id")]
    MissingEventId,
    #[error("unknown signal type '{0}'")]
    UnknownSignalType(String),
    #[error("event '{event_id}' already attached to incident {incident_id}")]
    DuplicateEvent {
        event_id: String,
        incident_id: String,
    },
    #[error("contradicting evidence for '{dedup_key}' has no open incident to decay")]
    OrphanContradiction { dedup_key: String },
}

impl EvidenceError {
    pub fn kind(&self) -> &'static str {
        match self {
            EvidenceError::MissingMachineId => "missing_machine_id",
            EvidenceError::MissingEventId => "missing_event_id",
            EvidenceError::UnknownSignalType(_) => "unknown_signal_type",
            EvidenceError::DuplicateEvent { .. } => "duplicate_event",
            EvidenceError::OrphanContradiction { .. } => "orphan_contradiction",
        }
    }
}

/// Evidence as it arrives from a collector, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvidence {
    pub event_id: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    pub signal_type: String,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub contradicts: bool,
    /// Narrows the dedup key below machine level (e.g. a process or pattern id).
    #[serde(default)]
    pub pattern_class: Option<String>,
}

impl RawEvidence {
    /// Dedup key the evidence will be filed under, `None` without a machine id.
    pub fn dedup_key(&self) -> Option<String> {
        let machine = self.machine_id.as_deref().map(str::trim).filter(|m| !m.is_empty())?;
        Some(match self.pattern_class.as_deref().map(str::trim) {
            Some(class) if !class.is_empty() => format!("{machine}:{class}"),
            _ => machine.to_string(),
        })
    }
}

/// Validated evidence. Immutable once attached to an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub event_id: String,
    pub machine_id: String,
    pub signal_type: SignalType,
    pub observed_at: DateTime<Utc>,
    pub contradicts: bool,
    #[serde(default)]
    pub pattern_class: Option<String>,
}

impl Evidence {
    /// `machine` or `machine:pattern_class`.
    pub fn dedup_key(&self) -> String {
        match &self.pattern_class {
            Some(class) => format!("{}:{}", self.machine_id, class),
            None => self.machine_id.clone(),
        }
    }
}

impl TryFrom<RawEvidence> for Evidence {
    type Error = EvidenceError;

    fn try_from(raw: RawEvidence) -> Result<Self, Self::Error> {
        let event_id = raw.event_id.trim().to_string();
        if event_id.is_empty() {
            return Err(EvidenceError::MissingEventId);
        }
        let machine_id = raw
            .machine_id
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or(EvidenceError::MissingMachineId)?;
        let signal_type = raw
            .signal_type
            .parse::<SignalType>()
            .map_err(|e| EvidenceError::UnknownSignalType(e.0))?;
        let pattern_class = raw
            .pattern_class
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Evidence {
            event_id,
            machine_id,
            signal_type,
            observed_at: raw.observed_at,
            contradicts: raw.contradicts,
            pattern_class,
        })
    }
}
