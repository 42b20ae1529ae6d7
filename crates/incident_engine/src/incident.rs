use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use core_types::Score;
use serde::{Deserialize, Serialize};

use crate::evidence::Evidence;
use crate::signal::SignalType;

/// Lifecycle stage. Ordering follows escalation: `Suspicious < Probable < Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Suspicious,
    Probable,
    Confirmed,
}

impl Stage {
    pub const PROBABLE_FLOOR: Score = Score::from_points(30);
    pub const CONFIRMED_FLOOR: Score = Score::from_points(70);

    /// Band for a confidence value: `[0,30)`, `[30,70)`, `[70,100]`.
    pub fn for_confidence(confidence: Score) -> Stage {
        if confidence >= Self::CONFIRMED_FLOOR {
            Stage::Confirmed
        } else if confidence >= Self::PROBABLE_FLOOR {
            Stage::Probable
        } else {
            Stage::Suspicious
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Suspicious => Some(Stage::Probable),
            Stage::Probable => Some(Stage::Confirmed),
            Stage::Confirmed => None,
        }
    }

    /// Stage after one update: moves forward by at most one step towards the
    /// band of `confidence`, never backwards.
    pub fn advance(current: Stage, confidence: Score) -> Stage {
        let target = Stage::for_confidence(confidence);
        if target > current {
            current.next().unwrap_or(current)
        } else {
            current
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Suspicious => "SUSPICIOUS",
            Stage::Probable => "PROBABLE",
            Stage::Confirmed => "CONFIRMED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    /// `None` for the entry recorded at creation.
    pub from: Option<Stage>,
    pub to: Stage,
    pub at: DateTime<Utc>,
    pub confidence: Score,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Closed {
        closed_at: DateTime<Utc>,
        closed_by: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub machine_id: String,
    pub dedup_key: String,
    pub confidence_score: Score,
    pub stage: Stage,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    pub stage_history: Vec<StageTransition>,
    pub evidence: Vec<Evidence>,
    pub status: IncidentStatus,
    /// Bumped on every committed change; used for optimistic commits.
    pub version: u64,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        matches!(self.status, IncidentStatus::Open)
    }

    pub fn has_event(&self, event_id: &str) -> bool {
        self.evidence.iter().any(|e| e.event_id == event_id)
    }

    pub fn snapshot(&self) -> IncidentSnapshot {
        let signal_types: BTreeSet<SignalType> =
            self.evidence.iter().map(|e| e.signal_type).collect();
        IncidentSnapshot {
            incident_id: self.incident_id.clone(),
            machine_id: self.machine_id.clone(),
            dedup_key: self.dedup_key.clone(),
            stage: self.stage,
            confidence_score: self.confidence_score,
            risk_score: self.confidence_score,
            evidence_count: self.evidence.len(),
            signal_types: signal_types.into_iter().collect(),
            contradiction_count: self.evidence.iter().filter(|e| e.contradicts).count(),
            first_observed_at: self.first_observed_at,
            last_observed_at: self.last_observed_at,
            version: self.version,
        }
    }
}

/// Read-only view of an incident handed to routing and alerting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentSnapshot {
    pub incident_id: String,
    pub machine_id: String,
    pub dedup_key: String,
    pub stage: Stage,
    pub confidence_score: Score,
    /// Defaults to the confidence score when no external risk model is wired in.
    pub risk_score: Score,
    pub evidence_count: usize,
    /// Distinct, sorted.
    pub signal_types: Vec<SignalType>,
    pub contradiction_count: usize,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    pub version: u64,
}

impl IncidentSnapshot {
    pub fn with_risk_score(mut self, risk_score: Score) -> Self {
        self.risk_score = risk_score;
        self
    }
}

/// What `ingest` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentRef {
    pub snapshot: IncidentSnapshot,
    pub created: bool,
    pub transition: Option<StageTransition>,
}

impl IncidentRef {
    pub fn incident_id(&self) -> &str {
        &self.snapshot.incident_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_half_open() {
        assert_eq!(Stage::for_confidence(Score::from_hundredths(2999)), Stage::Suspicious);
        assert_eq!(Stage::for_confidence(Score::from_points(30)), Stage::Probable);
        assert_eq!(Stage::for_confidence(Score::from_hundredths(6999)), Stage::Probable);
        assert_eq!(Stage::for_confidence(Score::from_points(70)), Stage::Confirmed);
        assert_eq!(Stage::for_confidence(Score::MAX), Stage::Confirmed);
    }

    #[test]
    fn advance_never_skips_or_regresses() {
        assert_eq!(Stage::advance(Stage::Suspicious, Score::from_points(95)), Stage::Probable);
        assert_eq!(Stage::advance(Stage::Probable, Score::from_points(95)), Stage::Confirmed);
        assert_eq!(Stage::advance(Stage::Confirmed, Score::ZERO), Stage::Confirmed);
        assert_eq!(Stage::advance(Stage::Probable, Score::from_points(10)), Stage::Probable);
    }

    #[test]
    fn stage_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Stage::Probable).unwrap(), "\"PROBABLE\"");
    }
}
