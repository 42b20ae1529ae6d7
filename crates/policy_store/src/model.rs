use std::fmt;

use chrono::{DateTime, Utc};
use core_types::Score;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing actions a rule may allow. The first allowed action is the one taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Route,
    Escalate,
    Suppress,
    Notify,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Route => "route",
            Action::Escalate => "escalate",
            Action::Suppress => "suppress",
            Action::Notify => "notify",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who must sign off before an external system acts on a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Authority {
    #[default]
    None,
    Human,
    Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    /// CRITICAL >= 90, HIGH >= 70, MODERATE >= 40, else LOW.
    pub fn from_risk_score(risk: Score) -> Severity {
        match risk.hundredths() {
            r if r >= 9000 => Severity::Critical,
            r if r >= 7000 => Severity::High,
            r if r >= 4000 => Severity::Moderate,
            _ => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Moderate => "MODERATE",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Severity::Low),
            "MODERATE" | "MEDIUM" => Some(Severity::Moderate),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
    NotIn,
}

impl Operator {
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            Operator::GreaterThan
                | Operator::GreaterThanOrEqual
                | Operator::LessThan
                | Operator::LessThanOrEqual
        )
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Operand>),
}

/// Typed predicate tree. Data, not code, so bundles stay signable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    All { conditions: Vec<Predicate> },
    Any { conditions: Vec<Predicate> },
    Compare {
        field: String,
        op: Operator,
        value: Operand,
    },
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: Operator, value: Operand) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    /// Matches every incident.
    pub fn always() -> Self {
        Predicate::All {
            conditions: vec![Predicate::compare(
                "evidence_count",
                Operator::GreaterThanOrEqual,
                Operand::Number(0.0),
            )],
        }
    }
}

/// Inclusive bounds on the incident's risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRange {
    #[serde(default)]
    pub min: Option<Score>,
    #[serde(default)]
    pub max: Option<Score>,
}

impl ScoreRange {
    pub fn contains(&self, score: Score) -> bool {
        self.min.map_or(true, |m| score >= m) && self.max.map_or(true, |m| score <= m)
    }
}

/// Inclusive bounds on the incident's derived severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityRange {
    #[serde(default)]
    pub min: Option<Severity>,
    #[serde(default)]
    pub max: Option<Severity>,
}

impl SeverityRange {
    pub fn contains(&self, severity: Severity) -> bool {
        self.min.map_or(true, |m| severity >= m) && self.max.map_or(true, |m| severity <= m)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub rule_id: String,
    pub match_conditions: Predicate,
    #[serde(default)]
    pub severity_thresholds: Option<SeverityRange>,
    #[serde(default)]
    pub risk_score_thresholds: Option<ScoreRange>,
    pub allowed_actions: Vec<Action>,
    #[serde(default)]
    pub required_authority: Authority,
    pub explanation_template_id: String,
    /// Lower value is evaluated first. Unique within a bundle.
    pub priority: i64,
}

impl PolicyRule {
    pub fn primary_action(&self) -> Option<Action> {
        self.allowed_actions.first().copied()
    }
}

/// Versioned, signed rule set for one authority scope. Never mutated once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBundle {
    pub bundle_id: String,
    pub version: Version,
    pub authority_scope: String,
    pub rules: Vec<PolicyRule>,
    /// Hex-encoded Ed25519 signature over [`canonical_signing_bytes`].
    #[serde(default)]
    pub signature: String,
    pub signing_key_id: String,
    pub created_at: DateTime<Utc>,
}

impl PolicyBundle {
    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Rules sorted by ascending priority.
    pub fn rules_by_priority(&self) -> Vec<&PolicyRule> {
        let mut rules: Vec<&PolicyRule> = self.rules.iter().collect();
        rules.sort_by_key(|r| r.priority);
        rules
    }

    /// SHA-256 over the signed content.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        Ok(core_types::sha256_hex(&canonical_signing_bytes(self)?))
    }
}

/// Bytes a bundle signature covers: canonical JSON (sorted keys) of the
/// bundle with the `signature` field removed.
pub fn canonical_signing_bytes(bundle: &PolicyBundle) -> Result<Vec<u8>, serde_json::Error> {
    let mut value = serde_json::to_value(bundle)?;
    if let Value::Object(map) = &mut value {
        map.remove("signature");
    }
    core_types::canonical_json(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bands() {
        assert_eq!(Severity::from_risk_score(Score::from_points(95)), Severity::Critical);
        assert_eq!(Severity::from_risk_score(Score::from_points(90)), Severity::Critical);
        assert_eq!(Severity::from_risk_score(Score::from_hundredths(8999)), Severity::High);
        assert_eq!(Severity::from_risk_score(Score::from_points(40)), Severity::Moderate);
        assert_eq!(Severity::from_risk_score(Score::from_hundredths(3999)), Severity::Low);
    }

    #[test]
    fn predicate_json_shape() {
        let json = r#"{
            "kind": "any",
            "conditions": [
                {"kind": "compare", "field": "stage", "op": "equals", "value": "CONFIRMED"},
                {"kind": "compare", "field": "signal_types", "op": "in", "value": ["DECEPTION_TRIGGER"]},
                {"kind": "compare", "field": "risk_score", "op": "greater_than_or_equal", "value": 80}
            ]
        }"#;
        let p: Predicate = serde_json::from_str(json).unwrap();
        let Predicate::Any { conditions } = p else {
            panic!("expected any");
        };
        assert_eq!(conditions.len(), 3);
        assert_eq!(
            conditions[2],
            Predicate::compare("risk_score", Operator::GreaterThanOrEqual, Operand::Number(80.0))
        );
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let err = serde_json::from_str::<Action>("\"quarantine\"");
        assert!(err.is_err());
    }

    #[test]
    fn ranges_are_inclusive() {
        let r = ScoreRange {
            min: Some(Score::from_points(40)),
            max: Some(Score::from_points(70)),
        };
        assert!(r.contains(Score::from_points(40)));
        assert!(r.contains(Score::from_points(70)));
        assert!(!r.contains(Score::from_hundredths(7001)));

        let s = SeverityRange {
            min: Some(Severity::High),
            max: None,
        };
        assert!(s.contains(Severity::Critical));
        assert!(!s.contains(Severity::Moderate));
    }
}
