//! Incident fields a rule may compare against, and the comparison semantics.
//!
//! Unknown fields and type mismatches evaluate to `false`; evaluation never
//! fails.

use incident_engine::{IncidentSnapshot, Stage};
use policy_store::{Operand, Operator, Severity};

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Bool(bool),
    Text(String),
    /// Ordinal text such as stage or severity: compared by rank when ordered.
    Ranked { text: &'static str, rank: u8 },
    /// Multi-valued field; `equals`/`in` ask for membership.
    Many(Vec<String>),
}

/// Resolve `field` for a snapshot. `severity` is derived from the risk score
/// by the caller so it is computed once per evaluation.
pub fn resolve(field: &str, snapshot: &IncidentSnapshot, severity: Severity) -> Option<FieldValue> {
    let value = match field {
        "stage" => FieldValue::Ranked {
            text: snapshot.stage.as_str(),
            rank: stage_rank(snapshot.stage),
        },
        "severity" => FieldValue::Ranked {
            text: severity.as_str(),
            rank: severity_rank(severity),
        },
        "confidence" | "confidence_score" => FieldValue::Number(snapshot.confidence_score.as_f64()),
        "risk_score" => FieldValue::Number(snapshot.risk_score.as_f64()),
        "evidence_count" => FieldValue::Number(snapshot.evidence_count as f64),
        "contradiction_count" => FieldValue::Number(snapshot.contradiction_count as f64),
        "has_contradictions" => FieldValue::Bool(snapshot.contradiction_count > 0),
        "machine_id" => FieldValue::Text(snapshot.machine_id.clone()),
        "dedup_key" => FieldValue::Text(snapshot.dedup_key.clone()),
        "signal_type" | "signal_types" => FieldValue::Many(
            snapshot
                .signal_types
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
        ),
        _ => return None,
    };
    Some(value)
}

fn stage_rank(stage: Stage) -> u8 {
    match stage {
        Stage::Suspicious => 0,
        Stage::Probable => 1,
        Stage::Confirmed => 2,
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Low => 0,
        Severity::Moderate => 1,
        Severity::High => 2,
        Severity::Critical => 3,
    }
}

/// Rank of an operand naming a stage or severity, using the same scale as
/// the field it is compared with.
fn operand_rank(field_text: &str, operand: &str) -> Option<u8> {
    let upper = operand.trim().to_ascii_uppercase();
    let is_stage = matches!(field_text, "SUSPICIOUS" | "PROBABLE" | "CONFIRMED");
    if is_stage {
        match upper.as_str() {
            "SUSPICIOUS" => Some(0),
            "PROBABLE" => Some(1),
            "CONFIRMED" => Some(2),
            _ => None,
        }
    } else {
        Severity::parse(&upper).map(severity_rank)
    }
}

pub fn compare(value: &FieldValue, op: Operator, operand: &Operand) -> bool {
    match op {
        Operator::Equals => equals(value, operand),
        Operator::NotEquals => comparable(value, operand) && !equals(value, operand),
        Operator::In => match operand {
            Operand::List(items) => items.iter().any(|i| equals(value, i)),
            _ => false,
        },
        Operator::NotIn => match operand {
            Operand::List(items) => {
                items.iter().all(|i| comparable(value, i)) && !items.iter().any(|i| equals(value, i))
            }
            _ => false,
        },
        Operator::GreaterThan
        | Operator::GreaterThanOrEqual
        | Operator::LessThan
        | Operator::LessThanOrEqual => match ordering(value, operand) {
            Some(ord) => match op {
                Operator::GreaterThan => ord.is_gt(),
                Operator::GreaterThanOrEqual => ord.is_ge(),
                Operator::LessThan => ord.is_lt(),
                _ => ord.is_le(),
            },
            None => false,
        },
    }
}

fn comparable(value: &FieldValue, operand: &Operand) -> bool {
    matches!(
        (value, operand),
        (FieldValue::Number(_), Operand::Number(_))
            | (FieldValue::Bool(_), Operand::Bool(_))
            | (FieldValue::Text(_), Operand::Text(_))
            | (FieldValue::Ranked { .. }, Operand::Text(_))
            | (FieldValue::Many(_), Operand::Text(_))
    )
}

fn equals(value: &FieldValue, operand: &Operand) -> bool {
    match (value, operand) {
        (FieldValue::Number(a), Operand::Number(b)) => (a - b).abs() < EPSILON,
        (FieldValue::Bool(a), Operand::Bool(b)) => a == b,
        (FieldValue::Text(a), Operand::Text(b)) => a == b,
        (FieldValue::Ranked { text, .. }, Operand::Text(b)) => text.eq_ignore_ascii_case(b.trim()),
        (FieldValue::Many(items), Operand::Text(b)) => {
            items.iter().any(|i| i.eq_ignore_ascii_case(b.trim()))
        }
        _ => false,
    }
}

fn ordering(value: &FieldValue, operand: &Operand) -> Option<std::cmp::Ordering> {
    match (value, operand) {
        (FieldValue::Number(a), Operand::Number(b)) => a.partial_cmp(b),
        (FieldValue::Ranked { text, rank }, Operand::Text(b)) => {
            operand_rank(text, b).map(|other| rank.cmp(&other))
        }
        _ => None,
    }
}
