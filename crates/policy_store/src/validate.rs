use std::collections::{HashMap, HashSet};

use crate::model::{Operand, Operator, PolicyBundle, PolicyRule, Predicate};
use crate::LoadError;

/// Maximum predicate nesting accepted at load time.
pub const MAX_PREDICATE_DEPTH: usize = 16;

/// Structural checks run before a bundle may become active.
pub fn validate_bundle(bundle: &PolicyBundle) -> Result<(), LoadError> {
    if bundle.bundle_id.trim().is_empty() {
        return Err(violation("bundle_id is empty"));
    }
    if bundle.authority_scope.trim().is_empty() {
        return Err(violation("authority_scope is empty"));
    }
    if bundle.signing_key_id.trim().is_empty() {
        return Err(violation("signing_key_id is empty"));
    }
    if bundle.rules.is_empty() {
        return Err(violation("bundle has no rules"));
    }

    let mut priorities: HashMap<i64, &str> = HashMap::new();
    let mut rule_ids: HashSet<&str> = HashSet::new();
    for rule in &bundle.rules {
        if let Some(first) = priorities.insert(rule.priority, &rule.rule_id) {
            return Err(LoadError::DuplicatePriority {
                priority: rule.priority,
                first: first.to_string(),
                second: rule.rule_id.clone(),
            });
        }
        if !rule_ids.insert(&rule.rule_id) {
            return Err(violation(format!("duplicate rule_id '{}'", rule.rule_id)));
        }
        validate_rule(rule)?;
    }
    Ok(())
}

fn validate_rule(rule: &PolicyRule) -> Result<(), LoadError> {
    let id = &rule.rule_id;
    if id.trim().is_empty() {
        return Err(violation("rule with empty rule_id"));
    }
    if rule.allowed_actions.is_empty() {
        return Err(violation(format!("rule '{id}' has no allowed_actions")));
    }
    let mut seen = HashSet::new();
    for action in &rule.allowed_actions {
        if !seen.insert(action) {
            return Err(violation(format!("rule '{id}' lists action '{action}' twice")));
        }
    }
    if rule.explanation_template_id.trim().is_empty() {
        return Err(violation(format!("rule '{id}' has no explanation_template_id")));
    }
    if let Some(r) = &rule.risk_score_thresholds {
        if let (Some(min), Some(max)) = (r.min, r.max) {
            if min > max {
                return Err(violation(format!("rule '{id}' risk_score_thresholds min > max")));
            }
        }
    }
    if let Some(r) = &rule.severity_thresholds {
        if let (Some(min), Some(max)) = (r.min, r.max) {
            if min > max {
                return Err(violation(format!("rule '{id}' severity_thresholds min > max")));
            }
        }
    }
    validate_predicate(id, &rule.match_conditions, 0)
}

fn validate_predicate(rule_id: &str, predicate: &Predicate, depth: usize) -> Result<(), LoadError> {
    if depth > MAX_PREDICATE_DEPTH {
        return Err(violation(format!(
            "rule '{rule_id}' predicate nests deeper than {MAX_PREDICATE_DEPTH}"
        )));
    }
    match predicate {
        Predicate::All { conditions } | Predicate::Any { conditions } => {
            if conditions.is_empty() {
                return Err(violation(format!("rule '{rule_id}' has an empty combinator")));
            }
            for c in conditions {
                validate_predicate(rule_id, c, depth + 1)?;
            }
            Ok(())
        }
        Predicate::Compare { field, op, value } => {
            if field.trim().is_empty() {
                return Err(violation(format!("rule '{rule_id}' compares an empty field")));
            }
            let shape_ok = match (op, value) {
                (o, Operand::List(items)) if o.is_set() => {
                    !items.is_empty() && items.iter().all(|i| !matches!(i, Operand::List(_)))
                }
                (o, _) if o.is_set() => false,
                (o, Operand::Number(n)) if o.is_ordered() => n.is_finite(),
                (o, Operand::Text(_)) if o.is_ordered() => true,
                (o, _) if o.is_ordered() => false,
                (Operator::Equals | Operator::NotEquals, Operand::List(_)) => false,
                (_, Operand::Number(n)) => n.is_finite(),
                _ => true,
            };
            if shape_ok {
                Ok(())
            } else {
                Err(violation(format!(
                    "rule '{rule_id}': operand does not fit operator {op:?} on '{field}'"
                )))
            }
        }
    }
}

fn violation(reason: impl Into<String>) -> LoadError {
    LoadError::StructuralViolation(reason.into())
}
