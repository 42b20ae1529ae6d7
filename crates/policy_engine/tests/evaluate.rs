use std::sync::Arc;

use audit_ledger::{AuditAction, MemoryLedger};
use chrono::{TimeZone, Utc};
use clock::ManualClock;
use core_types::Score;
use ed25519_dalek::SigningKey;
use incident_engine::{IncidentSnapshot, SignalType, Stage};
use policy_engine::{evaluate, Router, RoutingError};
use policy_store::{
    sign_bundle, Action, Authority, Ed25519Verifier, Operand, Operator, PolicyBundle, PolicyRule,
    PolicyStore, Predicate, ScoreRange, Severity, SeverityRange, TrustedKeys,
};
use semver::Version;

fn snapshot(stage: Stage, confidence: u32, signals: Vec<SignalType>) -> IncidentSnapshot {
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    IncidentSnapshot {
        incident_id: "inc-1".into(),
        machine_id: "host-a".into(),
        dedup_key: "host-a".into(),
        stage,
        confidence_score: Score::from_points(confidence),
        risk_score: Score::from_points(confidence),
        evidence_count: signals.len(),
        signal_types: signals,
        contradiction_count: 0,
        first_observed_at: at,
        last_observed_at: at,
        version: 3,
    }
}

fn rule(id: &str, priority: i64, predicate: Predicate, actions: Vec<Action>) -> PolicyRule {
    PolicyRule {
        rule_id: id.into(),
        match_conditions: predicate,
        severity_thresholds: None,
        risk_score_thresholds: None,
        allowed_actions: actions,
        required_authority: Authority::None,
        explanation_template_id: format!("tmpl-{id}"),
        priority,
    }
}

fn bundle(version: u64, rules: Vec<PolicyRule>) -> PolicyBundle {
    PolicyBundle {
        bundle_id: format!("soc-bundle-{version}"),
        version: Version::new(version, 0, 0),
        authority_scope: "soc".into(),
        rules,
        signature: String::new(),
        signing_key_id: "k".into(),
        created_at: Utc.timestamp_opt(1_690_000_000, 0).unwrap(),
    }
}

fn stage_is(stage: &str) -> Predicate {
    Predicate::compare("stage", Operator::Equals, Operand::Text(stage.into()))
}

#[test]
fn lowest_priority_value_wins_regardless_of_listing_order() {
    let b = bundle(
        1,
        vec![
            rule("late", 50, stage_is("CONFIRMED"), vec![Action::Notify]),
            rule("early", 10, stage_is("CONFIRMED"), vec![Action::Escalate, Action::Notify]),
        ],
    );
    let d = evaluate(&snapshot(Stage::Confirmed, 75, vec![]), &b);
    assert_eq!(d.matched_rule_id.as_deref(), Some("early"));
    assert_eq!(d.action, Action::Escalate);
    assert_eq!(d.explanation_template_id.as_deref(), Some("tmpl-early"));
}

#[test]
fn no_match_yields_default_route() {
    let b = bundle(1, vec![rule("c", 1, stage_is("CONFIRMED"), vec![Action::Escalate])]);
    let d = evaluate(&snapshot(Stage::Suspicious, 10, vec![]), &b);
    assert!(d.is_default());
    assert_eq!(d.action, Action::Route);
    assert_eq!(d.required_authority, Authority::None);
}

#[test]
fn unknown_field_never_matches() {
    let b = bundle(
        1,
        vec![
            rule(
                "ghost",
                1,
                Predicate::compare("geo_region", Operator::NotEquals, Operand::Text("eu".into())),
                vec![Action::Suppress],
            ),
            rule("fallback", 2, Predicate::always(), vec![Action::Notify]),
        ],
    );
    let d = evaluate(&snapshot(Stage::Probable, 40, vec![]), &b);
    assert_eq!(d.matched_rule_id.as_deref(), Some("fallback"));
}

#[test]
fn combinators_and_signal_membership() {
    let predicate = Predicate::All {
        conditions: vec![
            Predicate::compare("stage", Operator::GreaterThanOrEqual, Operand::Text("PROBABLE".into())),
            Predicate::Any {
                conditions: vec![
                    Predicate::compare(
                        "signal_types",
                        Operator::In,
                        Operand::List(vec![Operand::Text("DECEPTION_TRIGGER".into())]),
                    ),
                    Predicate::compare("evidence_count", Operator::GreaterThan, Operand::Number(5.0)),
                ],
            },
        ],
    };
    let b = bundle(1, vec![rule("honeypot", 1, predicate, vec![Action::Escalate])]);

    let hit = snapshot(Stage::Probable, 45, vec![SignalType::DeceptionTrigger, SignalType::DnsQuery]);
    assert_eq!(evaluate(&hit, &b).matched_rule_id.as_deref(), Some("honeypot"));

    let miss = snapshot(Stage::Probable, 45, vec![SignalType::DnsQuery]);
    assert!(evaluate(&miss, &b).is_default());

    let too_early = snapshot(Stage::Suspicious, 25, vec![SignalType::DeceptionTrigger]);
    assert!(evaluate(&too_early, &b).is_default());
}

#[test]
fn thresholds_restrict_rules() {
    let mut high_only = rule("high", 1, Predicate::always(), vec![Action::Escalate]);
    high_only.severity_thresholds = Some(SeverityRange {
        min: Some(Severity::High),
        max: None,
    });
    let mut mid_risk = rule("mid", 2, Predicate::always(), vec![Action::Notify]);
    mid_risk.risk_score_thresholds = Some(ScoreRange {
        min: Some(Score::from_points(40)),
        max: Some(Score::from_points(69)),
    });
    let b = bundle(1, vec![high_only, mid_risk]);

    let d = evaluate(&snapshot(Stage::Confirmed, 85, vec![]), &b);
    assert_eq!(d.matched_rule_id.as_deref(), Some("high"));
    assert_eq!(d.severity, Severity::High);

    let d = evaluate(&snapshot(Stage::Probable, 50, vec![]), &b);
    assert_eq!(d.matched_rule_id.as_deref(), Some("mid"));

    let d = evaluate(&snapshot(Stage::Suspicious, 20, vec![]), &b);
    assert!(d.is_default());
}

#[test]
fn evaluation_is_referentially_transparent() {
    let b = bundle(
        1,
        vec![rule("r", 1, stage_is("PROBABLE"), vec![Action::Suppress])],
    );
    let s = snapshot(Stage::Probable, 40, vec![SignalType::FlowSignal]);
    let first = evaluate(&s, &b);
    for _ in 0..100 {
        assert_eq!(evaluate(&s, &b), first);
    }

    let mut newer = s.clone();
    newer.version += 1;
    assert_ne!(evaluate(&newer, &b).decision_id, first.decision_id);
}

#[test]
fn router_requires_an_active_bundle_and_audits_decisions() {
    let ledger = Arc::new(MemoryLedger::new(Arc::new(ManualClock::at_unix(0))));
    let store = Arc::new(PolicyStore::new(ledger.clone()));
    let router = Router::new(store.clone(), "soc", ledger.clone());

    let s = snapshot(Stage::Probable, 40, vec![]);
    assert!(matches!(router.route(&s), Err(RoutingError::NoActiveBundle(_))));

    let sk = SigningKey::from_bytes(&[31u8; 32]);
    let mut keys = TrustedKeys::new();
    keys.insert("soc-key", sk.verifying_key());
    let verifier = Ed25519Verifier::new(keys);

    let mut v1 = bundle(1, vec![rule("v1", 1, Predicate::always(), vec![Action::Notify])]);
    sign_bundle(&mut v1, "soc-key", &sk).unwrap();
    store.load(v1, &verifier).unwrap();

    let held = store.active("soc").unwrap();
    let mut v2 = bundle(2, vec![rule("v2", 1, Predicate::always(), vec![Action::Escalate])]);
    sign_bundle(&mut v2, "soc-key", &sk).unwrap();
    store.load(v2, &verifier).unwrap();

    // An evaluation that grabbed its snapshot before the swap finishes on it.
    assert_eq!(evaluate(&s, &held).matched_rule_id.as_deref(), Some("v1"));
    let d = router.route(&s).unwrap();
    assert_eq!(d.matched_rule_id.as_deref(), Some("v2"));
    assert_eq!(d.bundle_version, "2.0.0");
    assert_eq!(ledger.by_action(AuditAction::RoutingDecided).len(), 1);
}
