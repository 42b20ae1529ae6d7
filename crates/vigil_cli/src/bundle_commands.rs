use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use audit_ledger::MemoryLedger;
use clock::SystemClock;
use policy_store::{
    validate_bundle, Ed25519Verifier, PolicyBundle, PolicyStore, StaticRevocationList, TrustedKeys,
};
use serde_json::json;

/// Run the full load path against a scratch store; nothing is activated anywhere else.
pub fn cmd_bundle_verify(file: &Path, keys: &Path, revoked: Vec<String>) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading bundle {}", file.display()))?;
    let verifier = Ed25519Verifier::new(
        TrustedKeys::from_json_file(keys)
            .with_context(|| format!("reading trusted keys {}", keys.display()))?,
    );

    let scratch = PolicyStore::new(Arc::new(MemoryLedger::new(Arc::new(SystemClock))))
        .with_revocation(Arc::new(StaticRevocationList::new(revoked)));
    scratch
        .load_json(&raw, &verifier)
        .with_context(|| format!("bundle {} rejected", file.display()))?;

    let bundle = PolicyBundle::from_json_str(&raw)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "status": "ok",
            "bundle_id": bundle.bundle_id,
            "version": bundle.version.to_string(),
            "authority_scope": bundle.authority_scope,
            "signing_key_id": bundle.signing_key_id,
            "rules": bundle.rules.len(),
            "content_hash": bundle.content_hash()?,
        }))?
    );
    Ok(())
}

pub fn cmd_bundle_inspect(file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading bundle {}", file.display()))?;
    let bundle = PolicyBundle::from_json_str(&raw)
        .with_context(|| format!("parsing bundle {}", file.display()))?;

    let rules: Vec<_> = bundle
        .rules_by_priority()
        .into_iter()
        .map(|r| {
            json!({
                "priority": r.priority,
                "rule_id": r.rule_id,
                "allowed_actions": r.allowed_actions,
                "required_authority": r.required_authority,
                "explanation_template_id": r.explanation_template_id,
                "severity_thresholds": r.severity_thresholds,
                "risk_score_thresholds": r.risk_score_thresholds,
                "match_conditions": r.match_conditions,
            })
        })
        .collect();
    let structure = match validate_bundle(&bundle) {
        Ok(()) => "valid".to_string(),
        Err(e) => e.to_string(),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "bundle_id": bundle.bundle_id,
            "version": bundle.version.to_string(),
            "authority_scope": bundle.authority_scope,
            "signing_key_id": bundle.signing_key_id,
            "signed": !bundle.signature.is_empty(),
            "created_at": bundle.created_at,
            "content_hash": bundle.content_hash()?,
            "structure": structure,
            "rules": rules,
        }))?
    );
    Ok(())
}
