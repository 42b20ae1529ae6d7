use std::collections::HashMap;
use std::sync::Arc;

use audit_ledger::{AuditAction, AuditEvent, AuditSink};
use parking_lot::{Mutex, RwLock};
use semver::Version;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::model::{canonical_signing_bytes, PolicyBundle};
use crate::trust::{RevocationCheck, SignatureVerifier};
use crate::validate::validate_bundle;
use crate::{LoadError, NoActiveBundle};

const COMPONENT: &str = "policy_store";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The bundle is now active; `previous` is the version it replaced.
    Activated { previous: Option<Version> },
    /// The identical bundle was already active.
    Unchanged,
}

/// Holds exactly one active bundle per authority scope.
///
/// Readers clone an `Arc` under a short read lock and keep it for as long as
/// they need; `load` serialises only against other loads and publishes the
/// new bundle with a single map insert.
pub struct PolicyStore {
    active: RwLock<HashMap<String, Arc<PolicyBundle>>>,
    load_lock: Mutex<()>,
    revocation: Option<Arc<dyn RevocationCheck>>,
    audit: Arc<dyn AuditSink>,
}

impl PolicyStore {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
            revocation: None,
            audit,
        }
    }

    pub fn with_revocation(mut self, revocation: Arc<dyn RevocationCheck>) -> Self {
        self.revocation = Some(revocation);
        self
    }

    /// Stable snapshot of the bundle active for `scope`.
    pub fn active(&self, scope: &str) -> Result<Arc<PolicyBundle>, NoActiveBundle> {
        self.active
            .read()
            .get(scope)
            .cloned()
            .ok_or_else(|| NoActiveBundle(scope.to_string()))
    }

    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.active.read().keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Parse, verify and load a bundle from JSON.
    pub fn load_json(
        &self,
        input: &str,
        verifier: &dyn SignatureVerifier,
    ) -> Result<LoadOutcome, LoadError> {
        let bundle = match PolicyBundle::from_json_str(input) {
            Ok(b) => b,
            Err(e) => {
                let err = LoadError::Malformed(e.to_string());
                self.record_rejection("<unparsed>", None, &err);
                return Err(err);
            }
        };
        self.load(bundle, verifier)
    }

    /// Verify and activate `bundle`. On any error the active set is untouched.
    pub fn load(
        &self,
        bundle: PolicyBundle,
        verifier: &dyn SignatureVerifier,
    ) -> Result<LoadOutcome, LoadError> {
        let _loading = self.load_lock.lock();

        match self.check(&bundle, verifier) {
            Ok(Some(previous)) if *previous == bundle => {
                debug!(
                    bundle_id = %bundle.bundle_id,
                    version = %bundle.version,
                    "bundle already active"
                );
                Ok(LoadOutcome::Unchanged)
            }
            Ok(previous) => match bundle.content_hash() {
                Ok(content_hash) => {
                    self.activate(bundle, content_hash, previous.map(|p| p.version.clone()))
                }
                Err(e) => {
                    let err = LoadError::Malformed(format!("content hash: {e}"));
                    self.record_rejection(&bundle.bundle_id, Some(&bundle), &err);
                    Err(err)
                }
            },
            Err(err) => {
                self.record_rejection(&bundle.bundle_id, Some(&bundle), &err);
                Err(err)
            }
        }
    }

    /// Every check short of publishing. Returns the currently active bundle.
    fn check(
        &self,
        bundle: &PolicyBundle,
        verifier: &dyn SignatureVerifier,
    ) -> Result<Option<Arc<PolicyBundle>>, LoadError> {
        let message =
            canonical_signing_bytes(bundle).map_err(|e| LoadError::Malformed(e.to_string()))?;
        if !verifier.verify(&bundle.signing_key_id, &message, &bundle.signature) {
            return Err(LoadError::SignatureInvalid {
                bundle_id: bundle.bundle_id.clone(),
                key_id: bundle.signing_key_id.clone(),
            });
        }

        if let Some(revocation) = &self.revocation {
            match revocation.is_revoked(&bundle.signing_key_id) {
                Ok(false) => {}
                Ok(true) => return Err(LoadError::KeyRevoked(bundle.signing_key_id.clone())),
                Err(reason) => {
                    return Err(LoadError::RevocationUnavailable {
                        key_id: bundle.signing_key_id.clone(),
                        reason,
                    })
                }
            }
        }

        validate_bundle(bundle)?;

        let current = self.active.read().get(&bundle.authority_scope).cloned();
        if let Some(active) = &current {
            let stale = bundle.version < active.version
                || (bundle.version == active.version && **active != *bundle);
            if stale {
                return Err(LoadError::StaleVersion {
                    scope: bundle.authority_scope.clone(),
                    active: active.version.clone(),
                    offered: bundle.version.clone(),
                });
            }
        }
        Ok(current)
    }

    fn activate(
        &self,
        bundle: PolicyBundle,
        content_hash: String,
        previous: Option<Version>,
    ) -> Result<LoadOutcome, LoadError> {
        let audited = self.audit.append(
            AuditEvent::new(COMPONENT, AuditAction::BundleLoaded, "bundle", &bundle.bundle_id)
                .with_payload(json!({
                    "version": bundle.version.to_string(),
                    "authority_scope": bundle.authority_scope,
                    "signing_key_id": bundle.signing_key_id,
                    "rule_count": bundle.rules.len(),
                    "content_hash": content_hash,
                    "previous_version": previous.as_ref().map(|v| v.to_string()),
                })),
        );
        if let Err(e) = audited {
            error!(bundle_id = %bundle.bundle_id, error = %e, "bundle load not audited, keeping previous bundle");
            return Err(e.into());
        }

        info!(
            bundle_id = %bundle.bundle_id,
            version = %bundle.version,
            scope = %bundle.authority_scope,
            rules = bundle.rules.len(),
            "policy bundle activated"
        );
        let scope = bundle.authority_scope.clone();
        self.active.write().insert(scope, Arc::new(bundle));
        Ok(LoadOutcome::Activated { previous })
    }

    fn record_rejection(&self, bundle_id: &str, bundle: Option<&PolicyBundle>, err: &LoadError) {
        warn!(bundle_id, kind = err.kind(), error = %err, "policy bundle rejected");
        let event = AuditEvent::new(COMPONENT, AuditAction::BundleRejected, "bundle", bundle_id)
            .with_payload(json!({
                "kind": err.kind(),
                "reason": err.to_string(),
                "version": bundle.map(|b| b.version.to_string()),
                "authority_scope": bundle.map(|b| b.authority_scope.clone()),
                "signing_key_id": bundle.map(|b| b.signing_key_id.clone()),
            }));
        if let Err(e) = self.audit.append(event) {
            error!(bundle_id, error = %e, "could not audit bundle rejection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Authority, PolicyRule, Predicate};
    use crate::trust::{sign_bundle, Ed25519Verifier, StaticRevocationList, TrustedKeys};
    use audit_ledger::MemoryLedger;
    use chrono::{TimeZone, Utc};
    use clock::ManualClock;
    use ed25519_dalek::SigningKey;

    const KEY_ID: &str = "policy-root";

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[11u8; 32])
    }

    fn verifier() -> Ed25519Verifier {
        let mut keys = TrustedKeys::new();
        keys.insert(KEY_ID, signing_key().verifying_key());
        Ed25519Verifier::new(keys)
    }

    fn rule(id: &str, priority: i64) -> PolicyRule {
        PolicyRule {
            rule_id: id.into(),
            match_conditions: Predicate::always(),
            severity_thresholds: None,
            risk_score_thresholds: None,
            allowed_actions: vec![Action::Route],
            required_authority: Authority::None,
            explanation_template_id: "tmpl-default".into(),
            priority,
        }
    }

    fn signed(version: (u64, u64, u64), rules: Vec<PolicyRule>) -> PolicyBundle {
        let mut b = PolicyBundle {
            bundle_id: format!("bundle-{}.{}.{}", version.0, version.1, version.2),
            version: Version::new(version.0, version.1, version.2),
            authority_scope: "soc".into(),
            rules,
            signature: String::new(),
            signing_key_id: String::new(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        sign_bundle(&mut b, KEY_ID, &signing_key()).unwrap();
        b
    }

    fn store() -> (PolicyStore, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new(Arc::new(ManualClock::at_unix(0))));
        (PolicyStore::new(ledger.clone()), ledger)
    }

    #[test]
    fn no_bundle_is_an_error() {
        let (store, _) = store();
        assert_eq!(store.active("soc").unwrap_err(), NoActiveBundle("soc".into()));
    }

    #[test]
    fn loads_and_activates_signed_bundle() {
        let (store, ledger) = store();
        let outcome = store.load(signed((1, 0, 0), vec![rule("r1", 1)]), &verifier()).unwrap();
        assert_eq!(outcome, LoadOutcome::Activated { previous: None });
        assert_eq!(store.active("soc").unwrap().version, Version::new(1, 0, 0));
        let loaded = ledger.by_action(AuditAction::BundleLoaded);
        assert_eq!(loaded.len(), 1);
        let expected_hash = store.active("soc").unwrap().content_hash().unwrap();
        assert_eq!(expected_hash.len(), 64);
        assert_eq!(loaded[0].payload["content_hash"], expected_hash.as_str());
        assert_eq!(store.scopes(), vec!["soc".to_string()]);
    }

    #[test]
    fn failed_loads_leave_active_bundle_untouched() {
        let (store, ledger) = store();
        store.load(signed((1, 0, 0), vec![rule("r1", 1)]), &verifier()).unwrap();
        let before = store.active("soc").unwrap();

        let mut tampered = signed((2, 0, 0), vec![rule("r1", 1)]);
        tampered.rules[0].allowed_actions = vec![Action::Suppress];
        assert!(matches!(
            store.load(tampered, &verifier()),
            Err(LoadError::SignatureInvalid { .. })
        ));

        let dup = signed((2, 0, 0), vec![rule("r1", 1), rule("r2", 1)]);
        assert!(matches!(
            store.load(dup, &verifier()),
            Err(LoadError::DuplicatePriority { priority: 1, .. })
        ));

        let after = store.active("soc").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(ledger.by_action(AuditAction::BundleRejected).len(), 2);
    }

    #[test]
    fn unknown_signing_key_is_rejected() {
        let (store, _) = store();
        let mut b = signed((1, 0, 0), vec![rule("r1", 1)]);
        sign_bundle(&mut b, "someone-else", &SigningKey::from_bytes(&[12u8; 32])).unwrap();
        assert!(matches!(
            store.load(b, &verifier()),
            Err(LoadError::SignatureInvalid { key_id, .. }) if key_id == "someone-else"
        ));
    }

    #[test]
    fn revoked_key_is_rejected() {
        let (store, _) = store();
        let store = store.with_revocation(Arc::new(StaticRevocationList::new([KEY_ID])));
        let err = store
            .load(signed((1, 0, 0), vec![rule("r1", 1)]), &verifier())
            .unwrap_err();
        assert!(matches!(err, LoadError::KeyRevoked(_)));
    }

    struct RevocationDown;

    impl RevocationCheck for RevocationDown {
        fn is_revoked(&self, _key_id: &str) -> Result<bool, String> {
            Err("revocation service timeout".into())
        }
    }

    #[test]
    fn revocation_lookup_failure_fails_closed() {
        let (store, _) = store();
        let store = store.with_revocation(Arc::new(RevocationDown));
        let err = store
            .load(signed((1, 0, 0), vec![rule("r1", 1)]), &verifier())
            .unwrap_err();
        assert!(matches!(err, LoadError::RevocationUnavailable { .. }));
        assert!(err.is_retryable());
        assert!(store.active("soc").is_err());
    }

    #[test]
    fn older_version_is_stale_and_same_bundle_is_noop() {
        let (store, _) = store();
        let v2 = signed((2, 0, 0), vec![rule("r1", 1)]);
        store.load(v2.clone(), &verifier()).unwrap();

        assert_eq!(store.load(v2, &verifier()).unwrap(), LoadOutcome::Unchanged);
        assert!(matches!(
            store.load(signed((1, 5, 0), vec![rule("r1", 1)]), &verifier()),
            Err(LoadError::StaleVersion { .. })
        ));
        assert!(matches!(
            store.load(signed((2, 0, 0), vec![rule("r9", 1)]), &verifier()),
            Err(LoadError::StaleVersion { .. })
        ));

        let outcome = store.load(signed((2, 1, 0), vec![rule("r1", 1)]), &verifier()).unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Activated {
                previous: Some(Version::new(2, 0, 0))
            }
        );
    }

    #[test]
    fn malformed_json_is_rejected() {
        let (store, ledger) = store();
        let err = store.load_json("{\"bundle_id\": 3}", &verifier()).unwrap_err();
        assert!(matches!(err, LoadError::Malformed(_)));
        assert_eq!(ledger.by_action(AuditAction::BundleRejected).len(), 1);
    }

    #[test]
    fn json_round_trip_keeps_signature_valid() {
        let (store, _) = store();
        let json = signed((1, 0, 0), vec![rule("r1", 1)]).to_json_string().unwrap();
        store.load_json(&json, &verifier()).unwrap();
    }
}
