//! Signed, hot-reloadable policy bundles.
//!
//! A bundle becomes active for its `authority_scope` only after its
//! signature, signing key and structure have been checked; readers hold an
//! `Arc` snapshot and are never affected by a concurrent reload.

pub mod model;
pub mod store;
pub mod trust;
pub mod validate;

use audit_ledger::AuditError;
use semver::Version;
use thiserror::Error;

pub use model::{
    canonical_signing_bytes, Action, Authority, Operand, Operator, PolicyBundle, PolicyRule,
    Predicate, ScoreRange, Severity, SeverityRange,
};
pub use store::{LoadOutcome, PolicyStore};
pub use trust::{
    sign_bundle, Ed25519Verifier, RevocationCheck, SignatureVerifier, StaticRevocationList,
    TrustError, TrustedKeys,
};
pub use validate::validate_bundle;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("bundle could not be parsed: {0}")]
    Malformed(String),
    #[error("signature on bundle '{bundle_id}' does not verify for key '{key_id}'")]
    SignatureInvalid { bundle_id: String, key_id: String },
    #[error("signing key '{0}' is revoked")]
    KeyRevoked(String),
    #[error("revocation status for key '{key_id}' unavailable: {reason}")]
    RevocationUnavailable { key_id: String, reason: String },
    #[error("structural violation: {0}")]
    StructuralViolation(String),
    #[error("rules '{first}' and '{second}' share priority {priority}")]
    DuplicatePriority {
        priority: i64,
        first: String,
        second: String,
    },
    #[error("bundle version {offered} for scope '{scope}' does not supersede active {active}")]
    StaleVersion {
        scope: String,
        active: Version,
        offered: Version,
    },
    #[error("audit write failed: {0}")]
    Audit(#[from] AuditError),
}

impl LoadError {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Malformed(_) => "malformed",
            LoadError::SignatureInvalid { .. } => "signature_invalid",
            LoadError::KeyRevoked(_) => "key_revoked",
            LoadError::RevocationUnavailable { .. } => "revocation_unavailable",
            LoadError::StructuralViolation(_) => "structural_violation",
            LoadError::DuplicatePriority { .. } => "duplicate_priority",
            LoadError::StaleVersion { .. } => "stale_version",
            LoadError::Audit(_) => "audit_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LoadError::RevocationUnavailable { .. } => true,
            LoadError::Audit(e) => matches!(e, AuditError::Io(_) | AuditError::Unavailable(_)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no active policy bundle for scope '{0}'")]
pub struct NoActiveBundle(pub String);
