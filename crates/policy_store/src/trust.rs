use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Deserialize;
use thiserror::Error;

use crate::model::{canonical_signing_bytes, PolicyBundle};

/// Narrow signature check the store delegates to.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, key_id: &str, message: &[u8], signature_hex: &str) -> bool;
}

/// Revocation status lookup for a signing key. An `Err` means the status is
/// unknown and the load must fail.
pub trait RevocationCheck: Send + Sync {
    fn is_revoked(&self, key_id: &str) -> Result<bool, String>;
}

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("failed to read trusted keys: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse trusted keys JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid public key material for {0}")]
    InvalidKey(String),
}

#[derive(Debug, Clone, Deserialize)]
struct TrustedKeyRecord {
    key_id: String,
    public_key_hex: String,
}

/// Public keys bundles may be signed with, by `signing_key_id`.
#[derive(Debug, Clone, Default)]
pub struct TrustedKeys {
    keys: HashMap<String, VerifyingKey>,
}

impl TrustedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// `[{"key_id": "...", "public_key_hex": "..."}]`
    pub fn from_json_str(input: &str) -> Result<Self, TrustError> {
        let records: Vec<TrustedKeyRecord> = serde_json::from_str(input)?;
        let mut keys = Self::new();
        for rec in records {
            keys.insert_hex(&rec.key_id, &rec.public_key_hex)?;
        }
        Ok(keys)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TrustError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn insert(&mut self, key_id: impl Into<String>, key: VerifyingKey) {
        self.keys.insert(key_id.into(), key);
    }

    pub fn insert_hex(&mut self, key_id: &str, public_key_hex: &str) -> Result<(), TrustError> {
        let bytes = hex::decode(public_key_hex.trim())
            .map_err(|_| TrustError::InvalidKey(key_id.to_string()))?;
        if bytes.len() != 32 {
            return Err(TrustError::InvalidKey(key_id.to_string()));
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes);
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| TrustError::InvalidKey(key_id.to_string()))?;
        self.keys.insert(key_id.to_string(), key);
        Ok(())
    }

    pub fn get(&self, key_id: &str) -> Option<&VerifyingKey> {
        self.keys.get(key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Ed25519 verification against a set of trusted public keys. Unknown key
/// ids never verify.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    trusted: TrustedKeys,
}

impl Ed25519Verifier {
    pub fn new(trusted: TrustedKeys) -> Self {
        Self { trusted }
    }

    pub fn trusted(&self) -> &TrustedKeys {
        &self.trusted
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, key_id: &str, message: &[u8], signature_hex: &str) -> bool {
        let Some(key) = self.trusted.get(key_id) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(signature_hex.trim()) else {
            return false;
        };
        if sig_bytes.len() != 64 {
            return false;
        }
        let mut raw = [0u8; 64];
        raw.copy_from_slice(&sig_bytes);
        key.verify(message, &Signature::from_bytes(&raw)).is_ok()
    }
}

/// Fixed set of revoked key ids.
#[derive(Debug, Clone, Default)]
pub struct StaticRevocationList {
    revoked: HashSet<String>,
}

impl StaticRevocationList {
    pub fn new<I, S>(revoked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            revoked: revoked.into_iter().map(Into::into).collect(),
        }
    }
}

impl RevocationCheck for StaticRevocationList {
    fn is_revoked(&self, key_id: &str) -> Result<bool, String> {
        Ok(self.revoked.contains(key_id))
    }
}

/// Sign a bundle in place for authoring tools and fixtures. The store
/// itself only ever verifies.
pub fn sign_bundle(
    bundle: &mut PolicyBundle,
    key_id: &str,
    signing_key: &SigningKey,
) -> Result<(), serde_json::Error> {
    bundle.signing_key_id = key_id.to_string();
    let bytes = canonical_signing_bytes(bundle)?;
    bundle.signature = hex::encode(signing_key.sign(&bytes).to_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_trusted_keys_from_json() {
        let sk = SigningKey::from_bytes(&[4u8; 32]);
        let json = format!(
            r#"[{{"key_id": "policy-root", "public_key_hex": "{}"}}]"#,
            hex::encode(sk.verifying_key().to_bytes())
        );
        let keys = TrustedKeys::from_json_str(&json).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get("policy-root"), Some(&sk.verifying_key()));
    }

    #[test]
    fn rejects_bad_key_length() {
        let err = TrustedKeys::from_json_str(r#"[{"key_id": "k", "public_key_hex": "abcd"}]"#)
            .unwrap_err();
        assert!(matches!(err, TrustError::InvalidKey(id) if id == "k"));
    }

    #[test]
    fn verifier_checks_key_id_and_signature() {
        let sk = SigningKey::from_bytes(&[4u8; 32]);
        let mut keys = TrustedKeys::new();
        keys.insert("k1", sk.verifying_key());
        let verifier = Ed25519Verifier::new(keys);

        let sig = hex::encode(sk.sign(b"payload").to_bytes());
        assert!(verifier.verify("k1", b"payload", &sig));
        assert!(!verifier.verify("k1", b"payload2", &sig));
        assert!(!verifier.verify("k2", b"payload", &sig));
        assert!(!verifier.verify("k1", b"payload", "not-hex"));
    }

    #[test]
    fn revocation_list() {
        let list = StaticRevocationList::new(["old-key"]);
        assert_eq!(list.is_revoked("old-key"), Ok(true));
        assert_eq!(list.is_revoked("new-key"), Ok(false));
    }
}
