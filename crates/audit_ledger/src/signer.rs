use ed25519_dalek::{Signer, SigningKey, VerifyingKey};

use crate::AuditError;

/// Ed25519 key the ledger signs every `entry_hash` with.
#[derive(Clone)]
pub struct LedgerSigner {
    key_id: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for LedgerSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl LedgerSigner {
    pub fn from_seed(key_id: impl Into<String>, seed: [u8; 32]) -> Self {
        Self {
            key_id: key_id.into(),
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Load a signer from a hex-encoded 32 byte secret.
    pub fn from_hex(key_id: impl Into<String>, secret_hex: &str) -> Result<Self, AuditError> {
        let key_id = key_id.into();
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|_| AuditError::InvalidKey(key_id.clone()))?;
        if bytes.len() != 32 {
            return Err(AuditError::InvalidKey(key_id));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        Ok(Self::from_seed(key_id, seed))
    }

    /// Read `VIGIL_LEDGER_KEY_ID` and `VIGIL_LEDGER_KEY_HEX`. Returns `Ok(None)`
    /// when no key is configured.
    pub fn from_env() -> Result<Option<Self>, AuditError> {
        let secret = match std::env::var("VIGIL_LEDGER_KEY_HEX") {
            Ok(s) if !s.trim().is_empty() => s,
            _ => return Ok(None),
        };
        let key_id =
            std::env::var("VIGIL_LEDGER_KEY_ID").unwrap_or_else(|_| "ledger-default".to_string());
        Self::from_hex(key_id, &secret).map(Some)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn verifying_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }

    pub fn sign_hex(&self, payload: &[u8]) -> String {
        hex::encode(self.signing_key.sign(payload).to_bytes())
    }
}
