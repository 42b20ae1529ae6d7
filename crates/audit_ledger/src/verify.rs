use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Serialize;
use thiserror::Error;

use crate::AuditRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("entry {sequence} ({entry_id}): entry hash mismatch")]
    HashMismatch { sequence: u64, entry_id: String },
    #[error("entry {sequence} ({entry_id}): chain broken, prev_entry_hash does not match")]
    ChainBroken { sequence: u64, entry_id: String },
    #[error("entry {sequence} ({entry_id}): sequence out of order")]
    SequenceGap { sequence: u64, entry_id: String },
    #[error("entry {sequence} ({entry_id}): signature missing")]
    SignatureMissing { sequence: u64, entry_id: String },
    #[error("entry {sequence} ({entry_id}): signature invalid")]
    SignatureInvalid { sequence: u64, entry_id: String },
    #[error("entry {sequence} ({entry_id}): cannot re-hash: {reason}")]
    Unhashable {
        sequence: u64,
        entry_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerReport {
    pub entries: usize,
    pub signed: usize,
    pub head_hash: Option<String>,
}

/// Re-derive every entry hash and link. With a verifying key every entry
/// must also carry a valid signature over its `entry_hash`.
pub fn verify_ledger(
    records: &[AuditRecord],
    verifying_key: Option<&VerifyingKey>,
) -> Result<LedgerReport, LedgerError> {
    let mut report = LedgerReport::default();
    let mut prev: Option<&AuditRecord> = None;

    for record in records {
        let at = || (record.sequence, record.entry_id.clone());

        let expected_seq = prev.map(|p| p.sequence + 1).unwrap_or(0);
        if record.sequence != expected_seq {
            let (sequence, entry_id) = at();
            return Err(LedgerError::SequenceGap { sequence, entry_id });
        }

        let expected_prev = prev.map(|p| p.entry_hash.as_str()).unwrap_or("");
        if record.prev_entry_hash != expected_prev {
            let (sequence, entry_id) = at();
            return Err(LedgerError::ChainBroken { sequence, entry_id });
        }

        let computed = record.compute_entry_hash().map_err(|e| {
            let (sequence, entry_id) = at();
            LedgerError::Unhashable {
                sequence,
                entry_id,
                reason: e.to_string(),
            }
        })?;
        if computed != record.entry_hash {
            let (sequence, entry_id) = at();
            return Err(LedgerError::HashMismatch { sequence, entry_id });
        }

        if let Some(key) = verifying_key {
            let sig_hex = record.signature.as_deref().ok_or_else(|| {
                let (sequence, entry_id) = at();
                LedgerError::SignatureMissing { sequence, entry_id }
            })?;
            if !signature_valid(key, record.entry_hash.as_bytes(), sig_hex) {
                let (sequence, entry_id) = at();
                return Err(LedgerError::SignatureInvalid { sequence, entry_id });
            }
        }
        if record.signature.is_some() {
            report.signed += 1;
        }

        report.entries += 1;
        prev = Some(record);
    }

    report.head_hash = prev.map(|p| p.entry_hash.clone());
    Ok(report)
}

fn signature_valid(key: &VerifyingKey, message: &[u8], sig_hex: &str) -> bool {
    let Ok(bytes) = hex::decode(sig_hex) else {
        return false;
    };
    if bytes.len() != 64 {
        return false;
    }
    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(&bytes);
    let signature = Signature::from_bytes(&sig_bytes);
    key.verify(message, &signature).is_ok()
}
