use std::path::{Path, PathBuf};
use std::sync::Arc;

use clock::Clock;
use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;
use core_types::jsonl;
use tracing::{debug, error, warn};

use crate::verify::{verify_ledger, LedgerReport};
use crate::{seal, AuditError, AuditEvent, AuditRecord, AuditSink, LedgerError, LedgerSigner};

/// JSONL ledger on disk. Every append is written, flushed and fsynced before
/// it is acknowledged.
pub struct FileLedger {
    path: PathBuf,
    signer: Option<LedgerSigner>,
    clock: Arc<dyn Clock>,
    tail: Mutex<Option<AuditRecord>>,
}

impl FileLedger {
    /// Open (or create) a ledger file, reading the current tail so new
    /// entries chain onto it. An unterminated last line left by an
    /// interrupted append is cut off first.
    pub fn open(
        path: impl AsRef<Path>,
        signer: Option<LedgerSigner>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let dropped = jsonl::truncate_torn_tail(&path)?;
        if dropped > 0 {
            warn!(path = %path.display(), bytes = dropped, "dropped torn ledger line");
        }
        let tail = read_records(&path)?.pop();
        debug!(
            path = %path.display(),
            head = ?tail.as_ref().map(|r| r.sequence),
            "audit ledger opened"
        );
        Ok(Self {
            path,
            signer,
            clock,
            tail: Mutex::new(tail),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&self) -> Result<Vec<AuditRecord>, AuditError> {
        read_records(&self.path)
    }

    /// Verify the on-disk ledger.
    pub fn verify(
        &self,
        verifying_key: Option<&VerifyingKey>,
    ) -> Result<Result<LedgerReport, LedgerError>, AuditError> {
        let records = self.read_all()?;
        Ok(verify_ledger(&records, verifying_key))
    }
}

impl AuditSink for FileLedger {
    fn append(&self, event: AuditEvent) -> Result<AuditRecord, AuditError> {
        let mut tail = self.tail.lock();
        let record = seal(tail.as_ref(), event, self.clock.now(), self.signer.as_ref())?;

        let line = serde_json::to_string(&record)?;
        if let Err(e) = jsonl::append_line(&self.path, &line) {
            error!(path = %self.path.display(), error = %e, "audit append failed");
            return Err(AuditError::Io(e));
        }

        *tail = Some(record.clone());
        Ok(record)
    }
}

/// Read every record of a JSONL ledger. A missing file is an empty ledger,
/// and an unterminated last line is not a record.
pub fn read_records(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
    let read = jsonl::read_lines(path)?;
    if read.torn_tail > 0 {
        warn!(path = %path.display(), bytes = read.torn_tail, "ignoring torn ledger line");
    }
    read.lines
        .iter()
        .map(|line| serde_json::from_str(line).map_err(AuditError::from))
        .collect()
}
