use std::sync::Arc;
use std::thread;

use audit_ledger::{verify_ledger, AuditAction, AuditEvent, AuditSink, FileLedger, LedgerSigner};
use clock::ManualClock;

#[test]
fn concurrent_appends_form_one_chain() {
    let dir = tempfile::tempdir().unwrap();
    let signer = LedgerSigner::from_seed("ledger-1", [5u8; 32]);
    let key = signer.verifying_key();
    let ledger = Arc::new(
        FileLedger::open(
            dir.path().join("audit.jsonl"),
            Some(signer),
            Arc::new(ManualClock::at_unix(1_700_000_000)),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    ledger
                        .append(AuditEvent::new(
                            "worker",
                            AuditAction::IncidentUpdated,
                            "incident",
                            format!("inc-{worker}-{i}"),
                        ))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let records = ledger.read_all().unwrap();
    assert_eq!(records.len(), 100);
    let report = verify_ledger(&records, Some(&key)).unwrap();
    assert_eq!(report.entries, 100);
    assert_eq!(report.signed, 100);
}
