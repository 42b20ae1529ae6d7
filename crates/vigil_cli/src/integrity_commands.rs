use std::path::Path;

use alert_engine::{verify_chain, AlertStore, JsonlAlertStore};
use anyhow::{bail, Context};
use audit_ledger::{read_records, verify_ledger};
use ed25519_dalek::VerifyingKey;
use serde_json::json;

pub fn cmd_ledger_verify(file: &Path, public_key: Option<&str>) -> anyhow::Result<()> {
    let key = public_key.map(parse_verifying_key).transpose()?;
    let records = read_records(file)
        .with_context(|| format!("reading ledger {}", file.display()))?;

    match verify_ledger(&records, key.as_ref()) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => bail!("ledger {} failed verification: {e}", file.display()),
    }
}

pub fn cmd_alerts_verify(file: &Path) -> anyhow::Result<()> {
    let store = JsonlAlertStore::open(file)
        .with_context(|| format!("opening alert store {}", file.display()))?;

    let mut broken = 0usize;
    let mut checked = 0usize;
    for incident_id in store.incidents()? {
        let report = verify_chain(&store.alerts_for(&incident_id)?);
        checked += report.checked;
        if !report.is_intact() {
            broken += 1;
        }
        println!(
            "{}",
            json!({
                "incident_id": incident_id,
                "checked": report.checked,
                "intact": report.is_intact(),
                "breaks": report.breaks,
            })
        );
    }
    println!("{}", json!({ "alerts_checked": checked, "broken_chains": broken }));

    if broken > 0 {
        bail!("{broken} alert chain(s) in {} are broken", file.display());
    }
    Ok(())
}

fn parse_verifying_key(hex_key: &str) -> anyhow::Result<VerifyingKey> {
    let bytes = hex::decode(hex_key.trim()).context("public key is not hex")?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("public key must be 32 bytes, got {}", b.len()))?;
    VerifyingKey::from_bytes(&bytes).context("public key is not a valid Ed25519 point")
}
