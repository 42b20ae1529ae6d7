use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use audit_ledger::LedgerSigner;
use clap::{Parser, Subcommand};
use clock::SystemClock;
use incident_engine::RawEvidence;
use policy_store::{Ed25519Verifier, TrustedKeys};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vigil_pipeline::{Pipeline, PipelineConfig, TemplateExplanations, WorkerPool};

mod bundle_commands;
mod integrity_commands;

#[derive(Parser)]
#[command(name = "vigil", about = "Incident routing core CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Policy bundle tooling.
    Bundle {
        #[command(subcommand)]
        command: BundleCommands,
    },

    /// Replay a JSONL evidence file through the full pipeline.
    Ingest {
        /// Evidence file, one JSON object per line.
        #[arg(long)]
        evidence: PathBuf,
        /// Pipeline config JSON. VIGIL_* environment variables override it.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Signed bundle to activate before replay. Repeatable.
        #[arg(long = "bundle")]
        bundles: Vec<PathBuf>,
        /// Trusted bundle signing keys (JSON list of key_id/public_key_hex).
        #[arg(long)]
        keys: Option<PathBuf>,
        /// Explanation bundle ids keyed by rule template id (JSON object).
        #[arg(long)]
        explanations: Option<PathBuf>,
        /// Overrides the configured worker count.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Audit ledger tooling.
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },

    /// Alert store tooling.
    Alerts {
        #[command(subcommand)]
        command: AlertCommands,
    },
}

#[derive(Subcommand)]
enum BundleCommands {
    /// Check signature, revocation and structure without activating anything.
    Verify {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        keys: PathBuf,
        /// Signing key ids to treat as revoked. Repeatable.
        #[arg(long = "revoked")]
        revoked: Vec<String>,
    },
    /// Print a bundle's rules in evaluation order.
    Inspect {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum LedgerCommands {
    /// Recompute every entry hash and chain link; check signatures when a key is given.
    Verify {
        #[arg(long)]
        file: PathBuf,
        /// Ledger verifying key (32-byte hex).
        #[arg(long)]
        public_key: Option<String>,
    },
}

#[derive(Subcommand)]
enum AlertCommands {
    /// Verify every incident's alert hash chain.
    Verify {
        #[arg(long)]
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Bundle { command } => match command {
            BundleCommands::Verify {
                file,
                keys,
                revoked,
            } => bundle_commands::cmd_bundle_verify(&file, &keys, revoked),
            BundleCommands::Inspect { file } => bundle_commands::cmd_bundle_inspect(&file),
        },
        Commands::Ingest {
            evidence,
            config,
            bundles,
            keys,
            explanations,
            workers,
        } => cmd_ingest(
            &evidence,
            config.as_deref(),
            &bundles,
            keys.as_deref(),
            explanations.as_deref(),
            workers,
        ),
        Commands::Ledger {
            command: LedgerCommands::Verify { file, public_key },
        } => integrity_commands::cmd_ledger_verify(&file, public_key.as_deref()),
        Commands::Alerts {
            command: AlertCommands::Verify { file },
        } => integrity_commands::cmd_alerts_verify(&file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn cmd_ingest(
    evidence: &Path,
    config: Option<&Path>,
    bundles: &[PathBuf],
    keys: Option<&Path>,
    explanations: Option<&Path>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let mut cfg = PipelineConfig::load(config).context("loading pipeline config")?;
    if let Some(n) = workers {
        cfg.workers = n;
        cfg.validate().context("validating worker override")?;
    }
    let signer = LedgerSigner::from_env().context("reading ledger signing key")?;
    if signer.is_none() && cfg.ledger_path.is_some() {
        warn!("VIGIL_LEDGER_KEY_HEX not set; ledger entries will be unsigned");
    }
    let worker_count = cfg.workers;

    let mut pipeline =
        Pipeline::open(cfg, Arc::new(SystemClock), signer).context("opening pipeline")?;
    if let Some(path) = explanations {
        let source = TemplateExplanations::from_json_file(path)
            .with_context(|| format!("reading explanations {}", path.display()))?;
        pipeline = pipeline.with_explanations(Arc::new(source));
    }

    if !bundles.is_empty() {
        let keys = keys.context("--keys is required when --bundle is given")?;
        let verifier = Ed25519Verifier::new(
            TrustedKeys::from_json_file(keys)
                .with_context(|| format!("reading trusted keys {}", keys.display()))?,
        );
        for path in bundles {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading bundle {}", path.display()))?;
            let outcome = pipeline
                .policies()
                .load_json(&raw, &verifier)
                .with_context(|| format!("loading bundle {}", path.display()))?;
            info!(bundle = %path.display(), outcome = ?outcome, "bundle loaded");
        }
    }

    let items = read_evidence(evidence)?;
    let total = items.len();
    let pool = WorkerPool::new(Arc::new(pipeline), worker_count);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_count)
        .enable_all()
        .build()
        .context("starting runtime")?;
    let report = runtime.block_on(pool.run(items));

    for item in &report.items {
        println!("{}", serde_json::to_string(item)?);
    }
    let failed = report.failed();
    println!(
        "{}",
        serde_json::json!({
            "total": total,
            "succeeded": report.succeeded(),
            "failed": failed,
            "retryable": report.retryable().count(),
            "lost_lanes": report.lost_lanes,
        })
    );
    if failed > 0 || report.lost_lanes > 0 {
        bail!("{failed} of {total} evidence items failed");
    }
    Ok(())
}

fn read_evidence(path: &Path) -> anyhow::Result<Vec<RawEvidence>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading evidence {}", path.display()))?;
    let mut items = Vec::new();
    for (n, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item: RawEvidence = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: malformed evidence line", path.display(), n + 1))?;
        items.push(item);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn evidence_lines_parse_with_line_numbers_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ev.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"event_id":"e1","machine_id":"h","signal_type":"DNS_QUERY","observed_at":"2024-01-01T00:00:00Z"}"#,
                "\n\n",
                r#"{"event_id":"e2","signal_type":"FLOW_SIGNAL","observed_at":"2024-01-01T00:01:00Z","contradicts":true}"#,
                "\n",
            ),
        )
        .unwrap();
        let items = read_evidence(&path).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].machine_id.is_some());
        assert!(items[1].machine_id.is_none());

        std::fs::write(&path, "{not json}\n").unwrap();
        let err = read_evidence(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":1: malformed evidence line"));
    }
}
