use std::sync::Arc;

use alert_engine::{
    AlertBuilder, AlertOutcome, AlertStore, AlertStoreError, EmitError, ExplanationSource,
    JsonlAlertStore, MemoryAlertStore,
};
use audit_ledger::{AuditError, AuditSink, FileLedger, LedgerSigner, MemoryLedger};
use clock::Clock;
use core_types::KeyedLocks;
use incident_engine::{
    IncidentEngine, IncidentRef, IncidentStore, IngestError, MemoryIncidentStore, RawEvidence,
};
use policy_engine::{Router, RoutingDecision, RoutingError};
use policy_store::PolicyStore;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, PipelineConfig};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("audit ledger unavailable: {0}")]
    Audit(#[from] AuditError),
    #[error("alert store unavailable: {0}")]
    AlertStore(#[from] AlertStoreError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("ingest failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("routing failed: {0}")]
    Routing(#[from] RoutingError),
    #[error("alert emission failed: {0}")]
    Emit(#[from] EmitError),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Ingest(e) => e.is_retryable(),
            PipelineError::Routing(e) => e.is_retryable(),
            PipelineError::Emit(e) => e.is_retryable(),
        }
    }

    /// Which step failed: `ingest`, `route` or `emit`.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Ingest(_) => "ingest",
            PipelineError::Routing(_) => "route",
            PipelineError::Emit(_) => "emit",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Ingest(e) => e.kind(),
            PipelineError::Routing(RoutingError::NoActiveBundle(_)) => "no_active_bundle",
            PipelineError::Routing(RoutingError::Audit(_)) => "audit_error",
            PipelineError::Emit(e) => e.kind(),
        }
    }
}

/// Everything one evidence item produced on its way through the core.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub incident: IncidentRef,
    pub decision: RoutingDecision,
    pub alert: AlertOutcome,
}

impl PipelineOutcome {
    pub fn summary(&self) -> Value {
        let snapshot = &self.incident.snapshot;
        json!({
            "incident_id": snapshot.incident_id,
            "created": self.incident.created,
            "stage": snapshot.stage,
            "confidence_score": snapshot.confidence_score,
            "decision_id": self.decision.decision_id,
            "matched_rule_id": self.decision.matched_rule_id,
            "action": self.decision.action,
            "outcome": self.alert.kind(),
            "alert_id": self.alert.alert().map(|a| a.alert_id.clone()),
        })
    }
}

/// Evidence in, alert facts out: ingest, snapshot, route, emit.
///
/// One dedup key's section is held from ingest through emission, so the
/// alert chain of an incident follows its snapshot versions. Each step is
/// its own atomic, audited write. A failure after ingest leaves the incident
/// committed; [`Pipeline::route_incident`] resumes from there.
pub struct Pipeline {
    config: PipelineConfig,
    engine: IncidentEngine,
    policies: Arc<PolicyStore>,
    router: Router,
    alerts: AlertBuilder,
    audit: Arc<dyn AuditSink>,
    sections: KeyedLocks,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        incidents: Arc<dyn IncidentStore>,
        alert_store: Arc<dyn AlertStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BuildError> {
        config.validate()?;
        let engine = IncidentEngine::new(
            config.engine.clone(),
            incidents,
            audit.clone(),
            clock.clone(),
        )
        .map_err(ConfigError::from)?;
        let policies = Arc::new(PolicyStore::new(audit.clone()));
        let router = Router::new(policies.clone(), config.authority_scope.clone(), audit.clone());
        let alerts = AlertBuilder::new(config.alerts.clone(), alert_store, audit.clone(), clock)
            .map_err(ConfigError::from)?;

        Ok(Self {
            config,
            engine,
            policies,
            router,
            alerts,
            audit,
            sections: KeyedLocks::new(),
        })
    }

    /// Build with the stores named by `config`: JSONL files where a path is
    /// set, memory otherwise. Incidents are always held in memory.
    pub fn open(
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
        signer: Option<LedgerSigner>,
    ) -> Result<Self, BuildError> {
        let audit: Arc<dyn AuditSink> = match &config.ledger_path {
            Some(path) => Arc::new(FileLedger::open(path, signer, clock.clone())?),
            None => {
                let ledger = MemoryLedger::new(clock.clone());
                Arc::new(match signer {
                    Some(s) => ledger.with_signer(s),
                    None => ledger,
                })
            }
        };
        let alert_store: Arc<dyn AlertStore> = match &config.alerts_path {
            Some(path) => Arc::new(JsonlAlertStore::open(path)?),
            None => Arc::new(MemoryAlertStore::new()),
        };
        info!(
            ledger = ?config.ledger_path,
            alerts = ?config.alerts_path,
            scope = %config.authority_scope,
            "pipeline opened"
        );
        Self::new(
            config,
            Arc::new(MemoryIncidentStore::new()),
            alert_store,
            audit,
            clock,
        )
    }

    pub fn with_explanations(mut self, source: Arc<dyn ExplanationSource>) -> Self {
        self.alerts = self.alerts.with_explanations(source);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &IncidentEngine {
        &self.engine
    }

    /// Bundle store feeding the router. Load bundles here before processing.
    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    pub fn alerts(&self) -> &AlertBuilder {
        &self.alerts
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn process(&self, raw: RawEvidence) -> Result<PipelineOutcome, PipelineError> {
        // Evidence without a machine id is rejected by ingest straight away.
        let key = raw.dedup_key().unwrap_or_default();
        self.in_section(&key, || {
            let incident = self.engine.ingest(raw)?;
            let (decision, alert) = self.route_snapshot(&incident.snapshot)?;
            Ok(PipelineOutcome {
                incident,
                decision,
                alert,
            })
        })
    }

    /// Route and emit for the current state of an existing incident.
    pub fn route_incident(
        &self,
        incident_id: &str,
    ) -> Result<(RoutingDecision, AlertOutcome), PipelineError> {
        let key = self.engine.snapshot(incident_id)?.dedup_key;
        self.in_section(&key, || {
            let snapshot = self.engine.snapshot(incident_id)?;
            self.route_snapshot(&snapshot)
        })
    }

    fn in_section<R>(
        &self,
        key: &str,
        f: impl FnOnce() -> Result<R, PipelineError>,
    ) -> Result<R, PipelineError> {
        self.sections
            .with_key(key, self.config.engine.lock_timeout(), f)
            .map_err(|e| {
                warn!(dedup_key = %key, waited_ms = e.waited_ms, "pipeline section timeout");
                PipelineError::Ingest(IngestError::LockTimeout(e))
            })?
    }

    fn route_snapshot(
        &self,
        snapshot: &incident_engine::IncidentSnapshot,
    ) -> Result<(RoutingDecision, AlertOutcome), PipelineError> {
        let decision = self.router.route(snapshot)?;
        let alert = self.alerts.emit(snapshot, &decision)?;
        debug!(
            incident_id = %snapshot.incident_id,
            decision_id = %decision.decision_id,
            outcome = alert.kind(),
            "evidence processed"
        );
        Ok((decision, alert))
    }
}
