//! Confidence and stage engine: turns a stream of low-trust evidence into
//! confidence-scored incidents with a forward-only lifecycle.

pub mod config;
pub mod engine;
pub mod evidence;
pub mod incident;
pub mod signal;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use engine::{IncidentEngine, IngestError, SINGLE_EVIDENCE_CEILING};
pub use evidence::{Evidence, EvidenceError, RawEvidence};
pub use incident::{
    Incident, IncidentRef, IncidentSnapshot, IncidentStatus, Stage, StageTransition,
};
pub use signal::{SignalType, SignalWeights, UnknownSignal};
pub use store::{IncidentStore, MemoryIncidentStore, StoreError};
