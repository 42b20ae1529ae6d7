//! Alert builder: routing decisions become immutable, deduplicated,
//! hash-chained alert facts with suppression and escalation side records.

pub mod builder;
pub mod chain;
pub mod model;
pub mod store;

pub use builder::{
    AlertBuilder, AlertConfig, EmitError, ExplanationSource, MAX_RISK_BUCKET_WIDTH,
};
pub use chain::{verify_chain, ChainBreak, ChainReport};
pub use model::{
    Alert, AlertOutcome, DuplicateNotice, Emission, Escalation, ReasonCode, Suppression,
};
pub use store::{read_emissions, AlertStore, AlertStoreError, JsonlAlertStore, MemoryAlertStore};
