//! End-to-end wiring of the routing core: evidence in, audited alert facts out.

pub mod config;
pub mod explain;
pub mod pipeline;
pub mod pool;

pub use config::{ConfigError, PipelineConfig};
pub use explain::{ExplanationSource, TemplateExplanations};
pub use pipeline::{BuildError, Pipeline, PipelineError, PipelineOutcome};
pub use pool::{ItemReport, PoolReport, WorkerPool};
