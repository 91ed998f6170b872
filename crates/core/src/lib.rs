// QC pipeline core - pure orchestration logic
// Process spawning, YAML, SQLite and HTTP live in qcmms-core-full

pub mod catalog;
pub mod config;
pub mod error;
pub mod joblog;
pub mod pipeline;
pub mod response;

// Re-export commonly used types
pub use config::{Configuration, RunSettings};
pub use error::{QcError, Result};
pub use joblog::{JobId, JobLogger, JobOutcome};
pub use pipeline::{PipelineController, ProcessorRegistry, RunReport, Stage, StageStatus};
