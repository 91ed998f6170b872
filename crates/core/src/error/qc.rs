/// Umbrella error type for a QC run
use super::{
    ConfigError, ConfigValidationError, DispatchError, JobStoreError, RegistrationError,
    SchemaValidationError, UnknownProcessorError,
};
use crate::joblog::JobId;
use crate::pipeline::Stage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QcError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ConfigValidationError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    UnknownProcessor(#[from] UnknownProcessorError),

    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error(transparent)]
    Schema(#[from] SchemaValidationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    // The run stopped before producing a document
    #[error("Run {job_id} aborted{}: {reason}", stage_suffix(.stage))]
    Aborted {
        job_id: JobId,
        stage: Option<Stage>,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using QcError
pub type Result<T> = std::result::Result<T, QcError>;

fn stage_suffix(stage: &Option<Stage>) -> String {
    stage
        .map(|stage| format!(" at stage '{}'", stage))
        .unwrap_or_default()
}

impl QcError {
    /// Create a run-aborted error
    pub fn aborted(job_id: JobId, stage: Option<Stage>, reason: impl Into<String>) -> Self {
        Self::Aborted {
            job_id,
            stage,
            reason: reason.into(),
        }
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
