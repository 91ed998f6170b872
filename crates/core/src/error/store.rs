// Job store errors
use crate::joblog::JobId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("Job store backend error: {0}")]
    Backend(String),

    #[error("Job store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job store lock poisoned")]
    LockPoisoned,

    #[error("Job {0} not found")]
    UnknownJob(JobId),

    #[error("Job {0} is already finalized")]
    AlreadyFinalized(JobId),

    #[error("Corrupt job store record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, JobStoreError>;

impl JobStoreError {
    /// Wrap a backend-specific error
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
