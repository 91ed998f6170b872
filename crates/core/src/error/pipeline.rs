// Processor, schema and dispatch errors
use crate::pipeline::{Platform, Stage};
use std::time::Duration;
use thiserror::Error;

/// Registering a processor twice for the same slot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Processor already registered for stage '{stage}' on platform '{platform}'")]
pub struct RegistrationError {
    pub stage: Stage,
    pub platform: Platform,
}

/// No processor registered for a scheduled stage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No processor registered for stage '{stage}' on platform '{platform}'")]
pub struct UnknownProcessorError {
    pub stage: Stage,
    pub platform: Platform,
}

/// Failure reported by a stage processor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The control ran and found a recoverable defect
    #[error("soft failure: {0}")]
    Soft(String),

    /// The control could not be evaluated
    #[error("hard failure: {0}")]
    Hard(String),

    /// The processor could not run at all; the run must stop
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl ProcessorError {
    pub fn soft(msg: impl Into<String>) -> Self {
        Self::Soft(msg.into())
    }

    pub fn hard(msg: impl Into<String>) -> Self {
        Self::Hard(msg.into())
    }

    pub fn infrastructure(msg: impl Into<String>) -> Self {
        Self::Infrastructure(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Soft(msg) | Self::Hard(msg) | Self::Infrastructure(msg) => msg,
        }
    }
}

/// A processor exceeded its time budget
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Stage '{stage}' exceeded its timeout of {}s", timeout.as_secs())]
pub struct StageTimeoutError {
    pub stage: Stage,
    pub timeout: Duration,
}

/// Every schema violation found in a document
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Document failed schema validation:\n  - {}", violations.join("\n  - "))]
pub struct SchemaValidationError {
    pub violations: Vec<String>,
}

impl SchemaValidationError {
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }
}

/// A single failed delivery attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("catalog transport failed: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl ToString) -> Self {
        Self(msg.to_string())
    }
}

/// Delivery gave up after exhausting its attempts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Dispatch failed after {attempts} attempt(s): {last_error}")]
pub struct DispatchError {
    pub attempts: u32,
    pub last_error: TransportError,
}
