// Configuration loading and validation errors
use thiserror::Error;

/// Failure to assemble a configuration tree from its fragments
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Configuration fragment not found: {path}")]
    Missing { path: String },

    #[error("Malformed configuration fragment {origin}: {message}")]
    Malformed { origin: String, message: String },

    #[error("Type conflict at '{key}' while merging {origin}: {message}")]
    TypeConflict {
        key: String,
        origin: String,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn missing(path: impl Into<String>) -> Self {
        Self::Missing { path: path.into() }
    }

    pub fn malformed(origin: impl Into<String>, message: impl ToString) -> Self {
        Self::Malformed {
            origin: origin.into(),
            message: message.to_string(),
        }
    }

    pub fn type_conflict(
        key: impl Into<String>,
        origin: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TypeConflict {
            key: key.into(),
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Every problem found while validating a merged configuration
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Configuration validation failed:\n  - {}", problems.join("\n  - "))]
pub struct ConfigValidationError {
    pub problems: Vec<String>,
}

impl ConfigValidationError {
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }

    pub fn problems(&self) -> &[String] {
        &self.problems
    }
}
