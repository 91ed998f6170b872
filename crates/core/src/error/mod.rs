/// Centralized error handling for the QC manager
pub mod config;
pub mod pipeline;
pub mod qc;
pub mod store;

pub use config::{ConfigError, ConfigValidationError};
pub use pipeline::{
    DispatchError, ProcessorError, RegistrationError, SchemaValidationError, StageTimeoutError,
    TransportError, UnknownProcessorError,
};
pub use qc::{QcError, Result};
pub use store::{JobStoreError, StoreResult};
