// Built-in stage processors
mod register;
mod tool;

pub use register::{register_processors, registry};
pub use tool::{CommandLine, FailureSeverity, ToolOptions, ToolProcessor};
