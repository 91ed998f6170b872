// QC manager I/O layer: fragments on disk, SQLite job log, catalog HTTP
// transport, external tool processors and cleanup

pub mod catalog;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod joblog;
pub mod processors;

// Re-export commonly used types
pub use catalog::HttpCatalogTransport;
pub use cleanup::{cleanup_command, CleanupOptions};
pub use commands::{list_processors, run_command, RunOptions};
pub use joblog::SqliteJobStore;
pub use processors::{register_processors, ToolProcessor};
