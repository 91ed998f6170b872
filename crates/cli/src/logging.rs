//! Logging setup for run_manager

use qcmms_core::Configuration;
use qcmms_core_full::cleanup::log_file_name;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_DIR: &str = "logs";

/// Log file path based on use case, PID and timestamp
pub fn log_file_path(log_dir: &Path, use_case: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    log_dir.join(log_file_name(use_case, std::process::id(), timestamp))
}

/// Create the log file of this run
fn create_log_file(config: &Configuration) -> std::io::Result<(PathBuf, File)> {
    let log_dir = config
        .lookup_str("paths.log_dir")
        .unwrap_or(DEFAULT_LOG_DIR);
    let use_case = config.lookup_str("use_case.name").unwrap_or("unnamed");
    std::fs::create_dir_all(log_dir)?;

    let path = log_file_path(Path::new(log_dir), use_case);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)?;
    Ok((path, file))
}

fn console_filter(config: Option<&Configuration>, quiet: bool) -> EnvFilter {
    if quiet {
        return EnvFilter::new("warn");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config
            .and_then(|c| c.lookup_str("logging.level"))
            .unwrap_or("info");
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the console layer and, when a configuration is loaded, the
/// debug-level file layer.
pub fn init(config: Option<&Configuration>, quiet: bool) {
    let mut log_path = None;
    let mut log_error = None;
    let file_layer = match config.map(create_log_file) {
        Some(Ok((path, file))) => {
            log_path = Some(path);
            Some(
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_level(true)
                    .with_filter(EnvFilter::new("debug")),
            )
        }
        Some(Err(err)) => {
            log_error = Some(err);
            None
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_level(true)
                .with_filter(console_filter(config, quiet)),
        )
        .with(file_layer)
        .init();

    if let Some(err) = log_error {
        warn!("Cannot create log file: {}", err);
    }
    if let Some(path) = log_path {
        info!("Log file created: {}", path.display());
    }
}
