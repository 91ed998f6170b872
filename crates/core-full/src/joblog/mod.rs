// Durable job history
mod sqlite;

pub use sqlite::SqliteJobStore;

use qcmms_core::error::StoreResult;
use qcmms_core::JobLogger;
use std::path::Path;
use std::sync::Arc;

/// Job logger over the SQLite database at `path`
pub fn open_logger(path: &Path) -> StoreResult<JobLogger> {
    let store = SqliteJobStore::open(path)?;
    Ok(JobLogger::new(Arc::new(store)))
}
