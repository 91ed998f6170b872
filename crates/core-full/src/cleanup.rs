// Removal of job history, run outputs and downloaded data
use crate::joblog::open_logger;
use qcmms_core::config::validate;
use qcmms_core::error::{QcError, Result};
use qcmms_core::joblog::{JobId, JobRecord};
use qcmms_core::response::job_dir;
use qcmms_core::Configuration;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Seconds a run log may be created before its job record
const LOG_FILE_LEAD_SECS: i64 = 300;

/// File name of a run log: use case, process id and creation time
pub fn log_file_name(use_case: &str, pid: u32, created_secs: u64) -> String {
    format!("{}_{}_{}.log", use_case, pid, created_secs)
}

fn parse_log_file_name(name: &str) -> Option<(&str, u32, u64)> {
    let stem = name.strip_suffix(".log")?;
    let mut parts = stem.rsplitn(3, '_');
    let created = parts.next()?.parse().ok()?;
    let pid = parts.next()?.parse().ok()?;
    let use_case = parts.next()?;
    Some((use_case, pid, created))
}

/// Whether a log file was written by the process that ran `job`
fn is_job_log(name: &str, job: &JobRecord) -> bool {
    let Some((use_case, pid, created)) = parse_log_file_name(name) else {
        return false;
    };
    let Ok(created) = i64::try_from(created) else {
        return false;
    };
    let started = job.started_at.timestamp();
    use_case == job.use_case
        && pid == job.pid
        && (started - LOG_FILE_LEAD_SECS..=started).contains(&created)
}

fn is_job_dir_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// What a cleanup removes
#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    /// Remove only this job; the whole job log otherwise
    pub job: Option<JobId>,
    /// Also remove the working directory with the downloaded data
    pub data: bool,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub jobs_removed: usize,
    pub paths_removed: Vec<PathBuf>,
}

impl CleanupReport {
    fn remove(&mut self, path: &Path) -> io::Result<()> {
        let removed = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match removed {
            Ok(()) => {
                debug!(path = %path.display(), "removed");
                self.paths_removed.push(path.to_path_buf());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Entries of the log directory, sorted by name; none when it is missing
fn log_dir_entries(log_dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            found.push((name.to_string(), entry.path()));
        }
    }
    found.sort();
    Ok(found)
}

/// Remove one job or the whole job log, and optionally downloaded data.
///
/// A single job loses its log entries, its run log files and its output
/// directory. Without a job, every job is deleted from the log along with
/// all run logs and output directories under the log directory.
pub fn cleanup_command(config: &Configuration, options: &CleanupOptions) -> Result<CleanupReport> {
    let settings = validate(config)?;
    let log_dir = &settings.paths.log_dir;
    let logger = open_logger(&settings.paths.log_db)?;
    let mut report = CleanupReport::default();

    match options.job {
        Some(job_id) => {
            let job = logger
                .job(job_id)?
                .ok_or_else(|| QcError::other(format!("Job {} not found in the job log", job_id)))?;
            logger.delete_job(job_id)?;
            report.jobs_removed = 1;
            report.remove(&job_dir(log_dir, job_id))?;
            for (name, path) in log_dir_entries(log_dir)? {
                if path.is_file() && is_job_log(&name, &job) {
                    report.remove(&path)?;
                }
            }
        }
        None => {
            report.jobs_removed = logger.delete_all()?;
            for (name, path) in log_dir_entries(log_dir)? {
                let run_log = path.is_file() && name.ends_with(".log");
                let outputs = path.is_dir() && is_job_dir_name(&name);
                if run_log || outputs {
                    report.remove(&path)?;
                }
            }
        }
    }

    if options.data {
        report.remove(&settings.paths.working_dir)?;
    }

    info!(
        jobs = report.jobs_removed,
        paths = report.paths_removed.len(),
        "cleanup finished"
    );
    Ok(report)
}
