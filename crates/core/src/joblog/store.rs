// Job store contract and records
use crate::error::StoreResult;
use crate::pipeline::{Platform, Stage, StageResult, StageStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Identifier allocated by the store when a job begins
pub type JobId = i64;

/// Terminal outcome of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Document composed and delivered, or delivery not configured
    Completed,
    /// Document composed, delivery exhausted its attempts
    DispatchFailed,
    /// Document failed schema validation
    Rejected,
    /// The run stopped before composing a document
    Aborted,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::DispatchFailed => "dispatch_failed",
            JobOutcome::Rejected => "rejected",
            JobOutcome::Aborted => "aborted",
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(JobOutcome::Completed),
            "dispatch_failed" => Ok(JobOutcome::DispatchFailed),
            "rejected" => Ok(JobOutcome::Rejected),
            "aborted" => Ok(JobOutcome::Aborted),
            other => Err(format!("unknown job outcome '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub use_case: String,
    pub fingerprint: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub use_case: String,
    pub fingerprint: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<JobOutcome>,
    pub reason: Option<String>,
}

impl JobRecord {
    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub platform: Platform,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub diagnostic: Option<String>,
}

impl From<&StageResult> for StageEntry {
    fn from(result: &StageResult) -> Self {
        Self {
            stage: result.stage(),
            platform: result.platform(),
            status: result.status(),
            started_at: result.started_at(),
            finished_at: result.finished_at(),
            diagnostic: result.diagnostic().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub state: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchAttempt {
    pub attempt: u32,
    pub succeeded: bool,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Append-only persistence of job history.
///
/// Entries are never updated; finalisation is an appended outcome row and
/// may happen only once per job. Deletion exists for cleanup only and
/// removes a job together with everything recorded for it.
pub trait JobStore: Send + Sync {
    fn begin_job(&self, job: &NewJob) -> StoreResult<JobId>;

    fn append_transition(&self, job_id: JobId, transition: &Transition) -> StoreResult<()>;

    /// Record the stages a job scheduled, in execution order
    fn append_schedule(&self, job_id: JobId, stages: &[Stage]) -> StoreResult<()>;

    fn append_stage(&self, job_id: JobId, entry: &StageEntry) -> StoreResult<()>;

    fn append_dispatch_attempt(&self, job_id: JobId, attempt: &DispatchAttempt)
    -> StoreResult<()>;

    fn finalize_job(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    fn job(&self, job_id: JobId) -> StoreResult<Option<JobRecord>>;

    /// Stages the job scheduled; empty when it never got that far
    fn scheduled_stages(&self, job_id: JobId) -> StoreResult<Vec<Stage>>;

    fn stage_entries(&self, job_id: JobId) -> StoreResult<Vec<StageEntry>>;

    fn transitions(&self, job_id: JobId) -> StoreResult<Vec<Transition>>;

    fn dispatch_attempts(&self, job_id: JobId) -> StoreResult<Vec<DispatchAttempt>>;

    /// Latest finalised job of a use case
    fn last_job(&self, use_case: &str) -> StoreResult<Option<JobRecord>>;

    /// Remove a job and all of its entries
    fn delete_job(&self, job_id: JobId) -> StoreResult<()>;

    /// Remove every job; returns how many were removed
    fn delete_all(&self) -> StoreResult<usize>;
}
