// Job logging: append-only history of every run
mod memory;
mod store;

pub use memory::MemoryJobStore;
pub use store::{
    DispatchAttempt, JobId, JobOutcome, JobRecord, JobStore, NewJob, StageEntry, Transition,
};

use crate::error::{JobStoreError, StoreResult};
use crate::pipeline::{RunState, Stage, StageResult, StageStatus};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Front of a job store used by the controller and the CLI
#[derive(Clone)]
pub struct JobLogger {
    store: Arc<dyn JobStore>,
}

impl JobLogger {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Logger over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJobStore::new()))
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    /// Open a job record and return its id
    pub fn begin(&self, use_case: &str, fingerprint: &str) -> StoreResult<JobId> {
        let job_id = self.store.begin_job(&NewJob {
            use_case: use_case.to_string(),
            fingerprint: fingerprint.to_string(),
            pid: std::process::id(),
            started_at: Utc::now(),
        })?;
        debug!(job_id, use_case, fingerprint, "job opened");
        Ok(job_id)
    }

    pub fn transition(&self, job_id: JobId, state: &RunState) -> StoreResult<()> {
        self.store.append_transition(
            job_id,
            &Transition {
                state: state.label(),
                at: Utc::now(),
            },
        )
    }

    pub fn schedule(&self, job_id: JobId, stages: &[Stage]) -> StoreResult<()> {
        self.store.append_schedule(job_id, stages)
    }

    pub fn stage(&self, job_id: JobId, result: &StageResult) -> StoreResult<()> {
        self.store.append_stage(job_id, &StageEntry::from(result))
    }

    pub fn dispatch_attempt(&self, job_id: JobId, attempt: &DispatchAttempt) -> StoreResult<()> {
        self.store.append_dispatch_attempt(job_id, attempt)
    }

    pub fn finalize(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        reason: Option<&str>,
    ) -> StoreResult<()> {
        self.store.finalize_job(job_id, outcome, reason, Utc::now())?;
        debug!(job_id, outcome = %outcome, "job finalized");
        Ok(())
    }

    pub fn job(&self, job_id: JobId) -> StoreResult<Option<JobRecord>> {
        self.store.job(job_id)
    }

    pub fn scheduled_stages(&self, job_id: JobId) -> StoreResult<Vec<Stage>> {
        self.store.scheduled_stages(job_id)
    }

    pub fn stage_outcomes(&self, job_id: JobId) -> StoreResult<Vec<StageEntry>> {
        self.store.stage_entries(job_id)
    }

    pub fn transitions(&self, job_id: JobId) -> StoreResult<Vec<Transition>> {
        self.store.transitions(job_id)
    }

    pub fn dispatch_attempts(&self, job_id: JobId) -> StoreResult<Vec<DispatchAttempt>> {
        self.store.dispatch_attempts(job_id)
    }

    pub fn last_job(&self, use_case: &str) -> StoreResult<Option<JobRecord>> {
        self.store.last_job(use_case)
    }

    /// Remove one job and everything recorded for it
    pub fn delete_job(&self, job_id: JobId) -> StoreResult<()> {
        self.store.delete_job(job_id)?;
        info!(job_id, "job deleted from the log");
        Ok(())
    }

    /// Empty the whole job log
    pub fn delete_all(&self) -> StoreResult<usize> {
        let removed = self.store.delete_all()?;
        info!(removed, "job log cleared");
        Ok(removed)
    }

    /// Stages of a prior job that did not end in success.
    ///
    /// For an aborted job, scheduled stages it never reached count as not
    /// succeeded. Stages outside its schedule are never added.
    pub fn resume_plan(&self, job_id: JobId) -> StoreResult<ResumePlan> {
        let job = self
            .store
            .job(job_id)?
            .ok_or(JobStoreError::UnknownJob(job_id))?;
        let entries = self.store.stage_entries(job_id)?;

        let mut succeeded: Vec<Stage> = Vec::new();
        let mut attempted: Vec<Stage> = Vec::new();
        for entry in &entries {
            if !attempted.contains(&entry.stage) {
                attempted.push(entry.stage);
            }
            if entry.status == StageStatus::Success && !succeeded.contains(&entry.stage) {
                succeeded.push(entry.stage);
            }
        }

        let mut rerun: Vec<Stage> = attempted
            .iter()
            .copied()
            .filter(|stage| !succeeded.contains(stage))
            .collect();

        if job.outcome == Some(JobOutcome::Aborted) {
            let unreached = self
                .store
                .scheduled_stages(job_id)?
                .into_iter()
                .filter(|stage| !attempted.contains(stage));
            rerun.extend(unreached);
        }
        rerun.sort();

        Ok(ResumePlan {
            job_id,
            succeeded,
            rerun,
        })
    }
}

/// Which stages a resumed run executes and which it inherits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    pub job_id: JobId,
    /// Stages that ended in success in the prior job
    pub succeeded: Vec<Stage>,
    /// Stages to execute again
    pub rerun: Vec<Stage>,
}

impl ResumePlan {
    pub fn has_succeeded(&self, stage: Stage) -> bool {
        self.succeeded.contains(&stage)
    }

    pub fn is_empty(&self) -> bool {
        self.rerun.is_empty()
    }
}
