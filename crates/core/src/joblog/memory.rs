// In-memory job store
use super::store::{
    DispatchAttempt, JobId, JobOutcome, JobRecord, JobStore, NewJob, StageEntry, Transition,
};
use crate::error::{JobStoreError, StoreResult};
use crate::pipeline::Stage;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    jobs: Vec<JobRecord>,
    /// Highest id ever handed out; ids are not reused after deletion
    last_id: JobId,
    schedules: Vec<(JobId, Stage)>,
    stages: Vec<(JobId, StageEntry)>,
    transitions: Vec<(JobId, Transition)>,
    attempts: Vec<(JobId, DispatchAttempt)>,
}

impl MemoryState {
    fn job_mut(&mut self, job_id: JobId) -> StoreResult<&mut JobRecord> {
        self.jobs
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or(JobStoreError::UnknownJob(job_id))
    }

    fn ensure_job(&self, job_id: JobId) -> StoreResult<()> {
        if self.jobs.iter().any(|job| job.id == job_id) {
            Ok(())
        } else {
            Err(JobStoreError::UnknownJob(job_id))
        }
    }
}

/// Job store kept in process memory, for tests and dry runs
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| JobStoreError::LockPoisoned)
    }
}

impl JobStore for MemoryJobStore {
    fn begin_job(&self, job: &NewJob) -> StoreResult<JobId> {
        let mut state = self.lock()?;
        state.last_id += 1;
        let id = state.last_id;
        state.jobs.push(JobRecord {
            id,
            use_case: job.use_case.clone(),
            fingerprint: job.fingerprint.clone(),
            pid: job.pid,
            started_at: job.started_at,
            finished_at: None,
            outcome: None,
            reason: None,
        });
        Ok(id)
    }

    fn append_transition(&self, job_id: JobId, transition: &Transition) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.ensure_job(job_id)?;
        state.transitions.push((job_id, transition.clone()));
        Ok(())
    }

    fn append_schedule(&self, job_id: JobId, stages: &[Stage]) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.ensure_job(job_id)?;
        state
            .schedules
            .extend(stages.iter().map(|stage| (job_id, *stage)));
        Ok(())
    }

    fn append_stage(&self, job_id: JobId, entry: &StageEntry) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.ensure_job(job_id)?;
        state.stages.push((job_id, entry.clone()));
        Ok(())
    }

    fn append_dispatch_attempt(
        &self,
        job_id: JobId,
        attempt: &DispatchAttempt,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.ensure_job(job_id)?;
        state.attempts.push((job_id, attempt.clone()));
        Ok(())
    }

    fn finalize_job(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        let job = state.job_mut(job_id)?;
        if job.is_finalized() {
            return Err(JobStoreError::AlreadyFinalized(job_id));
        }
        job.outcome = Some(outcome);
        job.reason = reason.map(str::to_string);
        job.finished_at = Some(at);
        Ok(())
    }

    fn job(&self, job_id: JobId) -> StoreResult<Option<JobRecord>> {
        let state = self.lock()?;
        Ok(state.jobs.iter().find(|job| job.id == job_id).cloned())
    }

    fn scheduled_stages(&self, job_id: JobId) -> StoreResult<Vec<Stage>> {
        let state = self.lock()?;
        Ok(state
            .schedules
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, stage)| *stage)
            .collect())
    }

    fn stage_entries(&self, job_id: JobId) -> StoreResult<Vec<StageEntry>> {
        let state = self.lock()?;
        Ok(state
            .stages
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    fn transitions(&self, job_id: JobId) -> StoreResult<Vec<Transition>> {
        let state = self.lock()?;
        Ok(state
            .transitions
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, transition)| transition.clone())
            .collect())
    }

    fn dispatch_attempts(&self, job_id: JobId) -> StoreResult<Vec<DispatchAttempt>> {
        let state = self.lock()?;
        Ok(state
            .attempts
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, attempt)| attempt.clone())
            .collect())
    }

    fn last_job(&self, use_case: &str) -> StoreResult<Option<JobRecord>> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .iter()
            .rev()
            .find(|job| job.use_case == use_case && job.is_finalized())
            .cloned())
    }

    fn delete_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.ensure_job(job_id)?;
        state.jobs.retain(|job| job.id != job_id);
        state.schedules.retain(|(id, _)| *id != job_id);
        state.stages.retain(|(id, _)| *id != job_id);
        state.transitions.retain(|(id, _)| *id != job_id);
        state.attempts.retain(|(id, _)| *id != job_id);
        Ok(())
    }

    fn delete_all(&self) -> StoreResult<usize> {
        let mut state = self.lock()?;
        let removed = state.jobs.len();
        state.jobs.clear();
        state.schedules.clear();
        state.stages.clear();
        state.transitions.clear();
        state.attempts.clear();
        Ok(removed)
    }
}
