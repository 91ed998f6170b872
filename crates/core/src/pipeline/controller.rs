// Pipeline controller: drives one run through its states
use super::core::{ArtifactMap, ProcessorInstance, StageInput};
use super::registry::{ProcessorDescriptor, ProcessorRegistry};
use super::result::{StageResult, StageStatus};
use super::scheduler::{Schedule, ScheduleBuilder};
use super::stage::{DependencyKind, Stage};
use super::state::RunState;
use crate::catalog::{dispatch_with_retry, Acknowledgement, CatalogTransport, DispatchTarget};
use crate::config::{enabled_or_all, validate, Configuration, RunSettings};
use crate::error::{
    DispatchError, JobStoreError, ProcessorError, QcError, Result, SchemaValidationError,
    StageTimeoutError,
};
use crate::joblog::{JobId, JobLogger, JobOutcome, ResumePlan};
use crate::response::{Payload, QiDocument, ResponseComposer, SealedDocument};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How delivery of the composed document ended
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Acknowledged(Acknowledgement),
    /// No catalog endpoint configured; the payload was only persisted
    NotConfigured,
    /// The document failed schema validation and was not sent
    Rejected(SchemaValidationError),
    Failed(DispatchError),
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job_id: JobId,
    pub fingerprint: String,
    pub results: Vec<StageResult>,
    pub document: SealedDocument,
    pub payload: Option<Payload>,
    pub payload_path: Option<PathBuf>,
    pub delivery: Delivery,
}

impl RunReport {
    pub fn outcome(&self) -> JobOutcome {
        match self.delivery {
            Delivery::Acknowledged(_) | Delivery::NotConfigured => JobOutcome::Completed,
            Delivery::Rejected(_) => JobOutcome::Rejected,
            Delivery::Failed(_) => JobOutcome::DispatchFailed,
        }
    }

    fn reason(&self) -> Option<String> {
        match &self.delivery {
            Delivery::Rejected(err) => Some(err.to_string()),
            Delivery::Failed(err) => Some(err.to_string()),
            _ => None,
        }
    }

    pub fn result(&self, stage: Stage) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage() == stage)
    }
}

enum Execution {
    Finished(StageResult),
    Aborted(StageResult, String),
}

/// Drives a single run from configuration to delivery
pub struct PipelineController<'a> {
    registry: &'a ProcessorRegistry,
    config: &'a Configuration,
    logger: &'a JobLogger,
    transport: Option<&'a dyn CatalogTransport>,
    resume: Option<ResumePlan>,
    composer: ResponseComposer,
    /// Last state successfully recorded
    current: Mutex<Option<RunState>>,
}

impl<'a> PipelineController<'a> {
    pub fn new(
        registry: &'a ProcessorRegistry,
        config: &'a Configuration,
        logger: &'a JobLogger,
    ) -> Self {
        Self {
            registry,
            config,
            logger,
            transport: None,
            resume: None,
            composer: ResponseComposer::new(),
            current: Mutex::new(None),
        }
    }

    /// Deliver composed documents through this transport
    pub fn with_transport(mut self, transport: Option<&'a dyn CatalogTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Re-run the unsuccessful stages of a prior job
    pub fn with_resume(mut self, plan: Option<ResumePlan>) -> Self {
        self.resume = plan;
        self
    }

    /// Execute the run. The job record is always finalised.
    pub async fn run(&self) -> Result<RunReport> {
        let fingerprint = self.config.fingerprint();
        let use_case = self.config.lookup_str("use_case.name").unwrap_or("unnamed");
        let job_id = self.logger.begin(use_case, &fingerprint)?;

        let span = info_span!("run", job_id, use_case, fingerprint = %&fingerprint[..12]);
        let outcome = self
            .drive(job_id, &fingerprint)
            .instrument(span)
            .await;

        match outcome {
            Ok(report) => {
                let reason = report.reason();
                // The report still carries the document, so a store failure
                // here is logged rather than returned.
                if let Err(log_err) =
                    self.logger
                        .finalize(job_id, report.outcome(), reason.as_deref())
                {
                    error!(job_id, error = %log_err, "could not finalize job");
                }
                info!(job_id, outcome = %report.outcome(), "run finished");
                Ok(report)
            }
            Err(err) => {
                error!(job_id, fingerprint = %fingerprint, error = %err, "run aborted");
                if let Err(log_err) = self.enter(job_id, RunState::Aborted) {
                    warn!(job_id, error = %log_err, "could not record abort transition");
                }
                if let Err(log_err) =
                    self.logger
                        .finalize(job_id, JobOutcome::Aborted, Some(&err.to_string()))
                {
                    error!(job_id, error = %log_err, "could not finalize job");
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, job_id: JobId, fingerprint: &str) -> Result<RunReport> {
        self.enter(job_id, RunState::Init)?;

        self.enter(job_id, RunState::Configuring)?;
        let settings = validate(self.config)?;
        prepare_working_dir(&settings.paths.working_dir)
            .map_err(|err| QcError::aborted(job_id, None, err))?;

        self.enter(job_id, RunState::Scheduling)?;
        let schedule = self.schedule(&settings)?;
        let instances: Vec<ProcessorInstance> = schedule
            .resolve(self.registry, settings.platform)?
            .into_iter()
            .map(|registered| ProcessorInstance::bind(registered, self.config, &settings))
            .collect();
        self.logger.schedule(job_id, schedule.stages())?;
        let tags: Vec<&str> = schedule.stages().iter().map(Stage::tag).collect();
        info!(job_id, stages = ?tags, platform = %settings.platform, "schedule computed");

        let mut results: Vec<StageResult> = Vec::with_capacity(instances.len());
        let mut document = QiDocument::new(job_id, settings.use_case.clone(), settings.platform);
        for (index, instance) in instances.into_iter().enumerate() {
            let stage = instance.stage();
            self.enter(job_id, RunState::Executing { stage, index })?;

            let result = match self.gate(instance.descriptor(), &schedule, &results) {
                Some(reason) => {
                    info!(job_id, stage = %stage, reason = %reason, "stage skipped");
                    StageResult::skipped(stage, instance.platform(), reason, Utc::now())
                }
                None => match self.execute(job_id, &instance, &settings, &results).await {
                    Execution::Finished(result) => result,
                    Execution::Aborted(result, reason) => {
                        self.logger.stage(job_id, &result)?;
                        document.record(result);
                        self.save_progress(&document, &settings);
                        return Err(QcError::aborted(job_id, Some(stage), reason));
                    }
                },
            };
            self.logger.stage(job_id, &result)?;
            document.record(result.clone());
            self.save_progress(&document, &settings);
            results.push(result);
        }

        self.enter(job_id, RunState::Aggregating)?;
        let document = document.seal();

        self.enter(job_id, RunState::Dispatching)?;
        let (payload, payload_path, delivery) = self
            .dispatch(job_id, fingerprint, &document, &settings)
            .await?;

        self.enter(job_id, RunState::Completed)?;
        Ok(RunReport {
            job_id,
            fingerprint: fingerprint.to_string(),
            results,
            document,
            payload,
            payload_path,
            delivery,
        })
    }

    fn enter(&self, job_id: JobId, state: RunState) -> std::result::Result<(), JobStoreError> {
        let mut current = self.current.lock().map_err(|_| JobStoreError::LockPoisoned)?;
        debug_assert!(
            is_legal(current.as_ref(), &state),
            "illegal transition {:?} -> {}",
            *current,
            state
        );
        self.logger.transition(job_id, &state)?;
        *current = Some(state);
        debug!(job_id, state = %state, "state entered");
        Ok(())
    }

    /// Write the document as it stands after a stage, unvalidated.
    ///
    /// The final payload overwrites the same file once the run completes.
    fn save_progress(&self, document: &QiDocument, settings: &RunSettings) {
        let job_id = document.job_id();
        match self.composer.save_partial(document, &settings.paths.log_dir) {
            Ok(path) => debug!(job_id, path = %path.display(), "partial document saved"),
            Err(err) => warn!(job_id, error = %err, "could not save partial document"),
        }
    }

    fn schedule(&self, settings: &RunSettings) -> Result<Schedule> {
        let enabled = match &self.resume {
            Some(plan) => plan.rerun.clone(),
            None => enabled_or_all(settings),
        };
        let schedule = ScheduleBuilder::new(settings.use_case.product_type)
            .with_order(settings.sub_stage_order.clone())
            .enable(enabled)?
            .build()?;
        Ok(schedule)
    }

    /// Reason a stage must be skipped, if any
    fn gate(
        &self,
        descriptor: &ProcessorDescriptor,
        schedule: &Schedule,
        results: &[StageResult],
    ) -> Option<String> {
        for dependency in descriptor.dependencies {
            let status = results
                .iter()
                .find(|r| r.stage() == dependency.stage)
                .map(StageResult::status);
            match (dependency.kind, status) {
                (DependencyKind::Strict, Some(StageStatus::Success)) => {}
                (DependencyKind::Strict, Some(other)) => {
                    return Some(format!(
                        "dependency '{}' ended {}",
                        dependency.stage, other
                    ));
                }
                (DependencyKind::Strict, None) => {
                    let inherited = !schedule.contains(dependency.stage)
                        && self
                            .resume
                            .as_ref()
                            .is_some_and(|plan| plan.has_succeeded(dependency.stage));
                    if !inherited {
                        return Some(format!(
                            "dependency '{}' did not succeed in this run",
                            dependency.stage
                        ));
                    }
                }
                (DependencyKind::Optional, Some(status)) => {
                    if !status.satisfies(DependencyKind::Optional) {
                        return Some(format!(
                            "optional dependency '{}' ended {}",
                            dependency.stage, status
                        ));
                    }
                }
                (DependencyKind::Optional, None) => {}
            }
        }
        None
    }

    async fn execute(
        &self,
        job_id: JobId,
        instance: &ProcessorInstance,
        settings: &RunSettings,
        results: &[StageResult],
    ) -> Execution {
        let stage = instance.stage();
        let platform = instance.platform();
        let artifacts: ArtifactMap = results
            .iter()
            .filter(|r| matches!(r.status(), StageStatus::Success | StageStatus::SoftFailure))
            .filter(|r| !r.artifacts().is_empty())
            .map(|r| (r.stage(), r.artifacts().to_vec()))
            .collect();
        let input = StageInput {
            job_id,
            stage,
            platform,
            options: instance.options().clone(),
            artifacts,
            working_dir: settings.paths.working_dir.clone(),
            use_case: settings.use_case.clone(),
        };

        info!(
            job_id,
            stage = %stage,
            platform = %platform,
            processor = %instance.processor().name(),
            "stage started"
        );
        let started_at = Utc::now();
        let outcome = tokio::time::timeout(instance.timeout(), instance.processor().run(input)).await;
        let finished_at = Utc::now();

        let failed = |status: StageStatus, diagnostic: String| {
            StageResult::new(stage, platform, status, started_at, finished_at)
                .with_diagnostic(diagnostic)
        };

        match outcome {
            Ok(Ok(report)) => {
                info!(job_id, stage = %stage, indicators = report.indicators.len(), "stage succeeded");
                Execution::Finished(StageResult::from_report(
                    stage,
                    platform,
                    report,
                    started_at,
                    finished_at,
                ))
            }
            Ok(Err(ProcessorError::Soft(message))) => {
                warn!(job_id, stage = %stage, error = %message, "stage soft failure");
                Execution::Finished(failed(StageStatus::SoftFailure, message))
            }
            Ok(Err(ProcessorError::Hard(message))) => {
                error!(job_id, stage = %stage, error = %message, "stage hard failure");
                Execution::Finished(failed(StageStatus::HardFailure, message))
            }
            Ok(Err(ProcessorError::Infrastructure(message))) => {
                error!(job_id, stage = %stage, error = %message, "infrastructure failure, aborting run");
                Execution::Aborted(failed(StageStatus::HardFailure, message.clone()), message)
            }
            Err(_) => {
                let err = StageTimeoutError {
                    stage,
                    timeout: instance.timeout(),
                };
                error!(job_id, stage = %stage, error = %err, "stage timed out");
                Execution::Finished(failed(StageStatus::HardFailure, err.to_string()))
            }
        }
    }

    async fn dispatch(
        &self,
        job_id: JobId,
        fingerprint: &str,
        document: &SealedDocument,
        settings: &RunSettings,
    ) -> Result<(Option<Payload>, Option<PathBuf>, Delivery)> {
        let payload = match self.composer.compose(document) {
            Ok(payload) => payload,
            Err(err) => {
                error!(job_id, fingerprint, error = %err, "document rejected");
                return Ok((None, None, Delivery::Rejected(err)));
            }
        };

        let payload_path = match self.composer.save(&payload, document, &settings.paths.log_dir) {
            Ok(path) => {
                info!(job_id, path = %path.display(), "payload saved");
                Some(path)
            }
            Err(err) => {
                warn!(job_id, error = %err, "could not save payload");
                None
            }
        };

        let Some(transport) = self.transport else {
            info!(job_id, "no catalog configured, dispatch skipped");
            return Ok((Some(payload), payload_path, Delivery::NotConfigured));
        };

        let target = DispatchTarget::for_document(document);
        let mut log_failure: Option<JobStoreError> = None;
        let delivered = dispatch_with_retry(
            transport,
            &payload,
            &target,
            &settings.dispatch,
            |attempt| {
                if log_failure.is_none() {
                    if let Err(err) = self.logger.dispatch_attempt(job_id, attempt) {
                        log_failure = Some(err);
                    }
                }
            },
        )
        .await;
        if let Some(err) = log_failure {
            return Err(err.into());
        }

        let delivery = match delivered {
            Ok(ack) => Delivery::Acknowledged(ack),
            Err(err) => {
                error!(job_id, fingerprint, error = %err, "dispatch failed");
                Delivery::Failed(err)
            }
        };
        Ok((Some(payload), payload_path, delivery))
    }
}

/// Outside a live run only Init, or an abort before Init was recorded, may follow
fn is_legal(current: Option<&RunState>, next: &RunState) -> bool {
    match current {
        Some(state) if !state.is_terminal() => state.can_advance_to(next),
        _ => matches!(next, RunState::Init | RunState::Aborted),
    }
}

/// Create the working directory and check it accepts files
fn prepare_working_dir(dir: &Path) -> std::result::Result<(), String> {
    fs::create_dir_all(dir)
        .map_err(|err| format!("cannot create working directory {}: {}", dir.display(), err))?;
    let marker = dir.join(".qcmms-write-check");
    fs::write(&marker, b"")
        .and_then(|_| fs::remove_file(&marker))
        .map_err(|err| format!("working directory {} is not writable: {}", dir.display(), err))
}
