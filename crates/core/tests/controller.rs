// Run scenarios driven through PipelineController
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qcmms_core::catalog::{Acknowledgement, CatalogTransport, DispatchTarget};
use qcmms_core::config::Configuration;
use qcmms_core::error::{JobStoreError, ProcessorError, QcError, StoreResult, TransportError};
use qcmms_core::joblog::{
    DispatchAttempt, JobId, JobLogger, JobOutcome, JobRecord, JobStore, MemoryJobStore, NewJob,
    StageEntry, Transition,
};
use qcmms_core::pipeline::{
    Delivery, PipelineController, Platform, Processor, ProcessorRegistry, ProductType, Stage,
    StageGroup, StageInput, StageReport, StageStatus,
};
use qcmms_core::response::{Payload, SlotStatus};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Soft,
    Hard,
    Infrastructure,
    Hang,
}

type CallLog = Arc<Mutex<Vec<Stage>>>;

struct ScriptedProcessor {
    stage: Stage,
    behaviour: Behaviour,
    calls: CallLog,
}

#[async_trait]
impl Processor for ScriptedProcessor {
    fn name(&self) -> String {
        format!("scripted:{}", self.stage)
    }

    async fn run(&self, input: StageInput) -> Result<StageReport, ProcessorError> {
        self.calls.lock().unwrap().push(input.stage);
        match self.behaviour {
            Behaviour::Succeed => Ok(StageReport::new()
                .with_indicator("checked", true)
                .with_artifact(input.working_dir.join(format!("{}.out", input.stage)))),
            Behaviour::Soft => Err(ProcessorError::soft("minor defect")),
            Behaviour::Hard => Err(ProcessorError::hard("control failed")),
            Behaviour::Infrastructure => Err(ProcessorError::infrastructure("disk full")),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(StageReport::new())
            }
        }
    }
}

fn registry(behaviours: &[(Stage, Behaviour)], calls: &CallLog) -> ProcessorRegistry {
    let overrides: HashMap<Stage, Behaviour> = behaviours.iter().copied().collect();
    let mut registry = ProcessorRegistry::new();
    for stage in Stage::ALL {
        let platform = match stage.product_type() {
            ProductType::Image => Platform::Sentinel2,
            ProductType::Land => Platform::Agnostic,
        };
        let behaviour = overrides.get(&stage).copied().unwrap_or(Behaviour::Succeed);
        let calls = calls.clone();
        registry
            .register(stage, platform, move || {
                Box::new(ScriptedProcessor {
                    stage,
                    behaviour,
                    calls: calls.clone(),
                })
            })
            .unwrap();
    }
    registry
}

fn config(dir: &TempDir, extra: Value) -> Configuration {
    let root = dir.path();
    let base = json!({
        "use_case": {
            "name": "uc-test",
            "product_type": "image",
            "product_id": "S2B_MSIL1C_20240612",
            "aoi": "POLYGON((0 0,1 0,1 1,0 0))",
            "acquisition_date": "2024-06-12"
        },
        "image_products": {"primary_platform": "Sentinel-2"},
        "dispatch": {"max_attempts": 3, "initial_backoff_ms": 1, "max_backoff_ms": 5},
        "paths": {
            "working_dir": root.join("work").to_string_lossy(),
            "log_dir": root.join("logs").to_string_lossy(),
            "log_db": root.join("logs/jobs.db").to_string_lossy()
        }
    });
    Configuration::from_fragments([("base", base), ("extra", extra)]).unwrap()
}

#[derive(Default)]
struct FlakyTransport {
    failures_left: AtomicU32,
    submissions: AtomicU32,
}

impl FlakyTransport {
    fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            submissions: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CatalogTransport for FlakyTransport {
    async fn submit(
        &self,
        _payload: &Payload,
        target: &DispatchTarget,
    ) -> Result<Acknowledgement, TransportError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(TransportError::new("503 Service Unavailable"));
        }
        Ok(Acknowledgement {
            id: target.dataset_id.clone(),
        })
    }
}

/// Scratch directory for a run, with test logging installed
fn scratch() -> TempDir {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    TempDir::new().unwrap()
}

fn calls_of(calls: &CallLog) -> Vec<Stage> {
    calls.lock().unwrap().clone()
}

#[tokio::test]
async fn test_enabled_subset_runs_in_order() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[], &calls);
    let config = config(
        &dir,
        json!({"stages": ["ordinary_control", "search", "download"]}),
    );
    let logger = JobLogger::in_memory();

    let report = PipelineController::new(&registry, &config, &logger)
        .run()
        .await
        .unwrap();

    assert_eq!(
        calls_of(&calls),
        vec![Stage::Search, Stage::Download, Stage::OrdinaryControl]
    );
    assert_eq!(report.delivery, Delivery::NotConfigured);
    assert_eq!(report.outcome(), JobOutcome::Completed);
    for group in [
        StageGroup::DetailedControl,
        StageGroup::Harmonization,
        StageGroup::Coverage,
    ] {
        assert_eq!(
            report.document.slot(group).unwrap().status(),
            SlotStatus::NotEvaluated
        );
    }

    let transitions: Vec<String> = logger
        .transitions(report.job_id)
        .unwrap()
        .into_iter()
        .map(|t| t.state)
        .collect();
    assert_eq!(
        transitions,
        vec![
            "init",
            "configuring",
            "scheduling",
            "executing:search",
            "executing:download",
            "executing:ordinary_control",
            "aggregating",
            "dispatching",
            "completed",
        ]
    );

    let job = logger.job(report.job_id).unwrap().unwrap();
    assert_eq!(job.outcome, Some(JobOutcome::Completed));
    assert_eq!(job.fingerprint, config.fingerprint());
    assert!(report.payload_path.as_ref().unwrap().exists());
}

#[tokio::test]
async fn test_hard_failure_skips_dependent_subtree() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[(Stage::Download, Behaviour::Hard)], &calls);
    let config = config(&dir, json!({}));
    let logger = JobLogger::in_memory();
    let transport = FlakyTransport::failing(0);

    let report = PipelineController::new(&registry, &config, &logger)
        .with_transport(Some(&transport))
        .run()
        .await
        .unwrap();

    assert_eq!(calls_of(&calls), vec![Stage::Search, Stage::Download]);
    assert_eq!(report.result(Stage::Search).unwrap().status(), StageStatus::Success);
    assert_eq!(
        report.result(Stage::Download).unwrap().status(),
        StageStatus::HardFailure
    );
    for stage in [
        Stage::OrdinaryControl,
        Stage::ValidPixels,
        Stage::CloudCoverage,
        Stage::GeometryQuality,
        Stage::RadiometryControl,
        Stage::HarmonizationControl,
        Stage::VpxCoverage,
    ] {
        let result = report.result(stage).unwrap();
        assert_eq!(result.status(), StageStatus::Skipped, "{}", stage);
        assert!(result.indicators().is_empty());
    }

    assert!(matches!(report.delivery, Delivery::Acknowledged(_)));
    assert_eq!(transport.submissions.load(Ordering::SeqCst), 1);
    assert_eq!(logger.stage_outcomes(report.job_id).unwrap().len(), 9);
}

#[tokio::test]
async fn test_transport_recovers_after_two_failures() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[], &calls);
    let config = config(&dir, json!({"stages": ["search"]}));
    let logger = JobLogger::in_memory();
    let transport = FlakyTransport::failing(2);

    let report = PipelineController::new(&registry, &config, &logger)
        .with_transport(Some(&transport))
        .run()
        .await
        .unwrap();

    assert!(matches!(report.delivery, Delivery::Acknowledged(_)));
    let attempts = logger.dispatch_attempts(report.job_id).unwrap();
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|a| a.succeeded).collect::<Vec<_>>(),
        vec![false, false, true]
    );
    assert_eq!(report.outcome(), JobOutcome::Completed);
}

#[tokio::test]
async fn test_transport_exhaustion_keeps_document() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[], &calls);
    let config = config(&dir, json!({"stages": ["search"]}));
    let logger = JobLogger::in_memory();
    let transport = FlakyTransport::failing(10);

    let report = PipelineController::new(&registry, &config, &logger)
        .with_transport(Some(&transport))
        .run()
        .await
        .unwrap();

    match &report.delivery {
        Delivery::Failed(err) => assert_eq!(err.attempts, 3),
        other => panic!("unexpected delivery: {:?}", other),
    }
    assert!(report.payload.is_some());
    assert!(report.payload_path.as_ref().unwrap().exists());
    let job = logger.job(report.job_id).unwrap().unwrap();
    assert_eq!(job.outcome, Some(JobOutcome::DispatchFailed));
}

#[tokio::test]
async fn test_unregistered_pair_fails_before_any_stage() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[], &calls);
    // Only Sentinel-2 processors are registered
    let config = config(
        &dir,
        json!({"image_products": {"primary_platform": "Landsat-8"}}),
    );
    let logger = JobLogger::in_memory();

    let err = PipelineController::new(&registry, &config, &logger)
        .run()
        .await
        .unwrap_err();

    match err {
        QcError::UnknownProcessor(err) => {
            assert_eq!(err.stage, Stage::Search);
            assert_eq!(err.platform, Platform::Landsat8);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(calls_of(&calls).is_empty());
    let job = logger.last_job("uc-test").unwrap().unwrap();
    assert_eq!(job.outcome, Some(JobOutcome::Aborted));
}

#[tokio::test]
async fn test_soft_failure_lets_optional_dependents_run() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(
        &[
            (Stage::GeometryQuality, Behaviour::Soft),
            (Stage::ValidPixels, Behaviour::Hard),
        ],
        &calls,
    );
    let config = config(&dir, json!({}));
    let logger = JobLogger::in_memory();

    let report = PipelineController::new(&registry, &config, &logger)
        .run()
        .await
        .unwrap();

    assert_eq!(
        report.result(Stage::GeometryQuality).unwrap().status(),
        StageStatus::SoftFailure
    );
    // Optional dependency on a soft failure does not block
    assert_eq!(
        report.result(Stage::HarmonizationControl).unwrap().status(),
        StageStatus::Success
    );
    // Optional dependency on a hard failure does
    assert_eq!(
        report.result(Stage::VpxCoverage).unwrap().status(),
        StageStatus::Skipped
    );
    // Siblings without a dependency still run
    assert_eq!(
        report.result(Stage::CloudCoverage).unwrap().status(),
        StageStatus::Success
    );
    assert_eq!(
        report
            .document
            .slot(StageGroup::DetailedControl)
            .unwrap()
            .status(),
        SlotStatus::Evaluated(StageStatus::HardFailure)
    );
}

#[tokio::test]
async fn test_infrastructure_failure_aborts_run() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[(Stage::OrdinaryControl, Behaviour::Infrastructure)], &calls);
    let config = config(&dir, json!({}));
    let logger = JobLogger::in_memory();

    let err = PipelineController::new(&registry, &config, &logger)
        .run()
        .await
        .unwrap_err();

    let job_id = match err {
        QcError::Aborted { job_id, stage, .. } => {
            assert_eq!(stage, Some(Stage::OrdinaryControl));
            job_id
        }
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(
        calls_of(&calls),
        vec![Stage::Search, Stage::Download, Stage::OrdinaryControl]
    );

    let entries = logger.stage_outcomes(job_id).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].status, StageStatus::HardFailure);

    let job = logger.job(job_id).unwrap().unwrap();
    assert_eq!(job.outcome, Some(JobOutcome::Aborted));
    assert!(job.reason.unwrap().contains("disk full"));
    let last = logger.transitions(job_id).unwrap().pop().unwrap();
    assert_eq!(last.state, "aborted");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_becomes_hard_failure() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[(Stage::Download, Behaviour::Hang)], &calls);
    let config = config(
        &dir,
        json!({
            "stages": ["search", "download", "ordinary_control"],
            "stage_options": {"download": {"timeout_secs": 2}}
        }),
    );
    let logger = JobLogger::in_memory();

    let report = PipelineController::new(&registry, &config, &logger)
        .run()
        .await
        .unwrap();

    let download = report.result(Stage::Download).unwrap();
    assert_eq!(download.status(), StageStatus::HardFailure);
    assert!(download.diagnostic().unwrap().contains("timeout"));
    assert_eq!(
        report.result(Stage::OrdinaryControl).unwrap().status(),
        StageStatus::Skipped
    );
}

#[tokio::test]
async fn test_invalid_configuration_aborts_before_scheduling() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[], &calls);
    let config = config(&dir, json!({"use_case": {"acquisition_date": "yesterday"}}));
    let logger = JobLogger::in_memory();

    let err = PipelineController::new(&registry, &config, &logger)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, QcError::Validation(_)));
    assert!(calls_of(&calls).is_empty());
    let job = logger.last_job("uc-test").unwrap().unwrap();
    let states: Vec<String> = logger
        .transitions(job.id)
        .unwrap()
        .into_iter()
        .map(|t| t.state)
        .collect();
    assert_eq!(states, vec!["init", "configuring", "aborted"]);
}

#[tokio::test]
async fn test_resume_reruns_only_unsuccessful_stages() {
    let dir = scratch();
    let logger = JobLogger::in_memory();
    let config = config(
        &dir,
        json!({"stages": ["search", "download", "ordinary_control"]}),
    );

    let first_calls = CallLog::default();
    let failing = registry(&[(Stage::Download, Behaviour::Hard)], &first_calls);
    let first = PipelineController::new(&failing, &config, &logger)
        .run()
        .await
        .unwrap();

    let plan = logger.resume_plan(first.job_id).unwrap();
    assert_eq!(plan.succeeded, vec![Stage::Search]);
    assert_eq!(plan.rerun, vec![Stage::Download, Stage::OrdinaryControl]);

    let second_calls = CallLog::default();
    let healthy = registry(&[], &second_calls);
    let second = PipelineController::new(&healthy, &config, &logger)
        .with_resume(Some(plan))
        .run()
        .await
        .unwrap();

    assert_eq!(
        calls_of(&second_calls),
        vec![Stage::Download, Stage::OrdinaryControl]
    );
    assert_ne!(first.job_id, second.job_id);
    assert_eq!(
        second.result(Stage::OrdinaryControl).unwrap().status(),
        StageStatus::Success
    );
}

#[tokio::test]
async fn test_artifacts_flow_to_later_stages() {
    struct ArtifactWatcher {
        seen: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl Processor for ArtifactWatcher {
        fn name(&self) -> String {
            "artifact-watcher".to_string()
        }

        async fn run(&self, input: StageInput) -> Result<StageReport, ProcessorError> {
            self.seen.lock().unwrap().push(input.prior_artifacts().count());
            Ok(StageReport::new().with_artifact(format!("{}.tif", input.stage)))
        }
    }

    let dir = scratch();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ProcessorRegistry::new();
    for stage in [Stage::Search, Stage::Download, Stage::OrdinaryControl] {
        let seen = seen.clone();
        registry
            .register(stage, Platform::Sentinel2, move || {
                Box::new(ArtifactWatcher { seen: seen.clone() })
            })
            .unwrap();
    }
    let config = config(
        &dir,
        json!({"stages": ["search", "download", "ordinary_control"]}),
    );
    let logger = JobLogger::in_memory();

    PipelineController::new(&registry, &config, &logger)
        .run()
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_abort_leaves_partial_document_and_scoped_resume() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[(Stage::Download, Behaviour::Infrastructure)], &calls);
    let config = config(
        &dir,
        json!({"stages": ["search", "download", "ordinary_control"]}),
    );
    let logger = JobLogger::in_memory();

    let err = PipelineController::new(&registry, &config, &logger)
        .run()
        .await
        .unwrap_err();
    let job_id = match err {
        QcError::Aborted { job_id, .. } => job_id,
        other => panic!("unexpected error: {other}"),
    };

    assert_eq!(
        logger.scheduled_stages(job_id).unwrap(),
        vec![Stage::Search, Stage::Download, Stage::OrdinaryControl]
    );
    let plan = logger.resume_plan(job_id).unwrap();
    assert_eq!(plan.rerun, vec![Stage::Download, Stage::OrdinaryControl]);

    let partial = dir
        .path()
        .join("logs")
        .join(format!("{:05}", job_id))
        .join("S2B_MSIL1C_20240612.json");
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(partial).unwrap()).unwrap();
    let slots = saved["properties"]["productInformation"]["qualityInformation"]
        ["qualityIndicators"]
        .as_array()
        .unwrap();
    let stages: Vec<(&str, &str)> = slots
        .iter()
        .flat_map(|slot| slot["stages"].as_array().unwrap())
        .map(|stage| {
            (
                stage["stage"].as_str().unwrap(),
                stage["status"].as_str().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        stages,
        vec![("search", "success"), ("download", "hard_failure")]
    );
}

/// Memory store whose finalisation always fails
#[derive(Default)]
struct UnfinalizableStore {
    inner: MemoryJobStore,
}

impl JobStore for UnfinalizableStore {
    fn begin_job(&self, job: &NewJob) -> StoreResult<JobId> {
        self.inner.begin_job(job)
    }

    fn append_transition(&self, job_id: JobId, transition: &Transition) -> StoreResult<()> {
        self.inner.append_transition(job_id, transition)
    }

    fn append_schedule(&self, job_id: JobId, stages: &[Stage]) -> StoreResult<()> {
        self.inner.append_schedule(job_id, stages)
    }

    fn append_stage(&self, job_id: JobId, entry: &StageEntry) -> StoreResult<()> {
        self.inner.append_stage(job_id, entry)
    }

    fn append_dispatch_attempt(
        &self,
        job_id: JobId,
        attempt: &DispatchAttempt,
    ) -> StoreResult<()> {
        self.inner.append_dispatch_attempt(job_id, attempt)
    }

    fn finalize_job(
        &self,
        _job_id: JobId,
        _outcome: JobOutcome,
        _reason: Option<&str>,
        _at: DateTime<Utc>,
    ) -> StoreResult<()> {
        Err(JobStoreError::backend("database is locked"))
    }

    fn job(&self, job_id: JobId) -> StoreResult<Option<JobRecord>> {
        self.inner.job(job_id)
    }

    fn scheduled_stages(&self, job_id: JobId) -> StoreResult<Vec<Stage>> {
        self.inner.scheduled_stages(job_id)
    }

    fn stage_entries(&self, job_id: JobId) -> StoreResult<Vec<StageEntry>> {
        self.inner.stage_entries(job_id)
    }

    fn transitions(&self, job_id: JobId) -> StoreResult<Vec<Transition>> {
        self.inner.transitions(job_id)
    }

    fn dispatch_attempts(&self, job_id: JobId) -> StoreResult<Vec<DispatchAttempt>> {
        self.inner.dispatch_attempts(job_id)
    }

    fn last_job(&self, use_case: &str) -> StoreResult<Option<JobRecord>> {
        self.inner.last_job(use_case)
    }

    fn delete_job(&self, job_id: JobId) -> StoreResult<()> {
        self.inner.delete_job(job_id)
    }

    fn delete_all(&self) -> StoreResult<usize> {
        self.inner.delete_all()
    }
}

#[tokio::test]
async fn test_finalize_failure_keeps_the_report() {
    let dir = scratch();
    let calls = CallLog::default();
    let registry = registry(&[], &calls);
    let config = config(&dir, json!({"stages": ["search"]}));
    let logger = JobLogger::new(Arc::new(UnfinalizableStore::default()));

    let report = PipelineController::new(&registry, &config, &logger)
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome(), JobOutcome::Completed);
    assert!(report.payload.is_some());
    assert!(report.payload_path.as_ref().unwrap().exists());
    assert!(!logger.job(report.job_id).unwrap().unwrap().is_finalized());
}
