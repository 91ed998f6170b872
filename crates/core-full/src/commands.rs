// Command implementations shared by the CLI
use crate::catalog::HttpCatalogTransport;
use crate::config::{store_merged, Fragment};
use crate::joblog::open_logger;
use crate::processors;
use qcmms_core::catalog::CatalogTransport;
use qcmms_core::config::validate;
use qcmms_core::error::{QcError, Result};
use qcmms_core::joblog::{JobId, ResumePlan};
use qcmms_core::pipeline::{PipelineController, ProcessorRegistry, RunReport};
use qcmms_core::{Configuration, JobLogger, RunSettings};
use serde_json::json;
use std::fmt::Write;
use tracing::{info, warn};

/// Origin recorded for options given on the command line
pub const COMMAND_LINE_ORIGIN: &str = "command line";

/// Run options given on the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stage tags replacing the configured `stages` list
    pub stages: Option<Vec<String>>,
    /// Prior job whose unsuccessful stages are re-run
    pub resume: Option<JobId>,
}

/// Apply command-line overrides on top of the loaded configuration
pub fn apply_overrides(config: &Configuration, options: &RunOptions) -> Result<Configuration> {
    let mut config = config.clone();
    if let Some(stages) = &options.stages {
        config.merge(COMMAND_LINE_ORIGIN, json!({ "stages": stages }))?;
    }
    Ok(config)
}

/// Load the resume plan of a prior job of the same use case
pub fn resume_plan(logger: &JobLogger, settings: &RunSettings, job_id: JobId) -> Result<ResumePlan> {
    let job = logger
        .job(job_id)?
        .ok_or_else(|| QcError::other(format!("Job {} not found in the job log", job_id)))?;
    if job.use_case != settings.use_case.name {
        return Err(QcError::other(format!(
            "Job {} belongs to use case '{}', not '{}'",
            job_id, job.use_case, settings.use_case.name
        )));
    }
    let plan = logger.resume_plan(job_id)?;
    if plan.is_empty() {
        return Err(QcError::other(format!(
            "Job {} has no unsuccessful stage to resume",
            job_id
        )));
    }
    let rerun: Vec<&str> = plan.rerun.iter().map(|s| s.tag()).collect();
    info!(job_id, rerun = %rerun.join(","), "resuming prior job");
    Ok(plan)
}

/// Run the QC pipeline for a loaded configuration
pub async fn run_command(
    config: &Configuration,
    fragments: &[Fragment],
    options: &RunOptions,
) -> Result<RunReport> {
    let config = apply_overrides(config, options)?;
    let settings = validate(&config)?;
    let logger = open_logger(&settings.paths.log_db)?;

    let plan = match options.resume {
        Some(job_id) => Some(resume_plan(&logger, &settings, job_id)?),
        None => None,
    };

    let transport = match &settings.catalog {
        Some(catalog) => Some(
            HttpCatalogTransport::new(catalog)
                .map_err(|err| QcError::other(format!("Cannot set up catalog client: {}", err)))?,
        ),
        None => None,
    };

    if let Err(err) = store_merged(fragments, &settings.paths.working_dir) {
        warn!(error = %err, "cannot store the merged configuration");
    }

    let registry = processors::registry()?;
    PipelineController::new(registry, &config, &logger)
        .with_transport(transport.as_ref().map(|t| t as &dyn CatalogTransport))
        .with_resume(plan)
        .run()
        .await
}

/// Listing of every registered processor
pub fn list_processors(registry: &ProcessorRegistry) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<32} {:<10} {:<11} {}",
        "STAGE", "PLATFORM", "GROUP", "PRODUCT"
    );
    for descriptor in registry.descriptors() {
        let _ = writeln!(out, "{}", descriptor);
    }
    let _ = writeln!(out, "{} processor(s) registered", registry.len());
    out
}
