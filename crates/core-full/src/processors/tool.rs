// External tool processor
use async_trait::async_trait;
use indexmap::IndexMap;
use qcmms_core::error::ProcessorError;
use qcmms_core::pipeline::{Platform, Processor, Stage, StageInput, StageReport};
use serde::Deserialize;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// How a failing tool is classified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureSeverity {
    Soft,
    #[default]
    Hard,
}

impl FailureSeverity {
    fn error(self, msg: impl Into<String>) -> ProcessorError {
        match self {
            FailureSeverity::Soft => ProcessorError::soft(msg),
            FailureSeverity::Hard => ProcessorError::hard(msg),
        }
    }
}

/// Command given either as one whitespace-separated string or as an argv list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Argv(Vec<String>),
}

impl CommandLine {
    fn words(&self) -> Vec<String> {
        match self {
            CommandLine::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandLine::Argv(argv) => argv.clone(),
        }
    }
}

/// Options of a tool stage, read from its configuration slice
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolOptions {
    pub command: Option<CommandLine>,
    pub args: Vec<String>,
    /// Report file, relative to the working directory
    pub report: Option<String>,
    pub on_failure: FailureSeverity,
    /// Static indicators reported when no command is configured
    pub indicators: IndexMap<String, Value>,
    pub env: IndexMap<String, String>,
}

impl ToolOptions {
    pub fn from_value(options: &Value) -> Result<Self, ProcessorError> {
        if options.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(options.clone())
            .map_err(|err| ProcessorError::hard(format!("invalid tool options: {}", err)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReportStatus {
    Ok,
    SoftFailure,
    HardFailure,
}

/// Report file written by a tool
#[derive(Debug, Deserialize)]
struct ToolReport {
    status: ReportStatus,
    #[serde(default)]
    indicators: IndexMap<String, Value>,
    #[serde(default)]
    artifacts: Vec<PathBuf>,
    #[serde(default)]
    message: Option<String>,
}

/// Runs an external command for one stage and reads back its report.
///
/// Without a `command` option the stage reports its static `indicators`.
#[derive(Debug, Clone, Copy)]
pub struct ToolProcessor {
    stage: Stage,
    platform: Platform,
}

impl ToolProcessor {
    pub fn new(stage: Stage, platform: Platform) -> Self {
        Self { stage, platform }
    }

    /// Default report location, relative to the working directory
    pub fn default_report(stage: Stage) -> String {
        format!("qi/{}.json", stage.tag())
    }

    async fn run_tool(
        &self,
        input: &StageInput,
        options: &ToolOptions,
        command: &CommandLine,
    ) -> Result<StageReport, ProcessorError> {
        let argv: Vec<String> = command
            .words()
            .into_iter()
            .chain(options.args.iter().cloned())
            .map(|word| substitute(&word, input))
            .collect();
        let Some((program, args)) = argv.split_first() else {
            return Err(ProcessorError::hard("tool command is empty"));
        };

        let report_name = options
            .report
            .clone()
            .unwrap_or_else(|| Self::default_report(self.stage));
        let report_path = input.working_dir.join(substitute(&report_name, input));
        prepare_report(&report_path).await?;

        let artifacts = std::env::join_paths(input.prior_artifacts()).map_err(|err| {
            ProcessorError::infrastructure(format!("cannot pass prior artifacts: {}", err))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&input.working_dir)
            .env("QC_STAGE", self.stage.tag())
            .env("QC_PLATFORM", self.platform.as_str())
            .env("QC_WORKING_DIR", &input.working_dir)
            .env("QC_ARTIFACTS", artifacts)
            .envs(options.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(stage = %self.stage, platform = %self.platform, program = %program, "starting tool");
        let output = cmd.output().await.map_err(|err| {
            ProcessorError::infrastructure(format!("cannot start '{}': {}", program, err))
        })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(stage = %self.stage, "stdout: {}", line);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!(stage = %self.stage, "stderr: {}", line);
        }

        if !output.status.success() {
            let mut msg = format!("'{}' exited with {}", program, output.status);
            if let Some(last) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                msg.push_str(": ");
                msg.push_str(last.trim());
            }
            return Err(options.on_failure.error(msg));
        }

        let report = read_report(&report_path, options.on_failure).await?;
        report_outcome(report, &input.working_dir)
    }
}

#[async_trait]
impl Processor for ToolProcessor {
    fn name(&self) -> String {
        format!("tool:{}:{}", self.stage.tag(), self.platform.as_str())
    }

    async fn run(&self, input: StageInput) -> Result<StageReport, ProcessorError> {
        let options = ToolOptions::from_value(&input.options)?;
        match &options.command {
            Some(command) => self.run_tool(&input, &options, command).await,
            None => {
                debug!(stage = %self.stage, "no command configured, reporting static indicators");
                Ok(StageReport {
                    indicators: options.indicators,
                    ..StageReport::default()
                })
            }
        }
    }
}

/// Replace `{name}` placeholders with values of the invocation
fn substitute(template: &str, input: &StageInput) -> String {
    let acquisition_date = input.use_case.acquisition_date.format("%Y-%m-%d").to_string();
    let working_dir = input.working_dir.display().to_string();
    let job_id = input.job_id.to_string();
    [
        ("{working_dir}", working_dir.as_str()),
        ("{stage}", input.stage.tag()),
        ("{platform}", input.platform.as_str()),
        ("{product_id}", input.use_case.product_id.as_str()),
        ("{aoi}", input.use_case.aoi.as_str()),
        ("{acquisition_date}", acquisition_date.as_str()),
        ("{job_id}", job_id.as_str()),
    ]
    .iter()
    .fold(template.to_string(), |acc, (key, value)| acc.replace(key, value))
}

/// Drop a stale report and make sure its directory exists
async fn prepare_report(path: &Path) -> Result<(), ProcessorError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(ProcessorError::infrastructure(format!(
                "cannot remove stale report {}: {}",
                path.display(),
                err
            )));
        }
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|err| {
            ProcessorError::infrastructure(format!(
                "cannot create report directory {}: {}",
                parent.display(),
                err
            ))
        })?;
    }
    Ok(())
}

async fn read_report(path: &Path, severity: FailureSeverity) -> Result<ToolReport, ProcessorError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|err| {
        severity.error(format!("cannot read report {}: {}", path.display(), err))
    })?;
    serde_json::from_str(&text)
        .map_err(|err| severity.error(format!("malformed report {}: {}", path.display(), err)))
}

fn report_outcome(report: ToolReport, working_dir: &Path) -> Result<StageReport, ProcessorError> {
    match report.status {
        ReportStatus::Ok => Ok(StageReport {
            indicators: report.indicators,
            artifacts: report
                .artifacts
                .into_iter()
                .map(|path| working_dir.join(path))
                .collect(),
            diagnostic: report.message,
        }),
        ReportStatus::SoftFailure => Err(ProcessorError::soft(
            report.message.unwrap_or_else(|| "tool reported a soft failure".to_string()),
        )),
        ReportStatus::HardFailure => Err(ProcessorError::hard(
            report.message.unwrap_or_else(|| "tool reported a hard failure".to_string()),
        )),
    }
}
