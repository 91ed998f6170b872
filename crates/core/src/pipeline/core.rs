// Processor contract - pure logic framework
use super::registry::{ProcessorDescriptor, RegisteredProcessor};
use super::result::Indicators;
use super::stage::{Platform, Stage};
use crate::config::{Configuration, RunSettings, UseCase};
use crate::error::ProcessorError;
use crate::joblog::JobId;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Artifacts published by completed stages, in execution order
pub type ArtifactMap = IndexMap<Stage, Vec<PathBuf>>;

/// Everything a processor receives for one invocation
#[derive(Debug, Clone)]
pub struct StageInput {
    pub job_id: JobId,
    pub stage: Stage,
    pub platform: Platform,
    /// Configuration slice of the stage, platform overrides applied
    pub options: Value,
    pub artifacts: ArtifactMap,
    pub working_dir: PathBuf,
    pub use_case: UseCase,
}

impl StageInput {
    /// Artifacts of every prior stage, flattened
    pub fn prior_artifacts(&self) -> impl Iterator<Item = &PathBuf> {
        self.artifacts.values().flatten()
    }
}

/// What a processor returns when the control passed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub indicators: Indicators,
    pub artifacts: Vec<PathBuf>,
    pub diagnostic: Option<String>,
}

impl StageReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indicator(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.indicators.insert(name.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

/// Stage processor trait
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> String;

    async fn run(&self, input: StageInput) -> Result<StageReport, ProcessorError>;
}

/// A processor bound to one run's configuration slice
pub struct ProcessorInstance {
    descriptor: ProcessorDescriptor,
    processor: Box<dyn Processor>,
    options: Value,
    timeout: Duration,
}

impl ProcessorInstance {
    /// Bind a registered processor to a run
    pub fn bind(
        registered: &RegisteredProcessor,
        config: &Configuration,
        settings: &RunSettings,
    ) -> Self {
        let descriptor = registered.descriptor().clone();
        let options = stage_options(config, descriptor.stage, descriptor.platform);
        let timeout = settings.execution.timeout_for(descriptor.stage);
        Self {
            processor: registered.create(),
            descriptor,
            options,
            timeout,
        }
    }

    pub fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    pub fn stage(&self) -> Stage {
        self.descriptor.stage
    }

    pub fn platform(&self) -> Platform {
        self.descriptor.platform
    }

    pub fn options(&self) -> &Value {
        &self.options
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }
}

/// `stage_options.<stage>` overlaid with its `<platform>` sub-mapping,
/// plus `credentials.<stage>` under the `credentials` key.
pub fn stage_options(config: &Configuration, stage: Stage, platform: Platform) -> Value {
    let mut options = match config.lookup(&format!("stage_options.{}", stage.tag())) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    for other in Platform::ALL {
        let Some(overlay) = options.remove(other.as_str()) else {
            continue;
        };
        if other != platform {
            continue;
        }
        if let Value::Object(overlay) = overlay {
            for (key, value) in overlay {
                options.insert(key, value);
            }
        }
    }

    if let Some(credentials) = config.lookup(&format!("credentials.{}", stage.tag())) {
        options.insert("credentials".to_string(), credentials.clone());
    }
    Value::Object(options)
}
