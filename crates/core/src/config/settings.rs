// Typed view of a validated configuration
use crate::catalog::DispatchPolicy;
use crate::pipeline::{Platform, ProductType, Stage, SubStageOrder};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default time budget of a single stage (six hours)
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(21_600);

/// Default timeout of one catalog request
pub const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_secs(60);

/// Identity of the product under evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UseCase {
    pub name: String,
    pub product_type: ProductType,
    pub product_id: String,
    pub aoi: String,
    pub acquisition_date: NaiveDate,
    pub parent_identifier: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathSettings {
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_db: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSettings {
    pub stage_timeout: Duration,
    pub stage_timeouts: HashMap<Stage, Duration>,
}

impl ExecutionSettings {
    /// Time budget of a stage, honouring per-stage overrides
    pub fn timeout_for(&self, stage: Stage) -> Duration {
        self.stage_timeouts
            .get(&stage)
            .copied()
            .unwrap_or(self.stage_timeout)
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            stage_timeouts: HashMap::new(),
        }
    }
}

/// Remote catalog endpoint and its credentials
#[derive(Clone, PartialEq)]
pub struct CatalogSettings {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for CatalogSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogSettings")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Everything a run needs, resolved from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub use_case: UseCase,
    /// Platform image-product stages resolve with
    pub platform: Platform,
    /// Enabled stages; `None` enables every stage of the product type
    pub enabled_stages: Option<Vec<Stage>>,
    pub sub_stage_order: SubStageOrder,
    pub paths: PathSettings,
    pub execution: ExecutionSettings,
    pub dispatch: DispatchPolicy,
    pub catalog: Option<CatalogSettings>,
}
