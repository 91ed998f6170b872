// Stage outcomes
use super::core::StageReport;
use super::stage::{DependencyKind, Platform, Stage};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Quality indicators produced by a stage, in insertion order
pub type Indicators = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    SoftFailure,
    HardFailure,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::SoftFailure => "soft_failure",
            StageStatus::HardFailure => "hard_failure",
            StageStatus::Skipped => "skipped",
        }
    }

    /// Rank used to aggregate a slot: the higher, the worse
    pub fn severity(&self) -> u8 {
        match self {
            StageStatus::Success => 0,
            StageStatus::Skipped => 1,
            StageStatus::SoftFailure => 2,
            StageStatus::HardFailure => 3,
        }
    }

    /// Worst status of a set, `None` when empty
    pub fn worst<I>(statuses: I) -> Option<StageStatus>
    where
        I: IntoIterator<Item = StageStatus>,
    {
        statuses.into_iter().max_by_key(StageStatus::severity)
    }

    /// Whether a predecessor ending with this status lets a dependent run
    pub fn satisfies(&self, kind: DependencyKind) -> bool {
        match kind {
            DependencyKind::Strict => *self == StageStatus::Success,
            DependencyKind::Optional => {
                !matches!(self, StageStatus::HardFailure | StageStatus::Skipped)
            }
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(StageStatus::Success),
            "soft_failure" => Ok(StageStatus::SoftFailure),
            "hard_failure" => Ok(StageStatus::HardFailure),
            "skipped" => Ok(StageStatus::Skipped),
            other => Err(format!("unknown stage status '{}'", other)),
        }
    }
}

/// Outcome of one stage. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    stage: Stage,
    platform: Platform,
    status: StageStatus,
    indicators: Indicators,
    diagnostic: Option<String>,
    artifacts: Vec<PathBuf>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(
        stage: Stage,
        platform: Platform,
        status: StageStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage,
            platform,
            status,
            indicators: Indicators::new(),
            diagnostic: None,
            artifacts: Vec::new(),
            started_at,
            finished_at,
        }
    }

    /// Successful outcome carrying a processor report
    pub fn from_report(
        stage: Stage,
        platform: Platform,
        report: StageReport,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage,
            platform,
            status: StageStatus::Success,
            indicators: report.indicators,
            diagnostic: report.diagnostic,
            artifacts: report.artifacts,
            started_at,
            finished_at,
        }
    }

    /// A stage that was never invoked
    pub fn skipped(
        stage: Stage,
        platform: Platform,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(stage, platform, StageStatus::Skipped, at, at).with_diagnostic(reason)
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    pub fn with_indicator(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.indicators.insert(name.into(), value.into());
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn indicators(&self) -> &Indicators {
        &self.indicators
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}
