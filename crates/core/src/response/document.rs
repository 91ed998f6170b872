// Quality-indicator document assembled during a run
use crate::config::UseCase;
use crate::joblog::JobId;
use crate::pipeline::{Platform, StageGroup, StageResult, StageStatus};
use std::ops::Deref;
use std::sync::Arc;

/// Version of the manager that produced a document
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Aggregated state of a document slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// No stage of the slot was scheduled
    NotEvaluated,
    /// Every stage of the slot was skipped
    Skipped,
    /// Worst status among the stages that ran
    Evaluated(StageStatus),
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::NotEvaluated => "not_evaluated",
            SlotStatus::Skipped => "skipped",
            SlotStatus::Evaluated(status) => status.as_str(),
        }
    }

    pub fn is_evaluated(&self) -> bool {
        matches!(self, SlotStatus::Evaluated(_))
    }

    /// Boolean QI value: true only when the slot passed
    pub fn value(&self) -> bool {
        matches!(self, SlotStatus::Evaluated(StageStatus::Success))
    }
}

/// One slot of the document with the results filed under it
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    group: StageGroup,
    results: Vec<StageResult>,
}

impl Slot {
    pub fn group(&self) -> StageGroup {
        self.group
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn status(&self) -> SlotStatus {
        if self.results.is_empty() {
            return SlotStatus::NotEvaluated;
        }
        if self
            .results
            .iter()
            .all(|r| r.status() == StageStatus::Skipped)
        {
            return SlotStatus::Skipped;
        }
        match StageStatus::worst(self.results.iter().map(StageResult::status)) {
            Some(status) => SlotStatus::Evaluated(status),
            None => SlotStatus::NotEvaluated,
        }
    }
}

/// Document built incrementally by the controller
#[derive(Debug, Clone, PartialEq)]
pub struct QiDocument {
    job_id: JobId,
    use_case: UseCase,
    platform: Platform,
    version: String,
    slots: Vec<Slot>,
    stray: Vec<StageResult>,
}

impl QiDocument {
    /// Empty document with every slot of the product's schema
    pub fn new(job_id: JobId, use_case: UseCase, platform: Platform) -> Self {
        let slots = use_case
            .product_type
            .groups()
            .iter()
            .map(|group| Slot {
                group: *group,
                results: Vec::new(),
            })
            .collect();
        Self {
            job_id,
            use_case,
            platform,
            version: PIPELINE_VERSION.to_string(),
            slots,
            stray: Vec::new(),
        }
    }

    /// File a result under its slot, keeping stage order within the slot.
    ///
    /// A result whose group has no slot in this schema is kept aside and
    /// reported by validation.
    pub fn record(&mut self, result: StageResult) {
        let group = result.stage().group();
        match self.slots.iter_mut().find(|slot| slot.group == group) {
            Some(slot) => {
                let position = slot
                    .results
                    .iter()
                    .position(|existing| existing.stage() > result.stage())
                    .unwrap_or(slot.results.len());
                slot.results.insert(position, result);
            }
            None => self.stray.push(result),
        }
    }

    pub fn with_results<I>(mut self, results: I) -> Self
    where
        I: IntoIterator<Item = StageResult>,
    {
        for result in results {
            self.record(result);
        }
        self
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn use_case(&self) -> &UseCase {
        &self.use_case
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, group: StageGroup) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.group == group)
    }

    /// Results that fit no slot of the product's schema
    pub fn stray_results(&self) -> &[StageResult] {
        &self.stray
    }

    pub fn results(&self) -> impl Iterator<Item = &StageResult> {
        self.slots.iter().flat_map(|slot| slot.results.iter())
    }

    /// Catalog dataset identifier of the product
    pub fn dataset_id(&self) -> String {
        self.use_case.product_id.clone()
    }

    pub fn seal(self) -> SealedDocument {
        SealedDocument(Arc::new(self))
    }
}

/// Immutable, cheaply clonable document ready for composition
#[derive(Debug, Clone, PartialEq)]
pub struct SealedDocument(Arc<QiDocument>);

impl Deref for SealedDocument {
    type Target = QiDocument;

    fn deref(&self) -> &QiDocument {
        &self.0
    }
}
