// Schedule builder: fixed precedence filtered by the enabled set
use super::registry::{ProcessorRegistry, RegisteredProcessor};
use super::stage::{DependencyKind, Platform, ProductType, Stage, StageGroup};
use crate::error::{ConfigError, UnknownProcessorError};

/// Execution order of the stages sharing a multi-stage slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubStageOrder {
    detailed_control: Vec<Stage>,
    validation_control: Vec<Stage>,
}

impl SubStageOrder {
    /// Stages of a group in their configured order
    pub fn for_group(&self, group: StageGroup) -> Vec<Stage> {
        match group {
            StageGroup::DetailedControl => self.detailed_control.clone(),
            StageGroup::Validation => self.validation_control.clone(),
            other => other.stages().collect(),
        }
    }

    /// Override the order of a multi-stage group.
    ///
    /// The caller guarantees `stages` is a permutation of the group.
    pub fn set(&mut self, group: StageGroup, stages: Vec<Stage>) {
        match group {
            StageGroup::DetailedControl => self.detailed_control = stages,
            StageGroup::Validation => self.validation_control = stages,
            _ => {}
        }
    }
}

impl Default for SubStageOrder {
    fn default() -> Self {
        Self {
            detailed_control: StageGroup::DetailedControl.stages().collect(),
            validation_control: StageGroup::Validation.stages().collect(),
        }
    }
}

/// Ordered list of the stages a run executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    product_type: ProductType,
    stages: Vec<Stage>,
}

impl Schedule {
    pub fn product_type(&self) -> ProductType {
        self.product_type
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Resolve every scheduled stage against the registry.
    ///
    /// Fails on the first stage without a processor, before anything runs.
    pub fn resolve<'r>(
        &self,
        registry: &'r ProcessorRegistry,
        primary: Platform,
    ) -> Result<Vec<&'r RegisteredProcessor>, UnknownProcessorError> {
        self.stages
            .iter()
            .map(|stage| registry.resolve(*stage, stage.resolution_platform(primary)))
            .collect()
    }
}

/// Builder computing a deterministic schedule
pub struct ScheduleBuilder {
    product_type: ProductType,
    order: SubStageOrder,
    enabled: Option<Vec<Stage>>,
}

impl ScheduleBuilder {
    /// Create a builder enabling every stage of the product type
    pub fn new(product_type: ProductType) -> Self {
        Self {
            product_type,
            order: SubStageOrder::default(),
            enabled: None,
        }
    }

    /// Set the sub-stage order of multi-stage slots
    pub fn with_order(mut self, order: SubStageOrder) -> Self {
        self.order = order;
        self
    }

    /// Restrict the schedule to the given stages
    pub fn enable<I>(mut self, stages: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Stage>,
    {
        let mut enabled = Vec::new();
        for stage in stages {
            if stage.product_type() != self.product_type {
                return Err(ConfigError::invalid(format!(
                    "Stage '{}' does not apply to {} products",
                    stage, self.product_type
                )));
            }
            if !enabled.contains(&stage) {
                enabled.push(stage);
            }
        }
        self.enabled = Some(enabled);
        Ok(self)
    }

    /// Build the schedule
    pub fn build(self) -> Result<Schedule, ConfigError> {
        let precedence: Vec<Stage> = self
            .product_type
            .groups()
            .iter()
            .flat_map(|group| self.order.for_group(*group))
            .collect();

        let stages: Vec<Stage> = match &self.enabled {
            Some(enabled) => precedence
                .into_iter()
                .filter(|stage| enabled.contains(stage))
                .collect(),
            None => precedence,
        };

        for (position, stage) in stages.iter().enumerate() {
            for dependency in stage.dependencies() {
                if stages[position..].contains(&dependency.stage) {
                    let kind = match dependency.kind {
                        DependencyKind::Strict => "dependency",
                        DependencyKind::Optional => "optional dependency",
                    };
                    return Err(ConfigError::invalid(format!(
                        "Stage '{}' would run before its {} '{}'",
                        stage, kind, dependency.stage
                    )));
                }
            }
        }

        Ok(Schedule {
            product_type: self.product_type,
            stages,
        })
    }
}
