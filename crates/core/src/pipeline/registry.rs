// Processor registry keyed by (stage, platform)
use super::core::Processor;
use super::stage::{Dependency, Platform, ProductType, Stage};
use crate::error::{RegistrationError, UnknownProcessorError};
use std::collections::HashMap;
use std::fmt;

/// Factory function type for creating stage processors
pub type ProcessorFactory = Box<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

/// Static description of a registered processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorDescriptor {
    pub stage: Stage,
    pub platform: Platform,
    pub product_type: ProductType,
    pub dependencies: &'static [Dependency],
}

impl ProcessorDescriptor {
    fn new(stage: Stage, platform: Platform) -> Self {
        Self {
            stage,
            platform,
            product_type: stage.product_type(),
            dependencies: stage.dependencies(),
        }
    }
}

impl fmt::Display for ProcessorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<32} {:<10} group {:<5} {}",
            self.stage.tag(),
            self.platform.as_str(),
            self.stage.group().tag(),
            self.product_type
        )
    }
}

/// A descriptor together with the factory building its processor
pub struct RegisteredProcessor {
    descriptor: ProcessorDescriptor,
    factory: ProcessorFactory,
}

impl RegisteredProcessor {
    pub fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    /// Create a fresh processor instance
    pub fn create(&self) -> Box<dyn Processor> {
        (self.factory)()
    }
}

impl fmt::Debug for RegisteredProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProcessor")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Registry for stage processors
pub struct ProcessorRegistry {
    processors: HashMap<(Stage, Platform), RegisteredProcessor>,
}

impl ProcessorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Register a processor factory for a (stage, platform) pair
    pub fn register<F>(
        &mut self,
        stage: Stage,
        platform: Platform,
        factory: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        if self.processors.contains_key(&(stage, platform)) {
            return Err(RegistrationError { stage, platform });
        }
        self.processors.insert(
            (stage, platform),
            RegisteredProcessor {
                descriptor: ProcessorDescriptor::new(stage, platform),
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    /// Look up the processor registered for a pair
    pub fn resolve(
        &self,
        stage: Stage,
        platform: Platform,
    ) -> Result<&RegisteredProcessor, UnknownProcessorError> {
        self.processors
            .get(&(stage, platform))
            .ok_or(UnknownProcessorError { stage, platform })
    }

    /// All descriptors, sorted by stage order then platform
    pub fn descriptors(&self) -> Vec<&ProcessorDescriptor> {
        let mut descriptors: Vec<&ProcessorDescriptor> = self
            .processors
            .values()
            .map(RegisteredProcessor::descriptor)
            .collect();
        descriptors.sort_by_key(|d| (d.stage, d.platform));
        descriptors
    }

    /// Get the number of registered processors
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
