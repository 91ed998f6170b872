// Processor registration for the built-in stages
use super::tool::ToolProcessor;
use qcmms_core::error::RegistrationError;
use qcmms_core::pipeline::{Platform, ProcessorRegistry, ProductType, Stage};
use std::sync::OnceLock;

static REGISTRY: OnceLock<ProcessorRegistry> = OnceLock::new();

/// Register the tool processor for every image stage on each sensor and
/// every land stage on the agnostic platform
pub fn register_processors(registry: &mut ProcessorRegistry) -> Result<(), RegistrationError> {
    for stage in Stage::ALL {
        let platforms: &[Platform] = match stage.product_type() {
            ProductType::Image => &[Platform::Sentinel2, Platform::Landsat8],
            ProductType::Land => &[Platform::Agnostic],
        };
        for &platform in platforms {
            registry.register(stage, platform, move || {
                Box::new(ToolProcessor::new(stage, platform))
            })?;
        }
    }
    Ok(())
}

/// Process-wide registry, built on first use
pub fn registry() -> Result<&'static ProcessorRegistry, RegistrationError> {
    if let Some(registry) = REGISTRY.get() {
        return Ok(registry);
    }
    let mut registry = ProcessorRegistry::new();
    register_processors(&mut registry)?;
    Ok(REGISTRY.get_or_init(|| registry))
}
