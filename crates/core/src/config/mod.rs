// Configuration: layered tree, validation and typed run settings
mod settings;
mod tree;
mod validate;

pub use settings::{
    CatalogSettings, ExecutionSettings, PathSettings, RunSettings, UseCase,
    DEFAULT_CATALOG_TIMEOUT, DEFAULT_STAGE_TIMEOUT,
};
pub use tree::Configuration;
pub use validate::{enabled_or_all, validate};
