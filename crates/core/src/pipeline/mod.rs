// Pipeline module - stage model, registry, scheduling and the controller
// Process spawning and HTTP live in core-full

pub mod controller;
pub mod core;
pub mod registry;
pub mod result;
pub mod scheduler;
pub mod stage;
pub mod state;

// Re-export core types
pub use controller::*;
pub use self::core::*;
pub use registry::*;
pub use result::*;
pub use scheduler::*;
pub use stage::*;
pub use state::*;
