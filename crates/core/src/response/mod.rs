// Response: QI document model and its composer
mod composer;
mod document;

pub use composer::{job_dir, Payload, ResponseComposer, MEASUREMENT_PREFIX, SCHEMA_VERSION};
pub use document::{QiDocument, SealedDocument, Slot, SlotStatus, PIPELINE_VERSION};
