// Document validation and serialisation
use super::document::{QiDocument, SealedDocument, Slot};
use crate::error::SchemaValidationError;
use crate::joblog::JobId;
use crate::pipeline::{StageResult, StageStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Version tag of the serialised document
pub const SCHEMA_VERSION: &str = "qcmms-qi/2.0";

/// Vocabulary prefix of slot measurement names
pub const MEASUREMENT_PREFIX: &str = "http://qcmms.esa.int/quality-indicators/#";

/// Directory under `dir` holding the outputs of one job
pub fn job_dir(dir: &Path, job_id: JobId) -> PathBuf {
    dir.join(format!("{:05}", job_id))
}

/// Serialised document, ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    body: String,
}

impl Payload {
    pub fn as_str(&self) -> &str {
        &self.body
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.body.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Validates sealed documents and turns them into payloads
#[derive(Debug, Clone, Default)]
pub struct ResponseComposer;

impl ResponseComposer {
    pub fn new() -> Self {
        Self
    }

    /// Check every schema constraint and report all violations at once
    pub fn validate(&self, document: &QiDocument) -> Result<(), SchemaValidationError> {
        let mut violations = Vec::new();
        let use_case = document.use_case();

        if use_case.product_id.trim().is_empty() {
            violations.push("product id is empty".to_string());
        }
        if use_case.name.trim().is_empty() {
            violations.push("use case name is empty".to_string());
        }
        if use_case.aoi.trim().is_empty() {
            violations.push("area of interest is empty".to_string());
        }

        let expected = use_case.product_type.groups();
        let actual: Vec<_> = document.slots().iter().map(Slot::group).collect();
        if actual != expected {
            let tags = |groups: &[crate::pipeline::StageGroup]| {
                groups.iter().map(|g| g.tag()).collect::<Vec<_>>().join(",")
            };
            violations.push(format!(
                "slots [{}] do not match the {} schema [{}]",
                tags(actual.as_slice()),
                use_case.product_type,
                tags(expected)
            ));
        }

        for result in document.stray_results() {
            violations.push(format!(
                "stage '{}' belongs to slot {} of {} products, not to this {} document",
                result.stage(),
                result.stage().group(),
                result.stage().product_type(),
                use_case.product_type
            ));
        }

        for slot in document.slots() {
            for result in slot.results() {
                check_result(slot, result, &mut violations);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaValidationError::new(violations))
        }
    }

    /// JSON form of a document, without validation
    pub fn render(&self, document: &QiDocument) -> Value {
        let use_case = document.use_case();
        let lineage = format!("http://qcmms.esa.int/QCMMS_QCManager_v{}", document.version());
        let indicators: Vec<Value> = document
            .slots()
            .iter()
            .map(|slot| render_slot(slot, &lineage))
            .collect();

        json!({
            "type": "Feature",
            "id": document.dataset_id(),
            "geometry": Value::Null,
            "properties": {
                "schema": SCHEMA_VERSION,
                "identifier": document.dataset_id(),
                "parentIdentifier": use_case.parent_identifier,
                "jobId": document.job_id(),
                "useCase": use_case.name,
                "productType": use_case.product_type.as_str(),
                "platform": document.platform().as_str(),
                "areaOfInterest": use_case.aoi,
                "acquisitionDate": use_case.acquisition_date.format("%Y-%m-%d").to_string(),
                "pipelineVersion": document.version(),
                "productInformation": {
                    "productId": use_case.product_id,
                    "qualityInformation": {
                        "qualityIndicators": indicators
                    }
                }
            }
        })
    }

    /// Validate then serialise a sealed document
    pub fn compose(&self, document: &SealedDocument) -> Result<Payload, SchemaValidationError> {
        self.validate(document)?;
        let mut body = serde_json::to_string_pretty(&self.render(document))
            .map_err(|err| SchemaValidationError::new(vec![err.to_string()]))?;
        body.push('\n');
        Ok(Payload { body })
    }

    /// Path a payload is persisted at under `dir`
    pub fn payload_path(&self, document: &QiDocument, dir: &Path) -> PathBuf {
        job_dir(dir, document.job_id()).join(format!("{}.json", document.use_case().product_id))
    }

    /// Persist a payload for later resubmission
    pub fn save(&self, payload: &Payload, document: &QiDocument, dir: &Path) -> io::Result<PathBuf> {
        write_at(&self.payload_path(document, dir), payload.as_bytes())
    }

    /// Persist a document that is still being filled, skipping validation
    pub fn save_partial(&self, document: &QiDocument, dir: &Path) -> io::Result<PathBuf> {
        let mut body = serde_json::to_string_pretty(&self.render(document))?;
        body.push('\n');
        write_at(&self.payload_path(document, dir), body.as_bytes())
    }
}

fn write_at(path: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(path.to_path_buf())
}

fn check_result(slot: &Slot, result: &StageResult, violations: &mut Vec<String>) {
    let stage = result.stage();
    if stage.group() != slot.group() {
        violations.push(format!(
            "stage '{}' filed under slot {} instead of {}",
            stage,
            slot.group(),
            stage.group()
        ));
    }
    if result.finished_at() < result.started_at() {
        violations.push(format!("stage '{}' ends before it starts", stage));
    }
    if result.indicators().keys().any(|name| name.trim().is_empty()) {
        violations.push(format!("stage '{}' has an indicator without a name", stage));
    }
    if result.status() == StageStatus::Skipped && !result.indicators().is_empty() {
        violations.push(format!("skipped stage '{}' carries indicators", stage));
    }
}

fn render_slot(slot: &Slot, lineage: &str) -> Value {
    let status = slot.status();
    let group = slot.group();
    let mut entry = Map::new();
    entry.insert("slot".into(), json!(group.tag()));
    entry.insert(
        "isMeasurementOf".into(),
        json!(format!("{}{}", MEASUREMENT_PREFIX, group.measurement())),
    );
    entry.insert("evaluated".into(), json!(status.is_evaluated()));
    entry.insert("status".into(), json!(status.as_str()));
    entry.insert("value".into(), json!(status.value()));
    if let Some(generated) = slot.results().iter().map(StageResult::finished_at).max() {
        entry.insert("generatedAtTime".into(), json!(timestamp(generated)));
    }
    entry.insert("lineage".into(), json!(lineage));
    entry.insert(
        "stages".into(),
        Value::Array(slot.results().iter().map(render_result).collect()),
    );
    Value::Object(entry)
}

fn render_result(result: &StageResult) -> Value {
    let mut entry = Map::new();
    entry.insert("stage".into(), json!(result.stage().tag()));
    entry.insert("platform".into(), json!(result.platform().as_str()));
    entry.insert("status".into(), json!(result.status().as_str()));
    entry.insert("value".into(), json!(result.status() == StageStatus::Success));
    entry.insert("startedAt".into(), json!(timestamp(result.started_at())));
    entry.insert("finishedAt".into(), json!(timestamp(result.finished_at())));
    if let Some(diagnostic) = result.diagnostic() {
        entry.insert("diagnostic".into(), json!(diagnostic));
    }
    if !result.indicators().is_empty() {
        let indicators: Map<String, Value> = result
            .indicators()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entry.insert("indicators".into(), Value::Object(indicators));
    }
    if !result.artifacts().is_empty() {
        let artifacts: Vec<Value> = result
            .artifacts()
            .iter()
            .map(|path| json!(path.to_string_lossy()))
            .collect();
        entry.insert("artifacts".into(), Value::Array(artifacts));
    }
    Value::Object(entry)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
