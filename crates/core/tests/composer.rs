// Unit tests for ResponseComposer
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use qcmms_core::config::UseCase;
use qcmms_core::pipeline::{Platform, ProductType, Stage, StageGroup, StageResult, StageStatus};
use qcmms_core::response::{
    QiDocument, ResponseComposer, SlotStatus, MEASUREMENT_PREFIX, SCHEMA_VERSION,
};
use serde_json::Value;

fn use_case(product_type: ProductType) -> UseCase {
    UseCase {
        name: "uc1".to_string(),
        product_type,
        product_id: "S2A_MSIL1C_20240501T100031".to_string(),
        aoi: "POLYGON((0 0,1 0,1 1,0 0))".to_string(),
        acquisition_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        parent_identifier: "EOP:QCMMS:uc1".to_string(),
    }
}

fn result(stage: Stage, status: StageStatus) -> StageResult {
    let start = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
    StageResult::new(stage, Platform::Sentinel2, status, start, start + Duration::seconds(5))
}

fn indicators(document: &Value) -> &Vec<Value> {
    document["properties"]["productInformation"]["qualityInformation"]["qualityIndicators"]
        .as_array()
        .unwrap()
}

#[test]
fn test_image_document_always_has_six_slots() {
    let composer = ResponseComposer::new();
    let document = QiDocument::new(1, use_case(ProductType::Image), Platform::Sentinel2)
        .with_results([result(Stage::Search, StageStatus::Success)])
        .seal();

    let payload = composer.compose(&document).unwrap();
    let value: Value = serde_json::from_str(payload.as_str()).unwrap();
    let slots = indicators(&value);

    let tags: Vec<&str> = slots.iter().map(|s| s["slot"].as_str().unwrap()).collect();
    assert_eq!(tags, vec!["1", "2", "3A", "3B", "4A", "4B"]);
    assert_eq!(value["properties"]["schema"], SCHEMA_VERSION);
    assert_eq!(
        slots[0]["isMeasurementOf"],
        format!("{}feasibilityControlMetric", MEASUREMENT_PREFIX)
    );
    assert_eq!(slots[0]["evaluated"], true);
    assert_eq!(slots[0]["value"], true);
    assert_eq!(slots[1]["evaluated"], false);
    assert_eq!(slots[1]["status"], "not_evaluated");
}

#[test]
fn test_land_document_slots() {
    let document = QiDocument::new(2, use_case(ProductType::Land), Platform::Agnostic);
    let groups: Vec<StageGroup> = document.slots().iter().map(|s| s.group()).collect();
    assert_eq!(
        groups,
        vec![StageGroup::LandInit, StageGroup::Interpretation, StageGroup::Validation]
    );
}

#[test]
fn test_skipped_stage_never_reads_as_success() {
    let composer = ResponseComposer::new();
    let document = QiDocument::new(3, use_case(ProductType::Image), Platform::Sentinel2)
        .with_results([
            result(Stage::Search, StageStatus::Success),
            result(Stage::Download, StageStatus::HardFailure),
            result(Stage::OrdinaryControl, StageStatus::Skipped),
        ])
        .seal();

    assert_eq!(
        document.slot(StageGroup::OrdinaryControl).unwrap().status(),
        SlotStatus::Skipped
    );

    let value: Value = serde_json::from_str(composer.compose(&document).unwrap().as_str()).unwrap();
    let slots = indicators(&value);
    assert_eq!(slots[1]["status"], "hard_failure");
    assert_eq!(slots[1]["value"], false);
    assert_eq!(slots[2]["status"], "skipped");
    assert_eq!(slots[2]["evaluated"], false);
    assert_eq!(slots[2]["value"], false);
}

#[test]
fn test_slot_status_is_worst_of_sub_stages() {
    let document = QiDocument::new(4, use_case(ProductType::Image), Platform::Sentinel2)
        .with_results([
            result(Stage::CloudCoverage, StageStatus::SoftFailure),
            result(Stage::ValidPixels, StageStatus::Success),
            result(Stage::GeometryQuality, StageStatus::Skipped),
        ]);

    let slot = document.slot(StageGroup::DetailedControl).unwrap();
    assert_eq!(slot.status(), SlotStatus::Evaluated(StageStatus::SoftFailure));
    // Filed in stage order regardless of arrival order
    let stages: Vec<Stage> = slot.results().iter().map(|r| r.stage()).collect();
    assert_eq!(
        stages,
        vec![Stage::ValidPixels, Stage::CloudCoverage, Stage::GeometryQuality]
    );
}

#[test]
fn test_compose_is_idempotent() {
    let composer = ResponseComposer::new();
    let document = QiDocument::new(5, use_case(ProductType::Image), Platform::Landsat8)
        .with_results([result(Stage::Search, StageStatus::Success).with_indicator("cloud", 12.5)])
        .seal();

    let first = composer.compose(&document).unwrap();
    let second = composer.compose(&document.clone()).unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[test]
fn test_validation_collects_every_violation() {
    let composer = ResponseComposer::new();
    let mut identity = use_case(ProductType::Image);
    identity.product_id = String::new();
    identity.aoi = "  ".to_string();

    let start = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
    let backwards = StageResult::new(
        Stage::Download,
        Platform::Sentinel2,
        StageStatus::Success,
        start,
        start - Duration::seconds(1),
    );
    let document = QiDocument::new(6, identity, Platform::Sentinel2)
        .with_results([
            backwards,
            result(Stage::Search, StageStatus::Success).with_indicator("", 1),
            result(Stage::OrdinaryControl, StageStatus::Skipped).with_indicator("x", 1),
            result(Stage::LpInit, StageStatus::Success),
        ])
        .seal();

    let err = composer.compose(&document).unwrap_err();
    let mentions = |needle: &str| err.violations.iter().any(|v| v.contains(needle));
    assert!(mentions("product id"));
    assert!(mentions("area of interest"));
    assert!(mentions("ends before it starts"));
    assert!(mentions("without a name"));
    assert!(mentions("skipped stage 'ordinary_control'"));
    assert!(mentions("lp_init"));
    assert_eq!(err.violations.len(), 6);
}

#[test]
fn test_save_writes_job_scoped_path() {
    let dir = tempfile::tempdir().unwrap();
    let composer = ResponseComposer::new();
    let document = QiDocument::new(42, use_case(ProductType::Image), Platform::Sentinel2).seal();
    let payload = composer.compose(&document).unwrap();

    let path = composer.save(&payload, &document, dir.path()).unwrap();
    assert!(path.ends_with("00042/S2A_MSIL1C_20240501T100031.json"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), payload.as_str());
}

#[test]
fn test_partial_save_is_replaced_by_final_payload() {
    let dir = tempfile::tempdir().unwrap();
    let composer = ResponseComposer::new();
    let mut document = QiDocument::new(43, use_case(ProductType::Image), Platform::Sentinel2);
    document.record(result(Stage::Search, StageStatus::Success).with_indicator("", 1));

    let partial = composer.save_partial(&document, dir.path()).unwrap();
    assert!(partial.ends_with("00043/S2A_MSIL1C_20240501T100031.json"));
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&partial).unwrap()).unwrap();
    assert_eq!(indicators(&saved)[0]["stages"][0]["stage"], "search");
    assert!(composer.validate(&document).is_err());

    let mut document = QiDocument::new(43, use_case(ProductType::Image), Platform::Sentinel2);
    document.record(result(Stage::Search, StageStatus::Success));
    let document = document.seal();
    let payload = composer.compose(&document).unwrap();
    let last = composer.save(&payload, &document, dir.path()).unwrap();
    assert_eq!(last, partial);
    assert_eq!(std::fs::read_to_string(&last).unwrap(), payload.as_str());
}
