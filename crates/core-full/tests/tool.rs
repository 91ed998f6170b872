// External tool processor against small shell scripts
#![cfg(unix)]

use chrono::NaiveDate;
use qcmms_core::config::UseCase;
use qcmms_core::error::ProcessorError;
use qcmms_core::pipeline::{
    ArtifactMap, Platform, Processor, ProductType, Stage, StageInput,
};
use qcmms_core_full::processors::ToolProcessor;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn input(dir: &TempDir, stage: Stage, options: Value) -> StageInput {
    StageInput {
        job_id: 7,
        stage,
        platform: Platform::Sentinel2,
        options,
        artifacts: ArtifactMap::new(),
        working_dir: dir.path().to_path_buf(),
        use_case: UseCase {
            name: "uc-garda".to_string(),
            product_type: ProductType::Image,
            product_id: "S2A_MSIL1C_20240501".to_string(),
            aoi: "POLYGON((0 0,1 0,1 1,0 0))".to_string(),
            acquisition_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            parent_identifier: "EOP:QCMMS:uc-garda".to_string(),
        },
    }
}

fn shell(script: &str) -> Value {
    json!(["sh", "-c", script])
}

#[tokio::test]
async fn test_report_becomes_stage_report() {
    let dir = TempDir::new().unwrap();
    let script = r#"mkdir -p out && echo mask > out/mask.txt && printf '{"status":"ok","indicators":{"valid_ratio":0.93},"artifacts":["out/mask.txt"],"message":"checked"}' > qi/valid_pixels.json"#;
    let processor = ToolProcessor::new(Stage::ValidPixels, Platform::Sentinel2);

    let report = processor
        .run(input(&dir, Stage::ValidPixels, json!({ "command": shell(script) })))
        .await
        .unwrap();

    assert_eq!(report.indicators.get("valid_ratio"), Some(&json!(0.93)));
    assert_eq!(report.artifacts, vec![dir.path().join("out/mask.txt")]);
    assert_eq!(report.diagnostic.as_deref(), Some("checked"));
}

#[tokio::test]
async fn test_environment_and_placeholders() {
    let dir = TempDir::new().unwrap();
    let script = r#"printf '{"status":"ok","indicators":{"stage":"%s","platform":"%s","product":"%s"}}' "$QC_STAGE" "$QC_PLATFORM" "$1" > "$2""#;
    let mut stage_input = input(
        &dir,
        Stage::Search,
        json!({
            "command": ["sh", "-c", script, "tool"],
            "args": ["{product_id}", "{working_dir}/reports/{stage}.json"],
            "report": "reports/{stage}.json"
        }),
    );
    stage_input
        .artifacts
        .insert(Stage::Search, vec![PathBuf::from("/data/a.tif")]);
    let processor = ToolProcessor::new(Stage::Search, Platform::Sentinel2);

    let report = processor.run(stage_input).await.unwrap();

    assert_eq!(report.indicators.get("stage"), Some(&json!("search")));
    assert_eq!(report.indicators.get("platform"), Some(&json!("sentinel2")));
    assert_eq!(
        report.indicators.get("product"),
        Some(&json!("S2A_MSIL1C_20240501"))
    );
}

#[tokio::test]
async fn test_prior_artifacts_are_exported() {
    let dir = TempDir::new().unwrap();
    let script = r#"printf '{"status":"ok","indicators":{"artifacts":"%s"}}' "$QC_ARTIFACTS" > qi/download.json"#;
    let mut stage_input = input(&dir, Stage::Download, json!({ "command": shell(script) }));
    stage_input.artifacts.insert(
        Stage::Search,
        vec![PathBuf::from("/data/a.xml"), PathBuf::from("/data/b.xml")],
    );
    let processor = ToolProcessor::new(Stage::Download, Platform::Sentinel2);

    let report = processor.run(stage_input).await.unwrap();

    assert_eq!(
        report.indicators.get("artifacts"),
        Some(&json!("/data/a.xml:/data/b.xml"))
    );
}

#[tokio::test]
async fn test_non_zero_exit_uses_configured_severity() {
    let dir = TempDir::new().unwrap();
    let processor = ToolProcessor::new(Stage::CloudCoverage, Platform::Sentinel2);

    let soft = processor
        .run(input(
            &dir,
            Stage::CloudCoverage,
            json!({ "command": shell("echo too cloudy >&2; exit 3"), "on_failure": "soft" }),
        ))
        .await
        .unwrap_err();
    match soft {
        ProcessorError::Soft(msg) => assert!(msg.contains("too cloudy")),
        other => panic!("unexpected error: {other}"),
    }

    let hard = processor
        .run(input(
            &dir,
            Stage::CloudCoverage,
            json!({ "command": shell("exit 1") }),
        ))
        .await
        .unwrap_err();
    assert!(matches!(hard, ProcessorError::Hard(_)));
}

#[tokio::test]
async fn test_missing_tool_is_infrastructure() {
    let dir = TempDir::new().unwrap();
    let processor = ToolProcessor::new(Stage::Search, Platform::Sentinel2);

    let err = processor
        .run(input(
            &dir,
            Stage::Search,
            json!({ "command": "/nonexistent/qc-search --all" }),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessorError::Infrastructure(_)));
}

#[tokio::test]
async fn test_missing_report_fails() {
    let dir = TempDir::new().unwrap();
    let processor = ToolProcessor::new(Stage::GeometryQuality, Platform::Sentinel2);

    let err = processor
        .run(input(&dir, Stage::GeometryQuality, json!({ "command": shell("true") })))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessorError::Hard(_)));
}

#[tokio::test]
async fn test_stale_report_is_not_reused() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("qi")).unwrap();
    fs::write(
        dir.path().join("qi/geometry_quality.json"),
        r#"{"status":"ok"}"#,
    )
    .unwrap();
    let processor = ToolProcessor::new(Stage::GeometryQuality, Platform::Sentinel2);

    let err = processor
        .run(input(
            &dir,
            Stage::GeometryQuality,
            json!({ "command": shell("true"), "on_failure": "soft" }),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessorError::Soft(_)));
}

#[tokio::test]
async fn test_reported_soft_failure() {
    let dir = TempDir::new().unwrap();
    let script = r#"printf '{"status":"soft_failure","message":"striping detected"}' > qi/radiometry_control.json"#;
    let processor = ToolProcessor::new(Stage::RadiometryControl, Platform::Landsat8);

    let err = processor
        .run(input(&dir, Stage::RadiometryControl, json!({ "command": shell(script) })))
        .await
        .unwrap_err();
    assert_eq!(err, ProcessorError::soft("striping detected"));
}

#[tokio::test]
async fn test_malformed_report() {
    let dir = TempDir::new().unwrap();
    let processor = ToolProcessor::new(Stage::Search, Platform::Sentinel2);

    let err = processor
        .run(input(
            &dir,
            Stage::Search,
            json!({ "command": shell("echo not-json > qi/search.json") }),
        ))
        .await
        .unwrap_err();
    match err {
        ProcessorError::Hard(msg) => assert!(msg.contains("malformed report")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_template_mode_reports_static_indicators() {
    let dir = TempDir::new().unwrap();
    let processor = ToolProcessor::new(Stage::LpInit, Platform::Agnostic);

    let report = processor
        .run(input(
            &dir,
            Stage::LpInit,
            json!({ "indicators": {"classes": 12, "legend": "CLC"} }),
        ))
        .await
        .unwrap();

    let names: Vec<&str> = report.indicators.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["classes", "legend"]);
    assert!(report.artifacts.is_empty());
}

#[tokio::test]
async fn test_timeout_kills_the_tool() {
    let dir = TempDir::new().unwrap();
    let processor = ToolProcessor::new(Stage::Download, Platform::Sentinel2);
    let script = "sleep 30; touch finished";

    let outcome = tokio::time::timeout(
        Duration::from_millis(300),
        processor.run(input(&dir, Stage::Download, json!({ "command": shell(script) }))),
    )
    .await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!dir.path().join("finished").exists());
}
