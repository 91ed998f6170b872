// Collect-all validation of a merged configuration
use super::settings::{
    CatalogSettings, ExecutionSettings, PathSettings, RunSettings, UseCase,
    DEFAULT_CATALOG_TIMEOUT,
};
use super::tree::{kind_of, Configuration};
use crate::catalog::DispatchPolicy;
use crate::error::ConfigValidationError;
use crate::pipeline::{Platform, ProductType, Stage, StageGroup, SubStageOrder};
use chrono::NaiveDate;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Validate a configuration and resolve it into run settings.
///
/// Every problem is reported in one pass; the settings are returned only
/// when none was found.
pub fn validate(config: &Configuration) -> Result<RunSettings, ConfigValidationError> {
    let mut problems = Problems::default();

    let product_type = product_type(config, &mut problems);
    let use_case = use_case(config, product_type, &mut problems);
    let platform = platform(config, product_type, &mut problems);
    let enabled_stages = enabled_stages(config, product_type, &mut problems);
    let sub_stage_order = sub_stage_order(config, &mut problems);
    let paths = paths(config, &mut problems);
    let execution = execution(config, &mut problems);
    let dispatch = dispatch(config, &mut problems);
    let catalog = catalog(config, &mut problems);

    if !problems.is_empty() {
        return Err(ConfigValidationError::new(problems.0));
    }

    match (use_case, platform, paths) {
        (Some(use_case), Some(platform), Some(paths)) => Ok(RunSettings {
            use_case,
            platform,
            enabled_stages,
            sub_stage_order,
            paths,
            execution,
            dispatch,
            catalog,
        }),
        _ => Err(ConfigValidationError::new(vec![
            "configuration is incomplete".to_string(),
        ])),
    }
}

#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn push(&mut self, problem: impl Into<String>) {
        self.0.push(problem.into());
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn required_str<'a>(&mut self, config: &'a Configuration, path: &str) -> Option<&'a str> {
        match config.lookup(path) {
            None | Some(Value::Null) => {
                self.push(format!("{}: missing required key", path));
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.push(format!("{}: must not be empty", path));
                None
            }
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                self.push(format!("{}: expected a string, found {}", path, kind_of(other)));
                None
            }
        }
    }

    fn optional_str<'a>(&mut self, config: &'a Configuration, path: &str) -> Option<&'a str> {
        match config.lookup(path) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                self.push(format!("{}: expected a string, found {}", path, kind_of(other)));
                None
            }
        }
    }

    fn optional_u64(&mut self, config: &Configuration, path: &str, min: u64) -> Option<u64> {
        match config.lookup(path) {
            None | Some(Value::Null) => None,
            Some(value) => match value.as_u64() {
                Some(n) if n >= min => Some(n),
                _ => {
                    self.push(format!("{}: expected an integer >= {}", path, min));
                    None
                }
            },
        }
    }
}

// Parsed on its own so platform and stage checks still run when other
// use case keys are broken.
fn product_type(config: &Configuration, problems: &mut Problems) -> Option<ProductType> {
    let raw = problems.required_str(config, "use_case.product_type")?;
    match raw.parse::<ProductType>() {
        Ok(product_type) => Some(product_type),
        Err(err) => {
            problems.push(format!("use_case.product_type: {}", err));
            None
        }
    }
}

fn use_case(
    config: &Configuration,
    product_type: Option<ProductType>,
    problems: &mut Problems,
) -> Option<UseCase> {
    let name = problems.required_str(config, "use_case.name");
    let product_id = problems.required_str(config, "use_case.product_id");
    let aoi = match config.lookup("use_case.aoi") {
        None | Some(Value::Null) => {
            problems.push("use_case.aoi: missing required key");
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            problems.push("use_case.aoi: must not be empty");
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(geometry @ Value::Object(_)) => Some(geometry.to_string()),
        Some(other) => {
            problems.push(format!(
                "use_case.aoi: expected a string or a mapping, found {}",
                kind_of(other)
            ));
            None
        }
    };
    let acquisition_date = problems
        .required_str(config, "use_case.acquisition_date")
        .and_then(|raw| match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                problems.push(format!(
                    "use_case.acquisition_date: '{}' is not a YYYY-MM-DD date",
                    raw
                ));
                None
            }
        });
    let parent_identifier = problems.optional_str(config, "use_case.parent_identifier");

    Some(UseCase {
        name: name?.to_string(),
        product_type: product_type?,
        product_id: product_id?.to_string(),
        aoi: aoi?,
        acquisition_date: acquisition_date?,
        parent_identifier: parent_identifier.map(str::to_string).unwrap_or_else(|| {
            format!("EOP:QCMMS:{}", name.unwrap_or_default())
        }),
    })
}

fn platform(
    config: &Configuration,
    product_type: Option<ProductType>,
    problems: &mut Problems,
) -> Option<Platform> {
    match product_type {
        Some(ProductType::Land) => Some(Platform::Agnostic),
        Some(ProductType::Image) => {
            let raw = problems.required_str(config, "image_products.primary_platform")?;
            match raw.parse::<Platform>() {
                Ok(Platform::Agnostic) | Err(_) => {
                    problems.push(format!(
                        "image_products.primary_platform: '{}' is not one of {}, {}",
                        raw,
                        Platform::Sentinel2.sensor_name(),
                        Platform::Landsat8.sensor_name()
                    ));
                    None
                }
                Ok(platform) => Some(platform),
            }
        }
        None => None,
    }
}

fn stage_list(value: &Value, path: &str, problems: &mut Problems) -> Option<Vec<Stage>> {
    let Some(items) = value.as_array() else {
        problems.push(format!("{}: expected a sequence of stage names", path));
        return None;
    };

    let mut stages = Vec::with_capacity(items.len());
    let mut ok = true;
    for (index, item) in items.iter().enumerate() {
        match item.as_str().map(str::parse::<Stage>) {
            Some(Ok(stage)) if stages.contains(&stage) => {
                problems.push(format!("{}[{}]: stage '{}' listed twice", path, index, stage));
                ok = false;
            }
            Some(Ok(stage)) => stages.push(stage),
            Some(Err(err)) => {
                problems.push(format!("{}[{}]: {}", path, index, err));
                ok = false;
            }
            None => {
                problems.push(format!("{}[{}]: expected a stage name", path, index));
                ok = false;
            }
        }
    }
    ok.then_some(stages)
}

fn enabled_stages(
    config: &Configuration,
    product_type: Option<ProductType>,
    problems: &mut Problems,
) -> Option<Vec<Stage>> {
    let value = match config.lookup("stages") {
        None | Some(Value::Null) => return None,
        Some(value) => value,
    };
    let stages = stage_list(value, "stages", problems)?;
    if let Some(product_type) = product_type {
        for stage in &stages {
            if stage.product_type() != product_type {
                problems.push(format!(
                    "stages: '{}' does not apply to {} products",
                    stage, product_type
                ));
            }
        }
    }
    Some(stages)
}

fn sub_stage_order(config: &Configuration, problems: &mut Problems) -> SubStageOrder {
    let mut order = SubStageOrder::default();
    for (key, group) in [
        ("scheduling.detailed_control_order", StageGroup::DetailedControl),
        ("scheduling.validation_control_order", StageGroup::Validation),
    ] {
        let Some(value) = config.lookup(key).filter(|v| !v.is_null()) else {
            continue;
        };
        let Some(stages) = stage_list(value, key, problems) else {
            continue;
        };
        let mut expected: Vec<Stage> = group.stages().collect();
        let mut given = stages.clone();
        expected.sort();
        given.sort();
        if expected != given {
            let names: Vec<&str> = group.stages().map(|s| s.tag()).collect();
            problems.push(format!(
                "{}: must list each of {} exactly once",
                key,
                names.join(", ")
            ));
            continue;
        }
        order.set(group, stages);
    }
    order
}

fn paths(config: &Configuration, problems: &mut Problems) -> Option<PathSettings> {
    let working_dir = problems.required_str(config, "paths.working_dir");
    let log_dir = problems.required_str(config, "paths.log_dir");
    let log_db = problems.required_str(config, "paths.log_db");
    Some(PathSettings {
        working_dir: PathBuf::from(working_dir?),
        log_dir: PathBuf::from(log_dir?),
        log_db: PathBuf::from(log_db?),
    })
}

fn execution(config: &Configuration, problems: &mut Problems) -> ExecutionSettings {
    let mut settings = ExecutionSettings::default();
    if let Some(secs) = problems.optional_u64(config, "execution.stage_timeout_secs", 1) {
        settings.stage_timeout = Duration::from_secs(secs);
    }

    match config.lookup("stage_options") {
        None | Some(Value::Null) => {}
        Some(Value::Object(options)) => {
            for (name, value) in options {
                let stage = match name.parse::<Stage>() {
                    Ok(stage) => stage,
                    Err(err) => {
                        problems.push(format!("stage_options.{}: {}", name, err));
                        continue;
                    }
                };
                if !(value.is_object() || value.is_null()) {
                    problems.push(format!(
                        "stage_options.{}: expected a mapping, found {}",
                        name,
                        kind_of(value)
                    ));
                    continue;
                }
                let path = format!("stage_options.{}.timeout_secs", name);
                if let Some(secs) = problems.optional_u64(config, &path, 1) {
                    settings.stage_timeouts.insert(stage, Duration::from_secs(secs));
                }
            }
        }
        Some(other) => problems.push(format!(
            "stage_options: expected a mapping, found {}",
            kind_of(other)
        )),
    }
    settings
}

fn dispatch(config: &Configuration, problems: &mut Problems) -> DispatchPolicy {
    let mut policy = DispatchPolicy::default();
    if let Some(n) = problems.optional_u64(config, "dispatch.max_attempts", 1) {
        policy.max_attempts = u32::try_from(n).unwrap_or(u32::MAX);
    }
    if let Some(ms) = problems.optional_u64(config, "dispatch.initial_backoff_ms", 0) {
        policy.initial_backoff = Duration::from_millis(ms);
    }
    if let Some(ms) = problems.optional_u64(config, "dispatch.max_backoff_ms", 0) {
        policy.max_backoff = Duration::from_millis(ms);
    }
    if policy.max_backoff < policy.initial_backoff {
        problems.push("dispatch.max_backoff_ms: must not be lower than initial_backoff_ms");
    }
    policy
}

fn catalog(config: &Configuration, problems: &mut Problems) -> Option<CatalogSettings> {
    let url = problems.optional_str(config, "catalog.url")?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        problems.push(format!("catalog.url: '{}' is not an http(s) URL", url));
    }
    let user = problems.required_str(config, "credentials.catalog.user");
    let password = problems.required_str(config, "credentials.catalog.password");
    let timeout = problems
        .optional_u64(config, "catalog.timeout_secs", 1)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CATALOG_TIMEOUT);

    Some(CatalogSettings {
        url: url.trim_end_matches('/').to_string(),
        user: user?.to_string(),
        password: password?.to_string(),
        timeout,
    })
}

/// Stages enabled for a product, before resume filtering
pub fn enabled_or_all(settings: &RunSettings) -> Vec<Stage> {
    settings
        .enabled_stages
        .clone()
        .unwrap_or_else(|| settings.use_case.product_type.stages().collect())
}
