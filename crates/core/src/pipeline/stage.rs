// Stage model: product types, platforms, document slots and stages
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of product a run evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Image,
    Land,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Image => "image",
            ProductType::Land => "land",
        }
    }

    /// Document slots of this product type, in schema order
    pub fn groups(&self) -> &'static [StageGroup] {
        match self {
            ProductType::Image => &IMAGE_GROUPS,
            ProductType::Land => &LAND_GROUPS,
        }
    }

    /// Every stage of this product type, in default execution order
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL
            .iter()
            .copied()
            .filter(move |stage| stage.product_type() == *self)
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" | "ip" => Ok(ProductType::Image),
            "land" | "lp" => Ok(ProductType::Land),
            other => Err(format!("unknown product type '{}'", other)),
        }
    }
}

/// Sensor platform a processor is specialised for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Sentinel2,
    Landsat8,
    Agnostic,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Sentinel2, Platform::Landsat8, Platform::Agnostic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Sentinel2 => "sentinel2",
            Platform::Landsat8 => "landsat8",
            Platform::Agnostic => "agnostic",
        }
    }

    /// Sensor name as written in use-case configurations
    pub fn sensor_name(&self) -> &'static str {
        match self {
            Platform::Sentinel2 => "Sentinel-2",
            Platform::Landsat8 => "Landsat-8",
            Platform::Agnostic => "agnostic",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sentinel2" | "s2" => Ok(Platform::Sentinel2),
            "landsat8" | "l8" => Ok(Platform::Landsat8),
            "agnostic" => Ok(Platform::Agnostic),
            _ => Err(format!("unknown platform '{}'", s)),
        }
    }
}

/// A slot of the quality-indicator document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageGroup {
    Feasibility,
    Delivery,
    OrdinaryControl,
    DetailedControl,
    Harmonization,
    Coverage,
    LandInit,
    Interpretation,
    Validation,
}

const IMAGE_GROUPS: [StageGroup; 6] = [
    StageGroup::Feasibility,
    StageGroup::Delivery,
    StageGroup::OrdinaryControl,
    StageGroup::DetailedControl,
    StageGroup::Harmonization,
    StageGroup::Coverage,
];

const LAND_GROUPS: [StageGroup; 3] = [
    StageGroup::LandInit,
    StageGroup::Interpretation,
    StageGroup::Validation,
];

impl StageGroup {
    /// Slot tag used in the document ("1", "3B", "init", ...)
    pub fn tag(&self) -> &'static str {
        match self {
            StageGroup::Feasibility => "1",
            StageGroup::Delivery => "2",
            StageGroup::OrdinaryControl => "3A",
            StageGroup::DetailedControl => "3B",
            StageGroup::Harmonization => "4A",
            StageGroup::Coverage => "4B",
            StageGroup::LandInit => "init",
            StageGroup::Interpretation => "5",
            StageGroup::Validation => "6",
        }
    }

    pub fn product_type(&self) -> ProductType {
        match self {
            StageGroup::LandInit | StageGroup::Interpretation | StageGroup::Validation => {
                ProductType::Land
            }
            _ => ProductType::Image,
        }
    }

    /// Measurement name of the slot, without the vocabulary prefix
    pub fn measurement(&self) -> &'static str {
        match self {
            StageGroup::Feasibility => "feasibilityControlMetric",
            StageGroup::Delivery => "deliveryControlMetric",
            StageGroup::OrdinaryControl => "ordinaryControlMetric",
            StageGroup::DetailedControl => "detailedControlMetric",
            StageGroup::Harmonization => "harmonizationControlMetric",
            StageGroup::Coverage => "coverageControlMetric",
            StageGroup::LandInit => "ipForLpInformationMetric",
            StageGroup::Interpretation => "lpInterpretationMetric",
            StageGroup::Validation => "lpValidationControlMetric",
        }
    }

    /// Stages filling this slot, in default order
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL
            .iter()
            .copied()
            .filter(move |stage| stage.group() == *self)
    }

    /// Whether the slot holds several sub-stages with a configurable order
    pub fn has_sub_stages(&self) -> bool {
        self.stages().count() > 1
    }
}

impl fmt::Display for StageGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// How a stage depends on a predecessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// The predecessor must have succeeded
    Strict,
    /// The predecessor blocks only if it ran and failed hard or was skipped
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Dependency {
    pub stage: Stage,
    pub kind: DependencyKind,
}

impl Dependency {
    pub const fn strict(stage: Stage) -> Self {
        Self {
            stage,
            kind: DependencyKind::Strict,
        }
    }

    pub const fn optional(stage: Stage) -> Self {
        Self {
            stage,
            kind: DependencyKind::Optional,
        }
    }
}

/// A named quality-control step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Download,
    OrdinaryControl,
    ValidPixels,
    CloudCoverage,
    GeometryQuality,
    RadiometryControl,
    HarmonizationControl,
    VpxCoverage,
    LpInit,
    LpInterpretationControl,
    LpOrdinaryControl,
    LpMetadataControl,
    LpThematicValidationControl,
}

const NO_DEPENDENCIES: &[Dependency] = &[];
const AFTER_SEARCH: &[Dependency] = &[Dependency::strict(Stage::Search)];
const AFTER_DOWNLOAD: &[Dependency] = &[Dependency::strict(Stage::Download)];
const AFTER_ORDINARY: &[Dependency] = &[Dependency::strict(Stage::OrdinaryControl)];
const HARMONIZATION_DEPENDENCIES: &[Dependency] = &[
    Dependency::strict(Stage::OrdinaryControl),
    Dependency::optional(Stage::GeometryQuality),
    Dependency::optional(Stage::RadiometryControl),
];
const COVERAGE_DEPENDENCIES: &[Dependency] = &[
    Dependency::strict(Stage::OrdinaryControl),
    Dependency::optional(Stage::ValidPixels),
    Dependency::optional(Stage::CloudCoverage),
];
const AFTER_LP_INIT: &[Dependency] = &[Dependency::strict(Stage::LpInit)];
const THEMATIC_DEPENDENCIES: &[Dependency] = &[
    Dependency::strict(Stage::LpInit),
    Dependency::optional(Stage::LpInterpretationControl),
];

impl Stage {
    /// Every stage in default execution order
    pub const ALL: [Stage; 14] = [
        Stage::Search,
        Stage::Download,
        Stage::OrdinaryControl,
        Stage::ValidPixels,
        Stage::CloudCoverage,
        Stage::GeometryQuality,
        Stage::RadiometryControl,
        Stage::HarmonizationControl,
        Stage::VpxCoverage,
        Stage::LpInit,
        Stage::LpInterpretationControl,
        Stage::LpOrdinaryControl,
        Stage::LpMetadataControl,
        Stage::LpThematicValidationControl,
    ];

    /// Name used in configuration files, logs and the document
    pub fn tag(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Download => "download",
            Stage::OrdinaryControl => "ordinary_control",
            Stage::ValidPixels => "valid_pixels",
            Stage::CloudCoverage => "cloud_coverage",
            Stage::GeometryQuality => "geometry_quality",
            Stage::RadiometryControl => "radiometry_control",
            Stage::HarmonizationControl => "harmonization_control",
            Stage::VpxCoverage => "vpx_coverage",
            Stage::LpInit => "lp_init",
            Stage::LpInterpretationControl => "lp_interpretation_control",
            Stage::LpOrdinaryControl => "lp_ordinary_control",
            Stage::LpMetadataControl => "lp_metadata_control",
            Stage::LpThematicValidationControl => "lp_thematic_validation_control",
        }
    }

    pub fn group(&self) -> StageGroup {
        match self {
            Stage::Search => StageGroup::Feasibility,
            Stage::Download => StageGroup::Delivery,
            Stage::OrdinaryControl => StageGroup::OrdinaryControl,
            Stage::ValidPixels
            | Stage::CloudCoverage
            | Stage::GeometryQuality
            | Stage::RadiometryControl => StageGroup::DetailedControl,
            Stage::HarmonizationControl => StageGroup::Harmonization,
            Stage::VpxCoverage => StageGroup::Coverage,
            Stage::LpInit => StageGroup::LandInit,
            Stage::LpInterpretationControl => StageGroup::Interpretation,
            Stage::LpOrdinaryControl
            | Stage::LpMetadataControl
            | Stage::LpThematicValidationControl => StageGroup::Validation,
        }
    }

    pub fn product_type(&self) -> ProductType {
        self.group().product_type()
    }

    /// Predecessors this stage waits on
    pub fn dependencies(&self) -> &'static [Dependency] {
        match self {
            Stage::Search | Stage::LpInit => NO_DEPENDENCIES,
            Stage::Download => AFTER_SEARCH,
            Stage::OrdinaryControl => AFTER_DOWNLOAD,
            Stage::ValidPixels
            | Stage::CloudCoverage
            | Stage::GeometryQuality
            | Stage::RadiometryControl => AFTER_ORDINARY,
            Stage::HarmonizationControl => HARMONIZATION_DEPENDENCIES,
            Stage::VpxCoverage => COVERAGE_DEPENDENCIES,
            Stage::LpInterpretationControl
            | Stage::LpOrdinaryControl
            | Stage::LpMetadataControl => AFTER_LP_INIT,
            Stage::LpThematicValidationControl => THEMATIC_DEPENDENCIES,
        }
    }

    /// Platform a processor for this stage is resolved with
    pub fn resolution_platform(&self, primary: Platform) -> Platform {
        match self.product_type() {
            ProductType::Image => primary,
            ProductType::Land => Platform::Agnostic,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.tag() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}
