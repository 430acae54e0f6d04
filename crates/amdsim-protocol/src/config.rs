//! Raw protocol configuration as written in a protocol YAML file.
//!
//! These structs mirror the YAML document one-to-one and carry serde
//! defaults for a reference treat-and-extend protocol, so a minimal file
//! only needs the sections it changes. Nothing here is validated; the
//! engine only ever sees the compiled
//! [`ProtocolParameterSet`](crate::params::ProtocolParameterSet).

use std::collections::BTreeMap;
use std::path::Path;

use amdsim_types::{DiscontinuationCategory, DiseaseState, LoadingOutcome, ResponseType};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// A transition row: target state to probability.
pub type TransitionRow = BTreeMap<DiseaseState, f64>;

/// A transition matrix: source state to row.
pub type TransitionTable = BTreeMap<DiseaseState, TransitionRow>;

/// Top-level protocol configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Human-readable protocol name.
    #[serde(default = "default_protocol_name")]
    pub name: String,

    /// Acuity bounds, baseline distribution, and measurement noise.
    #[serde(default)]
    pub vision: VisionConfig,

    /// Loading phase definition.
    #[serde(default)]
    pub loading: LoadingConfig,

    /// Memory, headroom, regression, and time bucket modifiers.
    #[serde(default)]
    pub response_modifiers: ResponseModifiers,

    /// Per-state vision change distributions.
    #[serde(default)]
    pub vision_change: VisionChangeConfig,

    /// Disease transition matrices per regime.
    #[serde(default)]
    pub transitions: TransitionConfig,

    /// Response type distribution and multipliers.
    #[serde(default = "default_response_types")]
    pub response_types: BTreeMap<ResponseType, ResponseTypeConfig>,

    /// Maintenance scheduling policy.
    #[serde(default)]
    pub schedule: SchedulePolicy,

    /// Discontinuation curves per category.
    #[serde(default)]
    pub discontinuation: DiscontinuationConfig,

    /// Retreatment of discontinued patients.
    #[serde(default)]
    pub retreatment: RetreatmentConfig,

    /// Optional clinic capacity limits.
    #[serde(default)]
    pub resources: Option<ResourceConfig>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            name: default_protocol_name(),
            vision: VisionConfig::default(),
            loading: LoadingConfig::default(),
            response_modifiers: ResponseModifiers::default(),
            vision_change: VisionChangeConfig::default(),
            transitions: TransitionConfig::default(),
            response_types: default_response_types(),
            schedule: SchedulePolicy::default(),
            discontinuation: DiscontinuationConfig::default(),
            retreatment: RetreatmentConfig::default(),
            resources: None,
        }
    }
}

impl ProtocolConfig {
    /// Load a protocol from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Io`] if the file cannot be read, or
    /// [`ConfigurationError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse a protocol from a YAML string.
    ///
    /// An empty document yields the reference protocol.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigurationError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Vision
// ---------------------------------------------------------------------------

/// Acuity bounds and baseline distribution, in ETDRS letters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Lowest representable acuity.
    #[serde(default)]
    pub min_letters: i32,

    /// Highest representable acuity.
    #[serde(default = "default_max_letters")]
    pub max_letters: i32,

    /// Mean baseline acuity; also the regression target.
    #[serde(default = "default_baseline_mean")]
    pub baseline_mean: f64,

    /// Standard deviation of baseline acuity.
    #[serde(default = "default_baseline_sd")]
    pub baseline_sd: f64,

    /// Standard deviation of per-visit measurement noise.
    #[serde(default = "default_measurement_noise_sd")]
    pub measurement_noise_sd: f64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            min_letters: 0,
            max_letters: default_max_letters(),
            baseline_mean: default_baseline_mean(),
            baseline_sd: default_baseline_sd(),
            measurement_noise_sd: default_measurement_noise_sd(),
        }
    }
}

/// Mean and standard deviation of a normal distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalParams {
    /// Mean.
    pub mean: f64,
    /// Standard deviation.
    pub sd: f64,
}

impl NormalParams {
    /// Construct from mean and standard deviation.
    pub const fn new(mean: f64, sd: f64) -> Self {
        Self { mean, sd }
    }
}

// ---------------------------------------------------------------------------
// Loading phase
// ---------------------------------------------------------------------------

/// Loading phase definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingConfig {
    /// Number of loading visits.
    #[serde(default = "default_loading_visit_count")]
    pub visit_count: u32,

    /// Days between loading visits.
    #[serde(default = "default_loading_interval_days")]
    pub interval_days: u32,

    /// Per-visit outcome probabilities and letter change distributions.
    #[serde(default = "default_loading_outcomes")]
    pub outcomes: BTreeMap<LoadingOutcome, LoadingOutcomeConfig>,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            visit_count: default_loading_visit_count(),
            interval_days: default_loading_interval_days(),
            outcomes: default_loading_outcomes(),
        }
    }
}

/// One loading outcome: its probability and letter change distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadingOutcomeConfig {
    /// Probability of this outcome at a loading visit.
    pub probability: f64,
    /// Mean letter change.
    pub mean: f64,
    /// Standard deviation of the letter change.
    pub sd: f64,
}

// ---------------------------------------------------------------------------
// Response modifiers
// ---------------------------------------------------------------------------

/// Modifiers shaping the per-visit acuity delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseModifiers {
    /// Weight of the previous visit's delta carried into the new one (0--1).
    #[serde(default = "default_memory_factor")]
    pub memory: f64,

    /// Strength of gain compression near the acuity ceiling (0--1).
    #[serde(default = "default_headroom_factor")]
    pub headroom: f64,

    /// Per-visit pull toward the population baseline mean (0--1).
    #[serde(default = "default_regression_factor")]
    pub regression: f64,

    /// Treated response multipliers by elapsed treatment year.
    #[serde(default)]
    pub time_buckets: TimeBucketMultipliers,
}

impl Default for ResponseModifiers {
    fn default() -> Self {
        Self {
            memory: default_memory_factor(),
            headroom: default_headroom_factor(),
            regression: default_regression_factor(),
            time_buckets: TimeBucketMultipliers::default(),
        }
    }
}

/// Multipliers applied to the treated mean delta per time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBucketMultipliers {
    /// First year after enrollment.
    #[serde(default = "default_year1_multiplier")]
    pub year1: f64,
    /// Second year after enrollment.
    #[serde(default = "default_year2_multiplier")]
    pub year2: f64,
    /// Third year onwards.
    #[serde(default = "default_year3_plus_multiplier")]
    pub year3_plus: f64,
}

impl Default for TimeBucketMultipliers {
    fn default() -> Self {
        Self {
            year1: default_year1_multiplier(),
            year2: default_year2_multiplier(),
            year3_plus: default_year3_plus_multiplier(),
        }
    }
}

// ---------------------------------------------------------------------------
// Vision change and transitions
// ---------------------------------------------------------------------------

/// Letter change distributions per disease state and treatment status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionChangeConfig {
    /// Distributions while under treatment.
    #[serde(default = "default_treated_vision_change")]
    pub treated: BTreeMap<DiseaseState, NormalParams>,

    /// Distributions while treatment is suspended.
    #[serde(default = "default_untreated_vision_change")]
    pub untreated: BTreeMap<DiseaseState, NormalParams>,
}

impl Default for VisionChangeConfig {
    fn default() -> Self {
        Self {
            treated: default_treated_vision_change(),
            untreated: default_untreated_vision_change(),
        }
    }
}

/// Disease transition matrices keyed by regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Treated, within the loading phase.
    #[serde(default = "default_loading_transitions")]
    pub loading: TransitionTable,

    /// Treated, after loading.
    #[serde(default = "default_maintenance_transitions")]
    pub maintenance: TransitionTable,

    /// Discontinued and monitored.
    #[serde(default = "default_untreated_transitions")]
    pub untreated: TransitionTable,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            loading: default_loading_transitions(),
            maintenance: default_maintenance_transitions(),
            untreated: default_untreated_transitions(),
        }
    }
}

/// Probability and vision multiplier of one response type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseTypeConfig {
    /// Share of patients assigned this type.
    pub probability: f64,
    /// Factor applied to every vision delta.
    pub multiplier: f64,
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Maintenance visit scheduling policy.
///
/// The loading phase always precedes the policy, regardless of variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Fixed monitoring interval; inject only on active disease.
    FixedInterval {
        /// Days between visits.
        interval_days: u32,
    },

    /// Inject every visit; extend on stable disease, reduce on activity.
    TreatAndExtend {
        /// Interval following the last loading visit.
        initial_interval_days: u32,
        /// Shortest allowed interval.
        min_interval_days: u32,
        /// Longest allowed interval.
        max_interval_days: u32,
        /// Days added after a stable outcome.
        extension_days: u32,
        /// Days removed after an active outcome.
        reduction_days: u32,
    },

    /// Inject every visit on a fixed interval.
    TreatAndTreat {
        /// Days between visits.
        interval_days: u32,
    },

    /// Inject every visit on a predefined interval sequence.
    TimeBased {
        /// Post-loading intervals; the last entry repeats.
        intervals_days: Vec<u32>,
    },
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self::TreatAndExtend {
            initial_interval_days: 56,
            min_interval_days: 56,
            max_interval_days: 112,
            extension_days: 14,
            reduction_days: 14,
        }
    }
}

// ---------------------------------------------------------------------------
// Discontinuation and retreatment
// ---------------------------------------------------------------------------

/// Discontinuation curves for every category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscontinuationConfig {
    /// Days over which normalized protocol time runs from 0 to 1.
    ///
    /// Defaults to the follow-up every patient of the run receives (run
    /// duration minus the latest possible enrollment day) when absent.
    #[serde(default)]
    pub horizon_days: Option<u32>,

    /// Per-category curve and target.
    #[serde(default = "default_discontinuation_categories")]
    pub categories: BTreeMap<DiscontinuationCategory, CategoryConfig>,
}

impl Default for DiscontinuationConfig {
    fn default() -> Self {
        Self {
            horizon_days: None,
            categories: default_discontinuation_categories(),
        }
    }
}

/// Target and curve shape of one discontinuation category.
///
/// Exactly one of `target_incidence` and `annual_probability` must be set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Cumulative incidence reached at the end of the horizon.
    #[serde(default)]
    pub target_incidence: Option<f64>,

    /// Annual probability, compounded over the horizon.
    #[serde(default)]
    pub annual_probability: Option<f64>,

    /// Shape of the cumulative curve.
    pub curve: CurveShape,

    /// Whether discontinued patients keep attending monitoring visits.
    #[serde(default = "default_true")]
    pub follow_up: bool,
}

/// Shape of a cumulative discontinuation curve over normalized time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum CurveShape {
    /// Logistic curve.
    Sigmoid {
        /// Normalized time of the inflection point.
        midpoint: f64,
        /// Logistic growth rate.
        steepness: f64,
    },
    /// Uniform hazard over time.
    Linear,
    /// Equal jumps at evenly spaced checkpoints.
    Stepped {
        /// Number of checkpoints.
        steps: u32,
    },
}

/// Retreatment of discontinued patients under follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetreatmentConfig {
    /// Probability of retreatment at each monitoring visit.
    #[serde(default = "default_retreatment_probability")]
    pub probability: f64,

    /// Days between monitoring visits while discontinued.
    #[serde(default = "default_monitoring_interval_days")]
    pub monitoring_interval_days: u32,

    /// Retreatments allowed per patient; unlimited when absent.
    #[serde(default)]
    pub max_retreatments: Option<u32>,
}

impl Default for RetreatmentConfig {
    fn default() -> Self {
        Self {
            probability: default_retreatment_probability(),
            monitoring_interval_days: default_monitoring_interval_days(),
            max_retreatments: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Clinic capacity limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Injecting clinicians on duty per day.
    pub staff: u32,
    /// Treatment rooms available per day.
    pub equipment: u32,
    /// Minutes one visit occupies a clinician and a room.
    #[serde(default = "default_visit_duration_minutes")]
    pub visit_duration_minutes: u32,
    /// Clinic session length per day.
    #[serde(default = "default_session_minutes_per_day")]
    pub session_minutes_per_day: u32,
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_protocol_name() -> String {
    "treat-and-extend reference".to_owned()
}

const fn default_max_letters() -> i32 {
    85
}

const fn default_baseline_mean() -> f64 {
    55.0
}

const fn default_baseline_sd() -> f64 {
    12.0
}

const fn default_measurement_noise_sd() -> f64 {
    2.0
}

const fn default_loading_visit_count() -> u32 {
    3
}

const fn default_loading_interval_days() -> u32 {
    28
}

fn default_loading_outcomes() -> BTreeMap<LoadingOutcome, LoadingOutcomeConfig> {
    let mut m = BTreeMap::new();
    m.insert(
        LoadingOutcome::Improve,
        LoadingOutcomeConfig {
            probability: 0.55,
            mean: 4.0,
            sd: 2.5,
        },
    );
    m.insert(
        LoadingOutcome::Stable,
        LoadingOutcomeConfig {
            probability: 0.35,
            mean: 0.0,
            sd: 1.0,
        },
    );
    m.insert(
        LoadingOutcome::Decline,
        LoadingOutcomeConfig {
            probability: 0.10,
            mean: -3.0,
            sd: 2.0,
        },
    );
    m
}

const fn default_memory_factor() -> f64 {
    0.3
}

const fn default_headroom_factor() -> f64 {
    0.7
}

const fn default_regression_factor() -> f64 {
    0.02
}

const fn default_year1_multiplier() -> f64 {
    1.0
}

const fn default_year2_multiplier() -> f64 {
    0.8
}

const fn default_year3_plus_multiplier() -> f64 {
    0.6
}

fn state_map<T>(naive: T, stable: T, active: T, highly_active: T) -> BTreeMap<DiseaseState, T> {
    let mut m = BTreeMap::new();
    m.insert(DiseaseState::Naive, naive);
    m.insert(DiseaseState::Stable, stable);
    m.insert(DiseaseState::Active, active);
    m.insert(DiseaseState::HighlyActive, highly_active);
    m
}

fn default_treated_vision_change() -> BTreeMap<DiseaseState, NormalParams> {
    state_map(
        NormalParams::new(0.0, 1.0),
        NormalParams::new(0.5, 1.5),
        NormalParams::new(-0.5, 2.0),
        NormalParams::new(-2.0, 3.0),
    )
}

fn default_untreated_vision_change() -> BTreeMap<DiseaseState, NormalParams> {
    state_map(
        NormalParams::new(0.0, 1.0),
        NormalParams::new(-0.5, 1.5),
        NormalParams::new(-3.0, 2.5),
        NormalParams::new(-5.0, 3.5),
    )
}

/// Row listing all four targets: naive, stable, active, highly active.
fn row(naive: f64, stable: f64, active: f64, highly_active: f64) -> TransitionRow {
    state_map(naive, stable, active, highly_active)
}

fn default_loading_transitions() -> TransitionTable {
    state_map(
        row(0.0, 0.35, 0.55, 0.10),
        row(0.0, 0.80, 0.17, 0.03),
        row(0.0, 0.55, 0.40, 0.05),
        row(0.0, 0.25, 0.45, 0.30),
    )
}

fn default_maintenance_transitions() -> TransitionTable {
    state_map(
        row(0.0, 0.40, 0.50, 0.10),
        row(0.0, 0.85, 0.13, 0.02),
        row(0.0, 0.45, 0.45, 0.10),
        row(0.0, 0.20, 0.45, 0.35),
    )
}

fn default_untreated_transitions() -> TransitionTable {
    state_map(
        row(0.0, 0.10, 0.60, 0.30),
        row(0.0, 0.70, 0.25, 0.05),
        row(0.0, 0.15, 0.65, 0.20),
        row(0.0, 0.05, 0.35, 0.60),
    )
}

fn default_response_types() -> BTreeMap<ResponseType, ResponseTypeConfig> {
    let mut m = BTreeMap::new();
    m.insert(
        ResponseType::Good,
        ResponseTypeConfig {
            probability: 0.3,
            multiplier: 1.8,
        },
    );
    m.insert(
        ResponseType::Average,
        ResponseTypeConfig {
            probability: 0.5,
            multiplier: 1.0,
        },
    );
    m.insert(
        ResponseType::Poor,
        ResponseTypeConfig {
            probability: 0.2,
            multiplier: 0.5,
        },
    );
    m
}

fn default_discontinuation_categories() -> BTreeMap<DiscontinuationCategory, CategoryConfig> {
    let mut m = BTreeMap::new();
    m.insert(
        DiscontinuationCategory::Planned,
        CategoryConfig {
            target_incidence: Some(0.05),
            annual_probability: None,
            curve: CurveShape::Sigmoid {
                midpoint: 0.7,
                steepness: 6.0,
            },
            follow_up: true,
        },
    );
    m.insert(
        DiscontinuationCategory::Administrative,
        CategoryConfig {
            target_incidence: Some(0.10),
            annual_probability: None,
            curve: CurveShape::Linear,
            follow_up: false,
        },
    );
    m.insert(
        DiscontinuationCategory::NotRenewed,
        CategoryConfig {
            target_incidence: Some(0.06),
            annual_probability: None,
            curve: CurveShape::Stepped { steps: 3 },
            follow_up: true,
        },
    );
    m.insert(
        DiscontinuationCategory::Premature,
        CategoryConfig {
            target_incidence: Some(0.08),
            annual_probability: None,
            curve: CurveShape::Sigmoid {
                midpoint: 0.4,
                steepness: 6.0,
            },
            follow_up: true,
        },
    );
    m
}

const fn default_retreatment_probability() -> f64 {
    0.15
}

const fn default_monitoring_interval_days() -> u32 {
    84
}

const fn default_visit_duration_minutes() -> u32 {
    20
}

const fn default_session_minutes_per_day() -> u32 {
    480
}

const fn default_true() -> bool {
    true
}
