//! Validated, immutable protocol parameter set.
//!
//! [`ProtocolParameterSet::from_config`] is the single gate between a
//! protocol document and the engine. It checks every distribution once
//! (non-negative, finite, sums to 1 within [`PROBABILITY_TOLERANCE`],
//! every required key present) and compiles the maps into dense tables
//! keyed by the closed enums. Model code never re-validates and never
//! reads anything outside the set it is handed.

use std::collections::BTreeMap;

use amdsim_types::{
    DiscontinuationCategory, DiseaseState, LoadingOutcome, ResponseType, TimeBucket,
    TransitionRegime, VisionBounds,
};
use tracing::debug;

use crate::config::{
    CategoryConfig, CurveShape, DiscontinuationConfig, NormalParams, ProtocolConfig,
    ResourceConfig, ResponseModifiers, RetreatmentConfig, SchedulePolicy, TransitionTable,
};
use crate::error::ConfigurationError;

/// Allowed deviation of a probability distribution's sum from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Dense tables
// ---------------------------------------------------------------------------

/// One value per [`DiseaseState`], accessed without indexing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateTable<T> {
    naive: T,
    stable: T,
    active: T,
    highly_active: T,
}

impl<T: Copy> StateTable<T> {
    /// Build a table by evaluating `f` for each state.
    pub fn try_build<E>(mut f: impl FnMut(DiseaseState) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self {
            naive: f(DiseaseState::Naive)?,
            stable: f(DiseaseState::Stable)?,
            active: f(DiseaseState::Active)?,
            highly_active: f(DiseaseState::HighlyActive)?,
        })
    }

    /// Value for `state`.
    pub const fn get(&self, state: DiseaseState) -> T {
        match state {
            DiseaseState::Naive => self.naive,
            DiseaseState::Stable => self.stable,
            DiseaseState::Active => self.active,
            DiseaseState::HighlyActive => self.highly_active,
        }
    }
}

/// A validated transition row: probabilities over targets in
/// [`DiseaseState::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionProbabilities([f64; 4]);

impl TransitionProbabilities {
    /// Iterate `(target, probability)` pairs in severity order.
    pub fn iter(&self) -> impl Iterator<Item = (DiseaseState, f64)> + '_ {
        DiseaseState::ALL.into_iter().zip(self.0.iter().copied())
    }

    /// Probability of moving to `target`.
    pub fn probability(&self, target: DiseaseState) -> f64 {
        self.iter()
            .find(|(state, _)| *state == target)
            .map_or(0.0, |(_, p)| p)
    }
}

/// Transition matrices for all three regimes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionMatrices {
    loading: StateTable<TransitionProbabilities>,
    maintenance: StateTable<TransitionProbabilities>,
    untreated: StateTable<TransitionProbabilities>,
}

impl TransitionMatrices {
    /// The row for `from` under `regime`.
    pub const fn row(&self, regime: TransitionRegime, from: DiseaseState) -> TransitionProbabilities {
        match regime {
            TransitionRegime::Loading => self.loading.get(from),
            TransitionRegime::Maintenance => self.maintenance.get(from),
            TransitionRegime::Untreated => self.untreated.get(from),
        }
    }
}

/// Validated loading phase definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadingParams {
    /// Number of loading visits (at least 1).
    pub visit_count: u32,
    /// Days between loading visits (at least 1).
    pub interval_days: u32,
    /// Outcome distribution in [`LoadingOutcome::ALL`] order.
    outcomes: [(LoadingOutcome, f64, NormalParams); 3],
}

impl LoadingParams {
    /// Iterate `(outcome, probability, change distribution)`.
    pub fn outcomes(&self) -> impl Iterator<Item = (LoadingOutcome, f64, NormalParams)> + '_ {
        self.outcomes.iter().copied()
    }
}

/// Validated vision change tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionChangeTable {
    treated: StateTable<NormalParams>,
    untreated: StateTable<NormalParams>,
}

impl VisionChangeTable {
    /// Letter change distribution for a state and treatment status.
    pub const fn params(&self, state: DiseaseState, treated: bool) -> NormalParams {
        if treated {
            self.treated.get(state)
        } else {
            self.untreated.get(state)
        }
    }
}

/// Validated response type distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseTypeTable([(ResponseType, f64, f64); 3]);

impl ResponseTypeTable {
    /// Iterate `(type, probability, multiplier)` in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (ResponseType, f64, f64)> + '_ {
        self.0.iter().copied()
    }

    /// Vision multiplier of `response_type`.
    pub fn multiplier(&self, response_type: ResponseType) -> f64 {
        self.iter()
            .find(|(t, _, _)| *t == response_type)
            .map_or(1.0, |(_, _, m)| m)
    }
}

/// Daily clinic capacity derived from [`ResourceConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCapacity {
    /// The configuration the capacity was derived from.
    pub config: ResourceConfig,
    /// Visits the clinic can absorb per day (at least 1).
    pub visits_per_day: u32,
}

// ---------------------------------------------------------------------------
// ProtocolParameterSet
// ---------------------------------------------------------------------------

/// Immutable, validated protocol parameters.
///
/// Constructed only through [`ProtocolParameterSet::from_config`]; passed by
/// reference into every model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolParameterSet {
    name: String,
    bounds: VisionBounds,
    baseline: NormalParams,
    measurement_noise_sd: f64,
    loading: LoadingParams,
    modifiers: ResponseModifiers,
    vision_change: VisionChangeTable,
    transitions: TransitionMatrices,
    response_types: ResponseTypeTable,
    schedule: SchedulePolicy,
    discontinuation: DiscontinuationConfig,
    retreatment: RetreatmentConfig,
    resources: Option<ResourceCapacity>,
    source: ProtocolConfig,
}

impl ProtocolParameterSet {
    /// Validate a raw configuration and compile it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] naming the first offending
    /// section.
    pub fn from_config(config: &ProtocolConfig) -> Result<Self, ConfigurationError> {
        let bounds = validate_vision(config)?;
        let loading = validate_loading(config)?;
        let modifiers = validate_modifiers(&config.response_modifiers)?;
        let vision_change = VisionChangeTable {
            treated: compile_normals("vision_change.treated", &config.vision_change.treated)?,
            untreated: compile_normals(
                "vision_change.untreated",
                &config.vision_change.untreated,
            )?,
        };
        let transitions = TransitionMatrices {
            loading: compile_matrix("transitions.loading", &config.transitions.loading)?,
            maintenance: compile_matrix(
                "transitions.maintenance",
                &config.transitions.maintenance,
            )?,
            untreated: compile_matrix("transitions.untreated", &config.transitions.untreated)?,
        };
        let response_types = compile_response_types(config)?;
        validate_schedule(&config.schedule)?;
        validate_discontinuation(&config.discontinuation)?;
        validate_retreatment(&config.retreatment)?;
        let resources = config.resources.map(compile_resources).transpose()?;

        debug!(protocol = config.name, "Protocol parameters validated");

        Ok(Self {
            name: config.name.clone(),
            bounds,
            baseline: NormalParams::new(config.vision.baseline_mean, config.vision.baseline_sd),
            measurement_noise_sd: config.vision.measurement_noise_sd,
            loading,
            modifiers,
            vision_change,
            transitions,
            response_types,
            schedule: config.schedule.clone(),
            discontinuation: config.discontinuation.clone(),
            retreatment: config.retreatment,
            resources,
            source: config.clone(),
        })
    }

    /// Human-readable protocol name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acuity bounds.
    pub const fn bounds(&self) -> VisionBounds {
        self.bounds
    }

    /// Baseline acuity distribution. Its mean is also the regression target.
    pub const fn baseline(&self) -> NormalParams {
        self.baseline
    }

    /// Standard deviation of measurement noise.
    pub const fn measurement_noise_sd(&self) -> f64 {
        self.measurement_noise_sd
    }

    /// Loading phase.
    pub const fn loading(&self) -> &LoadingParams {
        &self.loading
    }

    /// Response modifiers.
    pub const fn modifiers(&self) -> &ResponseModifiers {
        &self.modifiers
    }

    /// Treated mean multiplier for a time bucket.
    pub const fn time_bucket_multiplier(&self, bucket: TimeBucket) -> f64 {
        match bucket {
            TimeBucket::Loading => 1.0,
            TimeBucket::Year1 => self.modifiers.time_buckets.year1,
            TimeBucket::Year2 => self.modifiers.time_buckets.year2,
            TimeBucket::Year3Plus => self.modifiers.time_buckets.year3_plus,
        }
    }

    /// Vision change tables.
    pub const fn vision_change(&self) -> &VisionChangeTable {
        &self.vision_change
    }

    /// Disease transition matrices.
    pub const fn transitions(&self) -> &TransitionMatrices {
        &self.transitions
    }

    /// Response type distribution.
    pub const fn response_types(&self) -> &ResponseTypeTable {
        &self.response_types
    }

    /// Maintenance scheduling policy.
    pub const fn schedule(&self) -> &SchedulePolicy {
        &self.schedule
    }

    /// Discontinuation curve configuration.
    pub const fn discontinuation(&self) -> &DiscontinuationConfig {
        &self.discontinuation
    }

    /// Retreatment configuration.
    pub const fn retreatment(&self) -> &RetreatmentConfig {
        &self.retreatment
    }

    /// Clinic capacity, if constrained.
    pub const fn resources(&self) -> Option<&ResourceCapacity> {
        self.resources.as_ref()
    }

    /// The raw configuration this set was compiled from.
    pub const fn source(&self) -> &ProtocolConfig {
        &self.source
    }
}

impl TryFrom<&ProtocolConfig> for ProtocolParameterSet {
    type Error = ConfigurationError;

    fn try_from(config: &ProtocolConfig) -> Result<Self, Self::Error> {
        Self::from_config(config)
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Check that a value is a finite probability in [0, 1].
pub fn check_probability(section: &str, value: f64) -> Result<(), ConfigurationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigurationError::invalid(
            section,
            format!("probability {value} outside [0, 1]"),
        ));
    }
    Ok(())
}

/// Check that probabilities are valid and sum to 1 within tolerance.
pub fn check_distribution(
    section: &str,
    values: impl IntoIterator<Item = f64>,
) -> Result<(), ConfigurationError> {
    let mut sum = 0.0;
    for value in values {
        check_probability(section, value)?;
        sum += value;
    }
    if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(ConfigurationError::invalid(
            section,
            format!("probabilities sum to {sum}, expected 1"),
        ));
    }
    Ok(())
}

fn check_fraction(section: &str, value: f64) -> Result<(), ConfigurationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigurationError::invalid(
            section,
            format!("factor {value} outside [0, 1]"),
        ));
    }
    Ok(())
}

fn check_normal(section: &str, params: NormalParams) -> Result<(), ConfigurationError> {
    if !params.mean.is_finite() {
        return Err(ConfigurationError::invalid(section, "mean must be finite"));
    }
    if !params.sd.is_finite() || params.sd < 0.0 {
        return Err(ConfigurationError::invalid(
            section,
            format!("standard deviation {} must be finite and non-negative", params.sd),
        ));
    }
    Ok(())
}

fn check_positive_days(section: &str, days: u32) -> Result<(), ConfigurationError> {
    if days == 0 {
        return Err(ConfigurationError::invalid(section, "interval must be at least one day"));
    }
    Ok(())
}

fn state_key(state: DiseaseState) -> String {
    format!("{state:?}")
}

fn validate_vision(config: &ProtocolConfig) -> Result<VisionBounds, ConfigurationError> {
    let vision = &config.vision;
    if vision.min_letters >= vision.max_letters {
        return Err(ConfigurationError::invalid(
            "vision",
            format!(
                "min_letters {} must be below max_letters {}",
                vision.min_letters, vision.max_letters
            ),
        ));
    }
    check_normal(
        "vision.baseline",
        NormalParams::new(vision.baseline_mean, vision.baseline_sd),
    )?;
    check_normal(
        "vision.measurement_noise_sd",
        NormalParams::new(0.0, vision.measurement_noise_sd),
    )?;
    Ok(VisionBounds {
        min_letters: vision.min_letters,
        max_letters: vision.max_letters,
    })
}

fn validate_loading(config: &ProtocolConfig) -> Result<LoadingParams, ConfigurationError> {
    let loading = &config.loading;
    if loading.visit_count == 0 {
        return Err(ConfigurationError::invalid(
            "loading.visit_count",
            "at least one loading visit is required",
        ));
    }
    check_positive_days("loading.interval_days", loading.interval_days)?;

    let mut compiled = [(LoadingOutcome::Improve, 0.0, NormalParams::new(0.0, 0.0)); 3];
    for (slot, outcome) in compiled.iter_mut().zip(LoadingOutcome::ALL) {
        let entry = loading.outcomes.get(&outcome).ok_or_else(|| {
            ConfigurationError::invalid("loading.outcomes", format!("missing outcome {outcome:?}"))
        })?;
        let section = format!("loading.outcomes.{outcome:?}");
        check_normal(&section, NormalParams::new(entry.mean, entry.sd))?;
        *slot = (outcome, entry.probability, NormalParams::new(entry.mean, entry.sd));
    }
    check_distribution("loading.outcomes", compiled.iter().map(|(_, p, _)| *p))?;

    Ok(LoadingParams {
        visit_count: loading.visit_count,
        interval_days: loading.interval_days,
        outcomes: compiled,
    })
}

fn validate_modifiers(modifiers: &ResponseModifiers) -> Result<ResponseModifiers, ConfigurationError> {
    check_fraction("response_modifiers.memory", modifiers.memory)?;
    check_fraction("response_modifiers.headroom", modifiers.headroom)?;
    check_fraction("response_modifiers.regression", modifiers.regression)?;
    for (name, value) in [
        ("year1", modifiers.time_buckets.year1),
        ("year2", modifiers.time_buckets.year2),
        ("year3_plus", modifiers.time_buckets.year3_plus),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigurationError::invalid(
                format!("response_modifiers.time_buckets.{name}"),
                format!("multiplier {value} must be finite and non-negative"),
            ));
        }
    }
    Ok(*modifiers)
}

fn compile_normals(
    section: &str,
    table: &BTreeMap<DiseaseState, NormalParams>,
) -> Result<StateTable<NormalParams>, ConfigurationError> {
    StateTable::try_build(|state| {
        let params = table.get(&state).copied().ok_or_else(|| {
            ConfigurationError::invalid(section, format!("missing state {}", state_key(state)))
        })?;
        check_normal(&format!("{section}.{}", state_key(state)), params)?;
        Ok(params)
    })
}

fn compile_matrix(
    section: &str,
    table: &TransitionTable,
) -> Result<StateTable<TransitionProbabilities>, ConfigurationError> {
    StateTable::try_build(|from| {
        let row_section = format!("{section}.{}", state_key(from));
        let row = table.get(&from).ok_or_else(|| {
            ConfigurationError::invalid(section, format!("missing row {}", state_key(from)))
        })?;
        let mut probs = [0.0; 4];
        for (slot, to) in probs.iter_mut().zip(DiseaseState::ALL) {
            // Every target must be listed, zeros included.
            *slot = row.get(&to).copied().ok_or_else(|| {
                ConfigurationError::invalid(
                    &row_section,
                    format!("missing target {} (list zero explicitly)", state_key(to)),
                )
            })?;
        }
        check_distribution(&row_section, probs)?;
        Ok(TransitionProbabilities(probs))
    })
}

fn compile_response_types(config: &ProtocolConfig) -> Result<ResponseTypeTable, ConfigurationError> {
    let mut compiled = [(ResponseType::Average, 0.0, 1.0); 3];
    for (slot, response_type) in compiled.iter_mut().zip(ResponseType::ALL) {
        let entry = config.response_types.get(&response_type).ok_or_else(|| {
            ConfigurationError::invalid(
                "response_types",
                format!("missing response type {response_type:?}"),
            )
        })?;
        if !entry.multiplier.is_finite() || entry.multiplier <= 0.0 {
            return Err(ConfigurationError::invalid(
                format!("response_types.{response_type:?}"),
                format!("multiplier {} must be positive", entry.multiplier),
            ));
        }
        *slot = (response_type, entry.probability, entry.multiplier);
    }
    check_distribution("response_types", compiled.iter().map(|(_, p, _)| *p))?;
    Ok(ResponseTypeTable(compiled))
}

fn validate_schedule(policy: &SchedulePolicy) -> Result<(), ConfigurationError> {
    match policy {
        SchedulePolicy::FixedInterval { interval_days }
        | SchedulePolicy::TreatAndTreat { interval_days } => {
            check_positive_days("schedule.interval_days", *interval_days)
        }
        SchedulePolicy::TreatAndExtend {
            initial_interval_days,
            min_interval_days,
            max_interval_days,
            ..
        } => {
            check_positive_days("schedule.min_interval_days", *min_interval_days)?;
            if min_interval_days > max_interval_days {
                return Err(ConfigurationError::invalid(
                    "schedule",
                    format!(
                        "min_interval_days {min_interval_days} exceeds max_interval_days {max_interval_days}"
                    ),
                ));
            }
            if initial_interval_days < min_interval_days || initial_interval_days > max_interval_days
            {
                return Err(ConfigurationError::invalid(
                    "schedule.initial_interval_days",
                    format!(
                        "{initial_interval_days} outside [{min_interval_days}, {max_interval_days}]"
                    ),
                ));
            }
            Ok(())
        }
        SchedulePolicy::TimeBased { intervals_days } => {
            if intervals_days.is_empty() {
                return Err(ConfigurationError::invalid(
                    "schedule.intervals_days",
                    "at least one interval is required",
                ));
            }
            for days in intervals_days {
                check_positive_days("schedule.intervals_days", *days)?;
            }
            Ok(())
        }
    }
}

/// Validate a single category's fields (target choice and curve shape).
pub fn validate_category(
    category: DiscontinuationCategory,
    config: &CategoryConfig,
) -> Result<(), ConfigurationError> {
    let section = format!("discontinuation.categories.{category:?}");
    match (config.target_incidence, config.annual_probability) {
        (Some(target), None) => {
            check_probability(&section, target)?;
            if target >= 1.0 {
                return Err(ConfigurationError::invalid(
                    &section,
                    "target_incidence must be below 1",
                ));
            }
        }
        (None, Some(annual)) => {
            check_probability(&section, annual)?;
            if annual >= 1.0 {
                return Err(ConfigurationError::invalid(
                    &section,
                    "annual_probability must be below 1",
                ));
            }
        }
        (Some(_), Some(_)) => {
            return Err(ConfigurationError::invalid(
                &section,
                "set either target_incidence or annual_probability, not both",
            ));
        }
        (None, None) => {
            return Err(ConfigurationError::invalid(
                &section,
                "one of target_incidence or annual_probability is required",
            ));
        }
    }
    match config.curve {
        CurveShape::Sigmoid {
            midpoint,
            steepness,
        } => {
            if !midpoint.is_finite() || !steepness.is_finite() || steepness <= 0.0 {
                return Err(ConfigurationError::invalid(
                    format!("{section}.curve"),
                    "sigmoid needs a finite midpoint and a positive steepness",
                ));
            }
        }
        CurveShape::Linear => {}
        CurveShape::Stepped { steps } => {
            if steps == 0 {
                return Err(ConfigurationError::invalid(
                    format!("{section}.curve"),
                    "stepped curve needs at least one step",
                ));
            }
        }
    }
    Ok(())
}

fn validate_discontinuation(config: &DiscontinuationConfig) -> Result<(), ConfigurationError> {
    if config.horizon_days == Some(0) {
        return Err(ConfigurationError::invalid(
            "discontinuation.horizon_days",
            "horizon must be at least one day",
        ));
    }
    let mut direct_total = 0.0;
    for (category, entry) in &config.categories {
        validate_category(*category, entry)?;
        direct_total += entry.target_incidence.unwrap_or(0.0);
    }
    // Annual targets depend on the horizon and are summed again once it
    // is resolved.
    if direct_total > 1.0 + PROBABILITY_TOLERANCE {
        return Err(ConfigurationError::invalid(
            "discontinuation.categories",
            format!("target incidences sum to {direct_total}, above 1"),
        ));
    }
    Ok(())
}

fn validate_retreatment(config: &RetreatmentConfig) -> Result<(), ConfigurationError> {
    check_probability("retreatment.probability", config.probability)?;
    check_positive_days(
        "retreatment.monitoring_interval_days",
        config.monitoring_interval_days,
    )
}

fn compile_resources(config: ResourceConfig) -> Result<ResourceCapacity, ConfigurationError> {
    if config.staff == 0 || config.equipment == 0 {
        return Err(ConfigurationError::invalid(
            "resources",
            "staff and equipment must be at least 1",
        ));
    }
    if config.visit_duration_minutes == 0 {
        return Err(ConfigurationError::invalid(
            "resources.visit_duration_minutes",
            "visit duration must be at least one minute",
        ));
    }
    let slots = config
        .session_minutes_per_day
        .checked_div(config.visit_duration_minutes)
        .unwrap_or(0);
    let visits_per_day = config.staff.min(config.equipment).saturating_mul(slots);
    if visits_per_day == 0 {
        return Err(ConfigurationError::invalid(
            "resources",
            "session is shorter than one visit; daily capacity would be zero",
        ));
    }
    Ok(ResourceCapacity {
        config,
        visits_per_day,
    })
}
