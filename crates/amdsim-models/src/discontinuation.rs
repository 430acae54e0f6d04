//! Discontinuation and retreatment.
//!
//! Each category has a cumulative curve `F(t)` over normalized protocol
//! time `t` in `[0, 1]`, scaled so that `F(0) = 0` and `F(1)` equals the
//! category's target incidence. Between two visits at `t0` and `t1` the
//! categories compete: the draw probability of category `c` is its share
//! of the incremental incidence among patients still on treatment,
//!
//! ```text
//! q_c = (F_c(t1) - F_c(t0)) / (S(t0) - sum of earlier increments)
//! S(t0) = 1 - sum_c F_c(t0)
//! ```
//!
//! and categories are drawn in priority order with the first success
//! winning. Applied to a cohort that is assessed over the full horizon,
//! this reproduces each target exactly in expectation.

use amdsim_protocol::{
    CategoryConfig, ConfigurationError, CurveShape, DiscontinuationConfig, RetreatmentConfig,
};
use amdsim_types::{DAYS_PER_YEAR, DiscontinuationCategory};
use rand::Rng;
use tracing::{debug, trace};

use crate::sampling;

/// Tolerance on the sum of resolved target incidences.
const TARGET_SUM_TOLERANCE: f64 = 1e-9;

/// Below this survival mass no further discontinuations are drawn.
const SURVIVAL_FLOOR: f64 = 1e-12;

/// A category's cumulative incidence curve, normalized to its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CumulativeCurve {
    shape: CurveShape,
    target: f64,
    g0: f64,
    g1: f64,
}

impl CumulativeCurve {
    /// Build a curve reaching `target` at `t = 1`.
    pub fn new(shape: CurveShape, target: f64) -> Self {
        Self {
            shape,
            target,
            g0: raw_shape(shape, 0.0),
            g1: raw_shape(shape, 1.0),
        }
    }

    /// Target incidence at the end of the horizon.
    pub const fn target(&self) -> f64 {
        self.target
    }

    /// Cumulative incidence at normalized time `t` (clamped to `[0, 1]`).
    pub fn value(&self, t: f64) -> f64 {
        let span = self.g1 - self.g0;
        if span <= 0.0 {
            return 0.0;
        }
        let g = raw_shape(self.shape, t.clamp(0.0, 1.0));
        self.target * ((g - self.g0) / span).clamp(0.0, 1.0)
    }
}

/// Un-normalized shape function.
fn raw_shape(shape: CurveShape, t: f64) -> f64 {
    match shape {
        CurveShape::Sigmoid {
            midpoint,
            steepness,
        } => 1.0 / (1.0 + (-steepness * (t - midpoint)).exp()),
        CurveShape::Linear => t,
        CurveShape::Stepped { steps } => {
            let n = f64::from(steps);
            // Nudge so that t = k/n computed from day counts lands on step k.
            ((t * n) + 1e-9).floor().min(n) / n
        }
    }
}

/// Convert an annual probability to a cumulative target over `horizon_days`.
pub fn annual_to_target(annual: f64, horizon_days: u32) -> f64 {
    let years = f64::from(horizon_days) / f64::from(DAYS_PER_YEAR);
    1.0 - (1.0 - annual).powf(years)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CategoryCurve {
    category: DiscontinuationCategory,
    curve: CumulativeCurve,
    follow_up: bool,
}

/// Compiled discontinuation model for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscontinuationModel {
    horizon_days: u32,
    curves: Vec<CategoryCurve>,
}

impl DiscontinuationModel {
    /// Resolve targets over the horizon and compile the curves.
    ///
    /// The horizon is the configured `horizon_days`, or
    /// `default_horizon_days` when absent. Callers pass the follow-up every
    /// patient receives, so a patient assessed up to the run end reaches
    /// `t = 1`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] if the horizon is zero or if
    /// the resolved targets sum above 1.
    pub fn new(
        config: &DiscontinuationConfig,
        default_horizon_days: u32,
    ) -> Result<Self, ConfigurationError> {
        let horizon_days = config.horizon_days.unwrap_or(default_horizon_days);
        if horizon_days == 0 {
            return Err(ConfigurationError::invalid(
                "discontinuation.horizon_days",
                "horizon must be at least one day",
            ));
        }

        let mut curves = Vec::with_capacity(DiscontinuationCategory::ALL.len());
        for category in DiscontinuationCategory::ALL {
            let Some(entry) = config.categories.get(&category) else {
                continue;
            };
            amdsim_protocol::validate_category(category, entry)?;
            let target = resolve_target(entry, horizon_days);
            curves.push(CategoryCurve {
                category,
                curve: CumulativeCurve::new(entry.curve, target),
                follow_up: entry.follow_up,
            });
        }

        let total: f64 = curves.iter().map(|c| c.curve.target()).sum();
        if total > 1.0 + TARGET_SUM_TOLERANCE {
            return Err(ConfigurationError::invalid(
                "discontinuation.categories",
                format!("resolved target incidences sum to {total:.4}, above 1"),
            ));
        }

        debug!(horizon_days, total_target = total, "Discontinuation model compiled");
        Ok(Self {
            horizon_days,
            curves,
        })
    }

    /// Days mapped onto normalized time 1.
    pub const fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Normalized time for a number of days since enrollment, in `[0, 1]`.
    pub fn normalized_time(&self, days_since_enrollment: u32) -> f64 {
        (f64::from(days_since_enrollment) / f64::from(self.horizon_days)).clamp(0.0, 1.0)
    }

    /// Resolved target incidence of `category` (0 when unconfigured).
    pub fn target(&self, category: DiscontinuationCategory) -> f64 {
        self.find(category).map_or(0.0, |c| c.curve.target())
    }

    /// Whether patients discontinued for `category` stay under follow-up.
    pub fn follow_up(&self, category: DiscontinuationCategory) -> bool {
        self.find(category).is_some_and(|c| c.follow_up)
    }

    /// Cumulative incidence of `category` at normalized time `t`.
    pub fn cumulative(&self, category: DiscontinuationCategory, t: f64) -> f64 {
        self.find(category).map_or(0.0, |c| c.curve.value(t))
    }

    /// Total cumulative incidence at `t`.
    pub fn total_cumulative(&self, t: f64) -> f64 {
        self.curves.iter().map(|c| c.curve.value(t)).sum()
    }

    /// Per-category draw probabilities for the window `(t0, t1]`, in
    /// priority order.
    pub fn window_probabilities(&self, t0: f64, t1: f64) -> Vec<(DiscontinuationCategory, f64)> {
        let mut remaining = 1.0 - self.total_cumulative(t0);
        self.curves
            .iter()
            .map(|c| {
                let increment = (c.curve.value(t1) - c.curve.value(t0)).max(0.0);
                let q = if remaining > SURVIVAL_FLOOR {
                    (increment / remaining).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                remaining -= increment;
                (c.category, q)
            })
            .collect()
    }

    /// Decide whether a patient on treatment discontinues in `(t0, t1]`.
    ///
    /// Consumes one uniform per category examined, stopping at the first
    /// category drawn.
    pub fn assess(
        &self,
        t0: f64,
        t1: f64,
        rng: &mut impl Rng,
    ) -> Option<DiscontinuationCategory> {
        if t1 <= t0 {
            return None;
        }
        for (category, q) in self.window_probabilities(t0, t1) {
            if q > 0.0 && sampling::unit(rng) < q {
                trace!(?category, t0, t1, "Discontinuation drawn");
                return Some(category);
            }
        }
        None
    }

    fn find(&self, category: DiscontinuationCategory) -> Option<&CategoryCurve> {
        self.curves.iter().find(|c| c.category == category)
    }
}

fn resolve_target(entry: &CategoryConfig, horizon_days: u32) -> f64 {
    match (entry.target_incidence, entry.annual_probability) {
        (Some(target), _) => target,
        (None, Some(annual)) => annual_to_target(annual, horizon_days),
        (None, None) => 0.0,
    }
}

/// Retreatment policy for discontinued patients under follow-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetreatmentModel {
    config: RetreatmentConfig,
}

impl RetreatmentModel {
    /// Wrap a validated retreatment configuration.
    pub const fn new(config: RetreatmentConfig) -> Self {
        Self { config }
    }

    /// Probability of retreatment at one monitoring visit.
    pub const fn probability(&self) -> f64 {
        self.config.probability
    }

    /// Days between monitoring visits.
    pub const fn monitoring_interval_days(&self) -> u32 {
        self.config.monitoring_interval_days
    }

    /// Whether a patient with `retreatment_count` prior retreatments may be
    /// retreated again.
    pub fn eligible(&self, retreatment_count: u32) -> bool {
        self.config
            .max_retreatments
            .is_none_or(|max| retreatment_count < max)
    }

    /// Draw at one monitoring visit. Consumes one uniform when eligible.
    pub fn should_retreat(&self, retreatment_count: u32, rng: &mut impl Rng) -> bool {
        if !self.eligible(retreatment_count) || self.config.probability <= 0.0 {
            return false;
        }
        sampling::unit(rng) < self.config.probability
    }

    /// Mean number of monitoring visits until retreatment, `1 / p`.
    ///
    /// `None` when retreatment can never happen.
    pub fn expected_checks_until_retreatment(&self) -> Option<f64> {
        (self.config.probability > 0.0).then(|| 1.0 / self.config.probability)
    }

    /// Probability of retreatment within `checks` monitoring visits.
    pub fn probability_within(&self, checks: u32) -> f64 {
        let exponent = i32::try_from(checks).unwrap_or(i32::MAX);
        1.0 - (1.0 - self.config.probability).powi(exponent)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn single(category: DiscontinuationCategory, target: f64, curve: CurveShape) -> DiscontinuationConfig {
        let mut categories = BTreeMap::new();
        categories.insert(
            category,
            CategoryConfig {
                target_incidence: Some(target),
                annual_probability: None,
                curve,
                follow_up: true,
            },
        );
        DiscontinuationConfig {
            horizon_days: None,
            categories,
        }
    }

    #[test]
    fn curves_hit_endpoints() {
        for shape in [
            CurveShape::Linear,
            CurveShape::Sigmoid {
                midpoint: 0.5,
                steepness: 8.0,
            },
            CurveShape::Stepped { steps: 4 },
        ] {
            let curve = CumulativeCurve::new(shape, 0.2);
            assert!(curve.value(0.0).abs() < 1e-12, "{shape:?}");
            assert!((curve.value(1.0) - 0.2).abs() < 1e-12, "{shape:?}");
            assert!(curve.value(0.3) <= curve.value(0.7));
        }
    }

    #[test]
    fn stepped_curve_jumps_at_checkpoints() {
        let curve = CumulativeCurve::new(CurveShape::Stepped { steps: 4 }, 0.4);
        assert!(curve.value(0.24).abs() < 1e-12);
        assert!((curve.value(0.25) - 0.1).abs() < 1e-9);
        assert!((curve.value(0.74) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn annual_probability_compounds() {
        let target = annual_to_target(0.1, 2 * DAYS_PER_YEAR);
        assert!((target - 0.19).abs() < 1e-12);
    }

    #[test]
    fn annual_targets_checked_against_sum() {
        let mut config = DiscontinuationConfig::default();
        for entry in config.categories.values_mut() {
            entry.target_incidence = None;
            entry.annual_probability = Some(0.3);
        }
        let err = DiscontinuationModel::new(&config, 5 * DAYS_PER_YEAR).unwrap_err();
        assert!(err.to_string().contains("discontinuation.categories"));
        assert!(DiscontinuationModel::new(&config, 30).is_ok());
    }

    #[test]
    fn zero_horizon_rejected() {
        let config = DiscontinuationConfig::default();
        assert!(DiscontinuationModel::new(&config, 0).is_err());
    }

    #[test]
    fn window_probabilities_respect_priority() {
        let model = DiscontinuationModel::new(&DiscontinuationConfig::default(), 1_825).unwrap();
        let probs = model.window_probabilities(0.0, 0.5);
        let order: Vec<_> = probs.iter().map(|(c, _)| *c).collect();
        assert_eq!(order, DiscontinuationCategory::ALL.to_vec());
        assert!(probs.iter().all(|(_, q)| (0.0..=1.0).contains(q)));
    }

    #[test]
    fn empty_window_never_discontinues() {
        let model = DiscontinuationModel::new(&DiscontinuationConfig::default(), 365).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(model.assess(0.4, 0.4, &mut rng), None);
    }

    #[test]
    fn whole_horizon_hits_target() {
        let config = single(DiscontinuationCategory::Administrative, 0.25, CurveShape::Linear);
        let model = DiscontinuationModel::new(&config, 365).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let n = 20_000_u32;
        let mut hits = 0_u32;
        for _ in 0..n {
            let mut t0 = 0.0;
            for step in 1..=12_u32 {
                let t1 = f64::from(step) / 12.0;
                if model.assess(t0, t1, &mut rng).is_some() {
                    hits += 1;
                    break;
                }
                t0 = t1;
            }
        }
        let share = f64::from(hits) / f64::from(n);
        assert!((share - 0.25).abs() < 0.012, "share {share}");
    }

    #[test]
    fn unconfigured_category_has_no_target() {
        let config = single(DiscontinuationCategory::Planned, 0.1, CurveShape::Linear);
        let model = DiscontinuationModel::new(&config, 365).unwrap();
        assert!(model.target(DiscontinuationCategory::Premature).abs() < f64::EPSILON);
        assert!(!model.follow_up(DiscontinuationCategory::Premature));
        assert!(model.follow_up(DiscontinuationCategory::Planned));
    }

    #[test]
    fn retreatment_expectation_is_geometric() {
        let model = RetreatmentModel::new(RetreatmentConfig {
            probability: 0.25,
            monitoring_interval_days: 84,
            max_retreatments: None,
        });
        assert_eq!(model.expected_checks_until_retreatment(), Some(4.0));
        assert!((model.probability_within(1) - 0.25).abs() < 1e-12);

        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let trials = 20_000_u32;
        let mut total_checks = 0_u32;
        for _ in 0..trials {
            let mut checks = 1;
            while !model.should_retreat(0, &mut rng) {
                checks += 1;
            }
            total_checks += checks;
        }
        let mean = f64::from(total_checks) / f64::from(trials);
        assert!((mean - 4.0).abs() < 0.15, "mean {mean}");
    }

    #[test]
    fn retreatment_cap_blocks_draws() {
        let model = RetreatmentModel::new(RetreatmentConfig {
            probability: 1.0,
            monitoring_interval_days: 28,
            max_retreatments: Some(1),
        });
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert!(model.should_retreat(0, &mut rng));
        assert!(!model.should_retreat(1, &mut rng));
    }

    #[test]
    fn zero_probability_never_retreats() {
        let model = RetreatmentModel::new(RetreatmentConfig {
            probability: 0.0,
            monitoring_interval_days: 28,
            max_retreatments: None,
        });
        assert_eq!(model.expected_checks_until_retreatment(), None);
    }
}
