//! Run parameters, budget, and cancellation.
//!
//! A [`RunConfig`] is everything besides the protocol that determines a
//! cohort run. Two runs with equal protocol and equal `RunConfig` produce
//! identical results.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use amdsim_protocol::ConfigurationError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::enrollment::EnrollmentPattern;

/// Parameters of one cohort run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of patients.
    #[serde(default = "default_population")]
    pub population: u32,

    /// Simulated days; visits on or after this day are not simulated.
    #[serde(default = "default_duration_days")]
    pub duration_days: u32,

    /// Arrival pattern.
    #[serde(default)]
    pub enrollment: EnrollmentPattern,

    /// Seed of the run stream.
    #[serde(default)]
    pub seed: u64,

    /// Calendar instant of day 0.
    #[serde(default = "default_start_date")]
    pub start_date: DateTime<Utc>,

    /// Optional limits on work done.
    #[serde(default)]
    pub budget: RunBudget,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            population: default_population(),
            duration_days: default_duration_days(),
            enrollment: EnrollmentPattern::default(),
            seed: 0,
            start_date: default_start_date(),
            budget: RunBudget::default(),
        }
    }
}

impl RunConfig {
    /// Load a run configuration from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Io`] or [`ConfigurationError::Yaml`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse a run configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Copy with the seed replaced by the derived seed of replicate `index`.
    #[must_use]
    pub fn replicate(&self, index: u32) -> Self {
        Self {
            seed: derive_replicate_seed(self.seed, index),
            ..self.clone()
        }
    }

    /// Follow-up every patient is guaranteed: days from the latest
    /// possible enrollment to the run end.
    ///
    /// Discontinuation curves are normalized over this span unless the
    /// protocol sets its own horizon, so each patient can be exposed to the
    /// full target incidence before the run ends.
    pub const fn follow_up_days(&self) -> u32 {
        self.duration_days
            .saturating_sub(self.enrollment.latest_day())
    }

    /// Check the run parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] when the population or
    /// duration is zero, the enrollment window is empty or extends past the
    /// run, or the run end is not a representable date.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.population == 0 {
            return Err(ConfigurationError::invalid(
                "run.population",
                "population must be at least 1",
            ));
        }
        if self.duration_days == 0 {
            return Err(ConfigurationError::invalid(
                "run.duration_days",
                "duration must be at least one day",
            ));
        }
        if let Some(window) = self.enrollment.window_days() {
            if window == 0 {
                return Err(ConfigurationError::invalid(
                    "run.enrollment.window_days",
                    "enrollment window must be at least one day",
                ));
            }
            if window > self.duration_days {
                return Err(ConfigurationError::invalid(
                    "run.enrollment.window_days",
                    format!(
                        "window of {window} days extends past the {} day run",
                        self.duration_days
                    ),
                ));
            }
        }
        if day_to_date(self.start_date, self.duration_days).is_none() {
            return Err(ConfigurationError::invalid(
                "run.start_date",
                "run end is not a representable date",
            ));
        }
        if self.budget.max_visits == Some(0) || self.budget.max_wall_time_ms == Some(0) {
            return Err(ConfigurationError::invalid(
                "run.budget",
                "budget limits must be positive when set",
            ));
        }
        Ok(())
    }
}

const fn default_population() -> u32 {
    1_000
}

const fn default_duration_days() -> u32 {
    amdsim_types::DAYS_PER_YEAR.saturating_mul(5)
}

const fn default_start_date() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Calendar instant of simulation day `day`.
pub fn day_to_date(start: DateTime<Utc>, day: u32) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(day)).and_then(|delta| start.checked_add_signed(delta))
}

/// Limits on the work one run may do.
///
/// Exceeding a limit aborts the run with
/// [`SimulationError::ResourceExhaustion`](crate::SimulationError::ResourceExhaustion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunBudget {
    /// Maximum visits processed.
    #[serde(default)]
    pub max_visits: Option<u64>,
    /// Maximum wall-clock milliseconds.
    #[serde(default)]
    pub max_wall_time_ms: Option<u64>,
}

/// Seed for replicate `index` of a sweep over `base`.
///
/// `SplitMix64` finalizer over the base seed offset by the index, so
/// neighbouring replicates get unrelated streams.
pub fn derive_replicate_seed(base: u64, index: u32) -> u64 {
    let offset = u64::from(index)
        .wrapping_add(1)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut z = base.wrapping_add(offset);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Shared flag to stop a run between events.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        assert_eq!(RunConfig::parse("{}").unwrap(), RunConfig::default());
    }

    #[test]
    fn yaml_overrides() {
        let yaml = "population: 50\nduration_days: 365\nseed: 7\nenrollment:\n  pattern: evenly_spaced\n  window_days: 90\nstart_date: 2024-01-01T00:00:00Z\nbudget:\n  max_visits: 1000\n";
        let config = RunConfig::parse(yaml).unwrap();
        assert_eq!(config.population, 50);
        assert_eq!(config.enrollment, EnrollmentPattern::EvenlySpaced { window_days: 90 });
        assert_eq!(config.budget.max_visits, Some(1_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn window_past_run_rejected() {
        let config = RunConfig {
            duration_days: 100,
            enrollment: EnrollmentPattern::Uniform { window_days: 200 },
            ..RunConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("run.enrollment.window_days"));
    }

    #[test]
    fn follow_up_shrinks_with_enrollment_window() {
        let config = RunConfig {
            duration_days: 1_825,
            enrollment: EnrollmentPattern::Uniform { window_days: 365 },
            ..RunConfig::default()
        };
        assert_eq!(config.follow_up_days(), 1_461);
        let at_start = RunConfig {
            enrollment: EnrollmentPattern::AllAtStart,
            ..config
        };
        assert_eq!(at_start.follow_up_days(), 1_825);
    }

    #[test]
    fn zero_population_rejected() {
        let config = RunConfig {
            population: 0,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn replicate_seeds_differ_and_are_stable() {
        let a = derive_replicate_seed(42, 0);
        let b = derive_replicate_seed(42, 1);
        assert_ne!(a, b);
        assert_eq!(a, derive_replicate_seed(42, 0));
        assert_ne!(derive_replicate_seed(0, 0), 0);
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn day_dates() {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let date = day_to_date(start, 1).unwrap();
        assert_eq!((date - start).num_days(), 1);
    }
}
