//! Enrollment patterns.
//!
//! Enrollment days are drawn from the run stream before any patient is
//! created, so the pattern alone decides the arrival calendar.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How patients arrive over the enrollment window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum EnrollmentPattern {
    /// Every patient enrolls on day 0.
    #[default]
    AllAtStart,
    /// Independent uniform days in `[0, window_days)`, sorted.
    Uniform {
        /// Length of the enrollment window.
        window_days: u32,
    },
    /// Evenly spaced days across `[0, window_days)`.
    EvenlySpaced {
        /// Length of the enrollment window.
        window_days: u32,
    },
}

impl EnrollmentPattern {
    /// Window length, or `None` for [`EnrollmentPattern::AllAtStart`].
    pub const fn window_days(&self) -> Option<u32> {
        match self {
            Self::AllAtStart => None,
            Self::Uniform { window_days } | Self::EvenlySpaced { window_days } => {
                Some(*window_days)
            }
        }
    }

    /// Latest day the pattern can enroll a patient on.
    pub const fn latest_day(&self) -> u32 {
        match self.window_days() {
            Some(window) => window.saturating_sub(1),
            None => 0,
        }
    }

    /// Enrollment day for each of `population` patients, in ascending order.
    ///
    /// Only [`EnrollmentPattern::Uniform`] consumes the stream.
    pub fn enrollment_days(&self, population: u32, rng: &mut impl Rng) -> Vec<u32> {
        match *self {
            Self::AllAtStart => vec![0; usize::try_from(population).unwrap_or(0)],
            Self::Uniform { window_days } => {
                let mut days: Vec<u32> = (0..population)
                    .map(|_| rng.random_range(0..window_days.max(1)))
                    .collect();
                days.sort_unstable();
                days
            }
            Self::EvenlySpaced { window_days } => (0..population)
                .map(|i| {
                    let offset = u64::from(i)
                        .saturating_mul(u64::from(window_days))
                        .checked_div(u64::from(population))
                        .unwrap_or(0);
                    u32::try_from(offset).unwrap_or(u32::MAX)
                })
                .collect(),
        }
    }
}
