//! Visit scheduling.
//!
//! The loading phase always comes first: after each of the first
//! `visit_count - 1` treatment visits the next visit is one loading
//! interval away. Once the last loading visit is done the maintenance
//! policy takes over, starting from its initial interval.

use amdsim_protocol::{LoadingParams, SchedulePolicy};
use amdsim_types::{DiseaseState, ProtocolPhase};
use tracing::trace;

/// Per-patient scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleState {
    /// Treatment visits completed in the current course.
    treatment_visits: u32,
    /// Set once the loading phase has ended; never cleared.
    loading_complete: bool,
    /// Last maintenance interval issued.
    current_interval: Option<u32>,
    /// Maintenance intervals issued in the current course.
    maintenance_steps: u32,
}

impl ScheduleState {
    /// Fresh state for a newly enrolled patient.
    pub const fn new() -> Self {
        Self {
            treatment_visits: 0,
            loading_complete: false,
            current_interval: None,
            maintenance_steps: 0,
        }
    }

    /// Phase of the next treatment visit.
    pub const fn phase(&self, loading: &LoadingParams) -> ProtocolPhase {
        if !self.loading_complete && self.treatment_visits < loading.visit_count {
            ProtocolPhase::Loading
        } else {
            ProtocolPhase::Maintenance
        }
    }

    /// Last maintenance interval issued, if any.
    pub const fn current_interval(&self) -> Option<u32> {
        self.current_interval
    }

    /// Whether the loading phase has ended.
    pub const fn loading_complete(&self) -> bool {
        self.loading_complete
    }

    /// Record a completed treatment visit and return the days until the
    /// next one.
    ///
    /// `outcome` is the disease state observed at the visit; only
    /// treat-and-extend looks at it.
    pub fn next_interval(
        &mut self,
        loading: &LoadingParams,
        policy: &SchedulePolicy,
        outcome: DiseaseState,
    ) -> u32 {
        let in_loading = self.phase(loading) == ProtocolPhase::Loading;
        self.treatment_visits = self.treatment_visits.saturating_add(1);

        if in_loading && self.treatment_visits < loading.visit_count {
            trace!(visit = self.treatment_visits, "Loading interval");
            return loading.interval_days;
        }
        self.loading_complete = true;

        let interval = match (policy, self.current_interval) {
            (
                SchedulePolicy::TreatAndExtend {
                    min_interval_days,
                    max_interval_days,
                    extension_days,
                    reduction_days,
                    ..
                },
                Some(current),
            ) if !in_loading => {
                let adjusted = match outcome {
                    DiseaseState::Stable => current.saturating_add(*extension_days),
                    DiseaseState::Active | DiseaseState::HighlyActive => {
                        current.saturating_sub(*reduction_days)
                    }
                    DiseaseState::Naive => current,
                };
                adjusted.clamp(*min_interval_days, *max_interval_days)
            }
            (policy, _) => initial_interval(policy, self.maintenance_steps),
        };

        self.current_interval = Some(interval);
        self.maintenance_steps = self.maintenance_steps.saturating_add(1);
        trace!(?outcome, interval, "Maintenance interval");
        interval
    }

    /// Reset for a new course after retreatment.
    ///
    /// Loading is not repeated; the maintenance policy restarts from its
    /// initial interval.
    pub const fn restart_after_retreatment(&mut self) {
        self.loading_complete = true;
        self.current_interval = None;
        self.maintenance_steps = 0;
    }
}

/// Interval for a policy that ignores the outcome, or the first interval
/// of treat-and-extend.
fn initial_interval(policy: &SchedulePolicy, step: u32) -> u32 {
    match policy {
        SchedulePolicy::FixedInterval { interval_days }
        | SchedulePolicy::TreatAndTreat { interval_days } => *interval_days,
        SchedulePolicy::TreatAndExtend {
            initial_interval_days,
            ..
        } => *initial_interval_days,
        SchedulePolicy::TimeBased { intervals_days } => {
            let index = usize::try_from(step).unwrap_or(usize::MAX);
            intervals_days
                .get(index)
                .or_else(|| intervals_days.last())
                .copied()
                .unwrap_or(1)
        }
    }
}

/// Whether a treatment visit administers an injection.
///
/// Loading visits always inject. Fixed-interval monitoring injects only
/// on active disease; every other policy injects at every visit.
pub const fn injection_due(
    policy: &SchedulePolicy,
    phase: ProtocolPhase,
    state: DiseaseState,
) -> bool {
    match phase {
        ProtocolPhase::Loading => true,
        ProtocolPhase::Maintenance => match policy {
            SchedulePolicy::FixedInterval { .. } => state.is_active(),
            SchedulePolicy::TreatAndExtend { .. }
            | SchedulePolicy::TreatAndTreat { .. }
            | SchedulePolicy::TimeBased { .. } => true,
        },
    }
}
