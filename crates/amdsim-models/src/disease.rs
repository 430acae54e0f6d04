//! Disease activity transitions.
//!
//! A patient's activity state moves through a Markov chain whose matrix
//! depends on the treatment regime of the visit being simulated. Sampling
//! uses one uniform per visit, walked through the row in severity order.

use amdsim_protocol::ProtocolParameterSet;
use amdsim_types::{DiseaseState, ProtocolPhase, TransitionRegime};
use rand::Rng;
use tracing::trace;

use crate::sampling;

/// Sample the next disease state.
///
/// `phase` and `treatment_active` describe the visit being simulated and
/// select the matrix via [`TransitionRegime::for_visit`]. A row whose
/// probabilities are all zero (impossible after validation) leaves the
/// state unchanged.
pub fn next_state(
    params: &ProtocolParameterSet,
    current: DiseaseState,
    phase: ProtocolPhase,
    treatment_active: bool,
    rng: &mut impl Rng,
) -> DiseaseState {
    let regime = TransitionRegime::for_visit(phase, treatment_active);
    let row = params.transitions().row(regime, current);
    let next = sampling::categorical(rng, row.iter()).unwrap_or(current);
    trace!(?regime, from = ?current, to = ?next, "Disease transition");
    next
}

/// Distribution of states after `steps` transitions in a fixed regime.
///
/// Starts from a point mass on `start`. Useful for checking calibrations
/// against observed activity shares.
pub fn propagate(
    params: &ProtocolParameterSet,
    start: DiseaseState,
    regime: TransitionRegime,
    steps: u32,
) -> [f64; 4] {
    let mut dist = [0.0; 4];
    for (slot, state) in dist.iter_mut().zip(DiseaseState::ALL) {
        if state == start {
            *slot = 1.0;
        }
    }
    for _ in 0..steps {
        let mut next = [0.0; 4];
        for (from, mass) in DiseaseState::ALL.into_iter().zip(dist) {
            if mass <= 0.0 {
                continue;
            }
            let row = params.transitions().row(regime, from);
            for (slot, (_, p)) in next.iter_mut().zip(row.iter()) {
                *slot += mass * p;
            }
        }
        dist = next;
    }
    dist
}
