//! Visual acuity response.
//!
//! Each visit produces a letter change drawn from the table for the new
//! disease state, shaped by the patient's response type, vision memory,
//! ceiling headroom, and regression toward the population mean. The
//! resulting true acuity is clamped to bounds; the recorded value adds
//! measurement noise on top and never feeds back into the true value.

use amdsim_protocol::{NormalParams, ProtocolParameterSet};
use amdsim_types::{DiseaseState, LoadingOutcome, ProtocolPhase, ResponseType, TimeBucket};
use rand::Rng;
use tracing::trace;

use crate::error::ModelError;
use crate::sampling;

/// Everything the vision model needs to know about one visit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionInput {
    /// Disease state sampled for this visit.
    pub state: DiseaseState,
    /// Whether the patient is on treatment at this visit.
    pub treated: bool,
    /// Protocol phase of this visit.
    pub phase: ProtocolPhase,
    /// Time bucket of this visit.
    pub bucket: TimeBucket,
    /// The patient's response type multiplier.
    pub response_multiplier: f64,
    /// True acuity after the previous visit.
    pub previous_vision: f64,
    /// True change applied at the previous visit.
    pub previous_delta: f64,
}

/// Result of one vision update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionOutcome {
    /// New true acuity, within bounds.
    pub true_vision: f64,
    /// Recorded acuity including measurement noise, within bounds.
    pub recorded_letters: i32,
    /// Change actually applied to the true acuity after clamping.
    pub delta: f64,
    /// Loading outcome drawn, for loading visits only.
    pub loading_outcome: Option<LoadingOutcome>,
}

/// Baseline draw for a new patient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    /// True baseline acuity.
    pub true_vision: f64,
    /// Recorded baseline letters.
    pub recorded_letters: i32,
}

/// Draw a patient's baseline acuity, clamped to bounds.
pub fn sample_baseline(
    params: &ProtocolParameterSet,
    rng: &mut impl Rng,
) -> Result<Baseline, ModelError> {
    let bounds = params.bounds();
    let drawn = sampling::normal(rng, params.baseline(), "baseline vision")?;
    let true_vision = clamp_to_bounds(params, drawn);
    Ok(Baseline {
        true_vision,
        recorded_letters: round_letters(true_vision, bounds.min_letters, bounds.max_letters),
    })
}

/// Draw a patient's response type.
pub fn assign_response_type(params: &ProtocolParameterSet, rng: &mut impl Rng) -> ResponseType {
    let table = params.response_types();
    sampling::categorical(rng, table.iter().map(|(t, p, _)| (t, p)))
        .unwrap_or(ResponseType::Average)
}

/// Compute the acuity change and new acuity for one visit.
pub fn respond(
    params: &ProtocolParameterSet,
    input: &VisionInput,
    rng: &mut impl Rng,
) -> Result<VisionOutcome, ModelError> {
    let modifiers = params.modifiers();

    let (raw, loading_outcome) = if input.treated && input.phase == ProtocolPhase::Loading {
        let loading = params.loading();
        let outcome = sampling::categorical(rng, loading.outcomes().map(|(o, p, _)| (o, p)))
            .unwrap_or(LoadingOutcome::Stable);
        let dist = loading
            .outcomes()
            .find(|(o, _, _)| *o == outcome)
            .map_or(NormalParams::new(0.0, 0.0), |(_, _, n)| n);
        (sampling::normal(rng, dist, "loading outcome")?, Some(outcome))
    } else {
        let mut dist = params.vision_change().params(input.state, input.treated);
        if input.treated {
            dist.mean *= params.time_bucket_multiplier(input.bucket);
        }
        (sampling::normal(rng, dist, "vision change")?, None)
    };

    let mut delta = raw * input.response_multiplier;
    delta = (1.0 - modifiers.memory).mul_add(delta, modifiers.memory * input.previous_delta);
    if delta > 0.0 {
        delta *= headroom_factor(params, input.previous_vision);
    }
    delta -= modifiers.regression * (input.previous_vision - params.baseline().mean);

    let true_vision = clamp_to_bounds(params, input.previous_vision + delta);
    let noisy = sampling::normal(
        rng,
        NormalParams::new(true_vision, params.measurement_noise_sd()),
        "measurement noise",
    )?;
    let bounds = params.bounds();
    let recorded_letters = round_letters(noisy, bounds.min_letters, bounds.max_letters);

    trace!(
        state = ?input.state,
        treated = input.treated,
        delta,
        true_vision,
        recorded_letters,
        "Vision response"
    );

    Ok(VisionOutcome {
        true_vision,
        recorded_letters,
        delta: true_vision - input.previous_vision,
        loading_outcome,
    })
}

/// Scale applied to gains: `(1 - h) + h * remaining`, where `remaining`
/// is the fraction of the range still above the current acuity.
fn headroom_factor(params: &ProtocolParameterSet, vision: f64) -> f64 {
    let h = params.modifiers().headroom;
    let bounds = params.bounds();
    let span = bounds.span();
    if span <= 0.0 {
        return 1.0 - h;
    }
    let remaining = ((f64::from(bounds.max_letters) - vision) / span).clamp(0.0, 1.0);
    h.mul_add(remaining, 1.0 - h)
}

fn clamp_to_bounds(params: &ProtocolParameterSet, value: f64) -> f64 {
    let bounds = params.bounds();
    value.clamp(f64::from(bounds.min_letters), f64::from(bounds.max_letters))
}

#[allow(clippy::cast_possible_truncation)]
fn round_letters(value: f64, min: i32, max: i32) -> i32 {
    // Clamped in float space first, so the cast cannot truncate.
    value.round().clamp(f64::from(min), f64::from(max)) as i32
}
