//! Sampling primitives shared by the models.
//!
//! Every draw goes through these helpers so that the order in which a
//! visit consumes its random stream is easy to audit.

use amdsim_protocol::NormalParams;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::ModelError;

/// Draw a uniform value in `[0, 1)`.
pub fn unit(rng: &mut impl Rng) -> f64 {
    rng.random::<f64>()
}

/// Draw from a normal distribution.
///
/// A zero standard deviation returns the mean without consuming the stream.
pub fn normal(
    rng: &mut impl Rng,
    params: NormalParams,
    context: &str,
) -> Result<f64, ModelError> {
    if params.sd <= 0.0 {
        return Ok(params.mean);
    }
    let dist = Normal::new(params.mean, params.sd).map_err(|e| ModelError::Distribution {
        context: context.to_owned(),
        reason: e.to_string(),
    })?;
    Ok(dist.sample(rng))
}

/// Inverse-CDF draw over `(item, probability)` pairs in the given order.
///
/// Consumes exactly one uniform. If rounding leaves the draw beyond the
/// cumulative total, the last item with positive probability is returned.
/// Returns `None` only when every probability is zero.
pub fn categorical<T: Copy>(
    rng: &mut impl Rng,
    items: impl IntoIterator<Item = (T, f64)>,
) -> Option<T> {
    let u = unit(rng);
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (item, probability) in items {
        if probability <= 0.0 {
            continue;
        }
        cumulative += probability;
        last_positive = Some(item);
        if u < cumulative {
            return Some(item);
        }
    }
    last_positive
}
