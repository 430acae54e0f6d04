//! Error types for the model crate.
//!
//! Validated parameter sets never trigger these; they exist so that a
//! distribution constructor failure propagates instead of panicking.

/// Errors raised by model evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A probability distribution could not be constructed.
    #[error("invalid distribution for {context}: {reason}")]
    Distribution {
        /// What the distribution was for.
        context: String,
        /// The underlying constructor error.
        reason: String,
    },
}
