//! Error types for cohort simulation.
//!
//! Configuration problems surface before any patient exists. Invariant
//! violations abort the offending run only and carry the patient and step
//! needed to reproduce them with the same seed.

use amdsim_models::ModelError;
use amdsim_protocol::ConfigurationError;
use amdsim_types::{PatientId, VisitError};

/// A data-model invariant that a computed visit would break.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// A visit day does not strictly exceed the previous visit day.
    #[error("visit day {day} does not follow previous day {previous}")]
    NonMonotonicTime {
        /// Day of the previous visit (or the day the next visit was computed from).
        previous: u32,
        /// Offending day.
        day: u32,
    },

    /// Recorded acuity outside protocol bounds.
    #[error("vision {letters} outside [{min}, {max}]")]
    VisionOutOfBounds {
        /// Recorded letters.
        letters: i32,
        /// Lower bound.
        min: i32,
        /// Upper bound.
        max: i32,
    },

    /// A patient's first visit was marked as a discontinuation.
    #[error("first visit cannot be a discontinuation")]
    DiscontinuationOnFirstVisit,

    /// A retreatment visit without a prior discontinuation visit.
    #[error("retreatment without a prior discontinuation")]
    RetreatmentWithoutDiscontinuation,

    /// A step was requested on a finalized patient.
    #[error("patient is finalized")]
    PatientFinalized,

    /// The first visit did not happen on the enrollment day.
    #[error("first visit on day {day}, enrolled on day {enrollment_day}")]
    FirstVisitNotAtEnrollment {
        /// Enrollment day.
        enrollment_day: u32,
        /// Day of the attempted first visit.
        day: u32,
    },

    /// Visit fields are inconsistent with the visit kind.
    #[error("inconsistent visit: {source}")]
    InconsistentVisit {
        /// The construction failure.
        source: VisitError,
    },
}

impl From<VisitError> for InvariantViolation {
    fn from(source: VisitError) -> Self {
        match source {
            VisitError::VisionOutOfBounds { letters, min, max } => {
                Self::VisionOutOfBounds { letters, min, max }
            }
            other => Self::InconsistentVisit { source: other },
        }
    }
}

/// An invariant violation tied to the patient and step that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invariant violated for patient {patient_id} at step {step_index}: {violation}")]
pub struct InvariantError {
    /// Offending patient.
    pub patient_id: PatientId,
    /// Zero-based index of the step being processed.
    pub step_index: u32,
    /// What went wrong.
    pub violation: InvariantViolation,
}

/// Errors that end a cohort run.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// The protocol or run configuration is malformed.
    #[error("configuration error: {source}")]
    Configuration {
        /// The underlying configuration error.
        #[from]
        source: ConfigurationError,
    },

    /// A computed state broke a data-model invariant.
    #[error("{source}")]
    Invariant {
        /// The underlying invariant error.
        #[from]
        source: InvariantError,
    },

    /// A model evaluation failed.
    #[error("model error: {source}")]
    Model {
        /// The underlying model error.
        #[from]
        source: ModelError,
    },

    /// A run budget was exceeded; partial results are discarded.
    #[error("resource budget exhausted: {reason}")]
    ResourceExhaustion {
        /// Which budget was exceeded.
        reason: String,
    },

    /// The run was cancelled between events.
    #[error("run cancelled after {events_processed} events")]
    Cancelled {
        /// Visits processed before cancellation was observed.
        events_processed: u64,
    },
}
