//! Stochastic models for the AMD treatment simulation.
//!
//! Every function here is a pure computation over a validated
//! [`amdsim_protocol::ProtocolParameterSet`] and a caller-supplied random
//! stream:
//!
//! - [`disease`] samples disease activity transitions
//! - [`vision`] computes acuity change and measurement
//! - [`discontinuation`] decides discontinuation and retreatment
//! - [`scheduler`] picks the next visit interval and injection decision
//!
//! No model holds patient state beyond what it is passed; the patient
//! entity in `amdsim-core` owns that.

pub mod disease;
pub mod discontinuation;
pub mod error;
pub mod sampling;
pub mod scheduler;
pub mod vision;

pub use discontinuation::{CumulativeCurve, DiscontinuationModel, RetreatmentModel};
pub use error::ModelError;
pub use scheduler::{ScheduleState, injection_due};
pub use vision::{Baseline, VisionInput, VisionOutcome};
