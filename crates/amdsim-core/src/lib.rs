//! Patient entity, cohort orchestration, and results for the AMD
//! treatment simulation.
//!
//! A run takes a validated [`ProtocolParameterSet`] and a [`RunConfig`],
//! enrolls the cohort, and advances it through a discrete-event queue
//! until no visit is pending within the run. The output is a
//! [`CohortResults`] holding flat patient and visit rows.
//!
//! # Modules
//!
//! - [`run`] -- run parameters, budget, cancellation, replicate seeds
//! - [`enrollment`] -- arrival patterns
//! - [`patient`] -- per-patient state machine
//! - [`resources`] -- daily capacity ledger
//! - [`cohort`] -- the event loop
//! - [`results`] -- output rows, summary, fingerprint
//! - [`error`] -- invariant and run errors
//!
//! [`ProtocolParameterSet`]: amdsim_protocol::ProtocolParameterSet

pub mod cohort;
pub mod enrollment;
pub mod error;
pub mod patient;
pub mod resources;
pub mod results;
pub mod run;

pub use cohort::{CohortRun, simulate};
pub use enrollment::EnrollmentPattern;
pub use error::{InvariantError, InvariantViolation, SimulationError};
pub use patient::{Patient, StepContext};
pub use resources::CapacityLedger;
pub use results::{CategorySummary, CohortResults, ResultsError, RunSummary};
pub use run::{CancellationToken, RunBudget, RunConfig, day_to_date, derive_replicate_seed};
