//! Protocol parameter sets for the wet AMD treatment simulation.
//!
//! A protocol is authored as YAML ([`ProtocolConfig`]) and compiled once
//! into an immutable [`ProtocolParameterSet`]. Compilation is where every
//! configuration error surfaces; a compiled set is valid by construction.
//!
//! # Modules
//!
//! - [`config`] -- Raw YAML schema with reference defaults
//! - [`error`] -- [`ConfigurationError`]
//! - [`params`] -- Validation and the compiled [`ProtocolParameterSet`]

pub mod config;
pub mod error;
pub mod params;

pub use config::{
    CategoryConfig, CurveShape, DiscontinuationConfig, LoadingConfig, LoadingOutcomeConfig,
    NormalParams, ProtocolConfig, ResourceConfig, ResponseModifiers, ResponseTypeConfig,
    RetreatmentConfig, SchedulePolicy, TimeBucketMultipliers, TransitionConfig, VisionChangeConfig,
    VisionConfig,
};
pub use error::ConfigurationError;
pub use params::{
    LoadingParams, PROBABILITY_TOLERANCE, ProtocolParameterSet, ResourceCapacity,
    ResponseTypeTable, StateTable, TransitionMatrices, TransitionProbabilities, VisionChangeTable,
    validate_category,
};
