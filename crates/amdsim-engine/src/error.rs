//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode between reading the config
//! file and writing the last result file, so `main` can propagate with `?`.

use amdsim_core::{ResultsError, SimulationError};
use amdsim_protocol::ConfigurationError;

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Engine, protocol, or run configuration is unusable.
    #[error("config error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: ConfigurationError,
    },

    /// A replicate run failed.
    #[error("replicate {index} failed: {source}")]
    Simulation {
        /// Replicate index.
        index: u32,
        /// The underlying run error.
        source: SimulationError,
    },

    /// Serializing or writing results failed.
    #[error("results error: {source}")]
    Results {
        /// The underlying results error.
        #[from]
        source: ResultsError,
    },

    /// Output directory could not be prepared.
    #[error("output error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A blocking worker task panicked or was aborted.
    #[error("worker error: {message}")]
    Worker {
        /// Description of the worker failure.
        message: String,
    },
}
