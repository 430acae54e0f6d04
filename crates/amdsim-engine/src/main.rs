//! Engine binary for the AMD treatment simulation.
//!
//! Loads the engine configuration and protocol, runs the configured
//! number of replicate cohorts in parallel, and writes one JSON results
//! file per replicate plus a manifest.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `amdsim-config.yaml` (or `$AMDSIM_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Validate engine and run configuration
//! 4. Load and compile the protocol
//! 5. Install the interrupt handler
//! 6. Run replicates on blocking worker tasks
//! 7. Write results and manifest
//! 8. Log the summary

mod config;
mod error;
mod replicates;

use std::path::Path;
use std::sync::Arc;

use amdsim_core::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{EngineConfig, LogFormat, LoggingConfig};

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration is invalid, any replicate fails,
/// or results cannot be written.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = config::config_path();
    let config_found = config_path.exists();
    let config = if config_found {
        EngineConfig::from_file(&config_path)?
    } else {
        EngineConfig::default()
    };

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("amdsim-engine starting");
    if config_found {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }

    // 3. Validate.
    config.validate()?;

    // 4. Compile the protocol.
    let base_dir = config_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let params = Arc::new(config.load_protocol(base_dir)?);
    info!(
        protocol = params.name(),
        population = config.run.population,
        duration_days = config.run.duration_days,
        seed = config.run.seed,
        replicates = config.replicates,
        "Protocol compiled"
    );

    // 5. Ctrl-C cancels every replicate at its next event.
    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling replicates");
            interrupt.cancel();
        }
    });

    // 6. Run replicates.
    let results =
        replicates::run_replicates(Arc::clone(&params), &config.run, config.replicates, &token)
            .await?;

    // 7. Write results.
    let manifest = replicates::write_outputs(&results, config.run.seed, &config.output_dir)?;
    info!(
        output_dir = %config.output_dir.display(),
        files = manifest.replicates.len(),
        "Results written"
    );

    // 8. Summary.
    for entry in &manifest.replicates {
        info!(
            index = entry.index,
            run_id = %entry.run_id,
            fingerprint = %entry.fingerprint,
            patients = entry.summary.patients,
            visits = entry.summary.visits,
            injections_per_patient_year = entry.summary.injections_per_patient_year,
            mean_vision_change = entry.summary.mean_vision_change,
            retreatments = entry.summary.retreatments,
            deferrals = entry.summary.deferrals,
            unseen_patients = entry.summary.unseen_patients,
            "Replicate summary"
        );
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
