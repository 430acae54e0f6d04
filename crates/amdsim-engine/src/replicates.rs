//! Replicate runs and their output files.
//!
//! Each replicate is a full cohort run with its own derived seed. Runs
//! are CPU-bound and share nothing mutable, so each goes to its own
//! blocking worker task and they proceed in parallel.

use std::path::Path;
use std::sync::Arc;

use amdsim_core::{
    CancellationToken, CohortResults, CohortRun, ResultsError, RunConfig, RunSummary,
};
use amdsim_protocol::ProtocolParameterSet;
use amdsim_types::RunId;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// File listing every replicate written to the output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Index of the replicates written by one engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Protocol name shared by all replicates.
    pub protocol: String,
    /// Seed the replicate seeds were derived from.
    pub base_seed: u64,
    /// One entry per replicate, in index order.
    pub replicates: Vec<ManifestEntry>,
}

/// One replicate in the [`Manifest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Replicate index.
    pub index: u32,
    /// Run id of the replicate.
    pub run_id: RunId,
    /// Derived seed the replicate ran with.
    pub seed: u64,
    /// Results file name, relative to the output directory.
    pub file: String,
    /// Content hash of the results.
    pub fingerprint: String,
    /// Aggregate statistics.
    pub summary: RunSummary,
}

/// Run `count` replicates of `run` in parallel and collect them in index
/// order.
///
/// The first replicate to fail cancels the others; every task is drained
/// before returning, so no worker outlives the call.
///
/// # Errors
///
/// Returns [`EngineError::Simulation`] for the first replicate to fail,
/// or [`EngineError::Worker`] if a worker task died.
pub async fn run_replicates(
    params: Arc<ProtocolParameterSet>,
    run: &RunConfig,
    count: u32,
    token: &CancellationToken,
) -> Result<Vec<CohortResults>, EngineError> {
    let mut tasks = JoinSet::new();
    for index in 0..count {
        let params = Arc::clone(&params);
        let config = run.replicate(index);
        let token = token.clone();
        tasks.spawn_blocking(move || {
            let outcome = CohortRun::new(&params, config)
                .map(|cohort| cohort.with_cancellation(token))
                .and_then(CohortRun::run);
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<CohortResults>> = Vec::new();
    slots.resize_with(usize::try_from(count).unwrap_or(0), || None);
    let mut failure: Option<EngineError> = None;

    while let Some(joined) = tasks.join_next().await {
        let (index, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                token.cancel();
                failure.get_or_insert(EngineError::Worker {
                    message: format!("replicate task failed: {e}"),
                });
                continue;
            }
        };
        match outcome {
            Ok(cohort) => {
                info!(
                    index,
                    run_id = %cohort.run_id(),
                    seed = cohort.config().seed,
                    visits = cohort.get_visits().len(),
                    "Replicate finished"
                );
                if let Some(slot) = usize::try_from(index).ok().and_then(|i| slots.get_mut(i)) {
                    *slot = Some(cohort);
                }
            }
            Err(source) if failure.is_none() => {
                warn!(index, error = %source, "Replicate failed, cancelling the rest");
                token.cancel();
                failure = Some(EngineError::Simulation { index, source });
            }
            Err(source) => {
                debug!(index, error = %source, "Replicate stopped after an earlier failure");
            }
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }
    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| EngineError::Worker {
            message: "replicate finished without a result".to_owned(),
        })
}

/// Write each replicate to `replicate-NNN.json` under `dir`, followed by
/// the [`Manifest`].
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the directory cannot be created, or
/// [`EngineError::Results`] if serialization or a write fails.
pub fn write_outputs(
    results: &[CohortResults],
    base_seed: u64,
    dir: &Path,
) -> Result<Manifest, EngineError> {
    std::fs::create_dir_all(dir)?;

    let mut entries = Vec::with_capacity(results.len());
    for (index, cohort) in (0_u32..).zip(results) {
        let file = format!("replicate-{index:03}.json");
        cohort.write_json(&dir.join(&file))?;
        entries.push(ManifestEntry {
            index,
            run_id: cohort.run_id(),
            seed: cohort.config().seed,
            file,
            fingerprint: cohort.fingerprint()?,
            summary: cohort.summary(),
        });
    }

    let manifest = Manifest {
        protocol: results
            .first()
            .map(|cohort| cohort.protocol().to_owned())
            .unwrap_or_default(),
        base_seed,
        replicates: entries,
    };
    let json = serde_json::to_string_pretty(&manifest).map_err(ResultsError::from)?;
    std::fs::write(dir.join(MANIFEST_FILE), json).map_err(ResultsError::from)?;
    Ok(manifest)
}
