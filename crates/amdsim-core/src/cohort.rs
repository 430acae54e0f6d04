//! Cohort orchestrator.
//!
//! A run enrolls every patient up front and then drives a discrete-event
//! loop: a min-heap of pending visits ordered by `(day, sequence)`. Each
//! pop advances exactly one patient by one visit and pushes that
//! patient's next visit back onto the heap. The loop ends when the heap is
//! empty or the next visit falls on or after the last simulated day.
//!
//! Ties on the same day are served in insertion order. Patients draw from
//! their own streams, so the interleaving never changes a trajectory.
//!
//! # Capacity
//!
//! When the protocol configures resources, each popped visit books a slot
//! on its day. A full day pushes the visit back one day and re-queues it;
//! the visit records how many days it slipped. A first visit pushed past
//! the run end means the patient was never seen; it is counted but not
//! emitted. A later visit pushed past the end triggers the patient's
//! closing discontinuation assessment.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use amdsim_models::{DiscontinuationModel, RetreatmentModel};
use amdsim_protocol::ProtocolParameterSet;
use amdsim_types::{PatientId, RunId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::error::SimulationError;
use crate::patient::{Patient, StepContext};
use crate::resources::CapacityLedger;
use crate::results::CohortResults;
use crate::run::{CancellationToken, RunConfig};

/// Deferral length at which a single visit is reported.
const DEFERRAL_WARN_DAYS: u32 = 14;

/// A pending visit in the event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledVisit {
    day: u32,
    sequence: u64,
    patient: usize,
    deferred_days: u32,
}

/// A cohort run that has enrolled its patients and is ready to simulate.
#[derive(Debug)]
pub struct CohortRun<'a> {
    params: &'a ProtocolParameterSet,
    config: RunConfig,
    run_id: RunId,
    discontinuation: DiscontinuationModel,
    retreatment: RetreatmentModel,
    patients: Vec<Patient>,
    cancellation: CancellationToken,
}

impl<'a> CohortRun<'a> {
    /// Validate the run, compile the run-level models, and enroll patients.
    ///
    /// Nothing is enrolled unless all configuration checks pass.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Configuration`] for an invalid run or
    /// discontinuation setup, or [`SimulationError::Model`] if a baseline
    /// draw fails.
    pub fn new(params: &'a ProtocolParameterSet, config: RunConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let discontinuation =
            DiscontinuationModel::new(params.discontinuation(), config.follow_up_days())?;
        let retreatment = RetreatmentModel::new(*params.retreatment());

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let run_id = RunId::from_random_bytes(random_bytes(&mut rng));
        let days = config.enrollment.enrollment_days(config.population, &mut rng);

        let mut patients = Vec::with_capacity(days.len());
        for day in days {
            let seed = rng.random::<u64>();
            let id = PatientId::from_random_bytes(random_bytes(&mut rng));
            patients.push(Patient::enroll(id, day, seed, params)?);
        }

        debug!(
            run_id = %run_id,
            population = patients.len(),
            horizon_days = discontinuation.horizon_days(),
            "Cohort enrolled"
        );

        Ok(Self {
            params,
            config,
            run_id,
            discontinuation,
            retreatment,
            patients,
            cancellation: CancellationToken::new(),
        })
    }

    /// Attach a cancellation token checked between events.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Run identifier, derived from the seed.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Enrolled patients.
    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    /// Compiled discontinuation model of this run.
    pub const fn discontinuation(&self) -> &DiscontinuationModel {
        &self.discontinuation
    }

    /// Simulate until no visit is pending within the run.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Invariant`] if a patient step breaks an
    /// invariant, [`SimulationError::ResourceExhaustion`] if the budget is
    /// exceeded, or [`SimulationError::Cancelled`] if the token fires.
    /// Partial results are never returned.
    pub fn run(mut self) -> Result<CohortResults, SimulationError> {
        let started = Instant::now();
        let end_day = self.config.duration_days;
        let budget = self.config.budget;

        info!(
            run_id = %self.run_id,
            protocol = self.params.name(),
            population = self.config.population,
            duration_days = end_day,
            seed = self.config.seed,
            "Cohort run starting"
        );

        let mut queue: BinaryHeap<Reverse<ScheduledVisit>> = BinaryHeap::new();
        let mut sequence: u64 = 0;
        for (patient, entry) in self.patients.iter().enumerate() {
            if let Some(day) = entry.next_visit_day().filter(|d| *d < end_day) {
                queue.push(Reverse(ScheduledVisit {
                    day,
                    sequence,
                    patient,
                    deferred_days: 0,
                }));
                sequence = sequence.saturating_add(1);
            }
        }

        let mut ledger = self.params.resources().map(CapacityLedger::new);
        let ctx = StepContext {
            params: self.params,
            discontinuation: &self.discontinuation,
            retreatment: &self.retreatment,
            end_day,
        };
        let mut events_processed: u64 = 0;
        let mut deferrals: u32 = 0;
        let mut unseen: u32 = 0;

        while let Some(Reverse(event)) = queue.pop() {
            if self.cancellation.is_cancelled() {
                info!(events_processed, "Cohort run cancelled");
                return Err(SimulationError::Cancelled { events_processed });
            }
            if event.day >= end_day {
                break;
            }
            if let Some(max) = budget.max_visits {
                if events_processed >= max {
                    return Err(SimulationError::ResourceExhaustion {
                        reason: format!("visit budget of {max} exhausted"),
                    });
                }
            }
            if let Some(max_ms) = budget.max_wall_time_ms {
                if started.elapsed().as_millis() > u128::from(max_ms) {
                    return Err(SimulationError::ResourceExhaustion {
                        reason: format!("wall time budget of {max_ms} ms exhausted"),
                    });
                }
            }

            let Some(patient) = self.patients.get_mut(event.patient) else {
                continue;
            };

            if let Some(ledger) = ledger.as_mut() {
                if !ledger.try_book(event.day) {
                    let day = event.day.saturating_add(1);
                    let deferred_days = event.deferred_days.saturating_add(1);
                    deferrals = deferrals.saturating_add(1);
                    if deferred_days == DEFERRAL_WARN_DAYS {
                        warn!(
                            patient_id = %patient.id(),
                            deferred_days,
                            capacity = ledger.visits_per_day(),
                            "Visit deferred repeatedly by clinic capacity"
                        );
                    }
                    if day >= end_day {
                        // Pushed out of the run: a patient never seen keeps
                        // its enrollment and is left out of the results; a
                        // patient on treatment gets its closing assessment.
                        if patient.visits().is_empty() {
                            unseen = unseen.saturating_add(1);
                        } else {
                            patient.close_out(&ctx)?;
                        }
                        continue;
                    }
                    if patient.visits().is_empty() {
                        patient.defer_enrollment(day)?;
                    }
                    queue.push(Reverse(ScheduledVisit {
                        day,
                        sequence,
                        patient: event.patient,
                        deferred_days,
                    }));
                    sequence = sequence.saturating_add(1);
                    continue;
                }
            }

            let next = patient.step(event.day, event.deferred_days, &ctx)?;
            events_processed = events_processed.saturating_add(1);

            if let Some(day) = next.filter(|d| *d < end_day) {
                queue.push(Reverse(ScheduledVisit {
                    day,
                    sequence,
                    patient: event.patient,
                    deferred_days: 0,
                }));
                sequence = sequence.saturating_add(1);
            }
        }

        for patient in &mut self.patients {
            patient.finalize();
        }
        if unseen > 0 {
            warn!(
                run_id = %self.run_id,
                unseen,
                "Patients never seen within the run left out of the results"
            );
        }

        let results = CohortResults::from_patients(
            self.run_id,
            self.params.name(),
            &self.config,
            &self.patients,
            deferrals,
        );

        info!(
            run_id = %self.run_id,
            visits = events_processed,
            deferrals,
            elapsed_ms = started.elapsed().as_millis(),
            "Cohort run complete"
        );
        Ok(results)
    }
}

/// Validate, enroll, and run a cohort in one call.
///
/// # Errors
///
/// See [`CohortRun::new`] and [`CohortRun::run`].
pub fn simulate(
    params: &ProtocolParameterSet,
    config: RunConfig,
) -> Result<CohortResults, SimulationError> {
    CohortRun::new(params, config)?.run()
}

fn random_bytes(rng: &mut impl Rng) -> [u8; 16] {
    let mut bytes = [0_u8; 16];
    rng.fill(&mut bytes);
    bytes
}
