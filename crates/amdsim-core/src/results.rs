//! Results emitter.
//!
//! [`CohortResults`] is the read-only output of a finished run: one
//! [`PatientRecord`] per patient in enrollment order and one
//! [`VisitRecord`] per visit, grouped by patient and ordered by day. It
//! is the serialization boundary for downstream writers, so every row is
//! built from validated [`Visit`]s and never re-derives protocol state.

use std::collections::BTreeMap;
use std::path::Path;

use amdsim_types::{
    DAYS_PER_YEAR, DiscontinuationCategory, PatientId, PatientRecord, RunId, TreatmentStatus,
    Visit, VisitRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::patient::Patient;
use crate::run::{RunConfig, day_to_date};

/// Errors raised while serializing or writing results.
#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    /// JSON serialization failed.
    #[error("failed to serialize results: {source}")]
    Serialization {
        /// The underlying serializer error.
        #[from]
        source: serde_json::Error,
    },

    /// Writing the output file failed.
    #[error("failed to write results: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// Output of one completed cohort run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortResults {
    run_id: RunId,
    protocol: String,
    config: RunConfig,
    deferrals: u32,
    unseen_patients: u32,
    patients: Vec<PatientRecord>,
    visits: Vec<VisitRecord>,
}

impl CohortResults {
    /// Flatten finalized patients into output rows.
    ///
    /// Patients without a single visit inside the run are counted in
    /// [`CohortResults::unseen_patients`] instead of getting a row.
    pub(crate) fn from_patients(
        run_id: RunId,
        protocol: &str,
        config: &RunConfig,
        patients: &[Patient],
        deferrals: u32,
    ) -> Self {
        let start = config.start_date;
        let seen: Vec<&Patient> = patients.iter().filter(|p| !p.visits().is_empty()).collect();
        let visit_total = seen.iter().map(|p| p.visits().len()).sum();
        let mut visits = Vec::with_capacity(visit_total);
        for patient in &seen {
            visits.extend(visit_rows(patient.visits(), start));
        }
        let unseen = patients.len().saturating_sub(seen.len());
        Self {
            run_id,
            protocol: protocol.to_owned(),
            config: config.clone(),
            deferrals,
            unseen_patients: u32::try_from(unseen).unwrap_or(u32::MAX),
            patients: seen.iter().map(|p| p.record(start)).collect(),
            visits,
        }
    }

    /// Run identifier, derived from the seed.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Name of the protocol that was simulated.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Run parameters.
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Patient rows in enrollment order, for patients seen in the run.
    pub fn get_patients(&self) -> &[PatientRecord] {
        &self.patients
    }

    /// Visit rows grouped by patient, each group ordered by day.
    pub fn get_visits(&self) -> &[VisitRecord] {
        &self.visits
    }

    /// Visit rows of one patient.
    pub fn visits_for(&self, patient_id: PatientId) -> impl Iterator<Item = &VisitRecord> + '_ {
        self.visits
            .iter()
            .filter(move |v| v.patient_id == patient_id)
    }

    /// Times a visit was pushed back a day by capacity limits.
    pub const fn deferrals(&self) -> u32 {
        self.deferrals
    }

    /// Enrolled patients whose first visit never fit inside the run.
    pub const fn unseen_patients(&self) -> u32 {
        self.unseen_patients
    }

    /// Aggregate statistics of the run.
    pub fn summary(&self) -> RunSummary {
        RunSummary::compute(self)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ResultsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse results previously written with [`CohortResults::to_json`].
    pub fn from_json(json: &str) -> Result<Self, ResultsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write pretty-printed JSON to `path`.
    pub fn write_json(&self, path: &Path) -> Result<(), ResultsError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// BLAKE3 hex digest of the canonical (compact) JSON serialization.
    ///
    /// Equal for two runs exactly when their outputs are byte-identical.
    pub fn fingerprint(&self) -> Result<String, ResultsError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

fn visit_rows(visits: &[Visit], start: DateTime<Utc>) -> impl Iterator<Item = VisitRecord> + '_ {
    let mut previous_day: Option<u32> = None;
    let mut retreatment_count = 0_u32;
    visits.iter().map(move |visit| {
        if visit.kind().is_retreatment() {
            retreatment_count = retreatment_count.saturating_add(1);
        }
        let row = VisitRecord {
            patient_id: visit.patient_id(),
            visit_index: visit.index(),
            day: visit.day(),
            date: day_to_date(start, visit.day()).unwrap_or(start),
            days_since_enrollment: visit.days_since_enrollment(),
            days_since_previous: previous_day.map(|prev| visit.day().saturating_sub(prev)),
            vision_letters: visit.vision_letters(),
            disease_state: visit.disease_state(),
            phase: visit.phase(),
            treatment_status: visit.treatment_status(),
            injected: visit.injected(),
            next_interval_days: visit.next_interval_days(),
            is_discontinuation: visit.kind().is_discontinuation(),
            is_retreatment: visit.kind().is_retreatment(),
            discontinuation_category: visit.kind().category(),
            retreatment_count,
            deferred_days: visit.deferred_days(),
        };
        previous_day = Some(visit.day());
        row
    })
}

/// Discontinuation statistics for one category.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CategorySummary {
    /// Discontinuation visits in this category, including repeats.
    pub events: u32,
    /// Patients whose first discontinuation was in this category.
    pub first_discontinuations: u32,
    /// `first_discontinuations` as a fraction of the population.
    pub incidence: f64,
}

/// Aggregate statistics of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Patients with at least one visit; the incidence denominator.
    pub patients: u32,
    /// Enrolled patients never seen within the run.
    pub unseen_patients: u32,
    /// Visits recorded.
    pub visits: u32,
    /// Injections given.
    pub injections: u32,
    /// Exposure from enrollment to run end, in years.
    pub patient_years: f64,
    /// `injections / patient_years`.
    pub injections_per_patient_year: f64,
    /// Mean of final minus baseline letters over patients with visits.
    pub mean_vision_change: f64,
    /// Per-category discontinuation statistics.
    pub discontinuations: BTreeMap<DiscontinuationCategory, CategorySummary>,
    /// Retreatment visits.
    pub retreatments: u32,
    /// Patients whose visits stopped for good before the run ended.
    pub permanently_discontinued: u32,
    /// Times a visit was pushed back a day by capacity limits.
    pub deferrals: u32,
    /// Visits that happened later than planned.
    pub deferred_visits: u32,
}

impl RunSummary {
    fn compute(results: &CohortResults) -> Self {
        let duration = results.config.duration_days;
        let mut discontinuations: BTreeMap<DiscontinuationCategory, CategorySummary> =
            DiscontinuationCategory::ALL
                .into_iter()
                .map(|c| (c, CategorySummary::default()))
                .collect();

        let mut injections = 0_u32;
        let mut retreatments = 0_u32;
        let mut deferred_visits = 0_u32;
        for visit in &results.visits {
            if visit.injected {
                injections = injections.saturating_add(1);
            }
            if visit.is_retreatment {
                retreatments = retreatments.saturating_add(1);
            }
            if visit.deferred_days > 0 {
                deferred_visits = deferred_visits.saturating_add(1);
            }
            if let Some(entry) = visit
                .discontinuation_category
                .and_then(|c| discontinuations.get_mut(&c))
            {
                entry.events = entry.events.saturating_add(1);
            }
        }

        let mut permanently_discontinued = 0_u32;
        for group in results.visits.chunk_by(|a, b| a.patient_id == b.patient_id) {
            if let Some(category) = group
                .iter()
                .find(|v| v.is_discontinuation)
                .and_then(|v| v.discontinuation_category)
            {
                if let Some(entry) = discontinuations.get_mut(&category) {
                    entry.first_discontinuations = entry.first_discontinuations.saturating_add(1);
                }
            }
            if group.last().is_some_and(|v| {
                v.treatment_status == TreatmentStatus::Discontinued
                    && v.next_interval_days.is_none()
            }) {
                permanently_discontinued = permanently_discontinued.saturating_add(1);
            }
        }

        let patients = u32::try_from(results.patients.len()).unwrap_or(u32::MAX);
        for entry in discontinuations.values_mut() {
            entry.incidence = ratio(f64::from(entry.first_discontinuations), f64::from(patients));
        }

        let patient_years: f64 = results
            .patients
            .iter()
            .map(|p| f64::from(duration.saturating_sub(p.enrollment_day)) / f64::from(DAYS_PER_YEAR))
            .sum();

        let (change_total, seen) = results
            .patients
            .iter()
            .filter(|p| p.visit_count > 0)
            .fold((0.0, 0_u32), |(total, n), p| {
                (
                    total + f64::from(p.final_vision) - f64::from(p.baseline_vision),
                    n.saturating_add(1),
                )
            });

        Self {
            patients,
            unseen_patients: results.unseen_patients,
            visits: u32::try_from(results.visits.len()).unwrap_or(u32::MAX),
            injections,
            patient_years,
            injections_per_patient_year: ratio(f64::from(injections), patient_years),
            mean_vision_change: ratio(change_total, f64::from(seen)),
            discontinuations,
            retreatments,
            permanently_discontinued,
            deferrals: results.deferrals,
            deferred_visits,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
