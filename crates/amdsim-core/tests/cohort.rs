//! Cohort-level properties: ordering, bounds, determinism, capacity,
//! cancellation, and budgets.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::missing_panics_doc
)]

use std::collections::BTreeMap;

use amdsim_core::{
    CancellationToken, CohortRun, EnrollmentPattern, RunBudget, RunConfig, SimulationError,
    simulate,
};
use amdsim_protocol::{
    CategoryConfig, CurveShape, ProtocolConfig, ProtocolParameterSet, ResourceConfig,
};
use amdsim_types::{
    DiscontinuationCategory, PatientId, ResponseType, TreatmentStatus, VisitRecord,
};

fn default_params() -> ProtocolParameterSet {
    ProtocolParameterSet::from_config(&ProtocolConfig::default()).expect("default protocol")
}

fn config(population: u32, duration_days: u32, seed: u64) -> RunConfig {
    RunConfig {
        population,
        duration_days,
        enrollment: EnrollmentPattern::Uniform { window_days: 180 },
        seed,
        ..RunConfig::default()
    }
}

fn by_patient(visits: &[VisitRecord]) -> BTreeMap<PatientId, Vec<&VisitRecord>> {
    let mut grouped: BTreeMap<PatientId, Vec<&VisitRecord>> = BTreeMap::new();
    for visit in visits {
        grouped.entry(visit.patient_id).or_default().push(visit);
    }
    grouped
}

// =============================================================================
// Visit sequence properties
// =============================================================================

#[test]
fn visit_days_strictly_increase_from_enrollment() {
    let params = default_params();
    let results = simulate(&params, config(300, 3 * 365, 11)).unwrap();
    let grouped = by_patient(results.get_visits());

    for patient in results.get_patients() {
        let visits = &grouped[&patient.patient_id];
        assert_eq!(visits[0].day, patient.enrollment_day);
        assert_eq!(visits[0].days_since_enrollment, 0);
        assert_eq!(visits[0].days_since_previous, None);
        assert_eq!(visits[0].visit_index, 0);
        for pair in visits.windows(2) {
            assert!(pair[1].day > pair[0].day);
            assert!(pair[1].days_since_enrollment > pair[0].days_since_enrollment);
            assert_eq!(
                pair[1].days_since_enrollment,
                pair[1].day - patient.enrollment_day
            );
            assert_eq!(pair[1].days_since_previous, Some(pair[1].day - pair[0].day));
            assert_eq!(pair[1].visit_index, pair[0].visit_index + 1);
        }
        assert_eq!(patient.visit_count as usize, visits.len());
    }
}

#[test]
fn vision_stays_within_bounds() {
    let params = default_params();
    let bounds = params.bounds();
    let results = simulate(&params, config(300, 5 * 365, 12)).unwrap();
    assert!(
        results
            .get_visits()
            .iter()
            .all(|v| bounds.contains(v.vision_letters))
    );
    assert!(
        results
            .get_patients()
            .iter()
            .all(|p| bounds.contains(p.baseline_vision))
    );
}

#[test]
fn first_visit_is_never_a_discontinuation() {
    let params = default_params();
    let results = simulate(&params, config(500, 2 * 365, 13)).unwrap();
    assert!(
        results
            .get_visits()
            .iter()
            .filter(|v| v.visit_index == 0)
            .all(|v| !v.is_discontinuation)
    );
}

#[test]
fn retreatment_follows_discontinuation_with_gap() {
    let mut protocol = ProtocolConfig::default();
    protocol.retreatment.probability = 0.5;
    let params = ProtocolParameterSet::from_config(&protocol).unwrap();
    let results = simulate(&params, config(1_000, 5 * 365, 14)).unwrap();

    let mut retreatments = 0;
    for visits in by_patient(results.get_visits()).values() {
        let mut last_discontinuation: Option<u32> = None;
        let mut seen_retreatments = 0;
        for visit in visits {
            if visit.is_discontinuation {
                last_discontinuation = Some(visit.day);
            }
            if visit.is_retreatment {
                let disc_day = last_discontinuation.expect("retreatment without discontinuation");
                assert!(visit.day > disc_day);
                assert!(visit.injected);
                seen_retreatments += 1;
                assert_eq!(visit.retreatment_count, seen_retreatments);
                retreatments += 1;
            }
        }
    }
    assert!(retreatments > 0, "expected some retreatments");
}

#[test]
fn discontinued_visits_do_not_inject() {
    let params = default_params();
    let results = simulate(&params, config(300, 3 * 365, 15)).unwrap();
    for visit in results.get_visits() {
        if visit.treatment_status == TreatmentStatus::Discontinued {
            assert!(!visit.injected);
        }
        if visit.is_discontinuation {
            assert!(visit.discontinuation_category.is_some());
        } else {
            assert!(visit.discontinuation_category.is_none());
        }
    }
}

#[test]
fn response_types_follow_distribution() {
    let params = default_params();
    let run = RunConfig {
        enrollment: EnrollmentPattern::AllAtStart,
        ..config(5_000, 30, 16)
    };
    let results = simulate(&params, run).unwrap();
    let good = results
        .get_patients()
        .iter()
        .filter(|p| p.response_type == ResponseType::Good)
        .count();
    let share = f64::from(u32::try_from(good).unwrap()) / 5_000.0;
    assert!((share - 0.3).abs() < 0.03, "good share {share}");
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn same_seed_same_output() {
    let params = default_params();
    let a = simulate(&params, config(200, 3 * 365, 99)).unwrap();
    let b = simulate(&params, config(200, 3 * 365, 99)).unwrap();
    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    assert_eq!(a.run_id(), b.run_id());
}

#[test]
fn different_seed_different_output() {
    let params = default_params();
    let a = simulate(&params, config(50, 365, 1)).unwrap();
    let b = simulate(&params, config(50, 365, 2)).unwrap();
    assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
}

#[test]
fn replicates_are_independent_and_reproducible() {
    let params = default_params();
    let base = config(50, 365, 7);
    let r0 = simulate(&params, base.replicate(0)).unwrap();
    let r1 = simulate(&params, base.replicate(1)).unwrap();
    let r0_again = simulate(&params, base.replicate(0)).unwrap();
    assert_ne!(r0.fingerprint().unwrap(), r1.fingerprint().unwrap());
    assert_eq!(r0.fingerprint().unwrap(), r0_again.fingerprint().unwrap());
}

#[test]
fn json_round_trip_preserves_fingerprint() {
    let params = default_params();
    let results = simulate(&params, config(20, 365, 3)).unwrap();
    let parsed = amdsim_core::CohortResults::from_json(&results.to_json().unwrap()).unwrap();
    assert_eq!(parsed, results);
    assert_eq!(parsed.fingerprint().unwrap(), results.fingerprint().unwrap());
}

// =============================================================================
// Capacity
// =============================================================================

#[test]
fn capacity_defers_visits() {
    let mut protocol = ProtocolConfig::default();
    protocol.resources = Some(ResourceConfig {
        staff: 1,
        equipment: 2,
        visit_duration_minutes: 120,
        session_minutes_per_day: 480,
    });
    let params = ProtocolParameterSet::from_config(&protocol).unwrap();
    let visits_per_day = params.resources().unwrap().visits_per_day;
    assert_eq!(visits_per_day, 4);

    let run = RunConfig {
        population: 40,
        duration_days: 365,
        enrollment: EnrollmentPattern::AllAtStart,
        seed: 5,
        ..RunConfig::default()
    };
    let results = simulate(&params, run).unwrap();

    let mut per_day: BTreeMap<u32, u32> = BTreeMap::new();
    for visit in results.get_visits() {
        *per_day.entry(visit.day).or_default() += 1;
    }
    assert!(per_day.values().all(|n| *n <= visits_per_day));

    let summary = results.summary();
    assert!(summary.deferrals > 0);
    assert!(summary.deferred_visits > 0);
    assert_eq!(summary.deferrals, results.deferrals());

    // Deferred first visits move enrollment with them.
    let deferred_first = results
        .get_visits()
        .iter()
        .filter(|v| v.visit_index == 0 && v.deferred_days > 0)
        .count();
    assert!(deferred_first > 0);
    for visits in by_patient(results.get_visits()).values() {
        for pair in visits.windows(2) {
            assert!(pair[1].day > pair[0].day);
        }
    }
}

fn single_chair() -> ResourceConfig {
    ResourceConfig {
        staff: 1,
        equipment: 1,
        visit_duration_minutes: 480,
        session_minutes_per_day: 480,
    }
}

#[test]
fn patients_never_seen_are_left_out() {
    let mut protocol = ProtocolConfig::default();
    protocol.resources = Some(single_chair());
    let params = ProtocolParameterSet::from_config(&protocol).unwrap();
    let run = RunConfig {
        population: 40,
        duration_days: 20,
        enrollment: EnrollmentPattern::AllAtStart,
        seed: 3,
        ..RunConfig::default()
    };
    let results = simulate(&params, run).unwrap();

    // One first visit per day for 20 days; the rest never fit.
    assert_eq!(results.get_patients().len(), 20);
    assert_eq!(results.unseen_patients(), 20);
    for patient in results.get_patients() {
        assert!(patient.enrollment_day < 20);
        assert!(patient.visit_count > 0);
    }
    let summary = results.summary();
    assert_eq!(summary.patients, 20);
    assert_eq!(summary.unseen_patients, 20);
}

#[test]
fn visits_pushed_past_the_end_still_close_the_window() {
    let mut protocol = ProtocolConfig::default();
    protocol.resources = Some(single_chair());
    let mut categories = BTreeMap::new();
    categories.insert(
        DiscontinuationCategory::Premature,
        CategoryConfig {
            target_incidence: Some(0.999_999),
            annual_probability: None,
            curve: CurveShape::Stepped { steps: 1 },
            follow_up: false,
        },
    );
    protocol.discontinuation.categories = categories;
    protocol.discontinuation.horizon_days = Some(100);
    let params = ProtocolParameterSet::from_config(&protocol).unwrap();
    let run = RunConfig {
        population: 40,
        duration_days: 200,
        enrollment: EnrollmentPattern::AllAtStart,
        seed: 8,
        ..RunConfig::default()
    };
    let results = simulate(&params, run).unwrap();
    assert!(results.deferrals() > 0);

    // Every patient seen twice is assessed through the end of the horizon,
    // whether its last visit was planned or pushed past the run.
    for patient in results.get_patients().iter().filter(|p| p.visit_count >= 2) {
        assert_eq!(patient.final_status, TreatmentStatus::Discontinued);
        assert_eq!(
            patient.discontinuation_category,
            Some(DiscontinuationCategory::Premature)
        );
    }
}

// =============================================================================
// Cancellation and budgets
// =============================================================================

#[test]
fn cancelled_run_reports_cancellation() {
    let params = default_params();
    let token = CancellationToken::new();
    let run = CohortRun::new(&params, config(100, 365, 1))
        .unwrap()
        .with_cancellation(token.clone());
    token.cancel();
    let err = run.run().unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Cancelled {
            events_processed: 0
        }
    ));
}

#[test]
fn visit_budget_discards_results() {
    let params = default_params();
    let run = RunConfig {
        budget: RunBudget {
            max_visits: Some(10),
            max_wall_time_ms: None,
        },
        ..config(100, 365, 1)
    };
    let err = simulate(&params, run).unwrap_err();
    assert!(matches!(err, SimulationError::ResourceExhaustion { .. }));
}

#[test]
fn generous_budget_is_not_an_error() {
    let params = default_params();
    let run = RunConfig {
        budget: RunBudget {
            max_visits: Some(1_000_000),
            max_wall_time_ms: Some(600_000),
        },
        ..config(20, 365, 1)
    };
    assert!(simulate(&params, run).is_ok());
}

// =============================================================================
// Configuration errors surface before enrollment
// =============================================================================

#[test]
fn invalid_run_fails_before_enrollment() {
    let params = default_params();
    let run = RunConfig {
        duration_days: 100,
        enrollment: EnrollmentPattern::Uniform { window_days: 365 },
        ..RunConfig::default()
    };
    let err = CohortRun::new(&params, run).unwrap_err();
    assert!(matches!(err, SimulationError::Configuration { .. }));
}

#[test]
fn oversubscribed_annual_targets_fail_at_run_setup() {
    let mut protocol = ProtocolConfig::default();
    for entry in protocol.discontinuation.categories.values_mut() {
        entry.target_incidence = None;
        entry.annual_probability = Some(0.4);
    }
    let params = ProtocolParameterSet::from_config(&protocol).unwrap();
    let err = CohortRun::new(&params, config(10, 10 * 365, 1)).unwrap_err();
    assert!(matches!(err, SimulationError::Configuration { .. }));
}

#[test]
fn malformed_protocol_is_rejected() {
    let yaml = "transitions:\n  maintenance:\n    stable: {naive: 0.0, stable: 0.5, active: 0.2, highly_active: 0.1}\n";
    let config = ProtocolConfig::parse(yaml).unwrap();
    assert!(ProtocolParameterSet::from_config(&config).is_err());
}

// =============================================================================
// Summary
// =============================================================================

#[test]
fn summary_totals_match_rows() {
    let params = default_params();
    let results = simulate(&params, config(200, 2 * 365, 21)).unwrap();
    let summary = results.summary();
    assert_eq!(summary.patients, 200);
    assert_eq!(summary.visits as usize, results.get_visits().len());
    let injections: u32 = results.get_patients().iter().map(|p| p.injection_count).sum();
    assert_eq!(summary.injections, injections);
    let retreatments: u32 = results.get_patients().iter().map(|p| p.retreatment_count).sum();
    assert_eq!(summary.retreatments, retreatments);
    assert!(summary.injections_per_patient_year > 0.0);
    let first: u32 = summary
        .discontinuations
        .values()
        .map(|c| c.first_discontinuations)
        .sum();
    let ever = results
        .get_patients()
        .iter()
        .filter(|p| p.discontinuation_category.is_some())
        .count();
    assert_eq!(first as usize, ever);
}
