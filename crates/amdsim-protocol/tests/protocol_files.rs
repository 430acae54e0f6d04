//! The protocol files shipped under `protocols/` load and validate.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::path::PathBuf;

use amdsim_protocol::{CurveShape, ProtocolConfig, ProtocolParameterSet, SchedulePolicy};
use amdsim_types::DiscontinuationCategory;

fn protocol_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../protocols")
        .join(name)
}

fn compile(name: &str) -> ProtocolParameterSet {
    let raw = ProtocolConfig::from_file(&protocol_file(name)).expect("protocol file loads");
    ProtocolParameterSet::from_config(&raw).expect("protocol file validates")
}

#[test]
fn written_out_reference_matches_defaults() {
    let params = compile("treat_and_extend.yaml");
    assert_eq!(params.source(), &ProtocolConfig::default());
}

#[test]
fn fixed_interval_protocol_overrides_sections() {
    let params = compile("fixed_interval.yaml");
    assert_eq!(params.name(), "fixed monthly PRN");
    assert_eq!(
        params.schedule(),
        &SchedulePolicy::FixedInterval { interval_days: 28 }
    );

    let discontinuation = params.discontinuation();
    assert_eq!(discontinuation.horizon_days, Some(1825));
    assert_eq!(discontinuation.categories.len(), 2);
    let premature = discontinuation
        .categories
        .get(&DiscontinuationCategory::Premature)
        .unwrap();
    assert!(premature.follow_up);
    assert!(matches!(premature.curve, CurveShape::Sigmoid { .. }));

    assert_eq!(params.retreatment().max_retreatments, Some(3));

    // min(staff, equipment) * (480 / 20)
    let resources = params.resources().unwrap();
    assert_eq!(resources.visits_per_day, 72);

    // Sections left out take their reference values.
    assert_eq!(params.source().vision, ProtocolConfig::default().vision);
}
