//! The patient entity.
//!
//! A [`Patient`] owns its private random stream and its append-only visit
//! sequence. Each call to [`Patient::step`] runs the models in a fixed
//! order (disease activity, vision response, discontinuation or
//! retreatment, scheduling) and appends exactly one [`Visit`]. The
//! orchestrator decides *when* a step happens; the patient decides
//! *what* happens at it.

use amdsim_models::{
    DiscontinuationModel, RetreatmentModel, ScheduleState, VisionInput, VisionOutcome, disease,
    injection_due, vision,
};
use amdsim_protocol::ProtocolParameterSet;
use amdsim_types::{
    DiscontinuationCategory, DiseaseState, PatientId, PatientRecord, ProtocolPhase, ResponseType,
    TimeBucket, TreatmentStatus, Visit, VisitFields, VisitKind,
};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error};

use crate::error::{InvariantError, InvariantViolation, SimulationError};
use crate::run::day_to_date;

/// Run-wide inputs shared by every patient step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Validated protocol.
    pub params: &'a ProtocolParameterSet,
    /// Compiled discontinuation curves.
    pub discontinuation: &'a DiscontinuationModel,
    /// Retreatment policy.
    pub retreatment: &'a RetreatmentModel,
    /// First day not simulated.
    pub end_day: u32,
}

/// One simulated patient.
#[derive(Debug, Clone)]
pub struct Patient {
    id: PatientId,
    enrollment_day: u32,
    baseline_true: f64,
    baseline_letters: i32,
    response_type: ResponseType,
    response_multiplier: f64,
    disease_state: DiseaseState,
    status: TreatmentStatus,
    discontinuation_category: Option<DiscontinuationCategory>,
    first_discontinuation: Option<DiscontinuationCategory>,
    retreatment_count: u32,
    schedule: ScheduleState,
    true_vision: f64,
    previous_delta: f64,
    last_assessed_t: f64,
    next_visit_day: Option<u32>,
    visits: Vec<Visit>,
    finalized: bool,
    rng: ChaCha8Rng,
}

impl Patient {
    /// Create a patient enrolled on `enrollment_day`.
    ///
    /// Baseline acuity and response type are drawn here, once, from the
    /// patient's own stream seeded with `seed`.
    pub fn enroll(
        id: PatientId,
        enrollment_day: u32,
        seed: u64,
        params: &ProtocolParameterSet,
    ) -> Result<Self, SimulationError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let baseline = vision::sample_baseline(params, &mut rng)?;
        let response_type = vision::assign_response_type(params, &mut rng);
        Ok(Self {
            id,
            enrollment_day,
            baseline_true: baseline.true_vision,
            baseline_letters: baseline.recorded_letters,
            response_type,
            response_multiplier: params.response_types().multiplier(response_type),
            disease_state: DiseaseState::Naive,
            status: TreatmentStatus::Active,
            discontinuation_category: None,
            first_discontinuation: None,
            retreatment_count: 0,
            schedule: ScheduleState::new(),
            true_vision: baseline.true_vision,
            previous_delta: 0.0,
            last_assessed_t: 0.0,
            next_visit_day: Some(enrollment_day),
            visits: Vec::new(),
            finalized: false,
            rng,
        })
    }

    /// Patient id.
    pub const fn id(&self) -> PatientId {
        self.id
    }

    /// Day of the first visit.
    pub const fn enrollment_day(&self) -> u32 {
        self.enrollment_day
    }

    /// Recorded baseline letters.
    pub const fn baseline_letters(&self) -> i32 {
        self.baseline_letters
    }

    /// True baseline acuity.
    pub const fn baseline_true(&self) -> f64 {
        self.baseline_true
    }

    /// Response type, fixed at enrollment.
    pub const fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// Current disease state.
    pub const fn disease_state(&self) -> DiseaseState {
        self.disease_state
    }

    /// Current treatment status.
    pub const fn status(&self) -> TreatmentStatus {
        self.status
    }

    /// Category of the most recent discontinuation.
    pub const fn discontinuation_category(&self) -> Option<DiscontinuationCategory> {
        self.discontinuation_category
    }

    /// Category of the first discontinuation.
    pub const fn first_discontinuation(&self) -> Option<DiscontinuationCategory> {
        self.first_discontinuation
    }

    /// Retreatments so far.
    pub const fn retreatment_count(&self) -> u32 {
        self.retreatment_count
    }

    /// Day of the pending visit, `None` once permanently discontinued.
    pub const fn next_visit_day(&self) -> Option<u32> {
        self.next_visit_day
    }

    /// Visits so far, in order.
    pub fn visits(&self) -> &[Visit] {
        &self.visits
    }

    /// Whether the patient has been frozen.
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Move a not-yet-seen patient's enrollment to a later day.
    ///
    /// Used when the first visit is deferred for capacity; the first visit
    /// still defines enrollment.
    pub fn defer_enrollment(&mut self, day: u32) -> Result<(), InvariantError> {
        if !self.visits.is_empty() || day < self.enrollment_day {
            return Err(self.violation(InvariantViolation::FirstVisitNotAtEnrollment {
                enrollment_day: self.enrollment_day,
                day,
            }));
        }
        self.enrollment_day = day;
        self.next_visit_day = Some(day);
        Ok(())
    }

    /// Freeze the patient at the end of the run.
    pub const fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Simulate the visit on `day` and append it.
    ///
    /// `deferred_days` is how far capacity pushed the visit back from its
    /// planned day. Returns the day of the next visit, or `None` when the
    /// patient is permanently discontinued.
    pub fn step(
        &mut self,
        day: u32,
        deferred_days: u32,
        ctx: &StepContext<'_>,
    ) -> Result<Option<u32>, SimulationError> {
        if self.finalized {
            return Err(self.violation(InvariantViolation::PatientFinalized).into());
        }
        self.check_day(day)?;

        let days_since_enrollment = day.saturating_sub(self.enrollment_day);
        let t_now = ctx.discontinuation.normalized_time(days_since_enrollment);
        let is_first = self.visits.is_empty();

        let outcome = if self.status.is_treating() {
            self.treatment_visit(day, days_since_enrollment, t_now, is_first, ctx)?
        } else {
            self.monitoring_visit(days_since_enrollment, t_now, ctx)?
        };
        let kind = outcome.kind;

        if is_first && kind.is_discontinuation() {
            return Err(self
                .violation(InvariantViolation::DiscontinuationOnFirstVisit)
                .into());
        }
        if kind.is_retreatment() && !self.visits.iter().any(|v| v.kind().is_discontinuation()) {
            return Err(self
                .violation(InvariantViolation::RetreatmentWithoutDiscontinuation)
                .into());
        }

        let next_day = match outcome.next_interval {
            Some(interval) => {
                let Some(next) = day.checked_add(interval).filter(|next| *next > day) else {
                    return Err(self
                        .violation(InvariantViolation::NonMonotonicTime {
                            previous: day,
                            day: day.saturating_add(interval),
                        })
                        .into());
                };
                Some(next)
            }
            None => None,
        };

        let injected = match kind {
            VisitKind::Treatment => {
                injection_due(ctx.params.schedule(), outcome.phase, outcome.state)
            }
            VisitKind::Retreatment { .. } => true,
            VisitKind::Monitoring | VisitKind::Discontinuation { .. } => false,
        };
        let fields = VisitFields {
            patient_id: self.id,
            index: self.step_index(),
            day,
            days_since_enrollment,
            vision_letters: outcome.vision.recorded_letters,
            disease_state: outcome.state,
            phase: outcome.phase,
            treatment_status: visit_status(kind),
            injected,
            next_interval_days: outcome.next_interval,
            deferred_days,
            kind,
        };
        let visit = Visit::new(fields, ctx.params.bounds())
            .map_err(|e| self.violation(InvariantViolation::from(e)))?;

        // Commit.
        self.disease_state = outcome.state;
        self.true_vision = outcome.vision.true_vision;
        self.previous_delta = outcome.vision.delta;
        match kind {
            VisitKind::Treatment => {}
            VisitKind::Discontinuation { category } => {
                self.discontinue(category, day, next_day.is_some());
            }
            VisitKind::Monitoring => {}
            VisitKind::Retreatment { retreatment_number } => {
                // Back on active treatment from the following visit.
                self.status = TreatmentStatus::Active;
                self.retreatment_count = retreatment_number;
                debug!(patient_id = %self.id, day, retreatment_number, "Patient retreated");
            }
        }
        self.visits.push(visit);
        self.next_visit_day = next_day;
        Ok(next_day)
    }

    /// Assess the rest of the run for a patient whose pending visit was
    /// pushed past the run end by capacity.
    ///
    /// A hit turns the last visit into the discontinuation visit, as the
    /// closing assessment does when the planned interval itself overruns
    /// the run. Patients off treatment, or whose last visit is the first
    /// visit or a retreatment, are left unchanged.
    pub fn close_out(
        &mut self,
        ctx: &StepContext<'_>,
    ) -> Result<Option<DiscontinuationCategory>, SimulationError> {
        if self.finalized {
            return Err(self.violation(InvariantViolation::PatientFinalized).into());
        }
        if !self.status.is_treating() {
            return Ok(None);
        }
        let Some(mut fields) = self.visits.last().map(Visit::fields) else {
            return Ok(None);
        };
        if fields.index == 0 || fields.kind != VisitKind::Treatment {
            return Ok(None);
        }
        let Some(category) = self.closing_assessment(self.last_assessed_t, ctx) else {
            return Ok(None);
        };

        let next_interval = self.follow_up_interval(category, ctx);
        fields.kind = VisitKind::Discontinuation { category };
        fields.treatment_status = TreatmentStatus::Discontinued;
        fields.injected = false;
        fields.next_interval_days = next_interval;
        let visit = Visit::new(fields, ctx.params.bounds())
            .map_err(|e| self.violation(InvariantViolation::from(e)))?;

        let next_day = next_interval.and_then(|interval| fields.day.checked_add(interval));
        if let Some(last) = self.visits.last_mut() {
            *last = visit;
        }
        self.discontinue(category, fields.day, next_day.is_some());
        self.next_visit_day = next_day;
        Ok(Some(category))
    }

    /// Flat patient row for the results emitter.
    pub fn record(&self, start_date: DateTime<Utc>) -> PatientRecord {
        let injection_count = self.visits.iter().filter(|v| v.injected()).count();
        PatientRecord {
            patient_id: self.id,
            enrollment_day: self.enrollment_day,
            enrollment_date: day_to_date(start_date, self.enrollment_day).unwrap_or(start_date),
            baseline_vision: self.baseline_letters,
            response_type: self.response_type,
            final_status: self.status,
            discontinuation_category: self.discontinuation_category,
            retreatment_count: self.retreatment_count,
            visit_count: self.step_index(),
            injection_count: u32::try_from(injection_count).unwrap_or(u32::MAX),
            final_vision: self
                .visits
                .last()
                .map_or(self.baseline_letters, Visit::vision_letters),
        }
    }

    fn treatment_visit(
        &mut self,
        day: u32,
        days_since_enrollment: u32,
        t_now: f64,
        is_first: bool,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, SimulationError> {
        let params = ctx.params;
        let phase = self.schedule.phase(params.loading());
        let state = disease::next_state(params, self.disease_state, phase, true, &mut self.rng);
        let vision = self.respond(state, true, phase, days_since_enrollment, ctx)?;

        let mut drawn = if is_first {
            None
        } else {
            ctx.discontinuation
                .assess(self.last_assessed_t, t_now, &mut self.rng)
        };
        self.last_assessed_t = t_now;

        let mut interval = None;
        if drawn.is_none() {
            let next = self
                .schedule
                .next_interval(params.loading(), params.schedule(), state);
            if !is_first && day.saturating_add(next) >= ctx.end_day {
                drawn = self.closing_assessment(t_now, ctx);
            }
            interval = Some(next);
        }

        Ok(match drawn {
            None => StepOutcome {
                kind: VisitKind::Treatment,
                phase,
                state,
                next_interval: interval,
                vision,
            },
            Some(category) => StepOutcome {
                kind: VisitKind::Discontinuation { category },
                phase,
                state,
                next_interval: self.follow_up_interval(category, ctx),
                vision,
            },
        })
    }

    /// Assess the rest of the run when the next visit falls past its end.
    fn closing_assessment(
        &mut self,
        t_now: f64,
        ctx: &StepContext<'_>,
    ) -> Option<DiscontinuationCategory> {
        let remaining = ctx.end_day.saturating_sub(self.enrollment_day);
        let t_end = ctx.discontinuation.normalized_time(remaining);
        if t_end <= t_now {
            return None;
        }
        self.last_assessed_t = t_end;
        ctx.discontinuation.assess(t_now, t_end, &mut self.rng)
    }

    fn monitoring_visit(
        &mut self,
        days_since_enrollment: u32,
        t_now: f64,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, SimulationError> {
        let params = ctx.params;
        let phase = ProtocolPhase::Maintenance;
        let state = disease::next_state(params, self.disease_state, phase, false, &mut self.rng);
        let vision = self.respond(state, false, phase, days_since_enrollment, ctx)?;

        if ctx
            .retreatment
            .should_retreat(self.retreatment_count, &mut self.rng)
        {
            self.schedule.restart_after_retreatment();
            let interval = self
                .schedule
                .next_interval(params.loading(), params.schedule(), state);
            // Discontinuation risk resumes from here.
            self.last_assessed_t = t_now;
            return Ok(StepOutcome {
                kind: VisitKind::Retreatment {
                    retreatment_number: self.retreatment_count.saturating_add(1),
                },
                phase,
                state,
                next_interval: Some(interval),
                vision,
            });
        }

        let next_interval = ctx
            .retreatment
            .eligible(self.retreatment_count)
            .then(|| ctx.retreatment.monitoring_interval_days());
        Ok(StepOutcome {
            kind: VisitKind::Monitoring,
            phase,
            state,
            next_interval,
            vision,
        })
    }

    /// Monitoring interval after a discontinuation, or `None` when the
    /// patient leaves for good.
    fn follow_up_interval(
        &self,
        category: DiscontinuationCategory,
        ctx: &StepContext<'_>,
    ) -> Option<u32> {
        (ctx.discontinuation.follow_up(category)
            && ctx.retreatment.eligible(self.retreatment_count))
        .then(|| ctx.retreatment.monitoring_interval_days())
    }

    fn respond(
        &mut self,
        state: DiseaseState,
        treated: bool,
        phase: ProtocolPhase,
        days_since_enrollment: u32,
        ctx: &StepContext<'_>,
    ) -> Result<VisionOutcome, SimulationError> {
        let input = VisionInput {
            state,
            treated,
            phase,
            bucket: TimeBucket::classify(phase, days_since_enrollment),
            response_multiplier: self.response_multiplier,
            previous_vision: self.true_vision,
            previous_delta: self.previous_delta,
        };
        Ok(vision::respond(ctx.params, &input, &mut self.rng)?)
    }

    fn discontinue(&mut self, category: DiscontinuationCategory, day: u32, follow_up: bool) {
        self.status = TreatmentStatus::Discontinued;
        self.discontinuation_category = Some(category);
        self.first_discontinuation.get_or_insert(category);
        debug!(patient_id = %self.id, day, ?category, follow_up, "Patient discontinued");
    }

    fn check_day(&self, day: u32) -> Result<(), InvariantError> {
        match self.visits.last() {
            None if day != self.enrollment_day => {
                Err(self.violation(InvariantViolation::FirstVisitNotAtEnrollment {
                    enrollment_day: self.enrollment_day,
                    day,
                }))
            }
            Some(last) if day <= last.day() => {
                Err(self.violation(InvariantViolation::NonMonotonicTime {
                    previous: last.day(),
                    day,
                }))
            }
            _ => Ok(()),
        }
    }

    fn step_index(&self) -> u32 {
        u32::try_from(self.visits.len()).unwrap_or(u32::MAX)
    }

    fn violation(&self, violation: InvariantViolation) -> InvariantError {
        let step_index = self.step_index();
        error!(patient_id = %self.id, step_index, %violation, "Invariant violated");
        InvariantError {
            patient_id: self.id,
            step_index,
            violation,
        }
    }
}

/// What one step decided, before it is committed.
#[derive(Debug, Clone, Copy)]
struct StepOutcome {
    kind: VisitKind,
    phase: ProtocolPhase,
    state: DiseaseState,
    next_interval: Option<u32>,
    vision: VisionOutcome,
}

const fn visit_status(kind: VisitKind) -> TreatmentStatus {
    match kind {
        VisitKind::Treatment => TreatmentStatus::Active,
        VisitKind::Retreatment { .. } => TreatmentStatus::Retreated,
        VisitKind::Monitoring | VisitKind::Discontinuation { .. } => TreatmentStatus::Discontinued,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use amdsim_protocol::{CategoryConfig, CurveShape, ProtocolConfig};

    use super::*;

    struct Fixture {
        params: ProtocolParameterSet,
        discontinuation: DiscontinuationModel,
        retreatment: RetreatmentModel,
        end_day: u32,
    }

    impl Fixture {
        fn new(config: &ProtocolConfig, end_day: u32) -> Self {
            let params = ProtocolParameterSet::from_config(config).unwrap();
            let discontinuation =
                DiscontinuationModel::new(params.discontinuation(), end_day).unwrap();
            let retreatment = RetreatmentModel::new(*params.retreatment());
            Self {
                params,
                discontinuation,
                retreatment,
                end_day,
            }
        }

        fn ctx(&self) -> StepContext<'_> {
            StepContext {
                params: &self.params,
                discontinuation: &self.discontinuation,
                retreatment: &self.retreatment,
                end_day: self.end_day,
            }
        }
    }

    fn certain_discontinuation(follow_up: bool, retreatment_probability: f64) -> ProtocolConfig {
        let mut config = ProtocolConfig::default();
        let mut categories = BTreeMap::new();
        categories.insert(
            DiscontinuationCategory::Premature,
            CategoryConfig {
                target_incidence: Some(0.999_999),
                annual_probability: None,
                curve: CurveShape::Stepped { steps: 1 },
                follow_up,
            },
        );
        config.discontinuation.categories = categories;
        config.discontinuation.horizon_days = Some(28);
        config.retreatment.probability = retreatment_probability;
        config.retreatment.monitoring_interval_days = 30;
        config
    }

    /// Step until the patient stops or `limit` visits are reached.
    fn run(patient: &mut Patient, ctx: &StepContext<'_>, limit: usize) {
        while let Some(day) = patient.next_visit_day() {
            if day >= ctx.end_day || patient.visits().len() >= limit {
                break;
            }
            patient.step(day, 0, ctx).unwrap();
        }
    }

    #[test]
    fn first_visit_must_be_on_enrollment_day() {
        let fixture = Fixture::new(&ProtocolConfig::default(), 365);
        let mut patient = Patient::enroll(PatientId::new(), 10, 1, &fixture.params).unwrap();
        let err = patient.step(11, 0, &fixture.ctx()).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Invariant { source } if matches!(
                source.violation,
                InvariantViolation::FirstVisitNotAtEnrollment { enrollment_day: 10, day: 11 }
            )
        ));
    }

    #[test]
    fn repeated_day_is_rejected() {
        let fixture = Fixture::new(&ProtocolConfig::default(), 365);
        let mut patient = Patient::enroll(PatientId::new(), 0, 1, &fixture.params).unwrap();
        patient.step(0, 0, &fixture.ctx()).unwrap();
        let err = patient.step(0, 0, &fixture.ctx()).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Invariant { source } if source.step_index == 1
        ));
    }

    #[test]
    fn finalized_patient_refuses_steps() {
        let fixture = Fixture::new(&ProtocolConfig::default(), 365);
        let mut patient = Patient::enroll(PatientId::new(), 0, 1, &fixture.params).unwrap();
        patient.finalize();
        let err = patient.step(0, 0, &fixture.ctx()).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Invariant { source }
                if source.violation == InvariantViolation::PatientFinalized
        ));
    }

    #[test]
    fn first_visit_is_never_a_discontinuation() {
        let fixture = Fixture::new(&certain_discontinuation(true, 0.0), 365);
        for seed in 0..50 {
            let mut patient = Patient::enroll(PatientId::new(), 0, seed, &fixture.params).unwrap();
            patient.step(0, 0, &fixture.ctx()).unwrap();
            assert_eq!(patient.visits()[0].kind(), VisitKind::Treatment);
        }
    }

    #[test]
    fn discontinuation_without_follow_up_ends_visits() {
        let fixture = Fixture::new(&certain_discontinuation(false, 0.5), 365);
        let mut patient = Patient::enroll(PatientId::new(), 0, 3, &fixture.params).unwrap();
        run(&mut patient, &fixture.ctx(), 100);
        let last = patient.visits().last().unwrap();
        assert!(last.kind().is_discontinuation());
        assert_eq!(last.next_interval_days(), None);
        assert_eq!(patient.next_visit_day(), None);
        assert_eq!(patient.status(), TreatmentStatus::Discontinued);
    }

    #[test]
    fn retreatment_follows_discontinuation() {
        let fixture = Fixture::new(&certain_discontinuation(true, 1.0), 365);
        let mut patient = Patient::enroll(PatientId::new(), 0, 4, &fixture.params).unwrap();
        run(&mut patient, &fixture.ctx(), 100);
        let visits = patient.visits();
        let disc = visits
            .iter()
            .position(|v| v.kind().is_discontinuation())
            .unwrap();
        let retreat = visits.iter().position(|v| v.kind().is_retreatment()).unwrap();
        assert!(retreat > disc);
        assert!(visits[retreat].day() > visits[disc].day());
        assert!(visits[retreat].injected());
        assert_eq!(visits[retreat].treatment_status(), TreatmentStatus::Retreated);
        assert!(patient.retreatment_count() >= 1);
    }

    #[test]
    fn retreatment_cap_makes_discontinuation_permanent() {
        let mut config = certain_discontinuation(true, 1.0);
        config.retreatment.max_retreatments = Some(0);
        let fixture = Fixture::new(&config, 365);
        let mut patient = Patient::enroll(PatientId::new(), 0, 5, &fixture.params).unwrap();
        run(&mut patient, &fixture.ctx(), 100);
        assert_eq!(patient.next_visit_day(), None);
        assert!(patient.visits().iter().all(|v| !v.kind().is_retreatment()));
    }

    #[test]
    fn response_type_is_fixed() {
        let fixture = Fixture::new(&ProtocolConfig::default(), 730);
        let mut patient = Patient::enroll(PatientId::new(), 0, 6, &fixture.params).unwrap();
        let response_type = patient.response_type();
        run(&mut patient, &fixture.ctx(), 1_000);
        assert_eq!(patient.response_type(), response_type);
        let record = patient.record(DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(record.response_type, response_type);
        assert_eq!(record.visit_count as usize, patient.visits().len());
    }

    #[test]
    fn offsets_count_from_enrollment() {
        let fixture = Fixture::new(&ProtocolConfig::default(), 365);
        let mut patient = Patient::enroll(PatientId::new(), 10, 8, &fixture.params).unwrap();
        run(&mut patient, &fixture.ctx(), 4);
        let visits = patient.visits();
        assert_eq!(visits[0].day(), 10);
        assert_eq!(visits[0].days_since_enrollment(), 0);
        for visit in visits {
            assert_eq!(visit.days_since_enrollment(), visit.day() - 10);
        }
    }

    /// Curve that only pays out at the end of a 60 day horizon.
    fn end_of_horizon_discontinuation() -> ProtocolConfig {
        let mut config = certain_discontinuation(true, 0.0);
        config.discontinuation.horizon_days = Some(60);
        config
    }

    #[test]
    fn close_out_converts_last_treatment_visit() {
        let fixture = Fixture::new(&end_of_horizon_discontinuation(), 60);
        let ctx = fixture.ctx();
        let mut patient = Patient::enroll(PatientId::new(), 0, 9, &fixture.params).unwrap();
        patient.step(0, 0, &ctx).unwrap();
        patient.step(28, 0, &ctx).unwrap();
        assert_eq!(patient.visits()[1].kind(), VisitKind::Treatment);

        // The day 56 visit was pushed past the run end.
        let category = patient.close_out(&ctx).unwrap();
        assert_eq!(category, Some(DiscontinuationCategory::Premature));

        let last = patient.visits().last().unwrap();
        assert_eq!(patient.visits().len(), 2);
        assert_eq!(last.day(), 28);
        assert!(last.kind().is_discontinuation());
        assert!(!last.injected());
        assert_eq!(last.treatment_status(), TreatmentStatus::Discontinued);
        assert_eq!(last.next_interval_days(), Some(30));
        assert_eq!(patient.status(), TreatmentStatus::Discontinued);
        assert_eq!(
            patient.first_discontinuation(),
            Some(DiscontinuationCategory::Premature)
        );
    }

    #[test]
    fn close_out_leaves_first_visit_alone() {
        let fixture = Fixture::new(&end_of_horizon_discontinuation(), 60);
        let ctx = fixture.ctx();
        let mut patient = Patient::enroll(PatientId::new(), 0, 9, &fixture.params).unwrap();
        assert_eq!(patient.close_out(&ctx).unwrap(), None);
        patient.step(0, 0, &ctx).unwrap();
        assert_eq!(patient.close_out(&ctx).unwrap(), None);
        assert_eq!(patient.visits()[0].kind(), VisitKind::Treatment);
        assert_eq!(patient.status(), TreatmentStatus::Active);
    }

    #[test]
    fn deferred_enrollment_moves_first_visit() {
        let fixture = Fixture::new(&ProtocolConfig::default(), 365);
        let mut patient = Patient::enroll(PatientId::new(), 0, 7, &fixture.params).unwrap();
        patient.defer_enrollment(2).unwrap();
        assert_eq!(patient.next_visit_day(), Some(2));
        patient.step(2, 2, &fixture.ctx()).unwrap();
        assert_eq!(patient.visits()[0].deferred_days(), 2);
        assert!(patient.defer_enrollment(5).is_err());
    }
}
