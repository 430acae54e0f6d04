//! Visit and patient structs forming the engine's output contract.
//!
//! [`Visit`] is the tagged record a patient appends at every simulated
//! step. Its consistency rules (status matches kind, acuity within bounds,
//! nullability of the next interval) are checked once in [`Visit::new`],
//! so downstream consumers never re-validate. [`VisitRecord`] and
//! [`PatientRecord`] are the flat rows handed to storage writers: every
//! instant is a full UTC date-time, every duration an integer day count,
//! and boolean flags are never optional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{
    DiscontinuationCategory, DiseaseState, ProtocolPhase, ResponseType, TreatmentStatus,
};
use crate::ids::PatientId;

// ---------------------------------------------------------------------------
// Visit
// ---------------------------------------------------------------------------

/// What kind of visit a [`Visit`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VisitKind {
    /// Regular on-treatment visit.
    Treatment,
    /// Monitoring visit while treatment is suspended.
    Monitoring,
    /// Visit at which treatment was suspended.
    Discontinuation {
        /// The reason treatment was suspended.
        category: DiscontinuationCategory,
    },
    /// Visit at which treatment resumed.
    Retreatment {
        /// One-based count of retreatments for this patient.
        retreatment_number: u32,
    },
}

impl VisitKind {
    /// Whether this is a discontinuation visit.
    pub const fn is_discontinuation(self) -> bool {
        matches!(self, Self::Discontinuation { .. })
    }

    /// Whether this is a retreatment visit.
    pub const fn is_retreatment(self) -> bool {
        matches!(self, Self::Retreatment { .. })
    }

    /// The discontinuation category, if this is a discontinuation visit.
    pub const fn category(self) -> Option<DiscontinuationCategory> {
        match self {
            Self::Discontinuation { category } => Some(category),
            _ => None,
        }
    }
}

/// Inclusive acuity bounds in ETDRS letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct VisionBounds {
    /// Lowest representable acuity.
    pub min_letters: i32,
    /// Highest representable acuity.
    pub max_letters: i32,
}

impl VisionBounds {
    /// Whether `letters` lies within the bounds.
    pub const fn contains(self, letters: i32) -> bool {
        letters >= self.min_letters && letters <= self.max_letters
    }

    /// Width of the range as a float.
    pub fn span(self) -> f64 {
        f64::from(self.max_letters) - f64::from(self.min_letters)
    }
}

/// Consistency violations detected when constructing a [`Visit`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VisitError {
    /// Acuity outside the protocol bounds.
    #[error("vision {letters} outside [{min}, {max}]")]
    VisionOutOfBounds {
        /// The offending value.
        letters: i32,
        /// Lower bound.
        min: i32,
        /// Upper bound.
        max: i32,
    },

    /// Treatment status does not match the visit kind.
    #[error("status {status:?} inconsistent with visit kind {kind:?}")]
    StatusMismatch {
        /// The visit kind.
        kind: VisitKind,
        /// The status supplied.
        status: TreatmentStatus,
    },

    /// An injection flag that contradicts the visit kind.
    #[error("injection flag {injected} inconsistent with visit kind {kind:?}")]
    InjectionMismatch {
        /// The visit kind.
        kind: VisitKind,
        /// The flag supplied.
        injected: bool,
    },

    /// An on-treatment visit without a planned next interval.
    #[error("visit kind {kind:?} requires a next interval")]
    MissingInterval {
        /// The visit kind.
        kind: VisitKind,
    },

    /// A planned interval of zero days.
    #[error("planned interval must be at least one day")]
    ZeroInterval,

    /// The first visit does not fall on the enrollment day.
    #[error("first visit is {days_since_enrollment} days after enrollment")]
    FirstVisitOffset {
        /// Offset supplied for the first visit.
        days_since_enrollment: u32,
    },
}

/// Fields supplied when constructing a [`Visit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitFields {
    /// Owning patient.
    pub patient_id: PatientId,
    /// Zero-based position in the patient's visit sequence.
    pub index: u32,
    /// Days since simulation start.
    pub day: u32,
    /// Days since the patient's enrollment; 0 for the first visit.
    pub days_since_enrollment: u32,
    /// Recorded acuity in letters.
    pub vision_letters: i32,
    /// Disease state observed at the visit.
    pub disease_state: DiseaseState,
    /// Protocol phase at the visit.
    pub phase: ProtocolPhase,
    /// Treatment status at the visit.
    pub treatment_status: TreatmentStatus,
    /// Whether an injection was given.
    pub injected: bool,
    /// Planned days until the next visit, `None` when no visit follows.
    pub next_interval_days: Option<u32>,
    /// Days the visit was pushed back by capacity limits.
    pub deferred_days: u32,
    /// What kind of visit this is.
    pub kind: VisitKind,
}

/// One simulated clinic visit.
///
/// Constructed only through [`Visit::new`], which enforces:
///
/// - acuity within [`VisionBounds`]
/// - `Treatment` visits are `Active`, `Retreatment` visits are `Retreated`,
///   `Monitoring` and `Discontinuation` visits are `Discontinued`
/// - discontinuation and monitoring visits never inject; retreatment visits
///   always do
/// - treatment and retreatment visits always plan a next interval
/// - the first visit is on the enrollment day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Visit {
    patient_id: PatientId,
    index: u32,
    day: u32,
    days_since_enrollment: u32,
    vision_letters: i32,
    disease_state: DiseaseState,
    phase: ProtocolPhase,
    treatment_status: TreatmentStatus,
    injected: bool,
    next_interval_days: Option<u32>,
    deferred_days: u32,
    kind: VisitKind,
}

impl Visit {
    /// Validate and construct a visit.
    pub fn new(fields: VisitFields, bounds: VisionBounds) -> Result<Self, VisitError> {
        if !bounds.contains(fields.vision_letters) {
            return Err(VisitError::VisionOutOfBounds {
                letters: fields.vision_letters,
                min: bounds.min_letters,
                max: bounds.max_letters,
            });
        }

        let expected_status = match fields.kind {
            VisitKind::Treatment => TreatmentStatus::Active,
            VisitKind::Retreatment { .. } => TreatmentStatus::Retreated,
            VisitKind::Monitoring | VisitKind::Discontinuation { .. } => {
                TreatmentStatus::Discontinued
            }
        };
        if fields.treatment_status != expected_status {
            return Err(VisitError::StatusMismatch {
                kind: fields.kind,
                status: fields.treatment_status,
            });
        }

        let injection_ok = match fields.kind {
            VisitKind::Treatment => true,
            VisitKind::Retreatment { .. } => fields.injected,
            VisitKind::Monitoring | VisitKind::Discontinuation { .. } => !fields.injected,
        };
        if !injection_ok {
            return Err(VisitError::InjectionMismatch {
                kind: fields.kind,
                injected: fields.injected,
            });
        }

        if fields.index == 0 && fields.days_since_enrollment != 0 {
            return Err(VisitError::FirstVisitOffset {
                days_since_enrollment: fields.days_since_enrollment,
            });
        }

        match fields.next_interval_days {
            Some(0) => return Err(VisitError::ZeroInterval),
            None if matches!(
                fields.kind,
                VisitKind::Treatment | VisitKind::Retreatment { .. }
            ) =>
            {
                return Err(VisitError::MissingInterval { kind: fields.kind });
            }
            _ => {}
        }

        Ok(Self {
            patient_id: fields.patient_id,
            index: fields.index,
            day: fields.day,
            days_since_enrollment: fields.days_since_enrollment,
            vision_letters: fields.vision_letters,
            disease_state: fields.disease_state,
            phase: fields.phase,
            treatment_status: fields.treatment_status,
            injected: fields.injected,
            next_interval_days: fields.next_interval_days,
            deferred_days: fields.deferred_days,
            kind: fields.kind,
        })
    }

    /// The fields this visit was built from.
    pub const fn fields(&self) -> VisitFields {
        VisitFields {
            patient_id: self.patient_id,
            index: self.index,
            day: self.day,
            days_since_enrollment: self.days_since_enrollment,
            vision_letters: self.vision_letters,
            disease_state: self.disease_state,
            phase: self.phase,
            treatment_status: self.treatment_status,
            injected: self.injected,
            next_interval_days: self.next_interval_days,
            deferred_days: self.deferred_days,
            kind: self.kind,
        }
    }

    /// Owning patient.
    pub const fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    /// Zero-based position in the patient's visit sequence.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Days since simulation start.
    pub const fn day(&self) -> u32 {
        self.day
    }

    /// Days since the patient's enrollment.
    pub const fn days_since_enrollment(&self) -> u32 {
        self.days_since_enrollment
    }

    /// Recorded acuity in letters.
    pub const fn vision_letters(&self) -> i32 {
        self.vision_letters
    }

    /// Disease state observed at the visit.
    pub const fn disease_state(&self) -> DiseaseState {
        self.disease_state
    }

    /// Protocol phase at the visit.
    pub const fn phase(&self) -> ProtocolPhase {
        self.phase
    }

    /// Treatment status at the visit.
    pub const fn treatment_status(&self) -> TreatmentStatus {
        self.treatment_status
    }

    /// Whether an injection was given.
    pub const fn injected(&self) -> bool {
        self.injected
    }

    /// Planned days until the next visit.
    pub const fn next_interval_days(&self) -> Option<u32> {
        self.next_interval_days
    }

    /// Days the visit was pushed back by capacity limits.
    pub const fn deferred_days(&self) -> u32 {
        self.deferred_days
    }

    /// What kind of visit this is.
    pub const fn kind(&self) -> VisitKind {
        self.kind
    }
}

// ---------------------------------------------------------------------------
// Flat output rows
// ---------------------------------------------------------------------------

/// Flat per-visit row for columnar writers and vectorized aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct VisitRecord {
    /// Owning patient.
    pub patient_id: PatientId,
    /// Zero-based position in the patient's visit sequence.
    pub visit_index: u32,
    /// Days since simulation start.
    pub day: u32,
    /// Calendar instant of the visit.
    pub date: DateTime<Utc>,
    /// Days since the patient's enrollment; 0 for the first visit.
    pub days_since_enrollment: u32,
    /// Days since the patient's previous visit, `None` for the first visit.
    pub days_since_previous: Option<u32>,
    /// Recorded acuity in letters.
    pub vision_letters: i32,
    /// Disease state observed at the visit.
    pub disease_state: DiseaseState,
    /// Protocol phase at the visit.
    pub phase: ProtocolPhase,
    /// Treatment status at the visit.
    pub treatment_status: TreatmentStatus,
    /// Whether an injection was given.
    pub injected: bool,
    /// Planned days until the next visit.
    pub next_interval_days: Option<u32>,
    /// Whether treatment was suspended at this visit.
    pub is_discontinuation: bool,
    /// Whether treatment resumed at this visit.
    pub is_retreatment: bool,
    /// Discontinuation category for discontinuation visits.
    pub discontinuation_category: Option<DiscontinuationCategory>,
    /// Patient's retreatment count as of this visit.
    pub retreatment_count: u32,
    /// Days the visit was pushed back by capacity limits.
    pub deferred_days: u32,
}

/// Flat per-patient row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PatientRecord {
    /// Patient identifier.
    pub patient_id: PatientId,
    /// Enrollment offset in days since simulation start.
    pub enrollment_day: u32,
    /// Enrollment instant.
    pub enrollment_date: DateTime<Utc>,
    /// Recorded baseline acuity in letters.
    pub baseline_vision: i32,
    /// Response type assigned at creation.
    pub response_type: ResponseType,
    /// Treatment status after the last visit.
    pub final_status: TreatmentStatus,
    /// Category of the most recent discontinuation, if any.
    pub discontinuation_category: Option<DiscontinuationCategory>,
    /// Number of retreatments.
    pub retreatment_count: u32,
    /// Number of visits recorded.
    pub visit_count: u32,
    /// Number of injections given.
    pub injection_count: u32,
    /// Recorded acuity at the last visit.
    pub final_vision: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: VisionBounds = VisionBounds {
        min_letters: 0,
        max_letters: 85,
    };

    fn fields(kind: VisitKind, status: TreatmentStatus, injected: bool) -> VisitFields {
        VisitFields {
            patient_id: PatientId::from_random_bytes([9; 16]),
            index: 1,
            day: 28,
            days_since_enrollment: 28,
            vision_letters: 60,
            disease_state: DiseaseState::Stable,
            phase: ProtocolPhase::Maintenance,
            treatment_status: status,
            injected,
            next_interval_days: Some(56),
            deferred_days: 0,
            kind,
        }
    }

    #[test]
    fn valid_treatment_visit() {
        let visit = Visit::new(fields(VisitKind::Treatment, TreatmentStatus::Active, true), BOUNDS);
        assert!(visit.is_ok());
    }

    #[test]
    fn vision_out_of_bounds_rejected() {
        let mut f = fields(VisitKind::Treatment, TreatmentStatus::Active, true);
        f.vision_letters = 86;
        assert!(matches!(
            Visit::new(f, BOUNDS),
            Err(VisitError::VisionOutOfBounds { letters: 86, .. })
        ));
    }

    #[test]
    fn discontinuation_requires_discontinued_status() {
        let kind = VisitKind::Discontinuation {
            category: DiscontinuationCategory::Planned,
        };
        let result = Visit::new(fields(kind, TreatmentStatus::Active, false), BOUNDS);
        assert!(matches!(result, Err(VisitError::StatusMismatch { .. })));
    }

    #[test]
    fn discontinuation_never_injects() {
        let kind = VisitKind::Discontinuation {
            category: DiscontinuationCategory::Premature,
        };
        let result = Visit::new(fields(kind, TreatmentStatus::Discontinued, true), BOUNDS);
        assert!(matches!(result, Err(VisitError::InjectionMismatch { .. })));
    }

    #[test]
    fn permanent_discontinuation_has_no_interval() {
        let kind = VisitKind::Discontinuation {
            category: DiscontinuationCategory::Administrative,
        };
        let mut f = fields(kind, TreatmentStatus::Discontinued, false);
        f.next_interval_days = None;
        assert!(Visit::new(f, BOUNDS).is_ok());
    }

    #[test]
    fn treatment_visit_requires_interval() {
        let mut f = fields(VisitKind::Treatment, TreatmentStatus::Active, true);
        f.next_interval_days = None;
        assert!(matches!(
            Visit::new(f, BOUNDS),
            Err(VisitError::MissingInterval { .. })
        ));
    }

    #[test]
    fn zero_interval_rejected() {
        let mut f = fields(VisitKind::Treatment, TreatmentStatus::Active, true);
        f.next_interval_days = Some(0);
        assert_eq!(Visit::new(f, BOUNDS), Err(VisitError::ZeroInterval));
    }

    #[test]
    fn first_visit_must_be_at_enrollment() {
        let mut f = fields(VisitKind::Treatment, TreatmentStatus::Active, true);
        f.index = 0;
        assert_eq!(
            Visit::new(f, BOUNDS),
            Err(VisitError::FirstVisitOffset {
                days_since_enrollment: 28
            })
        );
        f.days_since_enrollment = 0;
        assert!(Visit::new(f, BOUNDS).is_ok());
    }

    #[test]
    fn visit_kind_serializes_tagged() {
        let kind = VisitKind::Retreatment {
            retreatment_number: 2,
        };
        let json = serde_json::to_string(&kind).unwrap_or_default();
        assert_eq!(json, r#"{"type":"retreatment","retreatment_number":2}"#);
    }
}
