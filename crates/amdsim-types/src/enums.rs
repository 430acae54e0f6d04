//! Enumeration types for the AMD treatment simulation.
//!
//! Every closed set the engine branches on lives here so that the protocol
//! loader, the models, and the output rows agree on one spelling. All
//! enums serialize in `snake_case`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Disease activity
// ---------------------------------------------------------------------------

/// Neovascular disease activity, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum DiseaseState {
    /// Untreated disease at presentation. Only occurs before the first visit.
    Naive,
    /// No fluid or haemorrhage; the lesion is quiescent.
    Stable,
    /// Active exudation.
    Active,
    /// Aggressive activity with a poor response to the current interval.
    HighlyActive,
}

impl DiseaseState {
    /// All states in severity order. Matrix rows and columns use this order.
    pub const ALL: [Self; 4] = [Self::Naive, Self::Stable, Self::Active, Self::HighlyActive];

    /// Position of this state in [`DiseaseState::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Self::Naive => 0,
            Self::Stable => 1,
            Self::Active => 2,
            Self::HighlyActive => 3,
        }
    }

    /// Whether the state shows disease activity requiring treatment.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::HighlyActive)
    }
}

/// Which transition matrix applies to a disease activity draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum TransitionRegime {
    /// Treated, within the loading phase.
    Loading,
    /// Treated, after the loading phase.
    Maintenance,
    /// Not under treatment (discontinued and monitored).
    Untreated,
}

impl TransitionRegime {
    /// All regimes in declaration order.
    pub const ALL: [Self; 3] = [Self::Loading, Self::Maintenance, Self::Untreated];

    /// Select the regime for a visit.
    pub const fn for_visit(phase: ProtocolPhase, treatment_active: bool) -> Self {
        if !treatment_active {
            return Self::Untreated;
        }
        match phase {
            ProtocolPhase::Loading => Self::Loading,
            ProtocolPhase::Maintenance => Self::Maintenance,
        }
    }
}

// ---------------------------------------------------------------------------
// Treatment course
// ---------------------------------------------------------------------------

/// Protocol phase of a treatment visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ProtocolPhase {
    /// Fixed, closely spaced initial injections.
    Loading,
    /// Adaptive or fixed scheduling after loading.
    Maintenance,
}

/// Treatment status of a patient at a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum TreatmentStatus {
    /// On active treatment.
    Active,
    /// Treatment suspended, either monitored or permanently stopped.
    Discontinued,
    /// Treatment resumed at this visit after a discontinuation.
    Retreated,
}

impl TreatmentStatus {
    /// Whether the patient receives treatment in this status.
    pub const fn is_treating(self) -> bool {
        matches!(self, Self::Active | Self::Retreated)
    }
}

/// Reason a patient's treatment sequence was suspended.
///
/// Declaration order is the fixed priority order used when more than one
/// category is drawn at the same visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum DiscontinuationCategory {
    /// Protocol completion with stable disease.
    Planned,
    /// Non-clinical, administrative reasons.
    Administrative,
    /// Treatment course not renewed at a renewal checkpoint.
    NotRenewed,
    /// Early dropout.
    Premature,
}

impl DiscontinuationCategory {
    /// All categories in priority order.
    pub const ALL: [Self; 4] = [
        Self::Planned,
        Self::Administrative,
        Self::NotRenewed,
        Self::Premature,
    ];

    /// Position of this category in [`DiscontinuationCategory::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Self::Planned => 0,
            Self::Administrative => 1,
            Self::NotRenewed => 2,
            Self::Premature => 3,
        }
    }
}

/// Fixed per-patient class modulating vision response magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Strong responder.
    Good,
    /// Typical responder.
    Average,
    /// Weak responder.
    Poor,
}

impl ResponseType {
    /// All response types in declaration order.
    pub const ALL: [Self; 3] = [Self::Good, Self::Average, Self::Poor];
}

/// Per-visit vision outcome class used during the loading phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum LoadingOutcome {
    /// Acuity improves.
    Improve,
    /// Acuity holds.
    Stable,
    /// Acuity declines.
    Decline,
}

impl LoadingOutcome {
    /// All outcomes in declaration order.
    pub const ALL: [Self; 3] = [Self::Improve, Self::Stable, Self::Decline];
}

/// Elapsed treatment time bucket used to scale treated vision response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    /// Within the loading phase.
    Loading,
    /// First year after enrollment.
    Year1,
    /// Second year after enrollment.
    Year2,
    /// Third year onwards.
    Year3Plus,
}

/// Days in one simulated year.
pub const DAYS_PER_YEAR: u32 = 365;

impl TimeBucket {
    /// Classify a visit by phase and days since enrollment.
    pub const fn classify(phase: ProtocolPhase, days_since_enrollment: u32) -> Self {
        if matches!(phase, ProtocolPhase::Loading) {
            return Self::Loading;
        }
        if days_since_enrollment < DAYS_PER_YEAR {
            Self::Year1
        } else if days_since_enrollment < DAYS_PER_YEAR.saturating_mul(2) {
            Self::Year2
        } else {
            Self::Year3Plus
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disease_states_ordered_by_severity() {
        assert!(DiseaseState::Naive < DiseaseState::Stable);
        assert!(DiseaseState::Stable < DiseaseState::Active);
        assert!(DiseaseState::Active < DiseaseState::HighlyActive);
    }

    #[test]
    fn indices_match_all_order() {
        for (i, state) in DiseaseState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
        }
        for (i, category) in DiscontinuationCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn regime_selection() {
        assert_eq!(
            TransitionRegime::for_visit(ProtocolPhase::Loading, true),
            TransitionRegime::Loading
        );
        assert_eq!(
            TransitionRegime::for_visit(ProtocolPhase::Maintenance, true),
            TransitionRegime::Maintenance
        );
        assert_eq!(
            TransitionRegime::for_visit(ProtocolPhase::Maintenance, false),
            TransitionRegime::Untreated
        );
    }

    #[test]
    fn time_buckets() {
        assert_eq!(TimeBucket::classify(ProtocolPhase::Loading, 500), TimeBucket::Loading);
        assert_eq!(TimeBucket::classify(ProtocolPhase::Maintenance, 0), TimeBucket::Year1);
        assert_eq!(TimeBucket::classify(ProtocolPhase::Maintenance, 364), TimeBucket::Year1);
        assert_eq!(TimeBucket::classify(ProtocolPhase::Maintenance, 365), TimeBucket::Year2);
        assert_eq!(TimeBucket::classify(ProtocolPhase::Maintenance, 730), TimeBucket::Year3Plus);
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&DiscontinuationCategory::NotRenewed).unwrap_or_default();
        assert_eq!(json, "\"not_renewed\"");
        let json = serde_json::to_string(&DiseaseState::HighlyActive).unwrap_or_default();
        assert_eq!(json, "\"highly_active\"");
    }
}
