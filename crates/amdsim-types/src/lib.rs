//! Shared type definitions for the wet AMD treatment simulation.
//!
//! This crate is the single source of truth for the data contract between
//! the simulation engine and the storage and analysis layers around it.
//! Types flow downstream to `TypeScript` via `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for patient and run identifiers
//! - [`enums`] -- Disease, treatment, discontinuation, and response enums
//! - [`structs`] -- The validated [`Visit`] type and flat output rows

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{
    DAYS_PER_YEAR, DiscontinuationCategory, DiseaseState, LoadingOutcome, ProtocolPhase,
    ResponseType, TimeBucket, TransitionRegime, TreatmentStatus,
};
pub use ids::{PatientId, RunId};
pub use structs::{
    PatientRecord, VisionBounds, Visit, VisitError, VisitFields, VisitKind, VisitRecord,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for every exported type.

    #[test]
    fn export_bindings() {
        // ts-rs writes bindings when `export_all` is called; the files land
        // in the `bindings/` directory relative to the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::PatientId::export_all();
        let _ = crate::ids::RunId::export_all();

        // Enums
        let _ = crate::enums::DiseaseState::export_all();
        let _ = crate::enums::TransitionRegime::export_all();
        let _ = crate::enums::ProtocolPhase::export_all();
        let _ = crate::enums::TreatmentStatus::export_all();
        let _ = crate::enums::DiscontinuationCategory::export_all();
        let _ = crate::enums::ResponseType::export_all();
        let _ = crate::enums::LoadingOutcome::export_all();
        let _ = crate::enums::TimeBucket::export_all();

        // Structs
        let _ = crate::structs::VisitKind::export_all();
        let _ = crate::structs::VisionBounds::export_all();
        let _ = crate::structs::Visit::export_all();
        let _ = crate::structs::VisitRecord::export_all();
        let _ = crate::structs::PatientRecord::export_all();
    }
}
