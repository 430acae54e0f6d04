//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Identifiers are derived from the run's seeded random stream rather than
//! the wall clock, so two runs with the same seed produce the same ids.
//! [`PatientId::from_random_bytes`] builds a version 4 UUID from caller
//! supplied bytes; [`PatientId::new`] draws from the OS generator and is
//! only meant for tests and ad-hoc tooling.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier from the operating system generator.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create a deterministic identifier from 16 random bytes.
            ///
            /// The version and variant bits are overwritten so the result
            /// is a well-formed version 4 UUID.
            pub const fn from_random_bytes(bytes: [u8; 16]) -> Self {
                Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a simulated patient.
    PatientId
}

define_id! {
    /// Unique identifier for one cohort run.
    RunId
}
