//! Daily clinic capacity.
//!
//! The ledger is touched only from the orchestrator's single event loop,
//! so it needs no locking. Days are booked in non-decreasing order; days
//! already behind the loop are dropped as it advances.

use std::collections::BTreeMap;

use amdsim_protocol::ResourceCapacity;

/// Visits booked per simulated day against a fixed daily capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityLedger {
    visits_per_day: u32,
    booked: BTreeMap<u32, u32>,
}

impl CapacityLedger {
    /// Empty ledger for the given capacity.
    pub const fn new(capacity: &ResourceCapacity) -> Self {
        Self {
            visits_per_day: capacity.visits_per_day,
            booked: BTreeMap::new(),
        }
    }

    /// Visits the clinic absorbs per day.
    pub const fn visits_per_day(&self) -> u32 {
        self.visits_per_day
    }

    /// Visits booked on `day`.
    pub fn booked(&self, day: u32) -> u32 {
        self.booked.get(&day).copied().unwrap_or(0)
    }

    /// Book one visit on `day`. Returns `false` when the day is full.
    pub fn try_book(&mut self, day: u32) -> bool {
        // Earlier days can no longer be booked by the event loop.
        if self.booked.first_key_value().is_some_and(|(first, _)| *first < day) {
            self.booked = self.booked.split_off(&day);
        }
        let slot = self.booked.entry(day).or_insert(0);
        if *slot >= self.visits_per_day {
            return false;
        }
        *slot = slot.saturating_add(1);
        true
    }
}
