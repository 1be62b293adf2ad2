// THEORY:
// The `occupancy` module defines the single piece of state every other layer talks
// about: how many slots a zone has, how many of them are free right now, and the
// coarse status tier derived from that free count.
//
// Key architectural principles:
// 1.  **One Tiering Rule**: The status tier is a pure function of the free count.
//     Both the per-zone loop and the aggregator's reservation overlay derive status
//     through `ZoneStatus::from_free_slots`, so the two can never disagree.
// 2.  **Plain Value Type**: `ZoneOccupancyState` is `Copy` and carries no identity.
//     It is replaced wholesale on every publication, never patched field by field.

use serde::{Deserialize, Serialize};

/// Zone identifiers as used by the zone metadata collaborator.
pub type ZoneId = u32;

/// Free counts strictly below this value (and above zero) put a zone in `Filling`.
pub const FILLING_THRESHOLD: u32 = 5;

/// Coarse availability classification of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    /// No state has been published for the zone yet.
    #[default]
    Unknown,
    /// At least `FILLING_THRESHOLD` slots are free.
    Available,
    /// Between one and `FILLING_THRESHOLD - 1` slots are free.
    Filling,
    /// No slot is free.
    Full,
}

impl ZoneStatus {
    /// Derives the status tier from a free-slot count.
    pub fn from_free_slots(free_slots: u32) -> Self {
        match free_slots {
            0 => ZoneStatus::Full,
            n if n < FILLING_THRESHOLD => ZoneStatus::Filling,
            _ => ZoneStatus::Available,
        }
    }

    /// Re-derives the tier after an adjustment of the free count. Only the low tiers
    /// are forced; above them the previously reported status is kept.
    pub fn rederive(free_slots: u32, reported: ZoneStatus) -> Self {
        match free_slots {
            0 => ZoneStatus::Full,
            n if n < FILLING_THRESHOLD => ZoneStatus::Filling,
            _ => reported,
        }
    }
}

/// The latest occupancy estimate for one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneOccupancyState {
    /// Number of slot regions configured for the zone.
    pub total_slots: u32,
    /// Number of slot regions classified as free in the last processed frame.
    pub free_slots: u32,
    /// Tier derived from `free_slots`.
    pub status: ZoneStatus,
}

impl ZoneOccupancyState {
    /// Builds a state from a classifier result. The free count is capped at the
    /// region count.
    pub fn from_counts(total_slots: u32, free_slots: u32) -> Self {
        let free_slots = free_slots.min(total_slots);
        Self {
            total_slots,
            free_slots,
            status: ZoneStatus::from_free_slots(free_slots),
        }
    }
}
