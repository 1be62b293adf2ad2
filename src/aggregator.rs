// THEORY:
// The `aggregator` is the top-level read API of the engine. It merges three
// independently changing inputs into one view per zone:
// - zone metadata (names, coordinates, prices, static capacity),
// - the latest sensor state from the `ZoneStateStore`,
// - the number of active reservations per zone.
//
// Key architectural principles:
// 1.  **Pure Per Call**: A view is computed fresh on every request and never
//     stored. Concurrent callers cannot interfere with each other.
// 2.  **Reservation Overlay**: Reservations are subtracted from the free count and
//     the result is clamped at zero. The status tier is then re-derived, so a zone
//     the camera sees as `available` can drop to `filling` or `full`.
// 3.  **Metadata Order**: Views come out in the order the metadata collaborator
//     lists zones. Ranking by distance or availability is left to the client.
// 4.  **Best Effort Sensors, Strict Collaborators**: Sensor reads never fail; at
//     worst they are stale, which the view reports. A failing metadata or
//     reservation collaborator fails the whole call instead of being defaulted.

use crate::collaborators::{ReservationLedger, ZoneDirectory, ZoneMetadata};
use crate::core_modules::occupancy::{ZoneId, ZoneOccupancyState, ZoneStatus};
use crate::error::AggregateError;
use crate::zone_store::{ZoneSnapshot, ZoneStateStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// The externally visible availability of one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedZoneView {
    pub id: ZoneId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub total_slots: u32,
    /// Free slots after the reservation overlay, never negative.
    pub free_slots: u32,
    pub status: ZoneStatus,
    pub price: f64,
    /// True when the numbers come from a camera rather than static capacity.
    pub sensor_backed: bool,
    /// True when the zone's camera loop is no longer running and its numbers
    /// will not change.
    pub stale: bool,
}

/// Subtracts reservations from a free count, clamping at zero, and re-derives
/// the status tier from the result.
pub fn overlay_reservations(free_slots: u32, reported: ZoneStatus, reservations: u32) -> (u32, ZoneStatus) {
    let final_free = free_slots.saturating_sub(reservations);
    (final_free, ZoneStatus::rederive(final_free, reported))
}

/// Builds one view per metadata row, in metadata order.
pub fn aggregate_zone_views(
    zones: Vec<ZoneMetadata>,
    snapshots: &HashMap<ZoneId, ZoneSnapshot>,
    reservations: &dyn ReservationLedger,
    display_offset: u32,
) -> Result<Vec<AggregatedZoneView>, AggregateError> {
    zones
        .into_iter()
        .map(|zone| -> Result<AggregatedZoneView, AggregateError> {
            let reserved = reservations.active_reservation_count(zone.id)?;
            let snapshot = snapshots.get(&zone.id);
            Ok(build_view(zone, snapshot, reserved, display_offset))
        })
        .collect()
}

fn build_view(
    zone: ZoneMetadata,
    snapshot: Option<&ZoneSnapshot>,
    reserved: u32,
    display_offset: u32,
) -> AggregatedZoneView {
    // --- 1. Pick the source of truth for capacity ---
    let snapshot = snapshot.filter(|snapshot| snapshot.has_sensor_data());
    let (total_slots, free_slots, reported, stale) = match snapshot {
        Some(snapshot) => (
            snapshot.state.total_slots,
            snapshot.state.free_slots.saturating_sub(display_offset),
            snapshot.state.status,
            snapshot.is_stale(),
        ),
        None => (zone.total_slots, zone.total_slots, ZoneStatus::Available, false),
    };

    // --- 2. Overlay reservations ---
    let (free_slots, status) = overlay_reservations(free_slots, reported, reserved);

    AggregatedZoneView {
        id: zone.id,
        name: zone.name,
        lat: zone.lat,
        lng: zone.lng,
        total_slots,
        free_slots,
        status,
        price: zone.price,
        sensor_backed: snapshot.is_some(),
        stale,
    }
}

/// The read API handed to request handlers. Cheap to clone.
#[derive(Clone)]
pub struct ZoneAggregator {
    store: ZoneStateStore,
    directory: Arc<dyn ZoneDirectory>,
    reservations: Arc<dyn ReservationLedger>,
    /// Subtracted from sensor free counts before the overlay, clamped at zero.
    display_offset: u32,
}

impl ZoneAggregator {
    pub fn new(
        store: ZoneStateStore,
        directory: Arc<dyn ZoneDirectory>,
        reservations: Arc<dyn ReservationLedger>,
    ) -> Self {
        Self {
            store,
            directory,
            reservations,
            display_offset: 0,
        }
    }

    pub fn with_display_offset(mut self, display_offset: u32) -> Self {
        self.display_offset = display_offset;
        self
    }

    /// Latest raw sensor state of one zone. Never fails.
    pub fn get_zone_state(&self, zone_id: ZoneId) -> ZoneOccupancyState {
        self.store.read(zone_id)
    }

    /// Reservation-adjusted views of every zone, in metadata order.
    pub fn get_all_zone_views(&self) -> Result<Vec<AggregatedZoneView>, AggregateError> {
        let zones = self.directory.list_zones()?;
        let snapshots = self.store.snapshot_all();
        aggregate_zone_views(zones, &snapshots, self.reservations.as_ref(), self.display_offset)
    }

    pub fn store(&self) -> &ZoneStateStore {
        &self.store
    }
}
