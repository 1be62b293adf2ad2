// THEORY:
// The `ZoneStateStore` is the meeting point between the per-zone occupancy loops
// and everything that reads occupancy. It replaces process-wide globals with one
// explicit, cloneable handle that is passed to every writer and reader.
//
// Key architectural principles:
// 1.  **Single Writer Per Key**: Each zone entry is written only by that zone's
//     loop, so per-zone ordering follows loop iteration order with no extra
//     sequencing.
// 2.  **Last Value Wins**: A publication replaces the whole entry. Readers see
//     either the previous state or the new one, never a mix.
// 3.  **Eventual Cross-Zone Consistency**: `read_all` copies the map under one read
//     lock, but the zones inside it were produced at different moments. Consumers
//     accept that.
// 4.  **Never Fails, Never Forgets**: Reads of unknown zones return the default
//     `{0, 0, unknown}` state, and entries are never removed at runtime.

use crate::core_modules::occupancy::{ZoneId, ZoneOccupancyState};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle phase of a zone's occupancy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopPhase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Everything the store knows about one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneSnapshot {
    /// The last published occupancy state.
    pub state: ZoneOccupancyState,
    /// Where the zone's loop currently is in its lifecycle.
    pub phase: LoopPhase,
    /// When `state` was published. `None` until the first publication.
    pub published_at: Option<Instant>,
}

impl ZoneSnapshot {
    fn new(phase: LoopPhase) -> Self {
        Self {
            state: ZoneOccupancyState::default(),
            phase,
            published_at: None,
        }
    }

    /// Time since the last publication.
    pub fn age(&self) -> Option<Duration> {
        self.published_at.map(|at| at.elapsed())
    }

    /// A state is stale once its loop is no longer running; it will not change again.
    pub fn is_stale(&self) -> bool {
        self.phase != LoopPhase::Running
    }

    /// True once the loop has reached `Running` or published at least once. A
    /// loop that failed at `Starting` never qualifies.
    pub fn has_sensor_data(&self) -> bool {
        self.phase == LoopPhase::Running || self.published_at.is_some()
    }
}

/// Shared, thread-safe, last-value-wins store of per-zone occupancy.
#[derive(Debug, Clone, Default)]
pub struct ZoneStateStore {
    entries: Arc<RwLock<HashMap<ZoneId, ZoneSnapshot>>>,
}

impl ZoneStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the default entry for a sensor-backed zone. Returns `false` if the
    /// zone was already registered.
    pub fn register(&self, zone_id: ZoneId) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&zone_id) {
            return false;
        }
        entries.insert(zone_id, ZoneSnapshot::new(LoopPhase::Starting));
        true
    }

    /// True when the zone has a sensor loop registered.
    pub fn contains(&self, zone_id: ZoneId) -> bool {
        self.entries.read().contains_key(&zone_id)
    }

    /// Replaces the stored state of a zone.
    pub fn publish(&self, zone_id: ZoneId, state: ZoneOccupancyState) {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(zone_id)
            .or_insert_with(|| ZoneSnapshot::new(LoopPhase::Running));
        entry.state = state;
        entry.published_at = Some(Instant::now());
    }

    /// The most recent state of a zone, or the default state if none was published.
    pub fn read(&self, zone_id: ZoneId) -> ZoneOccupancyState {
        self.entries
            .read()
            .get(&zone_id)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// The latest state of every registered zone.
    pub fn read_all(&self) -> HashMap<ZoneId, ZoneOccupancyState> {
        self.entries
            .read()
            .iter()
            .map(|(zone_id, entry)| (*zone_id, entry.state))
            .collect()
    }

    pub fn snapshot(&self, zone_id: ZoneId) -> Option<ZoneSnapshot> {
        self.entries.read().get(&zone_id).copied()
    }

    pub fn snapshot_all(&self) -> HashMap<ZoneId, ZoneSnapshot> {
        self.entries.read().clone()
    }

    pub fn set_phase(&self, zone_id: ZoneId, phase: LoopPhase) {
        let mut entries = self.entries.write();
        entries
            .entry(zone_id)
            .or_insert_with(|| ZoneSnapshot::new(phase))
            .phase = phase;
    }

    pub fn phase(&self, zone_id: ZoneId) -> Option<LoopPhase> {
        self.entries.read().get(&zone_id).map(|entry| entry.phase)
    }

    /// Registered zone ids in ascending order.
    pub fn zone_ids(&self) -> Vec<ZoneId> {
        let mut ids: Vec<ZoneId> = self.entries.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
