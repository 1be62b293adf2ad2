// THEORY:
// Zone metadata and reservations are owned by systems outside the occupancy
// pipeline. The aggregator only sees them through two narrow read traits, which
// keeps it a pure function of its inputs and lets a database-backed
// implementation drop in without touching the pipeline.
//
// The in-memory implementations here back the bundled server and the tests.
// Live camera zones cannot be deleted and manually added zones are never live.
// A reservation holds its slot for five minutes by default.

use crate::core_modules::occupancy::ZoneId;
use crate::error::CollaboratorError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(300);

/// One row of zone metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMetadata {
    pub id: ZoneId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    /// Static capacity, used when the zone has no camera.
    pub total_slots: u32,
    /// Hourly price.
    pub price: f64,
    /// Marks camera-equipped zones. These are protected from deletion.
    #[serde(default)]
    pub is_live: bool,
}

/// Fields needed to add a zone; the directory assigns the id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewZone {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub total_slots: u32,
    pub price: f64,
}

/// A single user's hold on a slot in a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationRecord {
    pub user: String,
    pub zone_id: ZoneId,
    pub created_at: SystemTime,
}

/// Read access to zone metadata.
pub trait ZoneDirectory: Send + Sync {
    fn list_zones(&self) -> Result<Vec<ZoneMetadata>, CollaboratorError>;
}

/// Read access to active reservation counts.
pub trait ReservationLedger: Send + Sync {
    fn active_reservation_count(&self, zone_id: ZoneId) -> Result<u32, CollaboratorError>;
}

#[derive(Debug, Default)]
pub struct InMemoryZoneDirectory {
    zones: RwLock<Vec<ZoneMetadata>>,
}

impl InMemoryZoneDirectory {
    pub fn new(zones: Vec<ZoneMetadata>) -> Self {
        Self {
            zones: RwLock::new(zones),
        }
    }

    /// Appends a non-live zone and returns its id.
    pub fn add_zone(&self, zone: NewZone) -> ZoneId {
        let mut zones = self.zones.write();
        let id = zones.iter().map(|z| z.id).max().map_or(1, |max| max + 1);
        zones.push(ZoneMetadata {
            id,
            name: zone.name,
            lat: zone.lat,
            lng: zone.lng,
            total_slots: zone.total_slots,
            price: zone.price,
            is_live: false,
        });
        id
    }

    /// Removes a zone unless it is live. Returns whether a zone was removed.
    pub fn delete_zone(&self, zone_id: ZoneId) -> bool {
        let mut zones = self.zones.write();
        let before = zones.len();
        zones.retain(|z| z.id != zone_id || z.is_live);
        zones.len() != before
    }

    pub fn get(&self, zone_id: ZoneId) -> Option<ZoneMetadata> {
        self.zones.read().iter().find(|z| z.id == zone_id).cloned()
    }
}

impl ZoneDirectory for InMemoryZoneDirectory {
    fn list_zones(&self) -> Result<Vec<ZoneMetadata>, CollaboratorError> {
        Ok(self.zones.read().clone())
    }
}

#[derive(Debug)]
pub struct InMemoryReservationLedger {
    ttl: Duration,
    records: RwLock<Vec<ReservationRecord>>,
}

impl Default for InMemoryReservationLedger {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVATION_TTL)
    }
}

impl InMemoryReservationLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: RwLock::new(Vec::new()),
        }
    }

    fn is_active(&self, record: &ReservationRecord, now: SystemTime) -> bool {
        // A creation time in the future (clock adjustment) counts as fresh.
        now.duration_since(record.created_at)
            .map(|age| age < self.ttl)
            .unwrap_or(true)
    }

    /// Reserves a slot for `user` in `zone_id`. An active reservation by the same
    /// user in the same zone is refreshed instead of duplicated.
    pub fn reserve(&self, user: &str, zone_id: ZoneId) -> ReservationRecord {
        let now = SystemTime::now();
        let mut records = self.records.write();
        records.retain(|r| self.is_active(r, now));

        if let Some(existing) = records.iter_mut().find(|r| r.user == user && r.zone_id == zone_id) {
            existing.created_at = now;
            return existing.clone();
        }

        let record = ReservationRecord {
            user: user.to_string(),
            zone_id,
            created_at: now,
        };
        records.push(record.clone());
        record
    }

    /// Stores a record as-is.
    pub fn insert(&self, record: ReservationRecord) {
        self.records.write().push(record);
    }

    /// Drops the reservation of `user` in `zone_id`. Returns whether one existed.
    pub fn release(&self, user: &str, zone_id: ZoneId) -> bool {
        let now = SystemTime::now();
        let mut records = self.records.write();
        let mut released = false;
        records.retain(|r| {
            if r.user == user && r.zone_id == zone_id {
                released = true;
                return false;
            }
            self.is_active(r, now)
        });
        released
    }

    pub fn active_reservations(&self, zone_id: ZoneId) -> Vec<ReservationRecord> {
        let now = SystemTime::now();
        self.records
            .read()
            .iter()
            .filter(|r| r.zone_id == zone_id && self.is_active(r, now))
            .cloned()
            .collect()
    }
}

impl ReservationLedger for InMemoryReservationLedger {
    fn active_reservation_count(&self, zone_id: ZoneId) -> Result<u32, CollaboratorError> {
        let now = SystemTime::now();
        let records = self.records.read();
        Ok(records
            .iter()
            .filter(|r| r.zone_id == zone_id && self.is_active(r, now))
            .count() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: ZoneId, is_live: bool) -> ZoneMetadata {
        ZoneMetadata {
            id,
            name: format!("Zone {id}"),
            lat: 0.0,
            lng: 0.0,
            total_slots: 10,
            price: 5.0,
            is_live,
        }
    }

    #[test]
    fn added_zones_get_next_id_and_are_not_live() {
        let directory = InMemoryZoneDirectory::new(vec![zone(1, true), zone(4, false)]);
        let id = directory.add_zone(NewZone {
            name: "Overflow".to_string(),
            lat: 1.0,
            lng: 2.0,
            total_slots: 12,
            price: 3.0,
        });
        assert_eq!(id, 5);
        let added = directory.get(5).expect("added zone");
        assert!(!added.is_live);
        assert_eq!(directory.list_zones().expect("list").len(), 3);
    }

    #[test]
    fn live_zones_cannot_be_deleted() {
        let directory = InMemoryZoneDirectory::new(vec![zone(1, true), zone(2, false)]);
        assert!(!directory.delete_zone(1));
        assert!(directory.delete_zone(2));
        assert!(!directory.delete_zone(2));
        let ids: Vec<ZoneId> = directory.list_zones().expect("list").iter().map(|z| z.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn reservations_are_counted_per_zone() {
        let ledger = InMemoryReservationLedger::default();
        ledger.reserve("ana", 1);
        ledger.reserve("ben", 1);
        ledger.reserve("ana", 2);
        ledger.reserve("ana", 1);

        assert_eq!(ledger.active_reservation_count(1).expect("count"), 2);
        assert_eq!(ledger.active_reservation_count(2).expect("count"), 1);
        assert_eq!(ledger.active_reservation_count(3).expect("count"), 0);
    }

    #[test]
    fn released_reservations_no_longer_count() {
        let ledger = InMemoryReservationLedger::default();
        ledger.reserve("ana", 1);
        assert!(ledger.release("ana", 1));
        assert!(!ledger.release("ana", 1));
        assert_eq!(ledger.active_reservation_count(1).expect("count"), 0);
    }

    #[test]
    fn expired_reservations_are_ignored() {
        let ledger = InMemoryReservationLedger::new(Duration::from_secs(300));
        let old = SystemTime::now() - Duration::from_secs(301);
        ledger.insert(ReservationRecord {
            user: "late".to_string(),
            zone_id: 1,
            created_at: old,
        });
        ledger.insert(ReservationRecord {
            user: "fresh".to_string(),
            zone_id: 1,
            created_at: SystemTime::now(),
        });

        assert_eq!(ledger.active_reservation_count(1).expect("count"), 1);
        let active = ledger.active_reservations(1);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user, "fresh");
    }

    #[test]
    fn counting_leaves_records_untouched_and_writes_prune() {
        let ledger = InMemoryReservationLedger::new(Duration::from_secs(300));
        ledger.insert(ReservationRecord {
            user: "late".to_string(),
            zone_id: 1,
            created_at: SystemTime::now() - Duration::from_secs(301),
        });
        ledger.insert(ReservationRecord {
            user: "fresh".to_string(),
            zone_id: 1,
            created_at: SystemTime::now(),
        });

        assert_eq!(ledger.active_reservation_count(1).expect("count"), 1);
        assert_eq!(ledger.records.read().len(), 2);

        assert!(ledger.release("fresh", 1));
        assert!(ledger.records.read().is_empty());
    }
}
