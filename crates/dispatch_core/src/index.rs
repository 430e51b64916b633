//! Sharded in-memory index of driver positions, keyed both by driver and by
//! H3 cell.
//!
//! Two shard families guard the data: driver shards hold the authoritative
//! `DriverPosition` records, cell shards hold cell membership sets. Lock
//! order is fixed: a writer takes the driver shard first, then any cell
//! shards in ascending slot order. Readers take one shard family at a time
//! and re-check the record against the queried cell, so a concurrent move
//! can never show a driver in two cells.
//!
//! Reports are last-writer-wins per driver: an update carrying an older
//! `reported_at` than the stored record is discarded. Records older than the
//! freshness window are invisible to queries and reclaimed by
//! [`purge_stale`](DriverPositionIndex::purge_stale).

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use h3o::CellIndex;

use crate::error::DispatchError;
use crate::geo::GeoGrid;
use crate::types::{DriverId, DriverPosition, GeoPoint, TimestampMs, VehicleClass};

/// Outcome of a position report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionUpdate {
    Applied { cell: CellIndex },
    /// The report carried an older timestamp than the stored record and was
    /// dropped.
    StaleDiscarded,
}

pub struct DriverPositionIndex {
    grid: GeoGrid,
    freshness_window_ms: u64,
    driver_shards: Vec<Mutex<HashMap<DriverId, DriverPosition>>>,
    cell_shards: Vec<Mutex<HashMap<CellIndex, HashSet<DriverId>>>>,
}

impl DriverPositionIndex {
    pub fn new(grid: GeoGrid, freshness_window_ms: u64, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            grid,
            freshness_window_ms,
            driver_shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
            cell_shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub fn grid(&self) -> &GeoGrid {
        &self.grid
    }

    /// Record a position report, deriving the H3 cell and moving cell
    /// membership when the driver crossed a cell boundary.
    pub fn upsert(
        &self,
        driver_id: DriverId,
        point: GeoPoint,
        vehicle_class: VehicleClass,
        reported_at: TimestampMs,
    ) -> Result<PositionUpdate, DispatchError> {
        let cell = self.grid.cell_for(point)?;

        let mut drivers = lock_shard(&self.driver_shards[self.driver_slot(&driver_id)]);
        let old_cell = match drivers.get(&driver_id) {
            Some(prev) if reported_at < prev.last_seen => {
                return Ok(PositionUpdate::StaleDiscarded);
            }
            Some(prev) => Some(prev.cell),
            None => None,
        };
        drivers.insert(
            driver_id,
            DriverPosition {
                driver_id,
                point,
                cell,
                vehicle_class,
                last_seen: reported_at,
            },
        );
        // Membership moves under the driver shard lock so concurrent reports
        // for the same driver fully serialize.
        if old_cell != Some(cell) {
            self.move_membership(driver_id, old_cell, cell);
        }
        Ok(PositionUpdate::Applied { cell })
    }

    /// Drivers of the given class currently in `cell` with a live position.
    pub fn members_of(
        &self,
        cell: CellIndex,
        vehicle_class: VehicleClass,
        now: TimestampMs,
    ) -> Vec<DriverId> {
        let ids: Vec<DriverId> = {
            let cells = lock_shard(&self.cell_shards[self.cell_slot(cell)]);
            match cells.get(&cell) {
                Some(members) => members.iter().copied().collect(),
                None => return Vec::new(),
            }
        };
        ids.into_iter()
            .filter(|id| {
                let drivers = lock_shard(&self.driver_shards[self.driver_slot(id)]);
                drivers.get(id).is_some_and(|pos| {
                    pos.cell == cell
                        && pos.vehicle_class == vehicle_class
                        && self.is_live(pos.last_seen, now)
                })
            })
            .collect()
    }

    /// Position snapshots for live drivers of the given class across a set
    /// of distinct cells. Cells are snapshotted one at a time, so a driver
    /// relocating mid-scan can reappear under its new cell; callers that
    /// need uniqueness dedupe by driver id.
    pub fn snapshots_in(
        &self,
        cells: &[CellIndex],
        vehicle_class: VehicleClass,
        now: TimestampMs,
    ) -> Vec<DriverPosition> {
        let mut out = Vec::new();
        for &cell in cells {
            let ids: Vec<DriverId> = {
                let shard = lock_shard(&self.cell_shards[self.cell_slot(cell)]);
                match shard.get(&cell) {
                    Some(members) => members.iter().copied().collect(),
                    None => continue,
                }
            };
            for id in ids {
                let drivers = lock_shard(&self.driver_shards[self.driver_slot(&id)]);
                if let Some(pos) = drivers.get(&id) {
                    if pos.cell == cell
                        && pos.vehicle_class == vehicle_class
                        && self.is_live(pos.last_seen, now)
                    {
                        out.push(*pos);
                    }
                }
            }
        }
        out
    }

    /// Drop a driver from the index (sign-off). Returns whether a record
    /// existed.
    pub fn remove(&self, driver_id: DriverId) -> bool {
        let mut drivers = lock_shard(&self.driver_shards[self.driver_slot(&driver_id)]);
        match drivers.remove(&driver_id) {
            Some(pos) => {
                let mut cells = lock_shard(&self.cell_shards[self.cell_slot(pos.cell)]);
                remove_member(&mut cells, pos.cell, driver_id);
                true
            }
            None => false,
        }
    }

    /// Physically reclaim records whose last report fell outside the
    /// freshness window. Queries already ignore them; this frees the memory.
    /// Works shard by shard so no lock is held for long.
    pub fn purge_stale(&self, now: TimestampMs) -> usize {
        let mut purged = 0;
        for shard in &self.driver_shards {
            let mut drivers = lock_shard(shard);
            let stale: Vec<(DriverId, CellIndex)> = drivers
                .values()
                .filter(|pos| !self.is_live(pos.last_seen, now))
                .map(|pos| (pos.driver_id, pos.cell))
                .collect();
            for (id, cell) in stale {
                drivers.remove(&id);
                let mut cells = lock_shard(&self.cell_shards[self.cell_slot(cell)]);
                remove_member(&mut cells, cell, id);
                purged += 1;
            }
        }
        purged
    }

    /// Number of tracked driver records, live or not.
    pub fn len(&self) -> usize {
        self.driver_shards
            .iter()
            .map(|shard| lock_shard(shard).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_live(&self, last_seen: TimestampMs, now: TimestampMs) -> bool {
        now.saturating_sub(last_seen) < self.freshness_window_ms
    }

    fn move_membership(&self, driver_id: DriverId, old_cell: Option<CellIndex>, new_cell: CellIndex) {
        let new_slot = self.cell_slot(new_cell);
        let Some(old) = old_cell else {
            let mut cells = lock_shard(&self.cell_shards[new_slot]);
            cells.entry(new_cell).or_default().insert(driver_id);
            return;
        };
        let old_slot = self.cell_slot(old);
        if old_slot == new_slot {
            let mut cells = lock_shard(&self.cell_shards[new_slot]);
            remove_member(&mut cells, old, driver_id);
            cells.entry(new_cell).or_default().insert(driver_id);
        } else {
            // Both shards held at once, acquired in slot order, so the driver
            // is never observable in zero or two cells.
            let (lo, hi) = if old_slot < new_slot {
                (old_slot, new_slot)
            } else {
                (new_slot, old_slot)
            };
            let mut first = lock_shard(&self.cell_shards[lo]);
            let mut second = lock_shard(&self.cell_shards[hi]);
            let (old_map, new_map) = if old_slot < new_slot {
                (&mut first, &mut second)
            } else {
                (&mut second, &mut first)
            };
            remove_member(old_map, old, driver_id);
            new_map.entry(new_cell).or_default().insert(driver_id);
        }
    }

    fn driver_slot(&self, id: &DriverId) -> usize {
        slot_of(id, self.driver_shards.len())
    }

    fn cell_slot(&self, cell: CellIndex) -> usize {
        slot_of(&cell, self.cell_shards.len())
    }
}

fn remove_member(
    cells: &mut HashMap<CellIndex, HashSet<DriverId>>,
    cell: CellIndex,
    driver_id: DriverId,
) {
    if let Some(members) = cells.get_mut(&cell) {
        members.remove(&driver_id);
        if members.is_empty() {
            cells.remove(&cell);
        }
    }
}

// Recover poisoned shards; a missed membership entry self-heals on the
// driver's next report.
fn lock_shard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn slot_of<H: Hash>(value: &H, len: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    (hasher.finish() as usize) % len
}
