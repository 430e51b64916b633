//! Candidate driver search by expanding H3 rings around a pickup point.
//!
//! Expansion starts at the pickup's own cell (ring 0) and widens one grid
//! ring at a time until enough available candidates are found or the ring
//! bound is hit. Cells already scanned in an inner ring are skipped, so a
//! driver is considered at most once per search. Grid disks are memoized in
//! an LRU cache keyed by (origin cell, k); the hot cells of a city repeat
//! constantly.
//!
//! Grid distance is only a coarse filter. Every candidate is ranked and cut
//! off by true haversine distance, since ring membership alone can keep a
//! too-far driver or misorder two drivers in the same ring.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use h3o::CellIndex;
use lru::LruCache;

use crate::error::DispatchError;
use crate::geo::{self, GeoGrid};
use crate::index::DriverPositionIndex;
use crate::types::{DriverId, DriverPosition, GeoPoint, TimestampMs, VehicleClass};

/// One ranked candidate for an offer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub driver_id: DriverId,
    pub cell: CellIndex,
    /// Haversine distance from the pickup point, in kilometers.
    pub distance_km: f64,
    pub last_seen: TimestampMs,
}

pub struct CandidateSelector {
    grid: GeoGrid,
    max_search_ring: u32,
    search_radius_km: f64,
    disk_cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl CandidateSelector {
    pub fn new(grid: GeoGrid, max_search_ring: u32, search_radius_km: f64, cache_size: usize) -> Self {
        Self {
            grid,
            max_search_ring,
            search_radius_km,
            disk_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_size.max(1)).expect("cache size must be non-zero"),
            )),
        }
    }

    /// Up to `limit` available drivers around `pickup`, nearest first, ties
    /// broken by freshest position report. An empty result is a valid
    /// answer, not an error.
    ///
    /// `is_available` is consulted once per distinct driver; it reports
    /// whether the driver can take a new offer right now (no standing
    /// claim, no cooldown).
    pub fn select(
        &self,
        index: &DriverPositionIndex,
        pickup: GeoPoint,
        vehicle_class: VehicleClass,
        limit: usize,
        now: TimestampMs,
        is_available: impl Fn(&DriverId) -> Result<bool, DispatchError>,
    ) -> Result<Vec<Candidate>, DispatchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let origin = self.grid.cell_for(pickup)?;
        let mut scanned: HashSet<CellIndex> = HashSet::new();
        let mut considered: HashSet<DriverId> = HashSet::new();
        let mut found: Vec<DriverPosition> = Vec::new();

        for k in 0..=self.max_search_ring {
            let disk = self.cached_disk(origin, k);
            let fresh_cells: Vec<CellIndex> = disk
                .into_iter()
                .filter(|cell| scanned.insert(*cell))
                .collect();
            if fresh_cells.is_empty() {
                continue;
            }
            for snapshot in index.snapshots_in(&fresh_cells, vehicle_class, now) {
                if !considered.insert(snapshot.driver_id) {
                    continue;
                }
                if is_available(&snapshot.driver_id)? {
                    found.push(snapshot);
                }
            }
            if found.len() >= limit {
                break;
            }
        }

        let mut candidates: Vec<Candidate> = found
            .into_iter()
            .map(|pos| Candidate {
                driver_id: pos.driver_id,
                cell: pos.cell,
                distance_km: geo::distance_km(pickup, pos.point),
                last_seen: pos.last_seen,
            })
            .filter(|candidate| candidate.distance_km <= self.search_radius_km)
            .collect();
        candidates.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    fn cached_disk(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = match self.disk_cache.lock() {
            Ok(guard) => guard,
            // Compute without the cache if the mutex is poisoned.
            Err(_) => return self.grid.grid_disk(origin, k),
        };
        cache
            .get_or_insert((origin, k), || self.grid.grid_disk(origin, k))
            .clone()
    }
}
