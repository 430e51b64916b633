//! Tunable parameters for a dispatcher instance.
//!
//! Defaults suit a dense city at H3 resolution 9. Every knob has a
//! `with_*` builder so call sites only spell out what they change.

use h3o::Resolution;

use crate::lifecycle::LifecyclePolicy;
use crate::retry::RetryPolicy;
use crate::types::{ONE_MIN_MS, ONE_SEC_MS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchConfig {
    /// H3 resolution for all cell derivation.
    pub resolution: Resolution,
    /// Position reports older than this are invisible to queries.
    pub freshness_window_ms: u64,
    /// Ring expansion stops after this grid distance from the pickup cell.
    pub max_search_ring: u32,
    /// Hard haversine cutoff for candidates, in kilometers.
    pub search_radius_km: f64,
    /// How long an open offer stays acceptable.
    pub offer_ttl_ms: u64,
    /// Claim window between accept and trip start.
    pub lock_ttl_ms: u64,
    /// Claim window once the trip has started.
    pub trip_lock_ttl_ms: u64,
    /// Claim timeouts tolerated before a ride expires for good.
    pub max_auto_reoffers: u32,
    /// Pause before a driver who timed out or handed back may be assigned
    /// again. Zero disables it.
    pub reoffer_cooldown_ms: u64,
    /// Period of the background expiry sweep.
    pub sweep_interval_ms: u64,
    /// Upper bound on reclaims per category per sweep.
    pub sweep_batch: usize,
    /// Mutex shards in the position index.
    pub index_shards: usize,
    /// Mutex shards in the in-memory ride store.
    pub store_shards: usize,
    /// Entries in the grid-disk LRU cache.
    pub disk_cache_size: usize,
    /// Procedure reinstall attempts per store operation.
    pub max_procedure_reinstalls: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::Nine,
            freshness_window_ms: 30 * ONE_SEC_MS,
            max_search_ring: 6,
            search_radius_km: 8.0,
            offer_ttl_ms: 2 * ONE_MIN_MS,
            lock_ttl_ms: 10 * ONE_MIN_MS,
            trip_lock_ttl_ms: 4 * 60 * ONE_MIN_MS,
            max_auto_reoffers: 3,
            reoffer_cooldown_ms: 0,
            sweep_interval_ms: 5 * ONE_SEC_MS,
            sweep_batch: 512,
            index_shards: 64,
            store_shards: 64,
            disk_cache_size: 1_000,
            max_procedure_reinstalls: 1,
        }
    }
}

impl DispatchConfig {
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_freshness_window_ms(mut self, window: u64) -> Self {
        self.freshness_window_ms = window;
        self
    }

    pub fn with_search_bounds(mut self, max_ring: u32, radius_km: f64) -> Self {
        self.max_search_ring = max_ring;
        self.search_radius_km = radius_km;
        self
    }

    pub fn with_offer_ttl_ms(mut self, ttl: u64) -> Self {
        self.offer_ttl_ms = ttl;
        self
    }

    pub fn with_lock_ttl_ms(mut self, ttl: u64) -> Self {
        self.lock_ttl_ms = ttl;
        self
    }

    pub fn with_trip_lock_ttl_ms(mut self, ttl: u64) -> Self {
        self.trip_lock_ttl_ms = ttl;
        self
    }

    pub fn with_max_auto_reoffers(mut self, max: u32) -> Self {
        self.max_auto_reoffers = max;
        self
    }

    pub fn with_reoffer_cooldown_ms(mut self, cooldown: u64) -> Self {
        self.reoffer_cooldown_ms = cooldown;
        self
    }

    pub fn with_sweep_interval_ms(mut self, interval: u64) -> Self {
        self.sweep_interval_ms = interval;
        self
    }

    pub fn with_sweep_batch(mut self, batch: usize) -> Self {
        self.sweep_batch = batch;
        self
    }

    pub fn with_shards(mut self, index_shards: usize, store_shards: usize) -> Self {
        self.index_shards = index_shards;
        self.store_shards = store_shards;
        self
    }

    pub fn with_disk_cache_size(mut self, size: usize) -> Self {
        self.disk_cache_size = size;
        self
    }

    pub fn with_max_procedure_reinstalls(mut self, max: u32) -> Self {
        self.max_procedure_reinstalls = max;
        self
    }

    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            offer_ttl_ms: self.offer_ttl_ms,
            lock_ttl_ms: self.lock_ttl_ms,
            trip_lock_ttl_ms: self.trip_lock_ttl_ms,
            max_auto_reoffers: self.max_auto_reoffers,
            reoffer_cooldown_ms: self.reoffer_cooldown_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_reinstalls: self.max_procedure_reinstalls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_city_scale() {
        let config = DispatchConfig::default();
        assert_eq!(config.resolution, Resolution::Nine);
        assert_eq!(config.freshness_window_ms, 30_000);
        assert_eq!(config.offer_ttl_ms, 120_000);
        assert_eq!(config.max_auto_reoffers, 3);
        assert_eq!(config.reoffer_cooldown_ms, 0);
    }

    #[test]
    fn builders_override_single_fields() {
        let config = DispatchConfig::default()
            .with_search_bounds(3, 2.5)
            .with_offer_ttl_ms(10_000)
            .with_reoffer_cooldown_ms(4_000);

        assert_eq!(config.max_search_ring, 3);
        assert_eq!(config.search_radius_km, 2.5);
        assert_eq!(config.offer_ttl_ms, 10_000);
        assert_eq!(config.lifecycle_policy().reoffer_cooldown_ms, 4_000);
        assert_eq!(config.retry_policy().max_reinstalls, 1);
    }
}
