//! Shared builders for tests and benchmarks.

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::dispatch::Dispatcher;
use crate::events::{EventSink, MemorySink};
use crate::store::{MemoryStore, RideStore};
use crate::types::{GeoPoint, IdempotencyKey, RideDraft, RiderId, VehicleClass};

/// Central Berlin, the default test area.
pub const TEST_LAT: f64 = 52.52;
pub const TEST_LON: f64 = 13.405;

pub fn test_point() -> GeoPoint {
    GeoPoint::new(TEST_LAT, TEST_LON)
}

/// A point offset from the test center. 0.01 degrees of latitude is about
/// 1.1 km.
pub fn test_point_offset(dlat: f64, dlon: f64) -> GeoPoint {
    GeoPoint::new(TEST_LAT + dlat, TEST_LON + dlon)
}

pub fn test_draft() -> RideDraft {
    RideDraft {
        rider_id: RiderId::random(),
        pickup: test_point(),
        dropoff: test_point_offset(-0.02, 0.045),
        vehicle_class: VehicleClass::Economy,
        idempotency_key: None,
    }
}

pub fn test_draft_with_key(key: &str) -> RideDraft {
    RideDraft {
        idempotency_key: Some(IdempotencyKey::from(key)),
        ..test_draft()
    }
}

/// Dispatcher over an in-memory store with a recording sink, plus handles
/// to both.
pub fn memory_dispatcher(
    config: DispatchConfig,
) -> (Dispatcher, Arc<MemoryStore>, Arc<MemorySink>) {
    let store = Arc::new(MemoryStore::new(config.lifecycle_policy(), config.store_shards));
    let sink = Arc::new(MemorySink::new());
    let store_dyn: Arc<dyn RideStore> = store.clone();
    let sink_dyn: Arc<dyn EventSink> = sink.clone();
    (Dispatcher::new(config, store_dyn, sink_dyn), store, sink)
}
