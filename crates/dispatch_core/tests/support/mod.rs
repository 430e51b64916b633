#![allow(dead_code)]

use std::sync::Arc;

use dispatch_core::config::DispatchConfig;
use dispatch_core::dispatch::Dispatcher;
use dispatch_core::events::MemorySink;
use dispatch_core::store::MemoryStore;
use dispatch_core::test_helpers::{memory_dispatcher, test_point_offset};
use dispatch_core::types::{DriverId, TimestampMs, VehicleClass};

/// Base timestamp for scenarios. An hour past the epoch keeps all the
/// deadline arithmetic away from zero.
pub const T0: TimestampMs = 3_600_000;

pub struct TestBed {
    pub dispatcher: Dispatcher,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<MemorySink>,
}

pub fn testbed(config: DispatchConfig) -> TestBed {
    let (dispatcher, store, sink) = memory_dispatcher(config);
    TestBed {
        dispatcher,
        store,
        sink,
    }
}

/// Compact windows for lifecycle scenarios: offers lapse after 10s, claims
/// after 5s, one automatic re-offer.
pub fn fast_config() -> DispatchConfig {
    DispatchConfig::default()
        .with_shards(4, 4)
        .with_offer_ttl_ms(10_000)
        .with_lock_ttl_ms(5_000)
        .with_trip_lock_ttl_ms(30_000)
        .with_max_auto_reoffers(1)
}

/// Seed `count` economy drivers on a line north of the test pickup point,
/// roughly 330m apart, nearest first. Returns ids in seeding order.
pub fn seed_drivers(
    dispatcher: &Dispatcher,
    count: usize,
    now: TimestampMs,
) -> Vec<DriverId> {
    (0..count)
        .map(|i| {
            let driver = DriverId::random();
            dispatcher
                .update_position(
                    driver,
                    test_point_offset(0.0005 + 0.003 * i as f64, 0.0),
                    VehicleClass::Economy,
                    now,
                )
                .expect("seed driver position");
            driver
        })
        .collect()
}
