mod support;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use dispatch_core::config::DispatchConfig;
use dispatch_core::test_helpers::{test_draft, test_point, test_point_offset};
use dispatch_core::types::{CancelActor, DriverId, VehicleClass};
use support::{fast_config, seed_drivers, testbed, T0};

#[test]
fn candidates_rank_nearest_first_and_respect_limit() {
    let bed = testbed(fast_config());
    let drivers = seed_drivers(&bed.dispatcher, 4, T0);

    let picked = bed
        .dispatcher
        .find_candidates(test_point(), VehicleClass::Economy, 2, T0 + 1_000)
        .expect("select");

    assert_eq!(picked.len(), 2);
    assert_eq!(picked[0].driver_id, drivers[0]);
    assert_eq!(picked[1].driver_id, drivers[1]);
    assert!(picked[0].distance_km < picked[1].distance_km);
}

#[test]
fn moving_a_driver_is_visible_immediately() {
    let bed = testbed(fast_config());
    let driver = DriverId::random();
    let grid = *bed.dispatcher.index().grid();
    let origin = test_point();
    let moved = test_point_offset(0.05, 0.0);

    bed.dispatcher
        .update_position(driver, origin, VehicleClass::Economy, T0)
        .expect("position");
    bed.dispatcher
        .update_position(driver, moved, VehicleClass::Economy, T0 + 1_000)
        .expect("position");

    let old_cell = grid.cell_for(origin).expect("cell");
    let new_cell = grid.cell_for(moved).expect("cell");
    let index = bed.dispatcher.index();
    assert!(index
        .members_of(old_cell, VehicleClass::Economy, T0 + 2_000)
        .is_empty());
    assert_eq!(
        index.members_of(new_cell, VehicleClass::Economy, T0 + 2_000),
        vec![driver]
    );
}

#[test]
fn silent_drivers_stop_being_candidates() {
    let bed = testbed(fast_config());
    seed_drivers(&bed.dispatcher, 2, T0);
    let window = bed.dispatcher.config().freshness_window_ms;

    let live = bed
        .dispatcher
        .find_candidates(test_point(), VehicleClass::Economy, 5, T0 + window - 1)
        .expect("select");
    assert_eq!(live.len(), 2);

    let lapsed = bed
        .dispatcher
        .find_candidates(test_point(), VehicleClass::Economy, 5, T0 + window)
        .expect("select");
    assert!(lapsed.is_empty());
}

#[test]
fn empty_region_yields_an_empty_result() {
    let bed = testbed(fast_config());
    seed_drivers(&bed.dispatcher, 3, T0);

    // ~111km north of every seeded driver.
    let picked = bed
        .dispatcher
        .find_candidates(test_point_offset(1.0, 0.0), VehicleClass::Economy, 5, T0 + 1_000)
        .expect("select");
    assert!(picked.is_empty());
}

#[test]
fn cooldown_keeps_a_handback_driver_out_of_the_pool() {
    let config = fast_config().with_reoffer_cooldown_ms(5_000);
    let bed = testbed(config);
    let driver = seed_drivers(&bed.dispatcher, 1, T0)[0];
    let ride = bed
        .dispatcher
        .create_ride(test_draft(), T0)
        .expect("create");

    bed.dispatcher
        .accept_ride(ride.ride_id, driver, T0 + 1_000)
        .expect("accept");
    let during_claim = bed
        .dispatcher
        .find_candidates(test_point(), VehicleClass::Economy, 5, T0 + 1_500)
        .expect("select");
    assert!(during_claim.is_empty(), "a claimed driver is unavailable");

    bed.dispatcher
        .cancel_ride(ride.ride_id, CancelActor::Driver(driver), T0 + 2_000)
        .expect("handback");

    let cooling = bed
        .dispatcher
        .find_candidates(test_point(), VehicleClass::Economy, 5, T0 + 3_000)
        .expect("select");
    assert!(cooling.is_empty(), "cooldown runs until {}", T0 + 7_000);

    let back = bed
        .dispatcher
        .find_candidates(test_point(), VehicleClass::Economy, 5, T0 + 7_000)
        .expect("select");
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].driver_id, driver);
}

#[test]
fn search_stops_at_the_configured_ring_bound() {
    // Two rings cover ~700m; the lone driver sits ~3.3km out.
    let config = DispatchConfig::default()
        .with_shards(4, 4)
        .with_search_bounds(2, 8.0);
    let bed = testbed(config);
    let driver = DriverId::random();
    bed.dispatcher
        .update_position(driver, test_point_offset(0.03, 0.0), VehicleClass::Economy, T0)
        .expect("position");

    let picked = bed
        .dispatcher
        .find_candidates(test_point(), VehicleClass::Economy, 5, T0 + 1_000)
        .expect("select");
    assert!(picked.is_empty());

    let wide = testbed(DispatchConfig::default().with_shards(4, 4).with_search_bounds(20, 8.0));
    wide.dispatcher
        .update_position(driver, test_point_offset(0.03, 0.0), VehicleClass::Economy, T0)
        .expect("position");
    let found = wide
        .dispatcher
        .find_candidates(test_point(), VehicleClass::Economy, 5, T0 + 1_000)
        .expect("select");
    assert_eq!(found.len(), 1);
}

#[test]
fn a_search_racing_position_moves_lists_each_driver_once() {
    let bed = testbed(fast_config());
    let drivers = seed_drivers(&bed.dispatcher, 4, T0);
    let dispatcher = Arc::new(bed.dispatcher);
    let gate = Arc::new(Barrier::new(2));

    let churn = {
        let dispatcher = Arc::clone(&dispatcher);
        let drivers = drivers.clone();
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            gate.wait();
            for i in 0..400u64 {
                let slot = (i % 4) as usize;
                let base = 0.0005 + 0.003 * slot as f64;
                // Every other pass hops the driver across a cell boundary.
                let hop = if (i / 4) % 2 == 0 { 0.003 } else { 0.0 };
                dispatcher
                    .update_position(
                        drivers[slot],
                        test_point_offset(base + hop, 0.0),
                        VehicleClass::Economy,
                        T0 + i + 1,
                    )
                    .expect("position");
            }
        })
    };

    gate.wait();
    for round in 0..200 {
        let picked = dispatcher
            .find_candidates(test_point(), VehicleClass::Economy, 4, T0 + 500)
            .expect("select");
        let mut seen = HashSet::new();
        for candidate in &picked {
            assert!(
                seen.insert(candidate.driver_id),
                "round {round}: driver {} listed twice",
                candidate.driver_id
            );
        }
    }
    churn.join().expect("churn thread");
}
