//! Load tests for dispatch_core: throughput and consistency under realistic
//! request volume.

mod support;

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dispatch_core::config::DispatchConfig;
use dispatch_core::store::RideStore;
use dispatch_core::test_helpers::{test_point, test_point_offset};
use dispatch_core::types::{
    CancelActor, DriverId, RideDraft, RideId, RideStatus, RiderId, VehicleClass,
};
use support::{testbed, T0};

fn load_config() -> DispatchConfig {
    DispatchConfig::default()
        .with_shards(16, 16)
        .with_offer_ttl_ms(4_000)
        .with_sweep_batch(256)
}

fn load_draft(rng: &mut StdRng) -> RideDraft {
    RideDraft {
        rider_id: RiderId::random(),
        pickup: test_point_offset(rng.gen_range(0.0..0.02), rng.gen_range(0.0..0.02)),
        dropoff: test_point_offset(0.05, 0.05),
        vehicle_class: VehicleClass::Economy,
        idempotency_key: None,
    }
}

#[test]
#[ignore] // Only run explicitly: cargo test --package dispatch_core --test load_tests -- --ignored
fn sustained_request_load_stays_consistent() {
    let bed = testbed(load_config());
    let reaper = bed.dispatcher.reaper();
    let mut rng = StdRng::seed_from_u64(42);
    let drivers: Vec<DriverId> = (0..400)
        .map(|_| {
            let driver = DriverId::random();
            bed.dispatcher
                .update_position(
                    driver,
                    test_point_offset(rng.gen_range(0.0..0.05), rng.gen_range(0.0..0.03)),
                    VehicleClass::Economy,
                    T0,
                )
                .expect("seed driver");
            driver
        })
        .collect();

    let mut now = T0;
    let mut rides: Vec<RideId> = Vec::new();
    let mut operations = 0u64;
    let mut unserved = 0u64;
    let start = Instant::now();

    for cycle in 0..2_000u64 {
        now += 3;
        let ride = bed
            .dispatcher
            .create_ride(load_draft(&mut rng), now)
            .expect("create");
        rides.push(ride.ride_id);
        let picked = bed
            .dispatcher
            .find_candidates(ride.pickup, VehicleClass::Economy, 3, now)
            .expect("select");
        operations += 2;
        match picked.first() {
            Some(candidate) => {
                let driver = candidate.driver_id;
                bed.dispatcher
                    .accept_ride(ride.ride_id, driver, now)
                    .expect("accept");
                operations += 1;
                if cycle % 10 == 0 {
                    bed.dispatcher
                        .cancel_ride(ride.ride_id, CancelActor::Driver(driver), now)
                        .expect("handback");
                    operations += 1;
                } else {
                    bed.dispatcher
                        .start_ride(ride.ride_id, driver, now)
                        .expect("start");
                    bed.dispatcher
                        .complete_ride(ride.ride_id, driver, now + 1)
                        .expect("complete");
                    operations += 2;
                }
            }
            None => unserved += 1,
        }
        if cycle % 250 == 249 {
            reaper.sweep(now).expect("sweep");
            operations += 1;
        }
    }
    let duration = start.elapsed();

    let ops_per_sec = operations as f64 / duration.as_secs_f64();
    println!(
        "Sustained load: {} ops over {} cycles in {:.2}s ({:.0} ops/sec, {} unserved)",
        operations,
        rides.len(),
        duration.as_secs_f64(),
        ops_per_sec,
        unserved
    );
    assert!(
        ops_per_sec > 1000.0,
        "Should process >1000 ops/sec, got {:.0}",
        ops_per_sec
    );

    // Every record the run touched is in a coherent state afterwards.
    for ride_id in &rides {
        let ride = bed
            .dispatcher
            .fetch_ride(*ride_id)
            .expect("fetch")
            .expect("tracked ride exists");
        match ride.status {
            RideStatus::Assigned | RideStatus::Started => {
                let driver = ride.assigned_driver.expect("assigned ride names a driver");
                let lock = bed
                    .store
                    .current_lock(driver)
                    .expect("lock query")
                    .expect("assigned ride is claimed");
                assert_eq!(lock.ride_id, *ride_id);
            }
            RideStatus::Requested => assert_eq!(ride.assigned_driver, None),
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::Expired => {}
        }
    }
    for driver in &drivers {
        assert!(
            bed.store.current_lock(*driver).expect("lock query").is_none(),
            "every cycle released its claim"
        );
    }
}

#[test]
#[ignore]
fn position_churn_keeps_the_index_coherent() {
    let bed = testbed(DispatchConfig::default().with_shards(8, 8));
    let mut rng = StdRng::seed_from_u64(7);
    let drivers: Vec<DriverId> = (0..300).map(|_| DriverId::random()).collect();
    for driver in &drivers {
        bed.dispatcher
            .update_position(*driver, test_point(), VehicleClass::Economy, T0)
            .expect("seed driver");
    }

    let rounds = 50u64;
    let mut updates = 0u64;
    let start = Instant::now();
    for round in 1..=rounds {
        let now = T0 + round * 500;
        for driver in &drivers {
            bed.dispatcher
                .update_position(
                    *driver,
                    test_point_offset(rng.gen_range(0.0..0.05), rng.gen_range(0.0..0.05)),
                    VehicleClass::Economy,
                    now,
                )
                .expect("move driver");
            updates += 1;
        }
        if round % 10 == 0 {
            let picked = bed
                .dispatcher
                .find_candidates(test_point(), VehicleClass::Economy, 10, now)
                .expect("select");
            assert!(!picked.is_empty(), "churn never empties the search area");
        }
    }
    let duration = start.elapsed();

    let updates_per_sec = updates as f64 / duration.as_secs_f64();
    println!(
        "Position churn: {} updates in {:.2}s ({:.0} updates/sec)",
        updates,
        duration.as_secs_f64(),
        updates_per_sec
    );
    assert!(
        updates_per_sec > 1000.0,
        "Should process >1000 updates/sec, got {:.0}",
        updates_per_sec
    );
    assert_eq!(bed.dispatcher.index().len(), 300, "no driver lost in the churn");

    // Once everyone goes quiet a sweep empties the index again.
    let reaper = bed.dispatcher.reaper();
    let window = bed.dispatcher.config().freshness_window_ms;
    let stats = reaper.sweep(T0 + rounds * 500 + window).expect("sweep");
    assert_eq!(stats.positions_purged, 300);
    assert!(bed.dispatcher.index().is_empty());
}

#[test]
#[ignore]
fn concurrent_dispatch_storm_leaves_no_stray_claims() {
    let bed = testbed(load_config());
    let mut rng = StdRng::seed_from_u64(42);
    let drivers: Vec<DriverId> = (0..200)
        .map(|_| {
            let driver = DriverId::random();
            bed.dispatcher
                .update_position(
                    driver,
                    test_point_offset(rng.gen_range(0.0..0.02), rng.gen_range(0.0..0.02)),
                    VehicleClass::Economy,
                    T0,
                )
                .expect("seed driver");
            driver
        })
        .collect();

    let dispatcher = Arc::new(bed.dispatcher);
    let start = Instant::now();
    let workers: Vec<_> = (0..4u64)
        .map(|worker| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + worker);
                let mut rides = Vec::new();
                let mut served = 0u64;
                for i in 0..250u64 {
                    let now = T0 + i * 4 + worker;
                    let ride = dispatcher
                        .create_ride(load_draft(&mut rng), now)
                        .expect("create");
                    rides.push(ride.ride_id);
                    let picked = dispatcher
                        .find_candidates(ride.pickup, VehicleClass::Economy, 3, now)
                        .expect("select");
                    let Some(candidate) = picked.first() else {
                        continue;
                    };
                    // Another worker may have claimed the driver since the
                    // search; losing that race is part of the workload.
                    if dispatcher
                        .accept_ride(ride.ride_id, candidate.driver_id, now)
                        .is_err()
                    {
                        continue;
                    }
                    dispatcher
                        .start_ride(ride.ride_id, candidate.driver_id, now)
                        .expect("start");
                    dispatcher
                        .complete_ride(ride.ride_id, candidate.driver_id, now + 1)
                        .expect("complete");
                    served += 1;
                }
                (rides, served)
            })
        })
        .collect();

    let mut rides = Vec::new();
    let mut served = 0u64;
    for worker in workers {
        let (worker_rides, worker_served) = worker.join().expect("worker thread");
        rides.extend(worker_rides);
        served += worker_served;
    }
    let duration = start.elapsed();

    let rides_per_sec = rides.len() as f64 / duration.as_secs_f64();
    println!(
        "Dispatch storm: {} rides ({} served) in {:.2}s ({:.0} rides/sec)",
        rides.len(),
        served,
        duration.as_secs_f64(),
        rides_per_sec
    );
    assert!(served > 0, "the storm must serve some rides");
    assert!(
        rides_per_sec > 200.0,
        "Should process >200 rides/sec under contention, got {:.0}",
        rides_per_sec
    );

    for ride_id in &rides {
        let ride = dispatcher
            .fetch_ride(*ride_id)
            .expect("fetch")
            .expect("tracked ride exists");
        match ride.status {
            RideStatus::Completed => {
                assert!(ride.assigned_driver.is_some());
            }
            RideStatus::Requested => assert_eq!(ride.assigned_driver, None),
            other => panic!("storm cycles end Completed or Requested, found {other:?}"),
        }
    }
    for driver in &drivers {
        assert!(
            bed.store.current_lock(*driver).expect("lock query").is_none(),
            "served cycles release every claim"
        );
    }
}
