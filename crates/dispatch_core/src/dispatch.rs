//! The dispatcher: one façade over position tracking, candidate search,
//! and the ride lifecycle.
//!
//! Every operation takes `now` explicitly; nothing in this module reads a
//! wall clock. Events go out through the configured [`EventSink`] strictly
//! after the corresponding transition has committed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::events::{EventActor, EventSink, NullSink, RideEvent, RideEventKind};
use crate::geo::GeoGrid;
use crate::index::{DriverPositionIndex, PositionUpdate};
use crate::lifecycle::TransitionCommand;
use crate::reaper::ExpiryReaper;
use crate::retry::{self, RetryPolicy};
use crate::selector::{Candidate, CandidateSelector};
use crate::store::{MemoryStore, RideStore};
use crate::types::{
    CancelActor, DriverId, GeoPoint, RideDraft, RideId, RideRequest, RideStatus, TimestampMs,
    VehicleClass,
};

pub struct Dispatcher {
    config: DispatchConfig,
    index: Arc<DriverPositionIndex>,
    store: Arc<dyn RideStore>,
    selector: CandidateSelector,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, store: Arc<dyn RideStore>, sink: Arc<dyn EventSink>) -> Self {
        let grid = GeoGrid::new(config.resolution);
        Self {
            index: Arc::new(DriverPositionIndex::new(
                grid,
                config.freshness_window_ms,
                config.index_shards,
            )),
            selector: CandidateSelector::new(
                grid,
                config.max_search_ring,
                config.search_radius_km,
                config.disk_cache_size,
            ),
            store,
            sink,
            retry: config.retry_policy(),
            config,
        }
    }

    /// Dispatcher over an in-process store, publishing to nowhere. Handy
    /// for embedding and for benchmarks.
    pub fn in_memory(config: DispatchConfig) -> Self {
        let store = Arc::new(MemoryStore::new(config.lifecycle_policy(), config.store_shards));
        Self::new(config, store, Arc::new(NullSink))
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn index(&self) -> &DriverPositionIndex {
        &self.index
    }

    /// A sweep worker sharing this dispatcher's store, index, and sink,
    /// paced by the configured sweep interval.
    pub fn reaper(&self) -> ExpiryReaper {
        ExpiryReaper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.index),
            Arc::clone(&self.sink),
            self.config.retry_policy(),
            self.config.sweep_batch,
            Duration::from_millis(self.config.sweep_interval_ms),
        )
    }

    /// Record a driver position report.
    pub fn update_position(
        &self,
        driver_id: DriverId,
        point: GeoPoint,
        vehicle_class: VehicleClass,
        reported_at: TimestampMs,
    ) -> Result<PositionUpdate, DispatchError> {
        let update = self.index.upsert(driver_id, point, vehicle_class, reported_at)?;
        match update {
            PositionUpdate::Applied { cell } => {
                debug!(%driver_id, cell = %cell, "position applied");
            }
            PositionUpdate::StaleDiscarded => {
                debug!(%driver_id, "stale position report discarded");
            }
        }
        Ok(update)
    }

    /// Drop a driver from the position index (sign-off).
    pub fn remove_driver(&self, driver_id: DriverId) -> bool {
        let removed = self.index.remove(driver_id);
        if removed {
            debug!(%driver_id, "driver removed from index");
        }
        removed
    }

    /// Create a ride request. With an idempotency key, repeated calls
    /// return the already-created ride and publish nothing new.
    pub fn create_ride(
        &self,
        draft: RideDraft,
        now: TimestampMs,
    ) -> Result<RideRequest, DispatchError> {
        let grid = self.index.grid();
        grid.cell_for(draft.pickup)?;
        grid.cell_for(draft.dropoff)?;

        let outcome = retry::with_reinstall(
            &self.retry,
            || self.store.install_procedures(),
            || self.store.create_ride(draft.clone(), now),
        )?;
        if outcome.created {
            info!(ride_id = %outcome.ride.ride_id, rider_id = %outcome.ride.rider_id, "ride created");
            self.sink.publish(RideEvent {
                ride_id: outcome.ride.ride_id,
                kind: RideEventKind::Created,
                prior_status: None,
                new_status: RideStatus::Requested,
                actor: EventActor::Rider(outcome.ride.rider_id),
                at: now,
            });
        } else {
            debug!(ride_id = %outcome.ride.ride_id, "idempotent create returned existing ride");
        }
        Ok(outcome.ride)
    }

    /// Ranked available drivers around a pickup point. Empty when nobody
    /// qualifies.
    pub fn find_candidates(
        &self,
        pickup: GeoPoint,
        vehicle_class: VehicleClass,
        limit: usize,
        now: TimestampMs,
    ) -> Result<Vec<Candidate>, DispatchError> {
        let store = &self.store;
        let picked = self.selector.select(
            &self.index,
            pickup,
            vehicle_class,
            limit,
            now,
            |driver_id| {
                if store.current_lock(*driver_id)?.is_some() {
                    return Ok(false);
                }
                Ok(store.cooldown_until(*driver_id, now)?.is_none())
            },
        )?;
        debug!(count = picked.len(), limit, "candidate search complete");
        Ok(picked)
    }

    /// First accept wins; the winner takes the driver lock atomically with
    /// the status flip.
    pub fn accept_ride(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        now: TimestampMs,
    ) -> Result<RideRequest, DispatchError> {
        let cmd = TransitionCommand::Accept { ride_id, driver_id };
        match self.run_transition(cmd, now) {
            Ok(ride) => {
                info!(%ride_id, %driver_id, "ride assigned");
                self.sink.publish(RideEvent {
                    ride_id,
                    kind: RideEventKind::Assigned,
                    prior_status: Some(RideStatus::Requested),
                    new_status: RideStatus::Assigned,
                    actor: EventActor::Driver(driver_id),
                    at: now,
                });
                Ok(ride)
            }
            Err(err) => {
                debug!(%ride_id, %driver_id, error = %err, "accept rejected");
                Err(err)
            }
        }
    }

    pub fn start_ride(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        now: TimestampMs,
    ) -> Result<RideRequest, DispatchError> {
        let cmd = TransitionCommand::Start { ride_id, driver_id };
        match self.run_transition(cmd, now) {
            Ok(ride) => {
                info!(%ride_id, %driver_id, "trip started");
                self.sink.publish(RideEvent {
                    ride_id,
                    kind: RideEventKind::Started,
                    prior_status: Some(RideStatus::Assigned),
                    new_status: RideStatus::Started,
                    actor: EventActor::Driver(driver_id),
                    at: now,
                });
                Ok(ride)
            }
            Err(err) => {
                debug!(%ride_id, %driver_id, error = %err, "start rejected");
                Err(err)
            }
        }
    }

    pub fn complete_ride(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        now: TimestampMs,
    ) -> Result<RideRequest, DispatchError> {
        let cmd = TransitionCommand::Complete { ride_id, driver_id };
        match self.run_transition(cmd, now) {
            Ok(ride) => {
                info!(%ride_id, %driver_id, "trip completed");
                self.sink.publish(RideEvent {
                    ride_id,
                    kind: RideEventKind::Completed,
                    prior_status: Some(RideStatus::Started),
                    new_status: RideStatus::Completed,
                    actor: EventActor::Driver(driver_id),
                    at: now,
                });
                Ok(ride)
            }
            Err(err) => {
                debug!(%ride_id, %driver_id, error = %err, "complete rejected");
                Err(err)
            }
        }
    }

    /// Rider cancel closes an open request. Driver cancel hands an assigned
    /// ride back to the pool with a fresh offer window.
    pub fn cancel_ride(
        &self,
        ride_id: RideId,
        actor: CancelActor,
        now: TimestampMs,
    ) -> Result<RideRequest, DispatchError> {
        let (cmd, event_actor, prior) = match actor {
            CancelActor::Rider(rider_id) => (
                TransitionCommand::CancelByRider { ride_id, rider_id },
                EventActor::Rider(rider_id),
                RideStatus::Requested,
            ),
            CancelActor::Driver(driver_id) => (
                TransitionCommand::CancelByDriver { ride_id, driver_id },
                EventActor::Driver(driver_id),
                RideStatus::Assigned,
            ),
        };
        match self.run_transition(cmd, now) {
            Ok(ride) => {
                info!(%ride_id, new_status = ?ride.status, "ride cancelled");
                self.sink.publish(RideEvent {
                    ride_id,
                    kind: RideEventKind::Cancelled,
                    prior_status: Some(prior),
                    new_status: ride.status,
                    actor: event_actor,
                    at: now,
                });
                Ok(ride)
            }
            Err(err) => {
                debug!(%ride_id, error = %err, "cancel rejected");
                Err(err)
            }
        }
    }

    /// Current record of a ride, if it exists.
    pub fn fetch_ride(&self, ride_id: RideId) -> Result<Option<RideRequest>, DispatchError> {
        self.store.fetch(ride_id)
    }

    fn run_transition(
        &self,
        cmd: TransitionCommand,
        now: TimestampMs,
    ) -> Result<RideRequest, DispatchError> {
        retry::with_reinstall(
            &self.retry,
            || self.store.install_procedures(),
            || self.store.transition(cmd, now),
        )
    }
}
