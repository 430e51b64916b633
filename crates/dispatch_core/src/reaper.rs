//! Background reclamation of expired claims, lapsed offers, and stale
//! positions.
//!
//! Reads already ignore anything expired; the reaper makes the stored state
//! catch up. Every reclaim goes through the same guarded transitions as
//! caller-driven changes, so a sweep racing a live accept still leaves
//! exactly one winner. Individual reclaims are fire-and-forget: a candidate
//! that moved on since the scan is skipped, not an error.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::events::{EventActor, EventSink, RideEvent, RideEventKind};
use crate::index::DriverPositionIndex;
use crate::lifecycle::TransitionCommand;
use crate::retry::{self, RetryPolicy};
use crate::store::RideStore;
use crate::types::{RideRequest, RideStatus, TimestampMs};

/// What one sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepStats {
    /// Expired claims taken back from drivers.
    pub locks_released: usize,
    /// Rides returned to the offer pool after a claim timeout.
    pub rides_reoffered: usize,
    /// Rides flipped to `Expired`, by lapsed offer or exhausted re-offers.
    pub rides_expired: usize,
    /// Claims under started trips that were renewed instead of released.
    pub locks_extended: usize,
    /// Stale position records physically removed from the index.
    pub positions_purged: usize,
}

pub struct ExpiryReaper {
    store: Arc<dyn RideStore>,
    index: Arc<DriverPositionIndex>,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
    batch: usize,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(
        store: Arc<dyn RideStore>,
        index: Arc<DriverPositionIndex>,
        sink: Arc<dyn EventSink>,
        retry: RetryPolicy,
        batch: usize,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            index,
            sink,
            retry,
            batch,
            interval,
        }
    }

    /// Period between background sweeps.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One reclamation pass over expired locks, lapsed offers, and stale
    /// positions. Scans are bounded by the configured batch size; whatever
    /// is left over is picked up by the next sweep.
    pub fn sweep(&self, now: TimestampMs) -> Result<SweepStats, DispatchError> {
        let mut stats = SweepStats::default();

        for (driver_id, ride_id) in self.store.expired_locks(now, self.batch)? {
            let cmd = TransitionCommand::ReclaimLock { ride_id, driver_id };
            match self.run(cmd, now) {
                Ok(ride) => match ride.status {
                    RideStatus::Requested => {
                        stats.locks_released += 1;
                        stats.rides_reoffered += 1;
                        self.sink.publish(RideEvent {
                            ride_id,
                            kind: RideEventKind::Cancelled,
                            prior_status: Some(RideStatus::Assigned),
                            new_status: RideStatus::Requested,
                            actor: EventActor::Driver(driver_id),
                            at: now,
                        });
                    }
                    RideStatus::Expired => {
                        stats.locks_released += 1;
                        stats.rides_expired += 1;
                        self.sink.publish(RideEvent {
                            ride_id,
                            kind: RideEventKind::Expired,
                            prior_status: Some(RideStatus::Assigned),
                            new_status: RideStatus::Expired,
                            actor: EventActor::System,
                            at: now,
                        });
                    }
                    RideStatus::Started => {
                        stats.locks_extended += 1;
                    }
                    _ => {
                        stats.locks_released += 1;
                    }
                },
                Err(err) => {
                    debug!(%ride_id, %driver_id, error = %err, "lock reclaim skipped");
                }
            }
        }

        for ride_id in self.store.expired_requests(now, self.batch)? {
            let cmd = TransitionCommand::ExpireRequest { ride_id };
            match self.run(cmd, now) {
                Ok(_) => {
                    stats.rides_expired += 1;
                    self.sink.publish(RideEvent {
                        ride_id,
                        kind: RideEventKind::Expired,
                        prior_status: Some(RideStatus::Requested),
                        new_status: RideStatus::Expired,
                        actor: EventActor::System,
                        at: now,
                    });
                }
                Err(err) => {
                    debug!(%ride_id, error = %err, "request expiry skipped");
                }
            }
        }

        stats.positions_purged = self.index.purge_stale(now);

        if stats == SweepStats::default() {
            debug!(now, "expiry sweep found nothing to reclaim");
        } else {
            info!(
                now,
                locks_released = stats.locks_released,
                rides_reoffered = stats.rides_reoffered,
                rides_expired = stats.rides_expired,
                locks_extended = stats.locks_extended,
                positions_purged = stats.positions_purged,
                "expiry sweep complete"
            );
        }
        Ok(stats)
    }

    /// Run sweeps on a background thread at the configured interval, on
    /// wall-clock time. Dropping (or stopping) the returned handle ends the
    /// thread.
    pub fn spawn_periodic(self) -> ReaperHandle {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let shared = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("dispatch-reaper".into())
            .spawn(move || {
                let (flag, signal) = &*shared;
                loop {
                    {
                        let Ok(guard) = flag.lock() else { return };
                        if *guard {
                            return;
                        }
                        let Ok((guard, _)) = signal.wait_timeout(guard, self.interval) else {
                            return;
                        };
                        if *guard {
                            return;
                        }
                    }
                    let now = wall_clock_ms();
                    if let Err(err) = self.sweep(now) {
                        warn!(error = %err, "expiry sweep failed");
                    }
                }
            })
            .expect("spawn reaper thread");
        ReaperHandle {
            stop,
            join: Some(join),
        }
    }

    fn run(
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

/// Stops the periodic sweep thread when stopped or dropped.
pub struct ReaperHandle {
    stop: Arc<(Mutex<bool>, Condvar)>,
    join: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let (flag, signal) = &*self.stop;
        if let Ok(mut stopped) = flag.lock() {
            *stopped = true;
        }
        signal.notify_all();
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wall_clock_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
