//! Ride lifecycle rules as a pure function over current state.
//!
//! [`evaluate`] inspects a transition command together with the current ride
//! record and the acting driver's lock, and either rejects the transition or
//! returns the [`Effects`] to commit. It performs no I/O and takes no locks;
//! the store applies the effects atomically under its own shard locks, which
//! is what makes races (two accepts, reclaim vs. late accept) collapse to a
//! single winner.
//!
//! Expiry is lazy here: an open offer past its deadline is treated as
//! expired even before a sweep has flipped the stored status.

use crate::error::DispatchError;
use crate::types::{
    DriverId, DriverLock, RideId, RideRequest, RideStatus, RiderId, TimestampMs,
};

/// One requested state change, always scoped to a single ride and at most
/// one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCommand {
    Accept { ride_id: RideId, driver_id: DriverId },
    Start { ride_id: RideId, driver_id: DriverId },
    Complete { ride_id: RideId, driver_id: DriverId },
    CancelByRider { ride_id: RideId, rider_id: RiderId },
    CancelByDriver { ride_id: RideId, driver_id: DriverId },
    /// Sweep path: flip a lapsed open offer to `Expired`.
    ExpireRequest { ride_id: RideId },
    /// Sweep path: take back an expired claim, re-offering or expiring the
    /// ride it guarded.
    ReclaimLock { ride_id: RideId, driver_id: DriverId },
}

impl TransitionCommand {
    pub fn ride_id(&self) -> RideId {
        match *self {
            TransitionCommand::Accept { ride_id, .. }
            | TransitionCommand::Start { ride_id, .. }
            | TransitionCommand::Complete { ride_id, .. }
            | TransitionCommand::CancelByRider { ride_id, .. }
            | TransitionCommand::CancelByDriver { ride_id, .. }
            | TransitionCommand::ExpireRequest { ride_id }
            | TransitionCommand::ReclaimLock { ride_id, .. } => ride_id,
        }
    }

    /// The driver whose lock state the transition depends on, if any.
    pub fn driver_id(&self) -> Option<DriverId> {
        match *self {
            TransitionCommand::Accept { driver_id, .. }
            | TransitionCommand::Start { driver_id, .. }
            | TransitionCommand::Complete { driver_id, .. }
            | TransitionCommand::CancelByDriver { driver_id, .. }
            | TransitionCommand::ReclaimLock { driver_id, .. } => Some(driver_id),
            TransitionCommand::CancelByRider { .. } | TransitionCommand::ExpireRequest { .. } => {
                None
            }
        }
    }

    /// Store procedure implementing this transition.
    pub fn procedure(&self) -> &'static str {
        match self {
            TransitionCommand::Accept { .. } => "accept_ride",
            TransitionCommand::Start { .. } => "start_ride",
            TransitionCommand::Complete { .. } => "complete_ride",
            TransitionCommand::CancelByRider { .. } => "cancel_by_rider",
            TransitionCommand::CancelByDriver { .. } => "cancel_by_driver",
            TransitionCommand::ExpireRequest { .. } => "expire_request",
            TransitionCommand::ReclaimLock { .. } => "reclaim_lock",
        }
    }
}

/// Timing and re-offer knobs the lifecycle rules depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// How long an open offer stays acceptable.
    pub offer_ttl_ms: u64,
    /// Claim window between accept and trip start.
    pub lock_ttl_ms: u64,
    /// Claim window once the trip has started.
    pub trip_lock_ttl_ms: u64,
    /// Re-offers after claim timeouts before the ride expires for good.
    pub max_auto_reoffers: u32,
    /// Delay before a driver whose claim was taken back may be assigned
    /// again. Zero disables the cooldown.
    pub reoffer_cooldown_ms: u64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        use crate::types::ONE_MIN_MS;
        Self {
            offer_ttl_ms: 2 * ONE_MIN_MS,
            lock_ttl_ms: 10 * ONE_MIN_MS,
            trip_lock_ttl_ms: 4 * 60 * ONE_MIN_MS,
            max_auto_reoffers: 3,
            reoffer_cooldown_ms: 0,
        }
    }
}

/// What a lock table must do after a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEffect {
    Acquire(DriverLock),
    Release {
        driver_id: DriverId,
        cooldown_until: Option<TimestampMs>,
    },
    Extend {
        driver_id: DriverId,
        expires_at: TimestampMs,
    },
    Keep,
}

/// Writes to commit for an accepted transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Effects {
    pub ride: RideRequest,
    pub lock: LockEffect,
}

pub fn evaluate(
    cmd: &TransitionCommand,
    ride: Option<&RideRequest>,
    driver_lock: Option<&DriverLock>,
    now: TimestampMs,
    policy: &LifecyclePolicy,
) -> Result<Effects, DispatchError> {
    match *cmd {
        TransitionCommand::Accept { ride_id, driver_id } => {
            accept(ride_id, driver_id, ride, driver_lock, now, policy)
        }
        TransitionCommand::Start { ride_id, driver_id } => {
            start(ride_id, driver_id, ride, driver_lock, now, policy)
        }
        TransitionCommand::Complete { ride_id, driver_id } => {
            complete(ride_id, driver_id, ride)
        }
        TransitionCommand::CancelByRider { ride_id, rider_id } => {
            cancel_by_rider(ride_id, rider_id, ride)
        }
        TransitionCommand::CancelByDriver { ride_id, driver_id } => {
            cancel_by_driver(ride_id, driver_id, ride, now, policy)
        }
        TransitionCommand::ExpireRequest { ride_id } => expire_request(ride_id, ride, now),
        TransitionCommand::ReclaimLock { ride_id, driver_id } => {
            reclaim_lock(ride_id, driver_id, ride, driver_lock, now, policy)
        }
    }
}

fn require_ride(
    ride: Option<&RideRequest>,
    ride_id: RideId,
) -> Result<&RideRequest, DispatchError> {
    ride.ok_or(DispatchError::RideNotFound(ride_id))
}

fn cooldown_after(now: TimestampMs, policy: &LifecyclePolicy) -> Option<TimestampMs> {
    (policy.reoffer_cooldown_ms > 0).then(|| now + policy.reoffer_cooldown_ms)
}

fn accept(
    ride_id: RideId,
    driver_id: DriverId,
    ride: Option<&RideRequest>,
    driver_lock: Option<&DriverLock>,
    now: TimestampMs,
    policy: &LifecyclePolicy,
) -> Result<Effects, DispatchError> {
    let ride = require_ride(ride, ride_id)?;
    match ride.status {
        RideStatus::Requested => {
            if ride.offer_lapsed(now) {
                return Err(DispatchError::RideNotAcceptable {
                    ride_id,
                    status: RideStatus::Expired,
                });
            }
            // Any standing claim blocks, including one past its deadline
            // that no sweep has reclaimed yet.
            if let Some(held) = driver_lock {
                return Err(DispatchError::DriverAlreadyLocked {
                    driver_id,
                    ride_id: held.ride_id,
                });
            }
            let mut next = ride.clone();
            next.status = RideStatus::Assigned;
            next.assigned_driver = Some(driver_id);
            next.assigned_at = Some(now);
            Ok(Effects {
                ride: next,
                lock: LockEffect::Acquire(DriverLock {
                    driver_id,
                    ride_id,
                    acquired_at: now,
                    expires_at: now + policy.lock_ttl_ms,
                }),
            })
        }
        RideStatus::Assigned | RideStatus::Started | RideStatus::Completed => {
            Err(DispatchError::RideAlreadyAssigned { ride_id })
        }
        RideStatus::Cancelled | RideStatus::Expired => Err(DispatchError::RideNotAcceptable {
            ride_id,
            status: ride.status,
        }),
    }
}

fn start(
    ride_id: RideId,
    driver_id: DriverId,
    ride: Option<&RideRequest>,
    driver_lock: Option<&DriverLock>,
    now: TimestampMs,
    policy: &LifecyclePolicy,
) -> Result<Effects, DispatchError> {
    let ride = require_ride(ride, ride_id)?;
    if ride.status != RideStatus::Assigned || ride.assigned_driver != Some(driver_id) {
        return Err(DispatchError::RideNotAcceptable {
            ride_id,
            status: ride.status,
        });
    }
    match driver_lock {
        Some(held) if held.ride_id == ride_id => {
            if held.is_expired(now) {
                return Err(DispatchError::LockExpired { driver_id, ride_id });
            }
            let mut next = ride.clone();
            next.status = RideStatus::Started;
            Ok(Effects {
                ride: next,
                lock: LockEffect::Extend {
                    driver_id,
                    expires_at: now + policy.trip_lock_ttl_ms,
                },
            })
        }
        // Claim gone or pointing at another ride: the driver lost it.
        _ => Err(DispatchError::LockExpired { driver_id, ride_id }),
    }
}

fn complete(
    ride_id: RideId,
    driver_id: DriverId,
    ride: Option<&RideRequest>,
) -> Result<Effects, DispatchError> {
    let ride = require_ride(ride, ride_id)?;
    if ride.status != RideStatus::Started || ride.assigned_driver != Some(driver_id) {
        return Err(DispatchError::RideNotAcceptable {
            ride_id,
            status: ride.status,
        });
    }
    // Completion stands even if the trip outlived its claim window; the
    // claim is released either way.
    let mut next = ride.clone();
    next.status = RideStatus::Completed;
    Ok(Effects {
        ride: next,
        lock: LockEffect::Release {
            driver_id,
            cooldown_until: None,
        },
    })
}

fn cancel_by_rider(
    ride_id: RideId,
    rider_id: RiderId,
    ride: Option<&RideRequest>,
) -> Result<Effects, DispatchError> {
    let ride = require_ride(ride, ride_id)?;
    if ride.rider_id != rider_id || ride.status != RideStatus::Requested {
        return Err(DispatchError::RideNotAcceptable {
            ride_id,
            status: ride.status,
        });
    }
    let mut next = ride.clone();
    next.status = RideStatus::Cancelled;
    Ok(Effects {
        ride: next,
        lock: LockEffect::Keep,
    })
}

fn cancel_by_driver(
    ride_id: RideId,
    driver_id: DriverId,
    ride: Option<&RideRequest>,
    now: TimestampMs,
    policy: &LifecyclePolicy,
) -> Result<Effects, DispatchError> {
    let ride = require_ride(ride, ride_id)?;
    if ride.status != RideStatus::Assigned || ride.assigned_driver != Some(driver_id) {
        return Err(DispatchError::RideNotAcceptable {
            ride_id,
            status: ride.status,
        });
    }
    // Hand-back before the trip starts: the ride goes back on offer with a
    // fresh window. Explicit cancels do not count against the re-offer
    // bound.
    let mut next = ride.clone();
    next.status = RideStatus::Requested;
    next.assigned_driver = None;
    next.assigned_at = None;
    next.expires_at = now + policy.offer_ttl_ms;
    Ok(Effects {
        ride: next,
        lock: LockEffect::Release {
            driver_id,
            cooldown_until: cooldown_after(now, policy),
        },
    })
}

fn expire_request(
    ride_id: RideId,
    ride: Option<&RideRequest>,
    now: TimestampMs,
) -> Result<Effects, DispatchError> {
    let ride = require_ride(ride, ride_id)?;
    if !ride.offer_lapsed(now) {
        // Sweep candidate went stale: the ride moved on or the offer got a
        // fresh window since the scan.
        return Err(DispatchError::RideNotAcceptable {
            ride_id,
            status: ride.status,
        });
    }
    let mut next = ride.clone();
    next.status = RideStatus::Expired;
    Ok(Effects {
        ride: next,
        lock: LockEffect::Keep,
    })
}

fn reclaim_lock(
    ride_id: RideId,
    driver_id: DriverId,
    ride: Option<&RideRequest>,
    driver_lock: Option<&DriverLock>,
    now: TimestampMs,
    policy: &LifecyclePolicy,
) -> Result<Effects, DispatchError> {
    let ride = require_ride(ride, ride_id)?;
    let claim_reclaimable = matches!(
        driver_lock,
        Some(held) if held.ride_id == ride_id && held.is_expired(now)
    );
    if !claim_reclaimable {
        // Claim already gone, repointed, or refreshed since the scan.
        return Err(DispatchError::RideNotAcceptable {
            ride_id,
            status: ride.status,
        });
    }
    match ride.status {
        RideStatus::Assigned if ride.assigned_driver == Some(driver_id) => {
            if ride.auto_reoffers < policy.max_auto_reoffers {
                let mut next = ride.clone();
                next.status = RideStatus::Requested;
                next.assigned_driver = None;
                next.assigned_at = None;
                next.expires_at = now + policy.offer_ttl_ms;
                next.auto_reoffers += 1;
                Ok(Effects {
                    ride: next,
                    lock: LockEffect::Release {
                        driver_id,
                        cooldown_until: cooldown_after(now, policy),
                    },
                })
            } else {
                let mut next = ride.clone();
                next.status = RideStatus::Expired;
                next.assigned_driver = None;
                next.assigned_at = None;
                Ok(Effects {
                    ride: next,
                    lock: LockEffect::Release {
                        driver_id,
                        cooldown_until: None,
                    },
                })
            }
        }
        // Trip in progress: keep the claim alive instead of yanking it out
        // from under the driver.
        RideStatus::Started if ride.assigned_driver == Some(driver_id) => Ok(Effects {
            ride: ride.clone(),
            lock: LockEffect::Extend {
                driver_id,
                expires_at: now + policy.trip_lock_ttl_ms,
            },
        }),
        // Lock points at a ride that moved on without it; drop the claim.
        _ => Ok(Effects {
            ride: ride.clone(),
            lock: LockEffect::Release {
                driver_id,
                cooldown_until: None,
            },
        }),
    }
}
