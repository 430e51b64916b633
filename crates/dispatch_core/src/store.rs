//! Ride and lock persistence behind the [`RideStore`] trait.
//!
//! A store executes each lifecycle transition atomically: it reads the ride
//! and the acting driver's lock, runs [`lifecycle::evaluate`], and commits
//! the resulting effects so no interleaving can observe a half-applied
//! transition. Backends that keep transitions as installed server-side
//! procedures (a Redis-style script cache) report an evicted procedure as
//! [`StoreError::ProcedureMissing`]; callers recover with
//! [`retry::with_reinstall`](crate::retry::with_reinstall).
//!
//! [`MemoryStore`] is the in-process backend: mutex-sharded maps with a
//! fixed acquisition order (idempotency shard, then ride shard, then the
//! driver's lock shard) so writers can never deadlock.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{DispatchError, StoreError};
use crate::lifecycle::{self, LifecyclePolicy, LockEffect, TransitionCommand};
use crate::types::{
    DriverId, DriverLock, IdempotencyKey, RideDraft, RideId, RideRequest, RideStatus, TimestampMs,
};

/// Result of [`RideStore::create_ride`]. `created` is false when an
/// idempotency key matched an existing record.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub ride: RideRequest,
    pub created: bool,
}

pub trait RideStore: Send + Sync {
    /// (Re)install the transition procedures. Safe to call at any time.
    fn install_procedures(&self) -> Result<(), DispatchError>;

    /// Create a ride request, or return the existing one when the draft's
    /// idempotency key was already used.
    fn create_ride(&self, draft: RideDraft, now: TimestampMs) -> Result<CreateOutcome, DispatchError>;

    fn fetch(&self, ride_id: RideId) -> Result<Option<RideRequest>, DispatchError>;

    /// Run one lifecycle transition atomically and return the ride as
    /// committed.
    fn transition(
        &self,
        cmd: TransitionCommand,
        now: TimestampMs,
    ) -> Result<RideRequest, DispatchError>;

    /// The driver's standing claim, if any. Deliberately ignores expiry:
    /// a lapsed claim keeps the driver unavailable until a sweep reclaims
    /// it, matching what accept enforces.
    fn current_lock(&self, driver_id: DriverId) -> Result<Option<DriverLock>, DispatchError>;

    /// When the driver's re-offer cooldown ends, if one is running.
    fn cooldown_until(
        &self,
        driver_id: DriverId,
        now: TimestampMs,
    ) -> Result<Option<TimestampMs>, DispatchError>;

    /// Claims whose deadline has passed, up to `limit`.
    fn expired_locks(
        &self,
        now: TimestampMs,
        limit: usize,
    ) -> Result<Vec<(DriverId, RideId)>, DispatchError>;

    /// Open offers whose deadline has passed, up to `limit`.
    fn expired_requests(
        &self,
        now: TimestampMs,
        limit: usize,
    ) -> Result<Vec<RideId>, DispatchError>;
}

#[derive(Default)]
struct LockShard {
    claims: HashMap<DriverId, DriverLock>,
    cooldowns: HashMap<DriverId, TimestampMs>,
}

pub struct MemoryStore {
    policy: LifecyclePolicy,
    installed: AtomicBool,
    install_count: AtomicU32,
    idempotency: Vec<Mutex<HashMap<IdempotencyKey, RideId>>>,
    rides: Vec<Mutex<HashMap<RideId, RideRequest>>>,
    locks: Vec<Mutex<LockShard>>,
}

impl MemoryStore {
    pub fn new(policy: LifecyclePolicy, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let store = Self {
            policy,
            installed: AtomicBool::new(false),
            install_count: AtomicU32::new(0),
            idempotency: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
            rides: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
            locks: (0..shard_count).map(|_| Mutex::new(LockShard::default())).collect(),
        };
        // Fresh stores come up installed; reinstallation is for backends
        // that can lose procedures across failovers.
        let _ = store.install_procedures();
        store
    }

    /// Simulate a backend that dropped its procedures (failover, cache
    /// eviction). The next mutating call fails with `ProcedureMissing`.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn forget_procedures(&self) {
        self.installed.store(false, Ordering::SeqCst);
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub fn install_count(&self) -> u32 {
        self.install_count.load(Ordering::SeqCst)
    }

    fn ensure_installed(&self, name: &'static str) -> Result<(), DispatchError> {
        if self.installed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::ProcedureMissing { name }.into())
        }
    }

    fn ride_slot(&self, ride_id: &RideId) -> usize {
        slot_of(ride_id, self.rides.len())
    }

    fn driver_slot(&self, driver_id: &DriverId) -> usize {
        slot_of(driver_id, self.locks.len())
    }

    fn key_slot(&self, key: &IdempotencyKey) -> usize {
        slot_of(key, self.idempotency.len())
    }

    fn insert_ride(&self, ride: RideRequest) {
        let mut rides = lock_shard(&self.rides[self.ride_slot(&ride.ride_id)]);
        rides.insert(ride.ride_id, ride);
    }
}

impl RideStore for MemoryStore {
    fn install_procedures(&self) -> Result<(), DispatchError> {
        self.installed.store(true, Ordering::SeqCst);
        self.install_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_ride(
        &self,
        draft: RideDraft,
        now: TimestampMs,
    ) -> Result<CreateOutcome, DispatchError> {
        self.ensure_installed("create_ride")?;
        let Some(key) = draft.idempotency_key.clone() else {
            let ride = RideRequest::open(draft, RideId::generate(), now, self.policy.offer_ttl_ms);
            self.insert_ride(ride.clone());
            return Ok(CreateOutcome { ride, created: true });
        };

        // The key shard lock is held across the lookup and the insert, so
        // two racing creations with the same key agree on one ride.
        let mut keys = lock_shard(&self.idempotency[self.key_slot(&key)]);
        if let Some(&existing_id) = keys.get(&key) {
            let rides = lock_shard(&self.rides[self.ride_slot(&existing_id)]);
            if let Some(ride) = rides.get(&existing_id) {
                return Ok(CreateOutcome {
                    ride: ride.clone(),
                    created: false,
                });
            }
            debug_assert!(false, "idempotency key points at a missing ride");
        }
        let ride = RideRequest::open(draft, RideId::generate(), now, self.policy.offer_ttl_ms);
        self.insert_ride(ride.clone());
        keys.insert(key, ride.ride_id);
        Ok(CreateOutcome { ride, created: true })
    }

    fn fetch(&self, ride_id: RideId) -> Result<Option<RideRequest>, DispatchError> {
        let rides = lock_shard(&self.rides[self.ride_slot(&ride_id)]);
        Ok(rides.get(&ride_id).cloned())
    }

    fn transition(
        &self,
        cmd: TransitionCommand,
        now: TimestampMs,
    ) -> Result<RideRequest, DispatchError> {
        self.ensure_installed(cmd.procedure())?;
        let ride_id = cmd.ride_id();
        let mut rides = lock_shard(&self.rides[self.ride_slot(&ride_id)]);
        let ride = rides.get(&ride_id).cloned();

        match cmd.driver_id() {
            Some(driver_id) => {
                let mut locks = lock_shard(&self.locks[self.driver_slot(&driver_id)]);
                let held = locks.claims.get(&driver_id).copied();
                let effects =
                    lifecycle::evaluate(&cmd, ride.as_ref(), held.as_ref(), now, &self.policy)?;
                rides.insert(ride_id, effects.ride.clone());
                apply_lock_effect(&mut locks, effects.lock);
                Ok(effects.ride)
            }
            None => {
                let effects = lifecycle::evaluate(&cmd, ride.as_ref(), None, now, &self.policy)?;
                debug_assert!(matches!(effects.lock, LockEffect::Keep));
                rides.insert(ride_id, effects.ride.clone());
                Ok(effects.ride)
            }
        }
    }

    fn current_lock(&self, driver_id: DriverId) -> Result<Option<DriverLock>, DispatchError> {
        let locks = lock_shard(&self.locks[self.driver_slot(&driver_id)]);
        Ok(locks.claims.get(&driver_id).copied())
    }

    fn cooldown_until(
        &self,
        driver_id: DriverId,
        now: TimestampMs,
    ) -> Result<Option<TimestampMs>, DispatchError> {
        let mut locks = lock_shard(&self.locks[self.driver_slot(&driver_id)]);
        match locks.cooldowns.get(&driver_id).copied() {
            Some(until) if until > now => Ok(Some(until)),
            Some(_) => {
                locks.cooldowns.remove(&driver_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn expired_locks(
        &self,
        now: TimestampMs,
        limit: usize,
    ) -> Result<Vec<(DriverId, RideId)>, DispatchError> {
        let mut out = Vec::new();
        for shard in &self.locks {
            if out.len() >= limit {
                break;
            }
            let locks = lock_shard(shard);
            for claim in locks.claims.values() {
                if claim.is_expired(now) {
                    out.push((claim.driver_id, claim.ride_id));
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    fn expired_requests(
        &self,
        now: TimestampMs,
        limit: usize,
    ) -> Result<Vec<RideId>, DispatchError> {
        let mut out = Vec::new();
        for shard in &self.rides {
            if out.len() >= limit {
                break;
            }
            let rides = lock_shard(shard);
            for ride in rides.values() {
                if ride.status == RideStatus::Requested && now >= ride.expires_at {
                    out.push(ride.ride_id);
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }
}

fn apply_lock_effect(shard: &mut LockShard, effect: LockEffect) {
    match effect {
        LockEffect::Acquire(lock) => {
            shard.claims.insert(lock.driver_id, lock);
        }
        LockEffect::Release {
            driver_id,
            cooldown_until,
        } => {
            shard.claims.remove(&driver_id);
            if let Some(until) = cooldown_until {
                shard.cooldowns.insert(driver_id, until);
            }
        }
        LockEffect::Extend {
            driver_id,
            expires_at,
        } => {
            if let Some(lock) = shard.claims.get_mut(&driver_id) {
                lock.expires_at = expires_at;
            }
        }
        LockEffect::Keep => {}
    }
}

fn lock_shard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn slot_of<H: Hash>(value: &H, len: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    (hasher.finish() as usize) % len
}
