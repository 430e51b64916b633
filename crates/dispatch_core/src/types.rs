//! Core domain types: identifiers, coordinates, ride records, and driver locks.
//!
//! All timestamps are milliseconds since the Unix epoch (`TimestampMs`). Callers
//! pass `now` explicitly so that the same code paths run under test clocks and
//! wall clocks alike.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;

pub const ONE_SEC_MS: u64 = 1_000;
pub const ONE_MIN_MS: u64 = 60 * ONE_SEC_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(pub Uuid);

impl DriverId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for DriverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiderId(pub Uuid);

impl RiderId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RiderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Ride identifier, generated once when the request record is first created.
/// Time-ordered (UUID v7) so store scans roughly follow creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RideId(pub Uuid);

impl RideId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for RideId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-chosen key that makes ride creation retry-safe. Two creations with
/// the same key yield the same ride record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for IdempotencyKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// WGS84 coordinate pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Economy,
    Comfort,
    Premium,
    Van,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Assigned,
    Started,
    Completed,
    Cancelled,
    Expired,
}

impl RideStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::Expired
        )
    }
}

/// Input for creating a ride request. The ride id and timestamps are filled
/// in by the store at creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct RideDraft {
    pub rider_id: RiderId,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_class: VehicleClass,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// A ride request and its full lifecycle state.
///
/// `assigned_driver` is `Some` exactly while the status is `Assigned`,
/// `Started` or `Completed`; re-offering clears it together with
/// `assigned_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub ride_id: RideId,
    pub rider_id: RiderId,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_class: VehicleClass,
    pub status: RideStatus,
    pub assigned_driver: Option<DriverId>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub created_at: TimestampMs,
    pub assigned_at: Option<TimestampMs>,
    /// While `Requested`, the moment the open offer lapses.
    pub expires_at: TimestampMs,
    /// Times this request went back to `Requested` after a driver claim
    /// timed out. Bounded by configuration; the bound exhausting expires
    /// the ride.
    pub auto_reoffers: u32,
}

impl RideRequest {
    pub fn open(draft: RideDraft, ride_id: RideId, now: TimestampMs, offer_ttl_ms: u64) -> Self {
        Self {
            ride_id,
            rider_id: draft.rider_id,
            pickup: draft.pickup,
            dropoff: draft.dropoff,
            vehicle_class: draft.vehicle_class,
            status: RideStatus::Requested,
            assigned_driver: None,
            idempotency_key: draft.idempotency_key,
            created_at: now,
            assigned_at: None,
            expires_at: now + offer_ttl_ms,
            auto_reoffers: 0,
        }
    }

    /// True when the open offer has lapsed but no sweep has flipped the
    /// status yet. Only meaningful while `Requested`.
    pub fn offer_lapsed(&self, now: TimestampMs) -> bool {
        self.status == RideStatus::Requested && now >= self.expires_at
    }
}

/// Exclusive claim of one driver on one ride. At most one lock exists per
/// driver at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverLock {
    pub driver_id: DriverId,
    pub ride_id: RideId,
    pub acquired_at: TimestampMs,
    pub expires_at: TimestampMs,
}

impl DriverLock {
    pub fn is_expired(&self, now: TimestampMs) -> bool {
        now >= self.expires_at
    }
}

/// Last reported position of a driver, as kept by the spatial index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverPosition {
    pub driver_id: DriverId,
    pub point: GeoPoint,
    pub cell: h3o::CellIndex,
    pub vehicle_class: VehicleClass,
    /// Timestamp of the newest accepted position report.
    pub last_seen: TimestampMs,
}

/// Who asked for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelActor {
    Rider(RiderId),
    Driver(DriverId),
}
