//! Error taxonomy for dispatch operations.
//!
//! Every rejection an operation can produce is a named variant here; callers
//! match on the variant instead of inspecting strings.

use thiserror::Error;

use crate::types::{DriverId, RideId, RideStatus};

/// Failures of the backing ride store itself, as opposed to domain
/// rejections of a particular transition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A named store procedure is not installed. Recoverable by
    /// reinstalling and retrying once; see `retry::with_reinstall`.
    #[error("store procedure '{name}' not installed")]
    ProcedureMissing { name: &'static str },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("coordinates out of range: lat {lat}, lon {lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("ride {0} not found")]
    RideNotFound(RideId),

    /// Another driver won the assignment race.
    #[error("ride {ride_id} already assigned")]
    RideAlreadyAssigned { ride_id: RideId },

    /// The ride is in a state (or the caller fails a precondition) that
    /// does not admit the requested transition.
    #[error("ride {ride_id} is {status:?}; transition not allowed")]
    RideNotAcceptable { ride_id: RideId, status: RideStatus },

    /// The driver already holds a claim on some ride. The claim blocks new
    /// assignments until it is released or reclaimed by a sweep.
    #[error("driver {driver_id} already locked to ride {ride_id}")]
    DriverAlreadyLocked { driver_id: DriverId, ride_id: RideId },

    /// The driver's own claim on this ride lapsed before the attempted
    /// progression.
    #[error("driver {driver_id} lock on ride {ride_id} has expired")]
    LockExpired { driver_id: DriverId, ride_id: RideId },

    #[error(transparent)]
    Store(#[from] StoreError),
}
