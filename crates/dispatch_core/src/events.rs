//! Outbound ride lifecycle events.
//!
//! Events are published after a transition commits, never before, so a
//! consumer can treat each one as a fact. Delivery is the embedder's
//! concern: implement [`EventSink`] over whatever transport the deployment
//! uses. [`NullSink`] drops everything, [`MemorySink`] records for tests.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::types::{DriverId, RideId, RideStatus, RiderId, TimestampMs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RideEventKind {
    #[serde(rename = "ride.created")]
    Created,
    #[serde(rename = "ride.assigned")]
    Assigned,
    #[serde(rename = "ride.started")]
    Started,
    #[serde(rename = "ride.completed")]
    Completed,
    #[serde(rename = "ride.cancelled")]
    Cancelled,
    #[serde(rename = "ride.expired")]
    Expired,
}

impl RideEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RideEventKind::Created => "ride.created",
            RideEventKind::Assigned => "ride.assigned",
            RideEventKind::Started => "ride.started",
            RideEventKind::Completed => "ride.completed",
            RideEventKind::Cancelled => "ride.cancelled",
            RideEventKind::Expired => "ride.expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventActor {
    Rider(RiderId),
    Driver(DriverId),
    /// Background sweeps and other internal transitions.
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideEvent {
    pub ride_id: RideId,
    pub kind: RideEventKind,
    /// `None` only for `ride.created`.
    pub prior_status: Option<RideStatus>,
    pub new_status: RideStatus,
    pub actor: EventActor,
    pub at: TimestampMs,
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: RideEvent);
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: RideEvent) {}
}

/// Records events in publish order. Intended for tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<RideEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RideEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<RideEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: RideEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
