//! Geo-sharded ride dispatch: driver position tracking over H3 cells,
//! ring-expansion candidate selection, and an atomically guarded ride
//! lifecycle with driver locks.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod geo;
pub mod index;
pub mod lifecycle;
pub mod reaper;
pub mod retry;
pub mod selector;
pub mod store;
#[cfg(feature = "test-helpers")]
pub mod test_helpers;
pub mod types;
