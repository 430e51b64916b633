//! Bounded recovery from evicted store procedures.
//!
//! Backends that hold transitions as installed procedures can lose them
//! (failover, cache flush). The recovery is always the same: reinstall and
//! retry the one operation. [`with_reinstall`] wraps that pattern with an
//! explicit retry bound; any other error passes straight through.

use tracing::debug;

use crate::error::{DispatchError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reinstall-and-retry attempts per operation.
    pub max_reinstalls: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_reinstalls: 1 }
    }
}

/// Run `op`, reinstalling procedures and retrying when it reports
/// [`StoreError::ProcedureMissing`], at most `policy.max_reinstalls` times.
pub fn with_reinstall<T>(
    policy: &RetryPolicy,
    reinstall: impl Fn() -> Result<(), DispatchError>,
    mut op: impl FnMut() -> Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    let mut reinstalls = 0;
    loop {
        match op() {
            Err(DispatchError::Store(StoreError::ProcedureMissing { name }))
                if reinstalls < policy.max_reinstalls =>
            {
                reinstalls += 1;
                debug!(procedure = name, attempt = reinstalls, "reinstalling store procedures");
                reinstall()?;
            }
            other => return other,
        }
    }
}
