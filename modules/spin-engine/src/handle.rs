//! Ownership token for a running loop.

use std::fmt;

use chrono::{DateTime, Utc};
use spin_common::SpinError;

use crate::lifecycle::{Lifecycle, LoopId, LoopStatus};

/// Returned by [`Pipeline::spin`](crate::Pipeline::spin).
///
/// Releasing stops command intake, in-flight executions, the reducer and the
/// state cache, exactly once. Release does not wait for in-flight commands.
/// Dropping the handle releases the loop.
pub struct LoopHandle {
    lifecycle: Lifecycle,
    started_at: DateTime<Utc>,
}

impl LoopHandle {
    pub(crate) fn new(lifecycle: Lifecycle) -> Self {
        Self {
            lifecycle,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> LoopId {
        self.lifecycle.id()
    }

    pub fn status(&self) -> LoopStatus {
        self.lifecycle.status()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_released(&self) -> bool {
        self.status() == LoopStatus::Stopped
    }

    /// Stop the loop. Returns true only for the call that stopped it; later
    /// calls are no-ops.
    pub fn release(&self) -> bool {
        self.lifecycle.release()
    }

    /// Wait until the loop stops, either because the command source completed
    /// or because it was released. Errors if a stage failed fatally.
    pub async fn join(self) -> Result<(), SpinError> {
        self.lifecycle.stopped().await;
        match self.lifecycle.take_failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.lifecycle.release();
    }
}
