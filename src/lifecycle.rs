//! Guarded `{Stopped, Starting, Running, Closing}` state machine shared by
//! the storage coordinator and the node.

use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use crate::Result;
use crate::StateTransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Closing,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "Stopped",
            LifecycleState::Starting => "Starting",
            LifecycleState::Running => "Running",
            LifecycleState::Closing => "Closing",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Stopped),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Moves `from -> to`, failing if the current state is not `from`.
    pub fn transition(
        &self,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(StateTransitionError::InvalidTransition {
                from: state.as_str(),
                to: to.as_str(),
            }
            .into());
        }
        debug!(%from, %to, "lifecycle transition");
        *state = to;
        Ok(())
    }

    pub fn begin_start(&self) -> Result<()> {
        self.transition(LifecycleState::Stopped, LifecycleState::Starting)
    }

    pub fn finish_start(&self) -> Result<()> {
        self.transition(LifecycleState::Starting, LifecycleState::Running)
    }

    /// Rolls a failed start back so it can be retried.
    pub fn abort_start(&self) {
        let _ = self.transition(LifecycleState::Starting, LifecycleState::Stopped);
    }

    /// Returns false when there is nothing to close, making shutdown idempotent.
    pub fn begin_close(&self) -> bool {
        self.transition(LifecycleState::Running, LifecycleState::Closing).is_ok()
    }

    pub fn finish_close(&self) -> Result<()> {
        self.transition(LifecycleState::Closing, LifecycleState::Stopped)
    }
}
