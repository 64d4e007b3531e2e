//! # Pipeline Lifecycle
//!
//! `Starting → Running → Draining → Stopped`
//!
//! - `Starting → Running` once the delivery stream is established
//! - `Starting → Stopped` when setup fails
//! - `Running → Draining` when intake stops (signal or stream closed)
//! - `Draining → Stopped` when in-flight work settles or the grace period ends
//!
//! There is no way back from `Stopped`. The current state is published on a
//! `tokio::sync::watch` channel so other tasks can observe it.

use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

/// Phase of the consumption pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl PipelineState {
    /// Check whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Running)
                | (Self::Starting, Self::Stopped)
                | (Self::Running, Self::Draining)
                | (Self::Draining, Self::Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

/// Owner of the pipeline state
#[derive(Debug)]
pub struct PipelineStatus {
    sender: watch::Sender<PipelineState>,
}

impl PipelineStatus {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(PipelineState::Starting);
        Self { sender }
    }

    pub fn current(&self) -> PipelineState {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.sender.subscribe()
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn transition(&self, next: PipelineState) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        self.sender.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                result = Err(LifecycleError::InvalidTransition {
                    from: *state,
                    to: next,
                });
                false
            }
        });
        result
    }
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
