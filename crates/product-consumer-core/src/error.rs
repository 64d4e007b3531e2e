//! Error types for running the consumption pipeline.
//!
//! Per-delivery problems (bad payloads, processing failures, settle errors)
//! never surface here; they are logged and counted in the run summary. Only
//! conditions that stop the pipeline from starting become a [`ConsumerError`].

use crate::lifecycle::LifecycleError;
use product_consumer_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerError {
    /// Declaring the queue or opening the delivery stream failed
    #[error("Failed to start consuming: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ConsumerError {
    /// Check if restarting the pipeline later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_transient(),
            Self::Lifecycle(_) => false,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
