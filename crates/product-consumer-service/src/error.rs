//! Error types for the service binary.

use crate::config::ConfigError;
use product_consumer_core::ConsumerError;
use product_consumer_transport::TransportError;
use thiserror::Error;

/// Errors that end the service process
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Could not reach the broker when starting up
    #[error("Failed to connect to broker: {0}")]
    Transport(#[from] TransportError),

    /// The pipeline could not start consuming
    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error("Broker connection lost and not recovered after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        attempts: u32,
        last_error: TransportError,
    },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl ServiceError {
    pub const SETUP_EXIT_CODE: i32 = 1;
    pub const RECONNECT_EXIT_CODE: i32 = 2;
    pub const CONFIGURATION_EXIT_CODE: i32 = 3;
    pub const INVALID_ARGUMENT_EXIT_CODE: i32 = 4;

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Transport(_) | Self::Consumer(_) => Self::SETUP_EXIT_CODE,
            Self::ReconnectExhausted { .. } => Self::RECONNECT_EXIT_CODE,
            Self::Configuration(_) => Self::CONFIGURATION_EXIT_CODE,
            Self::InvalidArgument { .. } => Self::INVALID_ARGUMENT_EXIT_CODE,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
