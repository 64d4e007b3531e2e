//! Error types for transport operations.

use thiserror::Error;

/// Comprehensive error type for all transport operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Channel closed: {message}")]
    ChannelClosed { message: String },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Delivery {tag} is not outstanding on this connection")]
    UnknownDelivery { tag: u64 },

    #[error("Transport has been closed")]
    Closed,

    #[error("Broker protocol error: {message}")]
    Protocol { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl TransportError {
    /// Check if error is transient and a reconnect may resolve it
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::ChannelClosed { .. } => true,
            Self::QueueNotFound { .. } => false,
            Self::UnknownDelivery { .. } => false,
            Self::Closed => false,
            Self::Protocol { .. } => true,
            Self::Validation(_) => false,
        }
    }
}

#[cfg(feature = "amqp")]
impl From<lapin::Error> for TransportError {
    fn from(error: lapin::Error) -> Self {
        match error {
            lapin::Error::IOError(io) => Self::ConnectionFailed {
                message: io.to_string(),
            },
            lapin::Error::InvalidChannelState(state) => Self::ChannelClosed {
                message: format!("{:?}", state),
            },
            lapin::Error::InvalidConnectionState(state) => Self::ConnectionFailed {
                message: format!("{:?}", state),
            },
            other => Self::Protocol {
                message: other.to_string(),
            },
        }
    }
}

/// Validation errors for transport identifiers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
