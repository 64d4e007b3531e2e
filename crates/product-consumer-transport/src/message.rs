//! Message types for transport operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        // AMQP short strings cap queue names at 255 bytes
        if name.is_empty() || name.len() > 255 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-255 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores and dots allowed"
                    .to_string(),
            });
        }

        // "amq." is reserved by the broker for server-named queues
        if name.starts_with("amq.") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "the 'amq.' prefix is reserved".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0
    }
}

/// Broker-assigned identifier used only to reference a delivery when settling it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// An unsettled message handed out by a transport.
///
/// A `Delivery` is deliberately neither `Clone` nor `Copy`: the settle
/// operations on [`Transport`](crate::Transport) take it by value, so once a
/// delivery has been acknowledged or rejected the handle is gone. Dropping a
/// delivery without settling it leaves the message with the broker, which will
/// redeliver it once the connection is closed.
#[derive(Debug)]
pub struct Delivery {
    tag: DeliveryTag,
    payload: Bytes,
    redelivered: bool,
}

impl Delivery {
    /// Create a delivery handle. Only transports should need this.
    pub fn new(tag: DeliveryTag, payload: Bytes, redelivered: bool) -> Self {
        Self {
            tag,
            payload,
            redelivered,
        }
    }

    pub fn tag(&self) -> DeliveryTag {
        self.tag
    }

    /// Raw message body
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether the broker delivered this message before without it being settled
    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
