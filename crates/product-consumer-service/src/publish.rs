//! Publishing product messages to the work queue.
//!
//! Used to seed a queue and to inject malformed payloads when testing how the
//! consumer handles poison messages.

use crate::error::ServiceError;
use bytes::Bytes;
use product_consumer_core::WorkItem;
use product_consumer_transport::{QueueName, Transport};
use tracing::info;

/// What to put on the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishPayload {
    /// A well-formed product message
    Product(WorkItem),

    /// Bytes sent exactly as given
    Raw(String),
}

impl PublishPayload {
    /// Build from the command-line fields; `raw` wins when present
    pub fn from_parts(
        raw: Option<String>,
        code: Option<String>,
        name: Option<String>,
        stock: Option<i64>,
    ) -> Result<Self, ServiceError> {
        if let Some(raw) = raw {
            return Ok(Self::Raw(raw));
        }

        match (code, name, stock) {
            (Some(product_code), Some(product_name), Some(stock)) => Ok(Self::Product(WorkItem {
                product_code,
                product_name,
                stock,
            })),
            _ => Err(ServiceError::InvalidArgument {
                message: "either --raw or all of --code, --name and --stock are required"
                    .to_string(),
            }),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, ServiceError> {
        match self {
            Self::Product(item) => serde_json::to_vec(item).map(Bytes::from).map_err(|e| {
                ServiceError::InvalidArgument {
                    message: format!("cannot encode product: {}", e),
                }
            }),
            Self::Raw(raw) => Ok(Bytes::from(raw.clone())),
        }
    }
}

/// Declare the queue and publish one message to it
pub async fn publish(
    transport: &dyn Transport,
    queue: &QueueName,
    durable: bool,
    payload: &PublishPayload,
) -> Result<(), ServiceError> {
    let bytes = payload.to_bytes()?;

    transport.declare_queue(queue, durable).await?;
    transport.publish(queue, bytes.clone()).await?;

    info!(queue = %queue, bytes = bytes.len(), "Message published");
    Ok(())
}

#[cfg(test)]
#[path = "publish_tests.rs"]
mod tests;
