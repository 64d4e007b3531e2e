//! Transport and connector traits.

use crate::error::TransportError;
use crate::message::{Delivery, QueueName};
use crate::provider::ProviderType;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Stream of deliveries for one consumer subscription.
///
/// The stream ends when the transport is closed. An `Err` item means the
/// connection was lost; no further deliveries follow it.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, TransportError>>;

/// Interface implemented by broker transports (RabbitMQ, in-memory, ...)
///
/// A transport is shared by every worker of a consumer; implementations must
/// be safe to call concurrently and serialize access internally if the
/// underlying client requires it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Declare a queue, creating it if it does not exist
    async fn declare_queue(&self, queue: &QueueName, durable: bool) -> Result<(), TransportError>;

    /// Subscribe to a queue with manual acknowledgment
    async fn consume(&self, queue: &QueueName) -> Result<DeliveryStream, TransportError>;

    /// Publish a persistent message to a queue
    async fn publish(&self, queue: &QueueName, payload: Bytes) -> Result<(), TransportError>;

    /// Acknowledge a delivery, removing it from the queue
    async fn ack(&self, delivery: Delivery) -> Result<(), TransportError>;

    /// Reject a delivery; `requeue` asks the broker to deliver it again
    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), TransportError>;

    /// Close the channel and connection
    ///
    /// Deliveries that are still unsettled are returned to the broker.
    async fn close(&self) -> Result<(), TransportError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Opens transport connections.
///
/// Consumers hold a connector rather than a transport so that they can
/// re-establish the connection after it is lost.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError>;
}
