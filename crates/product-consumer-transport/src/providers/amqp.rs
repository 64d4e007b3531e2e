//! RabbitMQ transport built on `lapin`.
//!
//! One connection with one channel per transport. The channel is wrapped in
//! a `tokio::sync::Mutex` so concurrent workers issue acks, nacks and
//! publishes one at a time.
//!
//! Deliveries are consumed with manual acknowledgment and settled by delivery
//! tag on the same channel. `basic_qos` caps how many unacknowledged
//! deliveries the broker pushes to this consumer.

use crate::client::{Connector, DeliveryStream, Transport};
use crate::error::TransportError;
use crate::message::{Delivery, DeliveryTag, QueueName};
use crate::provider::{AmqpConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// AMQP reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// Persistent delivery mode for published messages
const PERSISTENT: u8 = 2;

/// RabbitMQ transport
pub struct AmqpTransport {
    connection: Connection,
    /// Shared AMQP channel used for every broker call.
    channel: Mutex<Channel>,
    consumer_tag: String,
}

impl AmqpTransport {
    /// Dial the broker, open a channel and apply the prefetch limit
    pub async fn connect(config: &AmqpConfig) -> Result<Self, TransportError> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                message: e.to_string(),
            })?;

        let channel = connection.create_channel().await?;
        let prefetch = config.effective_prefetch();
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        info!(prefetch, "Connected to RabbitMQ");

        Ok(Self {
            connection,
            channel: Mutex::new(channel),
            consumer_tag: format!("{}-{}", config.consumer_tag, uuid::Uuid::new_v4()),
        })
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn declare_queue(&self, queue: &QueueName, durable: bool) -> Result<(), TransportError> {
        let channel = self.channel.lock().await;
        channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        debug!(queue = %queue, durable, "Queue declared");
        Ok(())
    }

    async fn consume(&self, queue: &QueueName) -> Result<DeliveryStream, TransportError> {
        let consumer = {
            let channel = self.channel.lock().await;
            channel
                .basic_consume(
                    queue.as_str(),
                    &self.consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await?
        };

        info!(queue = %queue, consumer_tag = %self.consumer_tag, "Subscribed to queue");

        let stream = consumer.map(|item| {
            item.map(|delivery| {
                Delivery::new(
                    DeliveryTag::new(delivery.delivery_tag),
                    Bytes::from(delivery.data),
                    delivery.redelivered,
                )
            })
            .map_err(TransportError::from)
        });

        Ok(stream.boxed())
    }

    async fn publish(&self, queue: &QueueName, payload: Bytes) -> Result<(), TransportError> {
        let channel = self.channel.lock().await;
        channel
            .basic_publish(
                "",
                queue.as_str(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        Ok(())
    }

    async fn ack(&self, delivery: Delivery) -> Result<(), TransportError> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery.tag().value(), BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), TransportError> {
        let channel = self.channel.lock().await;
        channel
            .basic_nack(
                delivery.tag().value(),
                BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        {
            let channel = self.channel.lock().await;
            if channel.status().connected() {
                channel.close(REPLY_SUCCESS, "consumer shutting down").await?;
            }
        }

        if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "consumer shutting down")
                .await?;
        }

        info!("RabbitMQ connection closed");
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Amqp
    }
}

/// Opens a fresh [`AmqpTransport`] on every call
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    config: AmqpConfig,
}

impl AmqpConnector {
    pub fn new(config: AmqpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = AmqpTransport::connect(&self.config).await?;
        Ok(Arc::new(transport))
    }
}
