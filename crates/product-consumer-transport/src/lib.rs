//! # Product Consumer Transport
//!
//! Broker-facing side of the product consumer pipeline.
//!
//! This library provides:
//! - The [`Transport`] trait: queue declaration, delivery streams, publish,
//!   acknowledgment and rejection
//! - The [`Connector`] trait used to (re)open transport connections
//! - An in-memory broker for tests and local runs
//! - A RabbitMQ transport built on `lapin` (feature `amqp`)
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all transport operations
//! - [`message`] - Queue names, delivery tags and delivery handles
//! - [`client`] - Transport and connector traits
//! - [`provider`] - Provider selection and configuration
//! - [`providers`] - Concrete transport implementations

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

pub use client::{Connector, DeliveryStream, Transport};
pub use error::{TransportError, ValidationError};
pub use message::{Delivery, DeliveryTag, QueueName};
pub use provider::{AmqpConfig, ProviderType, TransportConfig};
pub use providers::{InMemoryBroker, InMemoryTransport, Settlement, SettlementRecord};

#[cfg(feature = "amqp")]
pub use providers::{AmqpConnector, AmqpTransport};
