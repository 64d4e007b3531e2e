//! Transport provider implementations.
//!
//! This module contains concrete implementations of the `Transport` and
//! `Connector` traits for different brokers.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpConnector, AmqpTransport};
pub use memory::{InMemoryBroker, InMemoryTransport, Settlement, SettlementRecord};
