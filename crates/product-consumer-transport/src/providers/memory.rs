//! In-memory transport implementation for testing and development.
//!
//! This module provides a small in-process broker that:
//! - Hands out deliveries with per-broker delivery tags
//! - Tracks unsettled deliveries per connection
//! - Requeues rejected messages and flags them as redelivered
//! - Returns unsettled deliveries to their queue when a connection closes
//! - Records every settlement so tests can assert exactly-once behaviour
//!
//! The broker outlives its connections: an [`InMemoryBroker`] is the
//! [`Connector`] and each [`InMemoryTransport`] is one connection to it.

use crate::client::{Connector, DeliveryStream, Transport};
use crate::error::TransportError;
use crate::message::{Delivery, DeliveryTag, QueueName};
use crate::provider::ProviderType;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

// ============================================================================
// Settlement Records
// ============================================================================

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack { requeue: bool },
}

/// A settlement observed by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    pub tag: DeliveryTag,
    pub queue: QueueName,
    pub payload: Bytes,
    pub settlement: Settlement,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Clone)]
struct StoredMessage {
    payload: Bytes,
    redelivered: bool,
}

struct QueueState {
    durable: bool,
    ready: VecDeque<StoredMessage>,
}

struct Unsettled {
    connection: u64,
    queue: QueueName,
    message: StoredMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Open,
    Lost,
    Closed,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<QueueName, QueueState>,
    unsettled: HashMap<u64, Unsettled>,
    connections: HashMap<u64, ConnectionState>,
    settlements: Vec<SettlementRecord>,
    refused_connects: u32,
    next_tag: u64,
    next_connection: u64,
}

impl BrokerState {
    fn ensure_open(&self, connection: u64) -> Result<(), TransportError> {
        match self.connections.get(&connection) {
            Some(ConnectionState::Open) => Ok(()),
            Some(ConnectionState::Lost) => Err(TransportError::ChannelClosed {
                message: "connection lost".to_string(),
            }),
            _ => Err(TransportError::Closed),
        }
    }

    /// Return every unsettled delivery of `connection` to its queue
    fn requeue_unsettled(&mut self, connection: u64) -> usize {
        let mut tags: Vec<u64> = self
            .unsettled
            .iter()
            .filter(|(_, entry)| entry.connection == connection)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in &tags {
            if let Some(entry) = self.unsettled.remove(tag) {
                if let Some(queue) = self.queues.get_mut(&entry.queue) {
                    queue.ready.push_back(StoredMessage {
                        payload: entry.message.payload,
                        redelivered: true,
                    });
                }
            }
        }

        tags.len()
    }

    /// Mark an open connection as lost and return its deliveries
    fn lose(&mut self, connection: u64) -> bool {
        if self.connections.get(&connection) != Some(&ConnectionState::Open) {
            return false;
        }
        self.connections.insert(connection, ConnectionState::Lost);
        let returned = self.requeue_unsettled(connection);
        debug!(connection, returned, "In-memory connection severed");
        true
    }

    fn settle(
        &mut self,
        connection: u64,
        tag: DeliveryTag,
        settlement: Settlement,
    ) -> Result<(), TransportError> {
        self.ensure_open(connection)?;

        // Delivery tags are scoped to the connection that received them
        let entry = match self.unsettled.remove(&tag.value()) {
            Some(entry) if entry.connection == connection => entry,
            Some(entry) => {
                self.unsettled.insert(tag.value(), entry);
                return Err(TransportError::UnknownDelivery { tag: tag.value() });
            }
            None => return Err(TransportError::UnknownDelivery { tag: tag.value() }),
        };

        if settlement == (Settlement::Nack { requeue: true }) {
            if let Some(queue) = self.queues.get_mut(&entry.queue) {
                queue.ready.push_back(StoredMessage {
                    payload: entry.message.payload.clone(),
                    redelivered: true,
                });
            }
        }

        self.settlements.push(SettlementRecord {
            tag,
            queue: entry.queue,
            payload: entry.message.payload,
            settlement,
        });

        Ok(())
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    available: Notify,
}

/// What a subscription found when it looked at the broker
enum Ready {
    Delivery(Delivery),
    Failed(TransportError),
    Ended,
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// In-process broker shared by any number of connections
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                available: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new connection to this broker
    pub fn connect_transport(&self) -> InMemoryTransport {
        let mut state = self.state();
        state.next_connection += 1;
        let connection = state.next_connection;
        state.connections.insert(connection, ConnectionState::Open);

        InMemoryTransport {
            broker: self.clone(),
            connection,
        }
    }

    /// Drop every open connection, as [`InMemoryTransport::sever`] does for one
    pub fn sever_all(&self) {
        {
            let mut state = self.state();
            let open: Vec<u64> = state
                .connections
                .iter()
                .filter(|(_, status)| **status == ConnectionState::Open)
                .map(|(connection, _)| *connection)
                .collect();
            for connection in open {
                state.lose(connection);
            }
        }
        self.shared.available.notify_waiters();
    }

    /// Make the next `count` calls to [`Connector::connect`] fail
    pub fn refuse_connections(&self, count: u32) {
        self.state().refused_connects = count;
    }

    /// Put messages straight onto a queue, declaring it as durable if needed
    pub fn enqueue<I, P>(&self, queue: &QueueName, payloads: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        {
            let mut state = self.state();
            let entry = state
                .queues
                .entry(queue.clone())
                .or_insert_with(|| QueueState {
                    durable: true,
                    ready: VecDeque::new(),
                });
            for payload in payloads {
                entry.ready.push_back(StoredMessage {
                    payload: payload.into(),
                    redelivered: false,
                });
            }
        }
        self.shared.available.notify_waiters();
    }

    /// Number of messages waiting to be delivered on a queue
    pub fn ready_count(&self, queue: &QueueName) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Number of deliveries handed out and not yet settled, across connections
    pub fn unsettled_count(&self) -> usize {
        self.state().unsettled.len()
    }

    /// Every settlement the broker has seen, in the order they happened
    pub fn settlements(&self) -> Vec<SettlementRecord> {
        self.state().settlements.clone()
    }

    /// Payloads currently waiting on a queue together with their redelivery flag
    pub fn peek(&self, queue: &QueueName) -> Vec<(Bytes, bool)> {
        self.state()
            .queues
            .get(queue)
            .map(|q| {
                q.ready
                    .iter()
                    .map(|m| (m.payload.clone(), m.redelivered))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn take_next(&self, queue: &QueueName, connection: u64, failure_reported: bool) -> Option<Ready> {
        let mut state = self.state();

        match state.connections.get(&connection) {
            Some(ConnectionState::Open) => {}
            Some(ConnectionState::Lost) if !failure_reported => {
                return Some(Ready::Failed(TransportError::ConnectionFailed {
                    message: "connection to in-memory broker lost".to_string(),
                }));
            }
            _ => return Some(Ready::Ended),
        }

        let message = state.queues.get_mut(queue)?.ready.pop_front()?;

        state.next_tag += 1;
        let tag = state.next_tag;
        state.unsettled.insert(
            tag,
            Unsettled {
                connection,
                queue: queue.clone(),
                message: message.clone(),
            },
        );

        Some(Ready::Delivery(Delivery::new(
            DeliveryTag::new(tag),
            message.payload,
            message.redelivered,
        )))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        {
            let mut state = self.state();
            if state.refused_connects > 0 {
                state.refused_connects -= 1;
                return Err(TransportError::ConnectionFailed {
                    message: "connection refused".to_string(),
                });
            }
        }

        Ok(Arc::new(self.connect_transport()))
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// One connection to an [`InMemoryBroker`]
pub struct InMemoryTransport {
    broker: InMemoryBroker,
    connection: u64,
}

impl InMemoryTransport {
    /// Simulate the connection dropping.
    ///
    /// Subscriptions yield a single `ConnectionFailed` error and end, settle
    /// calls fail, and unsettled deliveries go back to their queues.
    pub fn sever(&self) {
        let severed = self.broker.state().lose(self.connection);
        if severed {
            self.broker.shared.available.notify_waiters();
        }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn declare_queue(&self, queue: &QueueName, durable: bool) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        state.ensure_open(self.connection)?;

        match state.queues.get(queue) {
            Some(existing) if existing.durable != durable => Err(TransportError::Protocol {
                message: format!(
                    "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{}'",
                    queue
                ),
            }),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    queue.clone(),
                    QueueState {
                        durable,
                        ready: VecDeque::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn consume(&self, queue: &QueueName) -> Result<DeliveryStream, TransportError> {
        {
            let state = self.broker.state();
            state.ensure_open(self.connection)?;
            if !state.queues.contains_key(queue) {
                return Err(TransportError::QueueNotFound {
                    queue_name: queue.to_string(),
                });
            }
        }

        let seed = (self.broker.clone(), queue.clone(), self.connection, false);
        let stream = futures::stream::unfold(
            seed,
            |(broker, queue, connection, failure_reported)| async move {
                loop {
                    let ready = {
                        let available = broker.shared.available.notified();
                        tokio::pin!(available);
                        // Register before looking so a publish in between is not missed
                        available.as_mut().enable();

                        match broker.take_next(&queue, connection, failure_reported) {
                            Some(ready) => ready,
                            None => {
                                available.await;
                                continue;
                            }
                        }
                    };

                    return match ready {
                        Ready::Delivery(delivery) => {
                            Some((Ok(delivery), (broker, queue, connection, false)))
                        }
                        Ready::Failed(error) => Some((Err(error), (broker, queue, connection, true))),
                        Ready::Ended => None,
                    };
                }
            },
        );

        Ok(Box::pin(stream))
    }

    async fn publish(&self, queue: &QueueName, payload: Bytes) -> Result<(), TransportError> {
        {
            let mut state = self.broker.state();
            state.ensure_open(self.connection)?;
            let entry = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::QueueNotFound {
                    queue_name: queue.to_string(),
                })?;
            entry.ready.push_back(StoredMessage {
                payload,
                redelivered: false,
            });
        }
        self.broker.shared.available.notify_waiters();
        Ok(())
    }

    async fn ack(&self, delivery: Delivery) -> Result<(), TransportError> {
        self.broker
            .state()
            .settle(self.connection, delivery.tag(), Settlement::Ack)
    }

    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), TransportError> {
        self.broker
            .state()
            .settle(self.connection, delivery.tag(), Settlement::Nack { requeue })?;
        if requeue {
            self.broker.shared.available.notify_waiters();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        {
            let mut state = self.broker.state();
            if state.connections.get(&self.connection) == Some(&ConnectionState::Closed) {
                return Ok(());
            }
            state
                .connections
                .insert(self.connection, ConnectionState::Closed);
            let returned = state.requeue_unsettled(self.connection);
            debug!(
                connection = self.connection,
                returned, "In-memory connection closed"
            );
        }
        self.broker.shared.available.notify_waiters();
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
