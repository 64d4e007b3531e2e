//! Common test utilities for the pipeline integration tests
//!
//! This module provides:
//! - A scripted [`WorkProcessor`] that records what it saw
//! - Payload fixtures for the standard product scenarios
//! - Helpers to run a consumer in the background and wait on the broker

use async_trait::async_trait;
use bytes::Bytes;
use product_consumer_core::{
    Consumer, ConsumerConfig, ConsumerError, Outcome, RunSummary, ShutdownCoordinator, WorkItem,
    WorkProcessor,
};
use product_consumer_transport::{InMemoryBroker, QueueName};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

pub const VALID_PRODUCT: &[u8] = br#"{"product_code":"P1","product_name":"Widget","stock":10}"#;
pub const MISSING_FIELDS: &[u8] = br#"{"product_code":"P2"}"#;
pub const BACKORDERED_PRODUCT: &[u8] =
    br#"{"product_code":"P3","product_name":"Gadget","stock":-3}"#;

pub fn queue() -> QueueName {
    QueueName::new("product-queue".to_string()).unwrap()
}

#[allow(dead_code)]
pub fn product_payload(code: &str, stock: i64) -> Bytes {
    Bytes::from(
        serde_json::json!({
            "product_code": code,
            "product_name": format!("Product {}", code),
            "stock": stock,
        })
        .to_string(),
    )
}

// ============================================================================
// Scripted Processor
// ============================================================================

/// Processor whose outcomes are scripted per product code.
///
/// Codes without a script succeed. Every call is recorded.
#[derive(Clone, Default)]
pub struct ScriptedProcessor {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Outcome>>>>,
    fallback: Arc<Mutex<HashMap<String, Outcome>>>,
    calls: Arc<Mutex<Vec<WorkItem>>>,
    started: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

#[allow(dead_code)]
impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return these outcomes, in order, for the next calls with `code`
    pub fn script(&self, code: &str, outcomes: Vec<Outcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(code.to_string(), outcomes.into());
    }

    /// Return `outcome` for every call with `code` once its script runs out
    pub fn always(&self, code: &str, outcome: Outcome) {
        self.fallback
            .lock()
            .unwrap()
            .insert(code.to_string(), outcome);
    }

    pub fn calls(&self) -> Vec<WorkItem> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, code: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.product_code == code)
            .count()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkProcessor for ScriptedProcessor {
    async fn process(&self, item: &WorkItem) -> Outcome {
        self.started.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().unwrap().push(item.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&item.product_code)
            .and_then(|outcomes| outcomes.pop_front());
        if let Some(outcome) = scripted {
            return outcome;
        }

        self.fallback
            .lock()
            .unwrap()
            .get(&item.product_code)
            .cloned()
            .unwrap_or(Outcome::Success)
    }
}

// ============================================================================
// Running Consumers
// ============================================================================

/// A consumer running on a background task
pub struct RunningConsumer {
    pub shutdown: ShutdownCoordinator,
    pub handle: JoinHandle<Result<RunSummary, ConsumerError>>,
}

#[allow(dead_code)]
impl RunningConsumer {
    /// Trigger shutdown and wait for the run to finish
    pub async fn stop(self) -> RunSummary {
        self.shutdown.trigger("test finished");
        self.handle
            .await
            .expect("consumer task panicked")
            .expect("consumer run failed")
    }
}

pub fn spawn_consumer(
    broker: &InMemoryBroker,
    processor: Arc<dyn WorkProcessor>,
    config: ConsumerConfig,
) -> RunningConsumer {
    let shutdown = ShutdownCoordinator::new();
    let consumer = Consumer::new(Arc::new(broker.connect_transport()), processor, config);
    let handle = tokio::spawn(consumer.run(shutdown.token()));

    RunningConsumer { shutdown, handle }
}

pub fn default_config() -> ConsumerConfig {
    ConsumerConfig::new(queue())
        .with_max_concurrency(4)
        .with_shutdown_grace(Duration::from_secs(5))
}

/// Poll until `condition` holds, failing the test after ten thousand tries
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition was not reached in time");
}

#[allow(dead_code)]
pub async fn wait_for_settlements(broker: &InMemoryBroker, count: usize) {
    wait_until(|| broker.settlements().len() >= count).await;
}
