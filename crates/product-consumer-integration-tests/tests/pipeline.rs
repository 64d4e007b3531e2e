//! End-to-end tests for decode → process → decide → settle.

mod common;

use common::*;
use product_consumer_core::{
    decode, BoundedRetries, FailureLedger, Outcome, StopReason, WorkProcessor,
};
use product_consumer_transport::{InMemoryBroker, Settlement};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Payload Scenarios
// ============================================================================

#[tokio::test]
async fn test_standard_payload_scenarios() {
    let broker = InMemoryBroker::new();
    broker.enqueue(&queue(), [VALID_PRODUCT, MISSING_FIELDS, BACKORDERED_PRODUCT]);
    let processor = ScriptedProcessor::new();

    let consumer = spawn_consumer(&broker, Arc::new(processor.clone()), default_config());
    wait_for_settlements(&broker, 3).await;
    let summary = consumer.stop().await;

    let by_payload: HashMap<Vec<u8>, Settlement> = broker
        .settlements()
        .into_iter()
        .map(|record| (record.payload.to_vec(), record.settlement))
        .collect();

    assert_eq!(by_payload[VALID_PRODUCT], Settlement::Ack);
    assert_eq!(
        by_payload[MISSING_FIELDS],
        Settlement::Nack { requeue: false }
    );
    assert_eq!(by_payload[BACKORDERED_PRODUCT], Settlement::Ack);

    // The incomplete message never reached the processor
    assert_eq!(processor.calls().len(), 2);
    assert_eq!(processor.calls_for("P2"), 0);

    assert_eq!(summary.received, 3);
    assert_eq!(summary.acknowledged, 2);
    assert_eq!(summary.discarded, 1);
    assert_eq!(summary.stop_reason, StopReason::Signal);
    assert_eq!(broker.ready_count(&queue()), 0);
    assert_eq!(broker.unsettled_count(), 0);
}

#[tokio::test]
async fn test_requeue_flag_follows_outcome() {
    let broker = InMemoryBroker::new();
    broker.enqueue(
        &queue(),
        [
            product_payload("OK", 1),
            product_payload("RETRY", 1),
            product_payload("BROKEN", 1),
        ],
    );
    let processor = ScriptedProcessor::new();
    processor.script("RETRY", vec![Outcome::retryable("database busy")]);
    processor.always("BROKEN", Outcome::permanent("unknown product"));

    let consumer = spawn_consumer(&broker, Arc::new(processor.clone()), default_config());
    wait_for_settlements(&broker, 4).await;
    let summary = consumer.stop().await;

    let settlements: Vec<(String, Settlement)> = broker
        .settlements()
        .into_iter()
        .map(|record| {
            let item = decode(&record.payload).unwrap();
            (item.product_code, record.settlement)
        })
        .collect();

    let for_code = |code: &str| -> Vec<Settlement> {
        settlements
            .iter()
            .filter(|(c, _)| c == code)
            .map(|(_, s)| *s)
            .collect()
    };

    assert_eq!(for_code("OK"), vec![Settlement::Ack]);
    assert_eq!(
        for_code("RETRY"),
        vec![Settlement::Nack { requeue: true }, Settlement::Ack]
    );
    assert_eq!(for_code("BROKEN"), vec![Settlement::Nack { requeue: false }]);

    assert_eq!(summary.requeued, 1);
    assert_eq!(summary.acknowledged, 2);
    assert_eq!(summary.discarded, 1);
}

// ============================================================================
// Poison Messages
// ============================================================================

#[tokio::test]
async fn test_repeatedly_failing_product_is_eventually_discarded() {
    let broker = InMemoryBroker::new();
    broker.enqueue(&queue(), [product_payload("POISON", 5)]);

    let inner = ScriptedProcessor::new();
    inner.always("POISON", Outcome::retryable("downstream rejects it"));
    let ledger = Arc::new(FailureLedger::new());
    let processor: Arc<dyn WorkProcessor> = Arc::new(BoundedRetries::new(
        inner.clone(),
        Arc::clone(&ledger),
        3,
    ));

    let consumer = spawn_consumer(&broker, processor, default_config());
    wait_for_settlements(&broker, 3).await;
    let summary = consumer.stop().await;

    let settlements: Vec<Settlement> = broker
        .settlements()
        .into_iter()
        .map(|record| record.settlement)
        .collect();
    assert_eq!(
        settlements,
        vec![
            Settlement::Nack { requeue: true },
            Settlement::Nack { requeue: true },
            Settlement::Nack { requeue: false },
        ]
    );
    assert_eq!(inner.calls_for("POISON"), 3);
    assert_eq!(summary.requeued, 2);
    assert_eq!(summary.discarded, 1);
    assert_eq!(ledger.failures("POISON"), 0);
    assert_eq!(broker.ready_count(&queue()), 0);
}

#[tokio::test]
async fn test_success_resets_failure_budget() {
    let broker = InMemoryBroker::new();
    broker.enqueue(&queue(), [product_payload("FLAKY", 5)]);

    let inner = ScriptedProcessor::new();
    inner.script(
        "FLAKY",
        vec![
            Outcome::retryable("timeout"),
            Outcome::retryable("timeout"),
            Outcome::Success,
        ],
    );
    let ledger = Arc::new(FailureLedger::new());
    let processor: Arc<dyn WorkProcessor> =
        Arc::new(BoundedRetries::new(inner, Arc::clone(&ledger), 3));

    let consumer = spawn_consumer(&broker, processor, default_config());
    wait_for_settlements(&broker, 3).await;
    let summary = consumer.stop().await;

    assert_eq!(summary.requeued, 2);
    assert_eq!(summary.acknowledged, 1);
    assert_eq!(summary.discarded, 0);
    assert_eq!(ledger.tracked(), 0);
}

// ============================================================================
// Volume
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_delivery_settled_exactly_once_under_load() {
    let broker = InMemoryBroker::new();
    let payloads: Vec<_> = (0..200)
        .map(|i| {
            if i % 10 == 0 {
                bytes::Bytes::from_static(MISSING_FIELDS)
            } else {
                product_payload(&format!("P{}", i), i)
            }
        })
        .collect();
    broker.enqueue(&queue(), payloads);
    let processor = ScriptedProcessor::new();

    let consumer = spawn_consumer(
        &broker,
        Arc::new(processor.clone()),
        default_config().with_max_concurrency(16),
    );
    wait_for_settlements(&broker, 200).await;
    let summary = consumer.stop().await;

    let records = broker.settlements();
    let mut tags: Vec<u64> = records.iter().map(|r| r.tag.value()).collect();
    tags.sort_unstable();
    tags.dedup();

    assert_eq!(records.len(), 200);
    assert_eq!(tags.len(), 200);
    assert_eq!(summary.received, 200);
    assert_eq!(summary.acknowledged, 180);
    assert_eq!(summary.discarded, 20);
    assert_eq!(summary.settle_failures, 0);
    assert_eq!(processor.calls().len(), 180);
}

// ============================================================================
// Decoding
// ============================================================================

#[test]
fn test_decoding_is_deterministic() {
    for payload in [VALID_PRODUCT, MISSING_FIELDS, BACKORDERED_PRODUCT, b"{".as_slice()] {
        assert_eq!(decode(payload), decode(payload));
    }
}
