//! Tests for the shared failure ledger.

use super::*;
use std::sync::Arc;

#[test]
fn test_counts_accumulate_per_key() {
    let ledger = FailureLedger::new();

    assert_eq!(ledger.record_failure("P1"), 1);
    assert_eq!(ledger.record_failure("P1"), 2);
    assert_eq!(ledger.record_failure("P2"), 1);

    assert_eq!(ledger.failures("P1"), 2);
    assert_eq!(ledger.failures("P2"), 1);
    assert_eq!(ledger.failures("P3"), 0);
    assert_eq!(ledger.tracked(), 2);
}

#[test]
fn test_reset_clears_only_that_key() {
    let ledger = FailureLedger::new();
    ledger.record_failure("P1");
    ledger.record_failure("P2");

    ledger.reset("P1");

    assert_eq!(ledger.failures("P1"), 0);
    assert_eq!(ledger.failures("P2"), 1);
    assert_eq!(ledger.record_failure("P1"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_are_not_lost() {
    let ledger = Arc::new(FailureLedger::new());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            for _ in 0..250 {
                ledger.record_failure("P1");
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(ledger.failures("P1"), 2000);
}
