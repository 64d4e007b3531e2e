//! # Product Consumer Core
//!
//! The delivery-processing pipeline for the product queue.
//!
//! Each delivery pulled from the transport flows through:
//!
//! 1. [`decoder`] - payload bytes to a typed [`WorkItem`]
//! 2. [`processor`] - the business effect, reported as an [`Outcome`]
//! 3. [`disposition`] - outcome to acknowledge / requeue / discard
//! 4. back to the transport as exactly one `ack` or `nack`
//!
//! The [`consumer`] module runs that flow with bounded concurrency and the
//! [`shutdown`] module stops intake and drains in-flight work when the process
//! is asked to terminate.
//!
//! ## Usage
//!
//! ```rust
//! use product_consumer_core::{decoder::decode, disposition::decide, processor::Outcome};
//! use product_consumer_core::disposition::Disposition;
//!
//! let item = decode(br#"{"product_code":"P1","product_name":"Widget","stock":10}"#).unwrap();
//! assert_eq!(item.product_code, "P1");
//!
//! let disposition = decide(&Ok::<_, product_consumer_core::decoder::DecodeError>(Outcome::Success));
//! assert_eq!(disposition, Disposition::Acknowledge);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod consumer;
pub mod decoder;
pub mod disposition;
pub mod error;
pub mod failure_ledger;
pub mod lifecycle;
pub mod processor;
pub mod retry;
pub mod shutdown;

pub use consumer::{Consumer, ConsumerConfig, RunSummary, StopReason};
pub use decoder::{decode, DecodeError};
pub use disposition::{decide, Disposition};
pub use error::ConsumerError;
pub use failure_ledger::FailureLedger;
pub use lifecycle::{LifecycleError, PipelineState, PipelineStatus};
pub use processor::{BoundedRetries, Outcome, SimulatedProcessor, SimulatedProcessorConfig, WorkProcessor};
pub use retry::{Backoff, RetryPolicy};
pub use shutdown::ShutdownCoordinator;

// ============================================================================
// Work Item
// ============================================================================

/// A decoded product update taken from the queue.
///
/// Immutable once constructed; `stock` may be negative (backorders).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    pub product_code: String,
    pub product_name: String,
    pub stock: i64,
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) stock={}",
            self.product_code, self.product_name, self.stock
        )
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
