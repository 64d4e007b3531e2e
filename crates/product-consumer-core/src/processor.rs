//! # Work Processor
//!
//! The business effect applied to each decoded [`WorkItem`].
//!
//! Processors report an [`Outcome`] and never touch the delivery itself;
//! deciding whether to acknowledge or reject is the caller's job. Whether a
//! failure is retryable or permanent is the processor's call, since only it
//! knows what the error means.

use crate::failure_ledger::FailureLedger;
use crate::WorkItem;
use async_trait::async_trait;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of processing one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Work is done
    Success,

    /// A transient condition; another attempt may succeed
    RetryableFailure { reason: String },

    /// Retrying cannot help
    PermanentFailure { reason: String },
}

impl Outcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::RetryableFailure {
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentFailure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short label for structured logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetryableFailure { .. } => "retryable_failure",
            Self::PermanentFailure { .. } => "permanent_failure",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::RetryableFailure { reason } | Self::PermanentFailure { reason } => Some(reason),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {}", self.label(), reason),
            None => write!(f, "{}", self.label()),
        }
    }
}

/// Interface for the unit of business logic run per delivery
#[async_trait]
pub trait WorkProcessor: Send + Sync {
    /// Process one item and report how it went
    async fn process(&self, item: &WorkItem) -> Outcome;
}

#[async_trait]
impl<P> WorkProcessor for Arc<P>
where
    P: WorkProcessor + ?Sized,
{
    async fn process(&self, item: &WorkItem) -> Outcome {
        (**self).process(item).await
    }
}

// ============================================================================
// Simulated Processor
// ============================================================================

/// Settings for [`SimulatedProcessor`]
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedProcessorConfig {
    /// Shortest simulated call
    pub min_latency: Duration,

    /// Longest simulated call
    pub max_latency: Duration,

    /// Probability (0.0 to 1.0) that a call reports a retryable failure.
    /// Out-of-range values are clamped; NaN never fails.
    pub failure_rate: f64,
}

impl Default for SimulatedProcessorConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(200),
            max_latency: Duration::from_millis(200),
            failure_rate: 0.5,
        }
    }
}

/// Stand-in for a real downstream call.
///
/// Logs the product, waits a random latency and fails with the configured
/// probability. Failures are always reported as retryable.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    config: SimulatedProcessorConfig,
}

impl SimulatedProcessor {
    pub fn new(config: SimulatedProcessorConfig) -> Self {
        Self { config }
    }

    fn sample_latency(&self) -> Duration {
        let min = self.config.min_latency;
        let max = self.config.max_latency.max(min);
        if min == max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    fn sample_failure(&self) -> bool {
        let rate = self.config.failure_rate;
        if rate.is_nan() {
            return false;
        }
        rand::thread_rng().gen_bool(rate.clamp(0.0, 1.0))
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(SimulatedProcessorConfig::default())
    }
}

#[async_trait]
impl WorkProcessor for SimulatedProcessor {
    async fn process(&self, item: &WorkItem) -> Outcome {
        info!(
            product_code = %item.product_code,
            product_name = %item.product_name,
            stock = item.stock,
            "Received product"
        );

        let latency = self.sample_latency();
        tokio::time::sleep(latency).await;

        if self.sample_failure() {
            warn!(
                product_code = %item.product_code,
                latency_ms = latency.as_millis() as u64,
                "Simulated processing error"
            );
            return Outcome::retryable("simulated processing error");
        }

        Outcome::Success
    }
}

// ============================================================================
// Bounded Retries
// ============================================================================

/// Caps how often one product may fail retryably in a row.
///
/// Wraps another processor. Each `RetryableFailure` is counted in a shared
/// [`FailureLedger`]; once a product reaches `max_failures` consecutive
/// failures the outcome is escalated to `PermanentFailure` so the message is
/// discarded instead of circling the queue forever. A `Success` clears the
/// count. The ledger lock is taken only after the inner call has finished.
pub struct BoundedRetries<P> {
    inner: P,
    ledger: Arc<FailureLedger>,
    max_failures: u32,
}

impl<P> BoundedRetries<P> {
    pub fn new(inner: P, ledger: Arc<FailureLedger>, max_failures: u32) -> Self {
        Self {
            inner,
            ledger,
            max_failures: max_failures.max(1),
        }
    }

    pub fn ledger(&self) -> &Arc<FailureLedger> {
        &self.ledger
    }
}

#[async_trait]
impl<P> WorkProcessor for BoundedRetries<P>
where
    P: WorkProcessor,
{
    async fn process(&self, item: &WorkItem) -> Outcome {
        let outcome = self.inner.process(item).await;

        match outcome {
            Outcome::Success => {
                self.ledger.reset(&item.product_code);
                Outcome::Success
            }
            Outcome::RetryableFailure { reason } => {
                let failures = self.ledger.record_failure(&item.product_code);
                if failures < self.max_failures {
                    return Outcome::RetryableFailure { reason };
                }

                self.ledger.reset(&item.product_code);
                warn!(
                    product_code = %item.product_code,
                    failures,
                    max_failures = self.max_failures,
                    "Retry budget exhausted, giving up on product"
                );
                Outcome::PermanentFailure {
                    reason: format!("{} (gave up after {} attempts)", reason, failures),
                }
            }
            permanent @ Outcome::PermanentFailure { .. } => {
                self.ledger.reset(&item.product_code);
                permanent
            }
        }
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
