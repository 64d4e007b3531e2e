//! # Consumption Loop
//!
//! Pulls deliveries from a [`Transport`] and runs each one through
//! decode → process → decide → settle on its own task.
//!
//! - At most `max_concurrency` deliveries are in flight; the loop stops
//!   pulling until a slot frees up.
//! - Every delivery is settled exactly once, or abandoned un-settled when the
//!   drain grace period runs out (the broker redelivers it later).
//! - Per-delivery failures are logged and counted, never returned.
//!
//! A run moves the pipeline through `Starting → Running → Draining → Stopped`
//! and ends with a [`RunSummary`].

use crate::decoder::decode;
use crate::disposition::{decide, Disposition};
use crate::error::ConsumerError;
use crate::lifecycle::{PipelineState, PipelineStatus};
use crate::processor::{Outcome, WorkProcessor};
use crate::WorkItem;
use futures::{FutureExt, StreamExt};
use product_consumer_transport::{Delivery, DeliveryStream, QueueName, Transport, TransportError};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Settings for one [`Consumer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Queue to consume from
    pub queue: QueueName,

    /// Declare the queue as durable
    pub durable: bool,

    /// Upper bound on deliveries being processed at once
    pub max_concurrency: usize,

    /// How long in-flight work may run after intake stops
    pub shutdown_grace: Duration,
}

impl ConsumerConfig {
    pub fn new(queue: QueueName) -> Self {
        Self {
            queue,
            durable: true,
            max_concurrency: 8,
            shutdown_grace: Duration::from_secs(30),
        }
    }

    /// Set the concurrency bound (at least 1)
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

// ============================================================================
// Run Summary
// ============================================================================

/// Why intake stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown token was cancelled
    Signal,

    /// The transport ended the delivery stream
    StreamClosed,

    /// The delivery stream reported a transport error
    TransportLost,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Signal => "signal",
            Self::StreamClosed => "stream_closed",
            Self::TransportLost => "transport_lost",
        };
        f.write_str(name)
    }
}

/// Counters for one run of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Deliveries pulled from the transport
    pub received: u64,
    pub acknowledged: u64,
    pub requeued: u64,
    pub discarded: u64,

    /// Deliveries whose ack/nack call failed
    pub settle_failures: u64,

    /// Deliveries still in flight when the grace period ended
    pub abandoned: u64,

    pub stop_reason: StopReason,
}

impl RunSummary {
    fn new(stop_reason: StopReason) -> Self {
        Self {
            received: 0,
            acknowledged: 0,
            requeued: 0,
            discarded: 0,
            settle_failures: 0,
            abandoned: 0,
            stop_reason,
        }
    }

    /// Deliveries that reached the broker as an ack or nack
    pub fn settled(&self) -> u64 {
        self.acknowledged + self.requeued + self.discarded
    }

    fn record(&mut self, result: Result<Settled, JoinError>) {
        match result {
            Ok(Settled {
                disposition,
                succeeded: true,
            }) => match disposition {
                Disposition::Acknowledge => self.acknowledged += 1,
                Disposition::RejectAndRequeue => self.requeued += 1,
                Disposition::RejectAndDiscard => self.discarded += 1,
            },
            Ok(Settled {
                succeeded: false, ..
            }) => self.settle_failures += 1,
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                error!(error = %e, "Delivery task failed before settling");
                self.settle_failures += 1;
            }
        }
    }
}

/// What a delivery task did with its delivery
struct Settled {
    disposition: Disposition,
    succeeded: bool,
}

// ============================================================================
// Consumer
// ============================================================================

/// Runs the consumption pipeline against one transport connection
pub struct Consumer {
    transport: Arc<dyn Transport>,
    processor: Arc<dyn WorkProcessor>,
    config: ConsumerConfig,
    status: PipelineStatus,
}

impl Consumer {
    pub fn new(
        transport: Arc<dyn Transport>,
        processor: Arc<dyn WorkProcessor>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            transport,
            processor,
            config,
            status: PipelineStatus::new(),
        }
    }

    /// Watch the pipeline state of this consumer
    pub fn status(&self) -> watch::Receiver<PipelineState> {
        self.status.subscribe()
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Consume until `shutdown` is cancelled or the delivery stream ends.
    ///
    /// Fails only when the queue cannot be declared or consumed; the transport
    /// is closed before returning in every case.
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunSummary, ConsumerError> {
        let queue = &self.config.queue;

        let mut deliveries = match self.start().await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!(queue = %queue, error = %e, "Failed to start consuming");
                self.close_transport().await;
                self.status.transition(PipelineState::Stopped)?;
                return Err(e.into());
            }
        };

        self.status.transition(PipelineState::Running)?;
        info!(
            queue = %queue,
            max_concurrency = self.config.max_concurrency,
            provider = %self.transport.provider_type(),
            "Consuming deliveries"
        );

        let max_concurrency = self.config.max_concurrency.max(1);
        let mut tasks: JoinSet<Settled> = JoinSet::new();
        let mut summary = RunSummary::new(StopReason::Signal);

        let stop_reason = loop {
            while let Some(result) = tasks.try_join_next() {
                summary.record(result);
            }

            if tasks.len() >= max_concurrency {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break StopReason::Signal,
                    Some(result) = tasks.join_next() => {
                        summary.record(result);
                        continue;
                    }
                }
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break StopReason::Signal,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    summary.received += 1;
                    tasks.spawn(handle_delivery(
                        Arc::clone(&self.transport),
                        Arc::clone(&self.processor),
                        delivery,
                    ));
                }
                Some(Err(e)) => {
                    warn!(queue = %queue, error = %e, "Delivery stream failed");
                    break StopReason::TransportLost;
                }
                None => break StopReason::StreamClosed,
            }
        };
        drop(deliveries);

        self.status.transition(PipelineState::Draining)?;
        info!(
            stop_reason = %stop_reason,
            in_flight = tasks.len(),
            grace_seconds = self.config.shutdown_grace.as_secs_f64(),
            "Intake stopped, draining in-flight deliveries"
        );

        summary.stop_reason = stop_reason;
        let abandoned = self.drain(&mut tasks, &shutdown, &mut summary).await;
        summary.abandoned = abandoned;

        self.close_transport().await;
        self.status.transition(PipelineState::Stopped)?;

        info!(
            stop_reason = %summary.stop_reason,
            received = summary.received,
            acknowledged = summary.acknowledged,
            requeued = summary.requeued,
            discarded = summary.discarded,
            settle_failures = summary.settle_failures,
            abandoned = summary.abandoned,
            "Consumer stopped"
        );

        Ok(summary)
    }

    async fn start(&self) -> Result<DeliveryStream, TransportError> {
        self.transport
            .declare_queue(&self.config.queue, self.config.durable)
            .await?;
        self.transport.consume(&self.config.queue).await
    }

    /// Wait for in-flight tasks, aborting what is left once the grace period
    /// ends. Returns the number of abandoned deliveries.
    ///
    /// After a stream closure the grace period only starts once shutdown is
    /// requested.
    async fn drain(
        &self,
        tasks: &mut JoinSet<Settled>,
        shutdown: &CancellationToken,
        summary: &mut RunSummary,
    ) -> u64 {
        let grace = self.config.shutdown_grace;
        let wait_for_shutdown = summary.stop_reason == StopReason::StreamClosed;
        let deadline = async move {
            if wait_for_shutdown {
                shutdown.cancelled().await;
            }
            tokio::time::sleep(grace).await;
        };
        tokio::pin!(deadline);

        loop {
            if tasks.is_empty() {
                return 0;
            }

            tokio::select! {
                Some(result) = tasks.join_next() => summary.record(result),
                _ = &mut deadline => {
                    while let Some(result) = tasks.try_join_next() {
                        summary.record(result);
                    }
                    let abandoned = tasks.len() as u64;
                    warn!(abandoned, "Grace period elapsed, abandoning in-flight deliveries");
                    tasks.shutdown().await;
                    return abandoned;
                }
            }
        }
    }

    async fn close_transport(&self) {
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Failed to close transport");
        }
    }
}

// ============================================================================
// Per-delivery Processing
// ============================================================================

async fn handle_delivery(
    transport: Arc<dyn Transport>,
    processor: Arc<dyn WorkProcessor>,
    delivery: Delivery,
) -> Settled {
    let tag = delivery.tag();
    let redelivered = delivery.is_redelivered();

    let decoded = decode(delivery.payload());
    let product_code = decoded
        .as_ref()
        .map(|item| item.product_code.clone())
        .unwrap_or_default();

    let result = match decoded {
        Ok(item) => Ok(run_processor(processor.as_ref(), &item).await),
        Err(e) => Err(e),
    };
    let disposition = decide(&result);

    match &result {
        Err(e) => warn!(
            delivery_tag = %tag,
            redelivered,
            error = %e,
            disposition = %disposition,
            "Discarding undecodable delivery"
        ),
        Ok(outcome @ Outcome::PermanentFailure { .. }) => warn!(
            delivery_tag = %tag,
            redelivered,
            product_code = %product_code,
            outcome = %outcome,
            disposition = %disposition,
            "Discarding delivery after permanent failure"
        ),
        Ok(outcome) => info!(
            delivery_tag = %tag,
            redelivered,
            product_code = %product_code,
            outcome = outcome.label(),
            disposition = %disposition,
            "Settling delivery"
        ),
    }

    let settled = match disposition.requeue() {
        None => transport.ack(delivery).await,
        Some(requeue) => transport.nack(delivery, requeue).await,
    };

    match settled {
        Ok(()) => {
            debug!(delivery_tag = %tag, disposition = %disposition, "Delivery settled");
            Settled {
                disposition,
                succeeded: true,
            }
        }
        Err(e) => {
            error!(
                delivery_tag = %tag,
                disposition = %disposition,
                error = %e,
                "Failed to settle delivery"
            );
            Settled {
                disposition,
                succeeded: false,
            }
        }
    }
}

/// Run the processor, turning a panic into a permanent failure
async fn run_processor(processor: &dyn WorkProcessor, item: &WorkItem) -> Outcome {
    match AssertUnwindSafe(processor.process(item)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!(product_code = %item.product_code, "Processor panicked");
            Outcome::permanent("processor panicked")
        }
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
