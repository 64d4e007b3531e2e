//! # Reconnect Supervisor
//!
//! Runs the consumer and, when the broker connection drops, opens a new one
//! with exponential backoff. Gives up after the configured number of
//! consecutive failed attempts.
//!
//! Only steady-state losses are retried: if the very first connection or
//! subscription fails the supervisor returns the error immediately.

use crate::error::ServiceError;
use product_consumer_core::{
    Consumer, ConsumerConfig, ConsumerError, RetryPolicy, RunSummary, StopReason,
    WorkProcessor,
};
use product_consumer_transport::{Connector, TransportError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Supervisor {
    connector: Arc<dyn Connector>,
    processor: Arc<dyn WorkProcessor>,
    consumer_config: ConsumerConfig,
    retry_policy: RetryPolicy,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        processor: Arc<dyn WorkProcessor>,
        consumer_config: ConsumerConfig,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            processor,
            consumer_config,
            retry_policy,
        }
    }

    /// Consume until shutdown, reconnecting after transport loss.
    ///
    /// Returns the summary of every consumer run in order.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<Vec<RunSummary>, ServiceError> {
        let mut summaries = Vec::new();
        let mut backoff = self.retry_policy.backoff();

        loop {
            let error = match self.run_once(&shutdown).await {
                Ok(summary) => {
                    let stop_reason = summary.stop_reason;
                    summaries.push(summary);
                    if stop_reason != StopReason::TransportLost {
                        return Ok(summaries);
                    }
                    // The connection worked; start a fresh backoff sequence
                    backoff.reset();
                    TransportError::ConnectionFailed {
                        message: "delivery stream lost".to_string(),
                    }
                }
                Err(e) if summaries.is_empty() => return Err(e),
                Err(ServiceError::Transport(e))
                | Err(ServiceError::Consumer(ConsumerError::Transport(e)))
                    if e.is_transient() =>
                {
                    e
                }
                Err(e) => return Err(e),
            };

            if shutdown.is_cancelled() {
                return Ok(summaries);
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(ServiceError::ReconnectExhausted {
                    attempts: backoff.attempts(),
                    last_error: error,
                });
            };

            warn!(
                attempt = backoff.attempts(),
                max_attempts = self.retry_policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Reconnecting to broker"
            );

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested while waiting to reconnect");
                    return Ok(summaries);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_once(&self, shutdown: &CancellationToken) -> Result<RunSummary, ServiceError> {
        let transport = self.connector.connect().await?;
        let consumer = Consumer::new(
            transport,
            Arc::clone(&self.processor),
            self.consumer_config.clone(),
        );
        Ok(consumer.run(shutdown.clone()).await?)
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
