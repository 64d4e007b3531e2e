//! Configuration types and loading for the consumer service.
//!
//! Sources, later overriding earlier:
//!
//! 1. `/etc/product-consumer/service.yaml`
//! 2. `./config/service.yaml`
//! 3. An explicit file (`--config` / `PC_CONFIG_FILE`), which must exist
//! 4. Environment variables prefixed `PC__` with `__` between keys,
//!    e.g. `PC__CONSUMER__MAX_CONCURRENCY=16`
//! 5. `RABBITMQ_URL`, which replaces `transport.amqp.url`
//!
//! Every field has a default, so no configuration at all is a valid setup.

use product_consumer_core::{ConsumerConfig, RetryPolicy, SimulatedProcessorConfig};
use product_consumer_transport::{AmqpConfig, ProviderType, QueueName};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable that overrides the broker URL
pub const BROKER_URL_ENV: &str = "RABBITMQ_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub transport: TransportSettings,
    pub consumer: ConsumerSettings,
    pub processor: ProcessorSettings,
    pub reconnect: ReconnectSettings,
    pub logging: LoggingConfig,
}

/// Broker and queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Which transport to consume through
    pub provider: ProviderType,

    /// Queue to consume from and publish to
    pub queue: String,

    /// Declare the queue as durable
    pub durable: bool,

    /// RabbitMQ connection settings
    pub amqp: AmqpConfig,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            provider: ProviderType::Amqp,
            queue: "product-queue".to_string(),
            durable: true,
            amqp: AmqpConfig::default(),
        }
    }
}

/// Consumption loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Deliveries processed at once
    pub max_concurrency: usize,

    /// Seconds in-flight work may run after a shutdown signal
    pub shutdown_grace_seconds: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            shutdown_grace_seconds: 30,
        }
    }
}

/// Simulated processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,

    /// Probability of a retryable failure per call
    pub failure_rate: f64,

    /// Consecutive retryable failures before a product is discarded;
    /// unset means retry forever
    pub max_failures_per_product: Option<u32>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            min_latency_ms: 200,
            max_latency_ms: 200,
            failure_rate: 0.5,
            max_failures_per_product: Some(3),
        }
    }
}

/// Backoff for re-establishing a lost broker connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,

    /// Random spread applied to each delay, as a fraction of it
    pub jitter: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: RetryPolicy::DEFAULT_JITTER,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the standard locations.
    ///
    /// Does not validate; call [`ServiceConfig::validate`] once command-line
    /// overrides have been applied.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/product-consumer/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit_path {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let mut service_config: ServiceConfig = builder
            .add_source(config::Environment::with_prefix("PC").separator("__"))
            .build()?
            .try_deserialize()?;

        if let Ok(url) = std::env::var(BROKER_URL_ENV) {
            if !url.is_empty() {
                service_config.transport.amqp.url = url;
            }
        }

        Ok(service_config)
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        QueueName::new(self.transport.queue.clone())
            .map_err(|e| ConfigError::invalid(format!("transport.queue: {}", e)))?;

        if self.transport.provider == ProviderType::Amqp && self.transport.amqp.url.is_empty() {
            return Err(ConfigError::invalid("transport.amqp.url must not be empty"));
        }

        if self.transport.amqp.prefetch == Some(0) {
            return Err(ConfigError::invalid(
                "transport.amqp.prefetch must be greater than zero",
            ));
        }

        if self.consumer.max_concurrency == 0 {
            return Err(ConfigError::invalid(
                "consumer.max_concurrency must be greater than zero",
            ));
        }

        if self.consumer.shutdown_grace_seconds == 0 {
            return Err(ConfigError::invalid(
                "consumer.shutdown_grace_seconds must be greater than zero",
            ));
        }

        if self.processor.min_latency_ms > self.processor.max_latency_ms {
            return Err(ConfigError::invalid(format!(
                "processor.min_latency_ms ({}) exceeds processor.max_latency_ms ({})",
                self.processor.min_latency_ms, self.processor.max_latency_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.processor.failure_rate) {
            return Err(ConfigError::invalid(format!(
                "processor.failure_rate must be between 0 and 1, got {}",
                self.processor.failure_rate
            )));
        }

        if self.processor.max_failures_per_product == Some(0) {
            return Err(ConfigError::invalid(
                "processor.max_failures_per_product must be greater than zero when set",
            ));
        }

        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "reconnect.backoff_multiplier must be at least 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::invalid(
                "reconnect.jitter must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }

    pub fn queue_name(&self) -> Result<QueueName, ConfigError> {
        QueueName::new(self.transport.queue.clone())
            .map_err(|e| ConfigError::invalid(format!("transport.queue: {}", e)))
    }

    pub fn consumer_config(&self) -> Result<ConsumerConfig, ConfigError> {
        let mut config = ConsumerConfig::new(self.queue_name()?)
            .with_max_concurrency(self.consumer.max_concurrency)
            .with_shutdown_grace(Duration::from_secs(self.consumer.shutdown_grace_seconds));
        config.durable = self.transport.durable;
        Ok(config)
    }

    /// AMQP settings with prefetch defaulting to the concurrency bound
    pub fn amqp_config(&self) -> AmqpConfig {
        let mut amqp = self.transport.amqp.clone();
        if amqp.prefetch.is_none() {
            let prefetch = u16::try_from(self.consumer.max_concurrency).unwrap_or(u16::MAX);
            amqp.prefetch = Some(prefetch);
        }
        amqp
    }

    pub fn processor_config(&self) -> SimulatedProcessorConfig {
        SimulatedProcessorConfig {
            min_latency: Duration::from_millis(self.processor.min_latency_ms),
            max_latency: Duration::from_millis(self.processor.max_latency_ms),
            failure_rate: self.processor.failure_rate,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.reconnect.max_attempts,
            Duration::from_millis(self.reconnect.initial_delay_ms),
            Duration::from_millis(self.reconnect.max_delay_ms),
            self.reconnect.backoff_multiplier,
        )
        .with_jitter(self.reconnect.jitter)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
