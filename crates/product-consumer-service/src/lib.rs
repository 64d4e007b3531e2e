//! # Product Consumer Service
//!
//! Wires the consumption pipeline to a real broker and the process
//! environment:
//!
//! - [`config`] - layered configuration loading and validation
//! - [`telemetry`] - `tracing` subscriber setup
//! - [`supervisor`] - reconnect-or-terminate around consumer runs
//! - [`publish`] - the `publish` subcommand
//!
//! The binary parses a [`Cli`], loads a [`ServiceConfig`], applies the
//! command-line overrides and hands both to [`run`].

use clap::{Parser, Subcommand};
use product_consumer_core::{
    BoundedRetries, FailureLedger, RunSummary, ShutdownCoordinator, SimulatedProcessor,
    WorkItem, WorkProcessor,
};
use product_consumer_transport::{Connector, InMemoryBroker, ProviderType, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod publish;
pub mod supervisor;
pub mod telemetry;

pub use config::{ConfigError, LoggingConfig, ServiceConfig};
pub use error::ServiceError;
pub use publish::PublishPayload;
pub use supervisor::Supervisor;

// ============================================================================
// CLI Structure
// ============================================================================

/// Product consumer - reliable processing of product updates from a queue
#[derive(Parser, Debug)]
#[command(name = "product-consumer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Consume product updates from a durable work queue")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PC_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Queue to use instead of the configured one
    #[arg(short, long, global = true)]
    pub queue: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Consume and process deliveries until SIGINT / SIGTERM
    Consume {
        /// Deliveries processed at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Use an in-process broker instead of RabbitMQ
        #[arg(long)]
        in_memory: bool,

        /// Demo messages to publish to the in-memory queue before consuming
        #[arg(long, default_value_t = 0, requires = "in_memory")]
        seed: usize,
    },

    /// Publish one message to the queue
    Publish {
        /// Product code
        #[arg(long)]
        code: Option<String>,

        /// Product name
        #[arg(long)]
        name: Option<String>,

        /// Stock level, may be negative
        #[arg(long, allow_negative_numbers = true)]
        stock: Option<i64>,

        /// Send this text as the payload instead of a product
        #[arg(long, conflicts_with_all = ["code", "name", "stock"])]
        raw: Option<String>,
    },
}

impl Cli {
    /// Apply command-line overrides on top of loaded configuration
    pub fn apply_overrides(&self, config: &mut ServiceConfig) {
        if let Some(queue) = &self.queue {
            config.transport.queue = queue.clone();
        }

        if let Commands::Consume {
            concurrency,
            in_memory,
            ..
        } = &self.command
        {
            if let Some(concurrency) = concurrency {
                config.consumer.max_concurrency = *concurrency;
            }
            if *in_memory {
                config.transport.provider = ProviderType::InMemory;
            }
        }
    }
}

/// Exit code for a command-line parse result that stops the process:
/// `0` for `--help` / `--version`, the invalid-argument code otherwise
pub fn usage_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        ServiceError::INVALID_ARGUMENT_EXIT_CODE
    } else {
        0
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Execute the selected command against validated configuration
pub async fn run(cli: Cli, config: ServiceConfig) -> Result<(), ServiceError> {
    match cli.command {
        Commands::Consume { seed, .. } => {
            let shutdown = ShutdownCoordinator::new();
            let listener = shutdown.listen_for_signals();
            let result = consume(&config, seed, &shutdown).await;
            listener.abort();
            result.map(|_| ())
        }
        Commands::Publish {
            code,
            name,
            stock,
            raw,
        } => {
            let payload = PublishPayload::from_parts(raw, code, name, stock)?;
            publish_once(&config, &payload).await
        }
    }
}

/// Run the supervised pipeline until `shutdown` fires or it fails for good
pub async fn consume(
    config: &ServiceConfig,
    seed: usize,
    shutdown: &ShutdownCoordinator,
) -> Result<Vec<RunSummary>, ServiceError> {
    let connector = build_connector(config, seed).await?;
    let supervisor = Supervisor::new(
        connector,
        build_processor(config),
        config.consumer_config()?,
        config.retry_policy(),
    );

    let summaries = supervisor.run(shutdown.token()).await?;

    let acknowledged: u64 = summaries.iter().map(|s| s.acknowledged).sum();
    let requeued: u64 = summaries.iter().map(|s| s.requeued).sum();
    let discarded: u64 = summaries.iter().map(|s| s.discarded).sum();
    let abandoned: u64 = summaries.iter().map(|s| s.abandoned).sum();
    info!(
        runs = summaries.len(),
        acknowledged, requeued, discarded, abandoned, "Consumer service finished"
    );

    Ok(summaries)
}

async fn publish_once(config: &ServiceConfig, payload: &PublishPayload) -> Result<(), ServiceError> {
    if config.transport.provider == ProviderType::InMemory {
        return Err(ServiceError::InvalidArgument {
            message: "publish needs a broker; in-memory queues only exist inside `consume`"
                .to_string(),
        });
    }

    let transport = amqp_connector(config)?.connect().await?;
    let result = publish::publish(
        transport.as_ref(),
        &config.queue_name()?,
        config.transport.durable,
        payload,
    )
    .await;

    if let Err(e) = transport.close().await {
        warn!(error = %e, "Failed to close broker connection");
    }
    result
}

// ============================================================================
// Wiring
// ============================================================================

/// Processor configured for this service: simulated work, optionally with a
/// per-product failure budget
pub fn build_processor(config: &ServiceConfig) -> Arc<dyn WorkProcessor> {
    let simulated = SimulatedProcessor::new(config.processor_config());

    match config.processor.max_failures_per_product {
        Some(max_failures) => Arc::new(BoundedRetries::new(
            simulated,
            Arc::new(FailureLedger::new()),
            max_failures,
        )),
        None => Arc::new(simulated),
    }
}

/// Connector for the configured provider.
///
/// For the in-memory provider a fresh broker is created and `seed` demo
/// messages are published to it.
pub async fn build_connector(
    config: &ServiceConfig,
    seed: usize,
) -> Result<Arc<dyn Connector>, ServiceError> {
    match config.transport.provider {
        ProviderType::Amqp => amqp_connector(config),
        ProviderType::InMemory => {
            let broker = InMemoryBroker::new();
            if seed > 0 {
                let transport = broker.connect_transport();
                let queue = config.queue_name()?;
                for payload in demo_payloads(seed) {
                    publish::publish(&transport, &queue, config.transport.durable, &payload)
                        .await?;
                }
                transport.close().await?;
                info!(queue = %queue, messages = seed, "Seeded in-memory queue");
            }
            Ok(Arc::new(broker))
        }
    }
}

#[cfg(feature = "amqp")]
fn amqp_connector(config: &ServiceConfig) -> Result<Arc<dyn Connector>, ServiceError> {
    Ok(Arc::new(product_consumer_transport::AmqpConnector::new(
        config.amqp_config(),
    )))
}

#[cfg(not(feature = "amqp"))]
fn amqp_connector(_config: &ServiceConfig) -> Result<Arc<dyn Connector>, ServiceError> {
    Err(ConfigError::Invalid {
        message: "built without the `amqp` feature; use the in_memory provider".to_string(),
    }
    .into())
}

/// A repeating mix of a valid product, an incomplete message and a backorder
pub fn demo_payloads(count: usize) -> Vec<PublishPayload> {
    let samples = [
        PublishPayload::Product(WorkItem {
            product_code: "P1".to_string(),
            product_name: "Widget".to_string(),
            stock: 10,
        }),
        PublishPayload::Raw(r#"{"product_code":"P2"}"#.to_string()),
        PublishPayload::Product(WorkItem {
            product_code: "P3".to_string(),
            product_name: "Gadget".to_string(),
            stock: -3,
        }),
    ];

    samples.iter().cycle().take(count).cloned().collect()
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
