//! # Product Consumer
//!
//! Binary entry point. Loads configuration, installs logging and runs the
//! selected command. Exit codes:
//!
//! - `1` broker unreachable or queue unusable at startup
//! - `2` connection lost and not recovered
//! - `3` configuration error
//! - `4` invalid command-line arguments

use clap::Parser;
use product_consumer_service::{
    run, telemetry, usage_exit_code, Cli, LoggingConfig, ServiceConfig, ServiceError,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = usage_exit_code(&e);
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let mut config = match ServiceConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_logging(&LoggingConfig::default());
            error!(error = %e, "Failed to load configuration; aborting");
            std::process::exit(ServiceError::CONFIGURATION_EXIT_CODE);
        }
    };
    cli.apply_overrides(&mut config);

    telemetry::init_logging(&config.logging);

    if let Err(e) = config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(ServiceError::CONFIGURATION_EXIT_CODE);
    }

    info!(
        provider = %config.transport.provider,
        queue = %config.transport.queue,
        max_concurrency = config.consumer.max_concurrency,
        "Starting product consumer"
    );

    if let Err(e) = run(cli, config).await {
        error!(error = %e, "Product consumer failed");
        std::process::exit(e.exit_code());
    }
}
