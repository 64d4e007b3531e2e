//! # Shutdown Coordination
//!
//! Turns process termination signals into cancellation of a shared
//! [`CancellationToken`]. The consumption loop watches clones of the token:
//! cancellation stops intake and starts the drain grace period.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Owns the shutdown token for one process
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token for a loop or task that must stop on shutdown
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request shutdown without a signal
    pub fn trigger(&self, reason: &str) {
        if !self.token.is_cancelled() {
            info!(reason, "Shutdown requested");
        }
        self.token.cancel();
    }

    /// Spawn a task that triggers shutdown on SIGINT or SIGTERM.
    ///
    /// The task ends when a signal arrives or when the token is cancelled by
    /// other means. SIGTERM is only watched on unix.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let coordinator = self.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => coordinator.trigger("received SIGINT"),
                _ = terminate => coordinator.trigger("received SIGTERM"),
                _ = coordinator.token.cancelled() => {}
            }
        })
    }
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
