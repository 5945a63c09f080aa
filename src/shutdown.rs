//! Graceful shutdown.
//!
//! Tracks the server tasks in a `JoinSet` and hands each of them a signal
//! future that resolves once shutdown starts.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Shutdown coordinator for graceful termination.
pub struct ShutdownCoordinator {
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl ShutdownCoordinator {
    /// Creates a new shutdown coordinator.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: JoinSet::new(),
        }
    }

    /// Gets a shutdown receiver.
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.shutdown_tx.subscribe(),
        }
    }

    /// Spawns a tracked task. The task is expected to observe its own
    /// [`ShutdownSignal`] and drain.
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = Result<(), ProviderError>> + Send + 'static,
    {
        self.tasks.spawn(async move {
            match future.await {
                Ok(()) => info!(task = name, "Task completed"),
                Err(e) => error!(task = name, error = %e, "Task failed"),
            }
        });
    }

    /// Resolves when any tracked task exits. Pending forever with no tasks.
    pub async fn wait_for_task_exit(&mut self) {
        match self.tasks.join_next().await {
            Some(Err(e)) => warn!(error = %e, "Task panicked or was cancelled"),
            Some(Ok(())) => {}
            None => std::future::pending::<()>().await,
        }
    }

    /// Initiates graceful shutdown, aborting tasks still running after
    /// `timeout`.
    pub async fn shutdown(mut self, timeout: Duration) {
        info!("Initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let shutdown_result = tokio::time::timeout(timeout, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Task failed during shutdown");
                }
            }
        })
        .await;

        match shutdown_result {
            Ok(()) => info!("All tasks completed gracefully"),
            Err(_) => {
                warn!("Shutdown timeout reached, aborting remaining tasks");
                self.tasks.abort_all();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shutdown signal receiver.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for the shutdown signal. Also resolves if the coordinator is
    /// dropped.
    pub async fn recv(mut self) {
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }
}

/// Waits for SIGTERM or SIGINT.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        () = ctrl_c => info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
}
