//! Shutdown coordination.
//!
//! Every long running task is spawned on the [`Supervisor`]'s [`TaskTracker`] and stops
//! once its [`CancellationToken`] is cancelled, either by a signal, the `exit` command, or
//! a critical task failing.
use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

/// A cloneable handle for spawning tasks and triggering a shutdown.
#[derive(Clone, Default)]
pub struct Supervisor {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task that is stopped on shutdown.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancellation_token.clone();
        self.task_tracker.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => (),
                () = fut => (),
            }
        })
    }

    /// Spawns a task whose failure triggers a graceful shutdown.
    pub fn spawn_critical<F, E>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let token = self.cancellation_token.clone();
        self.spawn(async move {
            if let Err(e) = fut.await {
                if !token.is_cancelled() {
                    tracing::error!("{name} failed: {e}");
                    trigger_shutdown(&token);
                }
            }
        })
    }

    pub fn trigger_shutdown(&self) {
        trigger_shutdown(&self.cancellation_token);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Waits for a shutdown to be triggered.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await;
    }

    /// Stops accepting tasks and waits for the spawned ones to finish.
    pub async fn wait(&self) {
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    /// Spawns a task that triggers a shutdown on SIGINT or SIGTERM.
    ///
    /// A second signal exits the process immediately.
    pub fn spawn_signal_handler(&self) {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            eprintln!();
            trigger_shutdown(&token);
            shutdown_signal().await;
            eprintln!();
            std::process::exit(1);
        });
    }
}

/// Trigger a graceful shutdown.
fn trigger_shutdown(token: &CancellationToken) {
    if !token.is_cancelled() {
        info!("Shutting down gracefully... Press Ctrl+C again to exit immediately.");
    }
    token.cancel();
}

/// Wait for an OS shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
