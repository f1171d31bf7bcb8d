//! Process signals and coordinated shutdown of background tasks.
//!
//! # Graceful Shutdown
//!
//! When Ctrl+C or SIGTERM arrives:
//! 1. The HTTP server stops accepting new connections
//! 2. The caller broadcasts shutdown to consumers and relays
//! 3. [`await_shutdown`] gives each task a bounded window to finish

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed the failure is logged and that signal
/// source is ignored; the other one still ends the wait.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
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
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Wait for named background tasks, giving each up to `timeout`.
///
/// Returns the number of tasks that stopped cleanly.
pub async fn await_shutdown(handles: Vec<(String, JoinHandle<()>)>, timeout: Duration) -> usize {
    let mut stopped = 0;
    for (name, handle) in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                stopped += 1;
                info!(task = %name, "Task stopped gracefully");
            }
            Ok(Err(e)) => warn!(task = %name, error = %e, "Task failed"),
            Err(_) => warn!(task = %name, "Task shutdown timed out"),
        }
    }
    stopped
}
