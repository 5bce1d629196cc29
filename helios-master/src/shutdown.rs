//! Shutdown signal for the RPC server

use tokio::signal::unix::{signal, SignalKind};

/// Resolves when the process receives SIGTERM or SIGINT.
///
/// Handed to axum's graceful shutdown, so in-flight requests finish and
/// the listener closes before the process exits. The master holds no
/// ephemeral store state, so nothing else needs tearing down.
pub async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, draining in-flight requests");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, draining in-flight requests");
        }
    }
}
