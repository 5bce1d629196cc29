//! Shutdown propagation for the agent
//!
//! The agent has real teardown to sequence: the supervisor must drop the
//! host's ephemeral liveness node and give every task runner a window to
//! wind down, while containers are deliberately left running for the next
//! incarnation to adopt. A cancellation token fans that signal out to the
//! supervisor and, through child tokens, to each runner.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Returns a token cancelled on SIGTERM or SIGINT.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, draining agent");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, draining agent");
            }
        }

        trigger.cancel();
    });

    token
}
