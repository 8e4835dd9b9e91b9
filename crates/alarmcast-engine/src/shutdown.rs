// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signal-driven shutdown.
//!
//! SIGINT (Ctrl+C) or SIGTERM cancels a [`CancellationToken`] shared by
//! every engine loop. Loops stop dequeuing; batches already fetched finish.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawn the signal listener and return the token it cancels.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(e) => warn!(error = %e, "Ctrl+C handler failed, shutting down"),
    }
}

/// Await `task`, giving up after `timeout`. Returns whether it finished.
pub async fn drain<F: Future>(name: &str, task: F, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, task).await {
        Ok(_) => {
            debug!(task = name, "drained");
            true
        }
        Err(_) => {
            warn!(task = name, timeout_secs = timeout.as_secs(), "drain timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drain_reports_timeouts() {
        assert!(drain("quick", async {}, Duration::from_secs(1)).await);
        let slow = tokio::time::sleep(Duration::from_secs(60));
        assert!(!drain("slow", slow, Duration::from_secs(1)).await);
    }
}
