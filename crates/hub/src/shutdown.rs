//! Shutdown flag, signal listening and the final connection drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::relay::{DeliveryReport, RelayState};

/// Close code sent to every client on shutdown ("going away").
pub const SHUTDOWN_CLOSE_CODE: u16 = 1001;
pub const SHUTDOWN_REASON: &str = "Server shutdown";

/// Monotonic shutdown flag: false until triggered, then true forever.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag. Returns true only for the call that flipped it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set (immediately if it already is).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGTERM or ctrl-c and trigger `shutdown`.
pub async fn listen_for_signals(shutdown: Shutdown) {
    shutdown_signal().await;
    if shutdown.trigger() {
        info!("Received signal, initiating shutdown...");
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handling not available on this platform");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("SIGTERM received"),
                _ = ctrl_c() => info!("ctrl-c received"),
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handling not available on this platform");
            ctrl_c().await;
            info!("ctrl-c received");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
    info!("ctrl-c received");
}

/// Send the shutdown close frame to every open connection and wait for all
/// attempts to resolve.
pub async fn drain(relay: &RelayState, close_timeout: Duration) -> DeliveryReport {
    let report = relay
        .close_all(SHUTDOWN_CLOSE_CODE, SHUTDOWN_REASON, close_timeout)
        .await;
    if !report.is_empty() {
        info!(
            closed = report.delivered,
            failed = report.failed,
            "Connections drained"
        );
    }
    report
}
