//! Marker hub server: snapshot on connect, live broadcast after.
//!
//! Optional env: HOST, PORT, MARKERS_PATH, MAX_MESSAGE_SIZE, MAX_QUEUE_DEPTH,
//! CLOSE_TIMEOUT_SECS, SEND_TIMEOUT_SECS, RUST_LOG

use std::sync::Arc;

use anyhow::Context;
use marker_hub::{api, config, shutdown};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(config::Config::from_env());
    let shutdown = shutdown::Shutdown::new();
    tokio::spawn(shutdown::listen_for_signals(shutdown.clone()));

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    tracing::info!(
        markers = %config.markers_path.display(),
        "Starting WebSocket server on {}",
        listener.local_addr()?
    );

    let state = api::AppState::new(config, shutdown);
    api::serve(listener, state).await
}
