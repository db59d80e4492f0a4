//! HTTP + WebSocket surface and the serving loop.

mod session;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::{extract::State, routing::get, Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::relay::RelayState;
use crate::shutdown::{self, Shutdown};
use crate::stats::{HubStats, StatsSnapshot};
use crate::store::MarkerStore;

pub use session::{run_session, ws_handler};

/// Shared app state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayState>,
    /// Serializes every load/append on the markers file.
    pub store: Arc<Mutex<MarkerStore>>,
    pub config: Arc<Config>,
    pub stats: Arc<HubStats>,
    pub shutdown: Shutdown,
}

impl AppState {
    pub fn new(config: Arc<Config>, shutdown: Shutdown) -> Self {
        Self {
            relay: Arc::new(RelayState::new()),
            store: Arc::new(Mutex::new(MarkerStore::new(config.markers_path.clone()))),
            config,
            stats: Arc::new(HubStats::new()),
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot(state.relay.registry().len()))
}

/// Serve until the shutdown flag is set, then drain every open connection
/// and return once all close attempts have resolved.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let relay = state.relay.clone();
    let close_timeout = state.config.close_timeout;
    let app = router(state);

    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await
        }
    });
    tracing::info!("WebSocket server started successfully");

    run_until_shutdown(server, &shutdown, &relay, close_timeout).await
}

/// Wait for the shutdown flag or an early server exit, drain the relay
/// either way, then surface the server's result.
async fn run_until_shutdown(
    mut server: JoinHandle<io::Result<()>>,
    shutdown: &Shutdown,
    relay: &RelayState,
    close_timeout: Duration,
) -> anyhow::Result<()> {
    // The accept loop only ends on its own if it failed.
    let early_exit = tokio::select! {
        _ = shutdown.wait() => None,
        joined = &mut server => Some(joined),
    };

    tracing::info!("Server shutting down...");
    shutdown::drain(relay, close_timeout).await;

    let joined = match early_exit {
        Some(joined) => joined,
        None => match tokio::time::timeout(close_timeout, &mut server).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!("HTTP server did not stop within close timeout, aborting");
                server.abort();
                Ok(Ok(()))
            }
        },
    };
    joined.map_err(|e| anyhow!("server task failed: {}", e))??;
    tracing::info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let path = std::env::temp_dir().join(format!("hub_api_test_{}.json", uuid::Uuid::new_v4()));
        AppState::new(Arc::new(Config::for_test(path)), Shutdown::new())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn stats_reports_counters_as_json() {
        let state = test_state();
        state.stats.marker_added();
        state.stats.message_dropped();
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["markers_added"], 1);
        assert_eq!(json["messages_dropped"], 1);
        assert_eq!(json["connections_active"], 0);
    }

    #[tokio::test]
    async fn plain_get_on_socket_route_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn failed_server_still_drains_connections() {
        use crate::relay::testing::fake_connection;
        use axum::extract::ws::Message;

        let relay = RelayState::new();
        let (conn, mut rx) = fake_connection();
        relay.register(conn.clone());
        let server = tokio::spawn(async { Err(io::Error::new(io::ErrorKind::Other, "accept failed")) });

        let result =
            run_until_shutdown(server, &Shutdown::new(), &relay, Duration::from_secs(1)).await;

        assert!(result.is_err());
        assert!(relay.registry().is_empty());
        assert!(matches!(
            rx.try_recv(),
            Ok(Message::Close(Some(frame))) if frame.code == shutdown::SHUTDOWN_CLOSE_CODE
        ));
    }

    #[tokio::test]
    async fn serve_returns_after_shutdown_with_no_clients() {
        let state = test_state();
        let shutdown = state.shutdown.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let task = tokio::spawn(serve(listener, state));
        tokio::task::yield_now().await;
        shutdown.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("serve did not return")
            .unwrap()
            .unwrap();
    }
}
