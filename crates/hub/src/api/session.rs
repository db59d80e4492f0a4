//! Per-connection session: register, send the snapshot, process inbound
//! events, deregister.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures_util::{Stream, StreamExt};
use shared::{encode_marker, parse_inbound, AddMarkerEvent, Inbound, InboundError};
use tokio::sync::mpsc;

use crate::api::AppState;
use crate::relay::Connection;
use crate::shutdown::{SHUTDOWN_CLOSE_CODE, SHUTDOWN_REASON};

type InboundItem = Result<Message, axum::Error>;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let max_size = state.config.max_message_size;
    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_failed_upgrade(move |e| {
            tracing::warn!(peer = %peer, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, peer, state))
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let (ws_tx, ws_rx) = socket.split();
    let conn = Arc::new(Connection::new(ws_tx, state.config.send_timeout));
    run_session(conn, ws_rx, peer, state).await;
}

/// Drive one connection from accept to teardown. `inbound` is the read half
/// of the same channel `conn` writes to.
pub async fn run_session<S>(conn: Arc<Connection>, inbound: S, peer: SocketAddr, state: AppState)
where
    S: Stream<Item = InboundItem> + Send + Unpin + 'static,
{
    let mut session = Session {
        conn,
        peer,
        state,
        phase: Phase::Connecting,
        registered: false,
    };
    if session.open().await {
        session.serve(inbound).await;
    }
    session.teardown();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Active,
    Closing,
    Closed,
}

struct Session {
    conn: Arc<Connection>,
    peer: SocketAddr,
    state: AppState,
    phase: Phase,
    registered: bool,
}

impl Session {
    fn enter(&mut self, next: Phase) {
        tracing::debug!(conn_id = %self.conn.id(), from = ?self.phase, to = ?next, "Session transition");
        self.phase = next;
    }

    /// Register and send the snapshot. Returns false if the connection should
    /// go straight to teardown.
    async fn open(&mut self) -> bool {
        let state = self.state.clone();
        if state.shutdown.is_triggered() {
            tracing::info!(peer = %self.peer, "Rejecting client during shutdown");
            if let Err(e) = self
                .conn
                .close(SHUTDOWN_CLOSE_CODE, SHUTDOWN_REASON, state.config.close_timeout)
                .await
            {
                tracing::warn!(peer = %self.peer, error = %e, "Close failed");
            }
            return false;
        }

        state.stats.connection_opened();
        // Registering and loading under the store lock means every marker is
        // either in this snapshot or broadcast to us afterwards, never both.
        // Holding our own outbound half before releasing the lock keeps those
        // broadcasts queued behind the snapshot.
        let (markers, mut outbound) = {
            let store = state.store.lock().await;
            state.relay.register(self.conn.clone());
            self.registered = true;
            let markers = store.load().await;
            let outbound = self.conn.hold().await;
            (markers, outbound)
        };
        self.enter(Phase::Active);
        tracing::info!(
            conn_id = %self.conn.id(),
            peer = %self.peer,
            total = state.relay.registry().len(),
            "New client connected"
        );

        for marker in &markers {
            let text = match encode_marker(marker) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unencodable stored marker");
                    continue;
                }
            };
            if let Err(e) = outbound.send(Message::Text(text.into())).await {
                tracing::warn!(
                    conn_id = %self.conn.id(),
                    error = %e,
                    "Failed to send initial markers to client"
                );
                return false;
            }
        }
        tracing::debug!(conn_id = %self.conn.id(), count = markers.len(), "Snapshot sent");
        true
    }

    /// Consume inbound messages in receipt order until the peer goes away or
    /// the relay drops the connection.
    async fn serve<S>(&mut self, inbound: S)
    where
        S: Stream<Item = InboundItem> + Send + Unpin + 'static,
    {
        let (tx, mut rx) = mpsc::channel(self.state.config.max_queue_depth.max(1));
        let reader = tokio::spawn(read_inbound(inbound, tx));

        loop {
            let item = tokio::select! {
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
                _ = self.conn.closed() => {
                    tracing::info!(conn_id = %self.conn.id(), "Connection dropped by relay, ending session");
                    break;
                }
            };
            let outcome = match item {
                Ok(Message::Text(text)) => self.handle_text(text.as_str()).await,
                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.handle_text(text).await,
                    Err(_) => {
                        tracing::debug!(conn_id = %self.conn.id(), len = bytes.len(), "Dropping non-UTF-8 binary frame");
                        self.state.stats.message_dropped();
                        Ok(())
                    }
                },
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Ok(()),
                Ok(Message::Close(frame)) => {
                    tracing::info!(conn_id = %self.conn.id(), reason = ?frame, "Client disconnected normally");
                    break;
                }
                Err(e) => {
                    tracing::warn!(conn_id = %self.conn.id(), error = %e, "WebSocket error");
                    break;
                }
            };
            if let Err(e) = outcome {
                tracing::warn!(conn_id = %self.conn.id(), error = %e, "Error processing message, closing");
                break;
            }
        }

        reader.abort();
    }

    async fn handle_text(&self, text: &str) -> anyhow::Result<()> {
        match parse_inbound(text) {
            Ok(Inbound::AddMarker(event)) => self.add_marker(event).await?,
            Ok(Inbound::Ignored) => {}
            Err(InboundError::Json(e)) => {
                tracing::warn!(conn_id = %self.conn.id(), error = %e, "Invalid JSON received from client");
                self.state.stats.message_dropped();
            }
            Err(InboundError::InvalidMarker(reason)) => {
                tracing::warn!(conn_id = %self.conn.id(), reason = %reason, "Invalid marker data received from client");
                self.state.stats.message_dropped();
            }
        }
        Ok(())
    }

    async fn add_marker(&self, event: AddMarkerEvent) -> anyhow::Result<()> {
        let marker = event.into_marker(timestamp_now());
        let payload = encode_marker(&marker)?;

        // Append and pick recipients under one lock so a client connecting
        // concurrently sees this marker exactly once.
        let (recipients, total) = {
            let store = self.state.store.lock().await;
            let total = store.append(marker.clone()).await;
            (self.state.relay.recipients(Some(self.conn.id())), total)
        };
        self.state.stats.marker_added();

        let report = self
            .state
            .relay
            .deliver(recipients, Message::Text(payload.into()))
            .await;
        self.state.stats.record_delivery(&report);

        tracing::info!(
            conn_id = %self.conn.id(),
            total,
            delivered = report.delivered,
            "New marker added: {} at ({}, {})",
            marker.name,
            marker.lat,
            marker.lon
        );
        Ok(())
    }

    fn teardown(&mut self) {
        self.enter(Phase::Closing);
        self.state.relay.deregister(self.conn.id());
        if self.registered {
            self.state.stats.connection_closed();
        }
        self.enter(Phase::Closed);
    }
}

/// Forward inbound frames into the bounded queue. A full queue stops reads
/// until the session catches up.
async fn read_inbound<S>(mut inbound: S, tx: mpsc::Sender<InboundItem>)
where
    S: Stream<Item = InboundItem> + Unpin,
{
    while let Some(item) = inbound.next().await {
        let last = matches!(item, Err(_) | Ok(Message::Close(_)));
        if tx.send(item).await.is_err() || last {
            break;
        }
    }
}

fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
