//! Connection handle: the outbound half of one client's WebSocket.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use futures_util::{Sink, SinkExt};
use thiserror::Error;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Type-erased outbound sink. In production this is the write half of an
/// axum `WebSocket`.
pub type Outbound = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Per-accept identity. Two handles are the same connection iff their ids match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport: {0}")]
    Transport(#[from] axum::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// One live client channel. Sends are serialized by an async mutex so that
/// concurrent broadcasts never interleave frames on the same socket.
pub struct Connection {
    id: ConnectionId,
    outbound: Arc<Mutex<Outbound>>,
    send_timeout: Duration,
    /// Set once the relay has given up on this connection.
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new<S>(sink: S, send_timeout: Duration) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            id: ConnectionId::new(),
            outbound: Arc::new(Mutex::new(Box::pin(sink))),
            send_timeout,
            closed: watch::channel(false).0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send one message. The timeout covers waiting behind other senders
    /// (including a snapshot hold) as well as the write.
    pub async fn send(&self, message: Message) -> Result<(), DeliveryError> {
        let attempt = async {
            let mut outbound = self.outbound.lock().await;
            let sink: &mut Outbound = &mut outbound;
            sink.send(message).await
        };
        match tokio::time::timeout(self.send_timeout, attempt).await {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(_) => Err(DeliveryError::Timeout(self.send_timeout)),
        }
    }

    /// Flag the connection as finished. Returns true only for the call that
    /// flipped it.
    pub fn mark_closed(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once [`mark_closed`](Self::mark_closed) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Take exclusive hold of the outbound half. Other senders queue behind
    /// the hold until it is dropped.
    pub async fn hold(&self) -> OutboundHold {
        OutboundHold {
            guard: self.outbound.clone().lock_owned().await,
            send_timeout: self.send_timeout,
        }
    }

    /// Send a close frame. The whole attempt, including waiting for the
    /// outbound half, is bounded by `timeout`.
    pub async fn close(&self, code: u16, reason: &str, timeout: Duration) -> Result<(), DeliveryError> {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let attempt = async {
            let mut outbound = self.outbound.lock().await;
            let sink: &mut Outbound = &mut outbound;
            sink.send(Message::Close(Some(frame))).await
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

/// Exclusive hold on a connection's outbound half, see [`Connection::hold`].
pub struct OutboundHold {
    guard: OwnedMutexGuard<Outbound>,
    send_timeout: Duration,
}

impl OutboundHold {
    pub async fn send(&mut self, message: Message) -> Result<(), DeliveryError> {
        send_bounded(&mut self.guard, message, self.send_timeout).await
    }
}

async fn send_bounded(
    sink: &mut Outbound,
    message: Message,
    limit: Duration,
) -> Result<(), DeliveryError> {
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(result) => result.map_err(DeliveryError::from),
        Err(_) => Err(DeliveryError::Timeout(limit)),
    }
}
