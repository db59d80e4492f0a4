//! Connection registry and broadcast fan-out.

mod connection;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::future::join_all;

pub use connection::{Connection, ConnectionId, DeliveryError, Outbound, OutboundHold};
pub use registry::Registry;

/// Outcome of one fan-out. Callers log it; nothing is retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn is_empty(&self) -> bool {
        self.attempted == 0
    }
}

/// Relay state: the live registry plus the fan-out built on it.
#[derive(Default)]
pub struct RelayState {
    registry: Registry,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn register(&self, conn: Arc<Connection>) -> bool {
        let id = conn.id();
        let added = self.registry.add(conn);
        tracing::info!(conn_id = %id, total = self.registry.len(), "Client registered");
        added
    }

    pub fn deregister(&self, id: ConnectionId) -> bool {
        let removed = self.registry.remove(id);
        tracing::info!(conn_id = %id, total = self.registry.len(), "Client deregistered");
        removed
    }

    /// Registry snapshot minus `exclude`.
    pub fn recipients(&self, exclude: Option<ConnectionId>) -> Vec<Arc<Connection>> {
        let mut recipients = self.registry.snapshot();
        if let Some(id) = exclude {
            recipients.retain(|conn| conn.id() != id);
        }
        recipients
    }

    /// Send `message` to every registered connection except `exclude`.
    pub async fn broadcast(&self, message: Message, exclude: Option<ConnectionId>) -> DeliveryReport {
        let recipients = self.recipients(exclude);
        self.deliver(recipients, message).await
    }

    /// Fan `message` out to `recipients` concurrently and wait for every send
    /// to resolve. Failed recipients are dropped from the registry.
    pub async fn deliver(&self, recipients: Vec<Arc<Connection>>, message: Message) -> DeliveryReport {
        if recipients.is_empty() {
            tracing::debug!("No recipients, broadcast skipped");
            return DeliveryReport::default();
        }
        tracing::info!("Broadcasting to {} clients", recipients.len());

        let sends = recipients
            .iter()
            .map(|conn| self.send_or_drop(conn, message.clone()));
        let results = join_all(sends).await;

        let delivered = results.iter().filter(|ok| **ok).count();
        let report = DeliveryReport {
            attempted: results.len(),
            delivered,
            failed: results.len() - delivered,
        };
        tracing::info!(
            "Successfully broadcast to {}/{} clients",
            report.delivered,
            report.attempted
        );
        report
    }

    /// Send to one connection. On failure remove it and mark it closed
    /// before returning, so its session winds down too.
    pub async fn send_or_drop(&self, conn: &Connection, message: Message) -> bool {
        match conn.send(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(conn_id = %conn.id(), error = %e, "Send failed, dropping connection");
                self.registry.remove(conn.id());
                conn.mark_closed();
                false
            }
        }
    }

    /// Close every registered connection concurrently, each bounded by
    /// `timeout`. All handles leave the registry whatever the outcome.
    pub async fn close_all(&self, code: u16, reason: &str, timeout: Duration) -> DeliveryReport {
        let connections = self.registry.snapshot();
        if connections.is_empty() {
            return DeliveryReport::default();
        }
        tracing::info!("Closing {} active connections...", connections.len());

        let closes = connections.iter().map(|conn| async move {
            let result = conn.close(code, reason, timeout).await;
            self.registry.remove(conn.id());
            conn.mark_closed();
            match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(conn_id = %conn.id(), error = %e, "Close failed");
                    false
                }
            }
        });
        let results = join_all(closes).await;

        let delivered = results.iter().filter(|ok| **ok).count();
        DeliveryReport {
            attempted: results.len(),
            delivered,
            failed: results.len() - delivered,
        }
    }
}
