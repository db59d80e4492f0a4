//! Process-wide counters, served at `/stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::relay::DeliveryReport;

#[derive(Debug, Default)]
pub struct HubStats {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    markers_added: AtomicU64,
    messages_dropped: AtomicU64,
    broadcasts_skipped: AtomicU64,
    deliveries_succeeded: AtomicU64,
    deliveries_failed: AtomicU64,
}

/// Point-in-time copy of [`HubStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub connections_active: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub markers_added: u64,
    pub messages_dropped: u64,
    pub broadcasts_skipped: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
}

impl HubStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn marker_added(&self) {
        self.markers_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Invalid JSON, invalid marker fields, undecodable binary frames.
    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, report: &DeliveryReport) {
        if report.is_empty() {
            self.broadcasts_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.deliveries_succeeded
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.deliveries_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, connections_active: usize) -> StatsSnapshot {
        StatsSnapshot {
            connections_active: connections_active as u64,
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            markers_added: self.markers_added.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            broadcasts_skipped: self.broadcasts_skipped.load(Ordering::Relaxed),
            deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_counts_as_skipped_broadcast() {
        let stats = HubStats::new();
        stats.record_delivery(&DeliveryReport::default());
        stats.record_delivery(&DeliveryReport {
            attempted: 3,
            delivered: 2,
            failed: 1,
        });
        let snap = stats.snapshot(2);
        assert_eq!(snap.broadcasts_skipped, 1);
        assert_eq!(snap.deliveries_succeeded, 2);
        assert_eq!(snap.deliveries_failed, 1);
        assert_eq!(snap.connections_active, 2);
    }
}
