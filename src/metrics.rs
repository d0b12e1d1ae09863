// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Prometheus Metrics for the Chat Hub
//!
//! Provides observability metrics for monitoring the hub.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Hub metrics.
#[derive(Clone)]
pub struct HubMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// Current active WebSocket connections.
    pub connections_active: IntGauge,
    /// Connection errors (handshake failures, rejected upgrades, etc.).
    pub connection_errors: IntCounter,

    // Call metrics
    /// Total client calls decoded.
    pub calls_received: IntCounter,
    /// Calls dropped as malformed, undecodable or oversized.
    pub calls_rejected: IntCounter,
    /// Call processing duration in seconds.
    pub call_duration: Histogram,

    // Message metrics
    /// Total private messages accepted.
    pub private_messages_total: IntCounter,
    /// Total delivery status transitions.
    pub status_changes_total: IntCounter,
    /// Total messages edited.
    pub messages_edited: IntCounter,
    /// Total messages deleted.
    pub messages_deleted: IntCounter,
    /// Current number of stored messages.
    pub messages_stored: IntGauge,
    /// Log writes that failed since startup.
    pub persist_failures: IntGauge,

    // Fan-out
    /// Presence events broadcast.
    pub presence_broadcasts: IntCounter,
    /// Pushes dropped because a client's buffer was full or gone.
    pub pushes_dropped: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let metric = IntCounter::with_opts(Opts::new(name, help)).unwrap();
    registry.register(Box::new(metric.clone())).unwrap();
    metric
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let metric = IntGauge::with_opts(Opts::new(name, help)).unwrap();
    registry.register(Box::new(metric.clone())).unwrap();
    metric
}

impl HubMetrics {
    /// Creates a new metrics instance with all counters registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let call_duration = Histogram::with_opts(HistogramOpts::new(
            "chat_call_duration_seconds",
            "Client call processing duration in seconds",
        ))
        .unwrap();
        registry.register(Box::new(call_duration.clone())).unwrap();

        HubMetrics {
            connections_total: counter(
                &registry,
                "chat_connections_total",
                "Total WebSocket connections accepted",
            ),
            connections_active: gauge(
                &registry,
                "chat_connections_active",
                "Current active WebSocket connections",
            ),
            connection_errors: counter(
                &registry,
                "chat_connection_errors_total",
                "Total connection errors",
            ),
            calls_received: counter(
                &registry,
                "chat_calls_received_total",
                "Total client calls received",
            ),
            calls_rejected: counter(
                &registry,
                "chat_calls_rejected_total",
                "Total client calls rejected",
            ),
            call_duration,
            private_messages_total: counter(
                &registry,
                "chat_private_messages_total",
                "Total private messages sent",
            ),
            status_changes_total: counter(
                &registry,
                "chat_status_changes_total",
                "Total delivery status transitions",
            ),
            messages_edited: counter(
                &registry,
                "chat_messages_edited_total",
                "Total messages edited",
            ),
            messages_deleted: counter(
                &registry,
                "chat_messages_deleted_total",
                "Total messages deleted",
            ),
            messages_stored: gauge(
                &registry,
                "chat_messages_stored",
                "Current number of stored messages",
            ),
            persist_failures: gauge(
                &registry,
                "chat_persist_failures",
                "Message log writes that failed since startup",
            ),
            presence_broadcasts: counter(
                &registry,
                "chat_presence_broadcasts_total",
                "Total presence events broadcast",
            ),
            pushes_dropped: counter(
                &registry,
                "chat_pushes_dropped_total",
                "Total pushes dropped on full or closed connections",
            ),
            registry: Arc::new(registry),
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self::new()
    }
}
