//! Prometheus metrics for the daemon.
//!
//! One `Metrics` instance owns a private registry; components record through
//! typed methods and the HTTP layer renders everything via [`Metrics::encode`].
//! Registration happens once at startup, so constructor failures are
//! programming errors and panic.

use std::time::Duration;

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

/// Watch event kind attached to sync-outcome metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    Put,
    Delete,
}

impl SyncEvent {
    fn label(self) -> &'static str {
        match self {
            SyncEvent::Put => "PUT",
            SyncEvent::Delete => "DELETE",
        }
    }
}

/// Connection directive change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOp {
    Add,
    Remove,
}

impl ConnectionOp {
    fn label(self) -> &'static str {
        match self {
            ConnectionOp::Add => "add",
            ConnectionOp::Remove => "remove",
        }
    }
}

pub struct Metrics {
    registry: Registry,

    peer_sync: CounterVec,
    hostfile_sync_duration: Histogram,
    reload_duration: Histogram,
    peers_discovered: Gauge,
    connections_active: Gauge,
    watch_errors: Counter,
    connection_ops: CounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let peer_sync = CounterVec::new(
            Opts::new(
                "meshsync_peer_sync_total",
                "Peer sync outcomes by registry event type",
            ),
            &["status", "event_type"],
        )
        .unwrap();
        registry.register(Box::new(peer_sync.clone())).unwrap();

        let hostfile_sync_duration = Histogram::with_opts(
            HistogramOpts::new(
                "meshsync_hostfile_sync_duration_seconds",
                "Time to write one host definition file",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1]),
        )
        .unwrap();
        registry
            .register(Box::new(hostfile_sync_duration.clone()))
            .unwrap();

        let reload_duration = Histogram::with_opts(
            HistogramOpts::new(
                "meshsync_reload_duration_seconds",
                "Time for a successful VPN daemon reload",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )
        .unwrap();
        registry
            .register(Box::new(reload_duration.clone()))
            .unwrap();

        let peers_discovered = Gauge::new(
            "meshsync_peers_discovered",
            "Peers visible in the last local discovery pass",
        )
        .unwrap();
        registry
            .register(Box::new(peers_discovered.clone()))
            .unwrap();

        let connections_active = Gauge::new(
            "meshsync_connections_active",
            "Connection directives currently configured",
        )
        .unwrap();
        registry
            .register(Box::new(connections_active.clone()))
            .unwrap();

        let watch_errors = Counter::new(
            "meshsync_registry_watch_errors_total",
            "Errors observed on the registry watch stream",
        )
        .unwrap();
        registry.register(Box::new(watch_errors.clone())).unwrap();

        let connection_ops = CounterVec::new(
            Opts::new(
                "meshsync_connection_operations_total",
                "Connection directives added and removed",
            ),
            &["operation", "status"],
        )
        .unwrap();
        registry
            .register(Box::new(connection_ops.clone()))
            .unwrap();

        Metrics {
            registry,
            peer_sync,
            hostfile_sync_duration,
            reload_duration,
            peers_discovered,
            connections_active,
            watch_errors,
            connection_ops,
        }
    }

    pub fn record_peer_sync(&self, success: bool, event: SyncEvent) {
        self.peer_sync
            .with_label_values(&[status_label(success), event.label()])
            .inc();
    }

    pub fn observe_hostfile_sync(&self, duration: Duration) {
        self.hostfile_sync_duration.observe(duration.as_secs_f64());
    }

    pub fn observe_reload(&self, duration: Duration) {
        self.reload_duration.observe(duration.as_secs_f64());
    }

    pub fn set_peers_discovered(&self, count: usize) {
        self.peers_discovered.set(count as f64);
    }

    pub fn set_connections_active(&self, count: usize) {
        self.connections_active.set(count as f64);
    }

    pub fn inc_watch_error(&self) {
        self.watch_errors.inc();
    }

    pub fn record_connection_ops(&self, op: ConnectionOp, success: bool, count: usize) {
        if count == 0 {
            return;
        }
        self.connection_ops
            .with_label_values(&[op.label(), status_label(success)])
            .inc_by(count as f64);
    }

    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}
