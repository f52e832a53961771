//! Control loop
//!
//! Drives the daemon through its lifecycle: announce and publish this node,
//! wait for the registry to settle, converge the on-disk VPN configuration,
//! then follow the registry watch stream event by event. Events are handled
//! strictly serially; every reconcile recomputes the full desired set from a
//! fresh registry snapshot, so duplicated or reordered notifications cannot
//! corrupt the outcome.

use std::sync::Arc;
use std::time::Duration;

use etcd_client::{Event, EventType};
use meshsync_common::{
    node_name_from_key, peer_key, ConnectionOp, Error, Metrics, PeerRecord, Result, SyncEvent,
    PEER_PREFIX,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::discovery::Discovery;
use crate::mesh::{MeshManager, ReconcileOutcome};
use crate::registry::{Registry, RegistryEntry};

/// Tracks whether the registry's peer count has stopped growing for long
/// enough to be called settled. Only growth resets the clock; a shrinking
/// count still counts as calm.
struct CalmTracker {
    interval: Duration,
    window: Duration,
    accumulated: Duration,
    last_count: usize,
}

impl CalmTracker {
    fn new(interval: Duration, window: Duration) -> Self {
        Self {
            interval,
            window,
            accumulated: Duration::ZERO,
            last_count: 0,
        }
    }

    /// Feed one poll result. Returns true once the count has held calm for
    /// the full window.
    fn observe(&mut self, count: usize) -> bool {
        if count > self.last_count {
            self.accumulated = Duration::ZERO;
        } else {
            self.accumulated += self.interval;
        }
        self.last_count = count;
        self.accumulated >= self.window
    }
}

/// The daemon's reconciliation loop.
pub struct ControlLoop {
    config: DaemonConfig,
    registry: Registry,
    mesh: MeshManager,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl ControlLoop {
    pub fn new(
        config: DaemonConfig,
        registry: Registry,
        mesh: MeshManager,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            mesh,
            metrics,
            cancel,
        }
    }

    /// Run until cancellation or an unrecoverable registry failure. A lost
    /// watch stream is returned as an error; the supervisor restarts the
    /// process rather than this loop re-subscribing with unknown state.
    pub async fn run(self) -> Result<()> {
        // Starting: read our credential once; it feeds both the mDNS
        // fingerprint and the published record.
        let credential = match self.mesh.local_credential(&self.config.node_name).await {
            Ok(credential) => credential,
            Err(e) => {
                debug!("local credential unavailable: {}", e);
                String::new()
            }
        };
        let fingerprint = if credential.is_empty() {
            "unknown".to_string()
        } else {
            credential.chars().take(20).collect()
        };

        self.publish_self(&credential).await;

        // Discovery is advisory; a node without mDNS still converges from
        // the registry alone.
        let discovery = match Discovery::new() {
            Ok(discovery) => Some(discovery),
            Err(e) => {
                warn!("local discovery unavailable, running degraded: {}", e);
                None
            }
        };

        let mut advertisement = None;
        let mut monitor_handle = None;
        if let Some(discovery) = &discovery {
            match discovery.advertise(&self.config.node_name, self.config.vpn_port, &fingerprint) {
                Ok(ad) => advertisement = Some(ad),
                Err(e) => warn!("cannot advertise this node: {}", e),
            }

            match discovery
                .discover_peers(self.config.discovery.query_timeout())
                .await
            {
                Ok(peers) => {
                    info!("initial discovery found {} node(s)", peers.len());
                    for peer in &peers {
                        debug!("discovered {}", peer);
                    }
                    self.metrics.set_peers_discovered(peers.len());
                }
                Err(e) => warn!("initial discovery failed: {}", e),
            }

            let monitor = discovery.clone();
            let metrics = self.metrics.clone();
            let interval = self.config.discovery.interval();
            let query_timeout = self.config.discovery.query_timeout();
            let cancel = self.cancel.clone();
            monitor_handle = Some(tokio::spawn(async move {
                monitor
                    .monitor(interval, query_timeout, cancel, move |peers| {
                        metrics.set_peers_discovered(peers.len());
                    })
                    .await;
            }));
        }

        let result = self.converge_and_watch().await;

        // ShuttingDown: whether we got here by cancellation or by a registry
        // failure, withdraw from the segment before returning.
        info!("control loop stopping");
        self.cancel.cancel();
        if let Some(ad) = advertisement {
            ad.shutdown().await;
        }
        if let Some(discovery) = &discovery {
            discovery.shutdown();
        }
        if let Some(handle) = monitor_handle {
            let _ = handle.await;
        }

        match result {
            Err(Error::Canceled) => Ok(()),
            other => other,
        }
    }

    async fn converge_and_watch(&self) -> Result<()> {
        let snapshot = self.wait_for_settlement().await?;
        self.initial_sync(&snapshot).await;
        self.watch_events().await
    }

    /// Publish this node's own record, when it is configured completely
    /// enough to be useful to others. Failures only delay our visibility.
    async fn publish_self(&self, credential: &str) {
        let (address, endpoint) = match (self.config.node_address, &self.config.node_endpoint) {
            (Some(address), Some(endpoint)) => (address, endpoint.clone()),
            _ => {
                info!("node address/endpoint not configured, skipping self-publication");
                return;
            }
        };

        let record = PeerRecord {
            address: Some(address),
            credential: credential.to_string(),
            endpoint,
        };
        if !record.validate() {
            warn!("own peer record is incomplete, not publishing");
            return;
        }

        let key = peer_key(&self.config.node_name);
        let value = match serde_json::to_string(&record) {
            Ok(value) => value,
            Err(e) => {
                error!("cannot encode own peer record: {}", e);
                return;
            }
        };
        match self.registry.publish(&key, &value).await {
            Ok(()) => info!("published own peer record at {}", key),
            Err(e) => warn!("failed to publish own peer record: {}", e),
        }
    }

    /// Converging: poll the peer count until it holds calm for the
    /// configured window, bounded by the overall ceiling. Returns the last
    /// snapshot seen. Poll failures just burn one interval.
    async fn wait_for_settlement(&self) -> Result<Vec<RegistryEntry>> {
        let convergence = &self.config.convergence;
        let mut tracker = CalmTracker::new(convergence.poll_interval(), convergence.calm_window());
        let started = tokio::time::Instant::now();
        let mut snapshot = Vec::new();

        info!(
            "waiting up to {:?} for the registry to settle",
            convergence.max_wait()
        );
        loop {
            match self.registry.fetch_peers().await {
                Ok(entries) => {
                    let count = entries.len();
                    snapshot = entries;
                    if tracker.observe(count) {
                        info!("registry settled with {} peer record(s)", count);
                        return Ok(snapshot);
                    }
                }
                Err(e) => debug!("registry poll failed while converging: {}", e),
            }

            if started.elapsed() >= convergence.max_wait() {
                info!(
                    "convergence ceiling reached, proceeding with {} peer record(s)",
                    snapshot.len()
                );
                return Ok(snapshot);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Canceled),
                _ = tokio::time::sleep(convergence.poll_interval()) => {}
            }
        }
    }

    /// Write host files for every usable peer in the settled snapshot, then
    /// reconcile once. With zero usable peers the existing directives are
    /// left alone; an empty registry is indistinguishable from one we cannot
    /// see yet.
    async fn initial_sync(&self, snapshot: &[RegistryEntry]) {
        let mut synced = Vec::new();
        for entry in snapshot {
            let name = node_name_from_key(&entry.key);
            if name.is_empty() {
                warn!("skipping malformed registry key {:?}", entry.key);
                continue;
            }
            if name == self.config.node_name {
                continue;
            }
            let peer = match parse_record(&entry.value) {
                Ok(peer) => peer,
                Err(e) => {
                    warn!("undecodable record for {}: {}", name, e);
                    continue;
                }
            };
            if !peer.validate() {
                debug!("skipping incomplete record for {}: {}", name, peer);
                continue;
            }
            match self.mesh.sync_host_file(name, &peer).await {
                Ok(()) => synced.push(name.to_string()),
                Err(e) => warn!("initial host sync for {} failed: {}", name, e),
            }
        }

        if synced.is_empty() {
            info!("no usable peers in the registry yet, leaving connections untouched");
            return;
        }

        info!("initial sync wrote {} host file(s)", synced.len());
        match self.mesh.reconcile(&synced).await {
            Ok(outcome) => self.note_outcome(outcome, synced.len()),
            Err(e) => warn!("initial reconcile failed: {}", e),
        }
    }

    /// Steady: follow the watch stream until cancellation. Transient stream
    /// errors are counted and skipped; a stream that ends cleanly without us
    /// asking is fatal.
    async fn watch_events(&self) -> Result<()> {
        let (mut watcher, mut stream) = self.registry.watch_peers().await?;
        info!("watching {} for peer changes", PEER_PREFIX);

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = watcher.cancel().await;
                    return Err(Error::Canceled);
                }
                message = stream.message() => message,
            };

            let response = match message {
                Ok(Some(response)) => response,
                Ok(None) => {
                    return Err(Error::Registry("watch stream ended".to_string()));
                }
                Err(e) => {
                    self.metrics.inc_watch_error();
                    warn!("watch stream error: {}", e);
                    continue;
                }
            };

            if response.canceled() {
                self.metrics.inc_watch_error();
                warn!("watch canceled by the registry");
                continue;
            }

            for event in response.events() {
                match event.event_type() {
                    EventType::Put => self.handle_put(event).await,
                    EventType::Delete => self.handle_delete(event).await,
                }
            }
        }
    }

    /// One peer record written or updated. Sync its host file, then drive
    /// the directive set from a fresh snapshot. Exactly one sync outcome is
    /// recorded per event; our own record is skipped silently.
    async fn handle_put(&self, event: &Event) {
        let kv = match event.kv() {
            Some(kv) => kv,
            None => {
                self.metrics.record_peer_sync(false, SyncEvent::Put);
                warn!("put event without payload");
                return;
            }
        };
        let name = match kv.key_str() {
            Ok(key) => node_name_from_key(key).to_string(),
            Err(e) => {
                self.metrics.record_peer_sync(false, SyncEvent::Put);
                warn!("put event with non-utf8 key: {}", e);
                return;
            }
        };
        if name.is_empty() {
            self.metrics.record_peer_sync(false, SyncEvent::Put);
            warn!("put event with malformed key");
            return;
        }
        if name == self.config.node_name {
            return;
        }

        let peer = match parse_record(kv.value()) {
            Ok(peer) => peer,
            Err(e) => {
                self.metrics.record_peer_sync(false, SyncEvent::Put);
                warn!("undecodable record for {}: {}", name, e);
                return;
            }
        };
        if !peer.validate() {
            self.metrics.record_peer_sync(false, SyncEvent::Put);
            warn!("incomplete record for {}: {}", name, peer);
            return;
        }

        info!("peer update: {} ({})", name, peer);
        if let Err(e) = self.mesh.sync_host_file(&name, &peer).await {
            self.metrics.record_peer_sync(false, SyncEvent::Put);
            error!("host sync for {} failed: {}", name, e);
            return;
        }

        match self.reconcile_from_registry().await {
            Ok(_) => self.metrics.record_peer_sync(true, SyncEvent::Put),
            Err(e) => {
                self.metrics.record_peer_sync(false, SyncEvent::Put);
                error!("reconcile after update of {} failed: {}", name, e);
            }
        }
    }

    /// One peer record deleted. Drop its host file (best effort) and
    /// reconcile against what remains. Deletion of our own key is ignored;
    /// removing our own host file would destroy the local credential.
    async fn handle_delete(&self, event: &Event) {
        let kv = match event.kv() {
            Some(kv) => kv,
            None => {
                self.metrics.record_peer_sync(false, SyncEvent::Delete);
                warn!("delete event without payload");
                return;
            }
        };
        let name = match kv.key_str() {
            Ok(key) => node_name_from_key(key).to_string(),
            Err(e) => {
                self.metrics.record_peer_sync(false, SyncEvent::Delete);
                warn!("delete event with non-utf8 key: {}", e);
                return;
            }
        };
        if name.is_empty() {
            self.metrics.record_peer_sync(false, SyncEvent::Delete);
            warn!("delete event with malformed key");
            return;
        }
        if name == self.config.node_name {
            warn!("own record deleted from the registry");
            return;
        }

        info!("peer removed: {}", name);
        if let Err(e) = self.mesh.remove_host_file(&name).await {
            // stale host files are harmless once the directive is gone
            warn!("removing host file for {} failed: {}", name, e);
        }

        match self.reconcile_from_registry().await {
            Ok(_) => self.metrics.record_peer_sync(true, SyncEvent::Delete),
            Err(e) => {
                self.metrics.record_peer_sync(false, SyncEvent::Delete);
                error!("reconcile after removal of {} failed: {}", name, e);
            }
        }
    }

    /// Recompute the desired set from a fresh snapshot and converge to it.
    async fn reconcile_from_registry(&self) -> Result<ReconcileOutcome> {
        let desired = self.desired_peer_names().await?;
        let outcome = self.mesh.reconcile(&desired).await?;
        self.note_outcome(outcome, desired.len());
        Ok(outcome)
    }

    /// Names of every valid peer in the registry, excluding this node.
    async fn desired_peer_names(&self) -> Result<Vec<String>> {
        let entries = self.registry.fetch_peers().await?;
        let mut names = Vec::new();
        for entry in &entries {
            let name = node_name_from_key(&entry.key);
            if name.is_empty() || name == self.config.node_name {
                continue;
            }
            match parse_record(&entry.value) {
                Ok(peer) if peer.validate() => names.push(name.to_string()),
                Ok(_) => debug!("omitting incomplete peer {} from desired set", name),
                Err(e) => debug!("omitting undecodable peer {}: {}", name, e),
            }
        }
        Ok(names)
    }

    fn note_outcome(&self, outcome: ReconcileOutcome, desired_len: usize) {
        self.metrics
            .record_connection_ops(ConnectionOp::Add, outcome.reloaded, outcome.added);
        self.metrics
            .record_connection_ops(ConnectionOp::Remove, outcome.reloaded, outcome.removed);
        self.metrics.set_connections_active(desired_len);
    }
}

fn parse_record(value: &[u8]) -> Result<PeerRecord> {
    Ok(serde_json::from_slice(value)?)
}
