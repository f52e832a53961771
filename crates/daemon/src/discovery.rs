//! Local peer discovery over mDNS-SD
//!
//! Nodes advertise themselves as `_mesh-node._tcp` instances and browse for
//! each other on the local segment. Discovery is advisory: it feeds logs and
//! the discovered-peers gauge, and a background monitor nudges the control
//! loop when the local set changes. The registry stays the source of truth
//! for topology.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use meshsync_common::{Error, PeerRecord, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// mDNS service type for mesh nodes.
pub const SERVICE_TYPE: &str = "_mesh-node._tcp.local.";

/// TXT property carrying the credential fingerprint.
const KEY_PROPERTY: &str = "key";

/// How long to wait for the browse to acknowledge a stop request.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Handle to the mDNS daemon.
#[derive(Clone)]
pub struct Discovery {
    daemon: ServiceDaemon,
}

/// A registered advertisement. Call [`Advertisement::shutdown`] at teardown
/// to withdraw it; there is no implicit unregister on drop.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Discovery {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(Self { daemon })
    }

    /// One bounded discovery pass. Collects every instance resolved before
    /// `timeout`, then stops the browse and drains until the daemon confirms.
    /// An empty result is not an error; silence just means no peers answered
    /// in time.
    pub async fn discover_peers(&self, timeout: Duration) -> Result<Vec<PeerRecord>> {
        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| Error::Discovery(e.to_string()))?;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut peers: Vec<PeerRecord> = Vec::new();
        let mut stopping = false;
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    if stopping {
                        // The daemon never confirmed the stop request.
                        return Err(Error::DiscoveryTimeout);
                    }
                    self.daemon
                        .stop_browse(SERVICE_TYPE)
                        .map_err(|e| Error::Discovery(e.to_string()))?;
                    stopping = true;
                    deadline.as_mut().reset(tokio::time::Instant::now() + STOP_GRACE);
                }
                event = receiver.recv_async() => {
                    match event {
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            if let Some(peer) = peer_from_service(&info) {
                                debug!("resolved mesh node: {}", peer);
                                // re-resolutions of the same instance update in place
                                if let Some(existing) =
                                    peers.iter_mut().find(|p| p.endpoint == peer.endpoint)
                                {
                                    *existing = peer;
                                } else {
                                    peers.push(peer);
                                }
                            }
                        }
                        Ok(ServiceEvent::SearchStopped(_)) => return Ok(peers),
                        Ok(_) => {}
                        // Channel closed means the daemon went away; return
                        // whatever was collected.
                        Err(_) => return Ok(peers),
                    }
                }
            }
        }
    }

    /// Register this node's own service instance.
    pub fn advertise(
        &self,
        node_name: &str,
        port: u16,
        fingerprint: &str,
    ) -> Result<Advertisement> {
        if port == 0 {
            return Err(Error::Discovery("missing service port".to_string()));
        }

        let host = format!("{}.local.", node_name);
        let properties = [(KEY_PROPERTY, fingerprint), ("version", "1.0")];
        let info = ServiceInfo::new(SERVICE_TYPE, node_name, &host, (), port, &properties[..])
            .map_err(|e| Error::Discovery(e.to_string()))?
            .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .map_err(|e| Error::Discovery(e.to_string()))?;
        info!("advertising {} on port {}", fullname, port);

        Ok(Advertisement {
            daemon: self.daemon.clone(),
            fullname,
        })
    }

    /// Periodic re-discovery. Invokes `on_change` only when the peer set
    /// actually changed; per-pass failures are logged and skipped so a noisy
    /// segment cannot take the monitor down.
    pub async fn monitor<F>(
        &self,
        interval: Duration,
        query_timeout: Duration,
        cancel: CancellationToken,
        mut on_change: F,
    ) where
        F: FnMut(&[PeerRecord]),
    {
        let mut known: Vec<PeerRecord> = Vec::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let peers = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.discover_peers(query_timeout) => match result {
                    Ok(peers) => peers,
                    Err(e) => {
                        debug!("discovery pass failed: {}", e);
                        continue;
                    }
                }
            };

            if !discovery_set_equal(&known, &peers) {
                info!("local peer set changed: {} node(s) visible", peers.len());
                on_change(&peers);
                known = peers;
            }
        }
    }

    /// Stop the mDNS daemon. Best effort at teardown.
    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!("mdns daemon shutdown: {}", e);
        }
    }
}

impl Advertisement {
    /// Withdraw the advertisement and wait for the daemon to confirm.
    pub async fn shutdown(self) {
        match self.daemon.unregister(&self.fullname) {
            Ok(receiver) => {
                let _ = receiver.recv_async().await;
            }
            Err(e) => warn!("failed to unregister {}: {}", self.fullname, e),
        }
    }
}

/// Build a peer record from a resolved service. IPv4 addresses win when the
/// instance advertises both families; instances with no usable address are
/// dropped.
fn peer_from_service(info: &ServiceInfo) -> Option<PeerRecord> {
    let addresses = info.get_addresses();
    let address = addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()?;

    let endpoint = match address {
        IpAddr::V4(v4) => format!("{}:{}", v4, info.get_port()),
        IpAddr::V6(v6) => format!("[{}]:{}", v6, info.get_port()),
    };
    let credential = info
        .get_property_val_str(KEY_PROPERTY)
        .unwrap_or_default()
        .to_string();

    Some(PeerRecord {
        address: Some(address),
        credential,
        endpoint,
    })
}

/// Two discovery results are the same set when they have equal size and
/// every endpoint of one appears in the other. Credentials and addresses are
/// ignored; endpoint identity is what the mesh dials.
pub fn discovery_set_equal(a: &[PeerRecord], b: &[PeerRecord]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let endpoints: HashSet<&str> = b.iter().map(|p| p.endpoint.as_str()).collect();
    a.iter().all(|p| endpoints.contains(p.endpoint.as_str()))
}
