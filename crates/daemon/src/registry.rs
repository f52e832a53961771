//! Coordination registry client
//!
//! Thin wrapper around the etcd client scoped to the `/peers/` keyspace.
//! Reads and writes carry short deadlines so a slow registry degrades into
//! retryable timeouts instead of wedging the control loop; the watch stream
//! has no deadline and lives for the life of the daemon.

use std::time::Duration;

use etcd_client::{Client, ConnectOptions, GetOptions, WatchOptions, WatchStream, Watcher};
use meshsync_common::{Error, Result, PEER_PREFIX};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const GET_TIMEOUT_SECS: u64 = 3;
const PUT_TIMEOUT_SECS: u64 = 5;

/// One key/value pair from the peer keyspace.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Handle to the coordination registry.
#[derive(Clone)]
pub struct Registry {
    client: Client,
}

impl Registry {
    /// Dial the registry. A node that cannot reach the registry at startup
    /// cannot do its job, so callers treat this failing as fatal.
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let options = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(|e| Error::Registry(e.to_string()))?;
        Ok(Self { client })
    }

    /// Snapshot every record under the peer prefix, in store order.
    pub async fn fetch_peers(&self) -> Result<Vec<RegistryEntry>> {
        let mut client = self.client.clone();
        let response = tokio::time::timeout(
            Duration::from_secs(GET_TIMEOUT_SECS),
            client.get(PEER_PREFIX, Some(GetOptions::new().with_prefix())),
        )
        .await
        .map_err(|_| Error::Timeout {
            seconds: GET_TIMEOUT_SECS,
        })?
        .map_err(|e| Error::Registry(e.to_string()))?;

        let mut entries = Vec::with_capacity(response.kvs().len());
        for kv in response.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| Error::Registry(e.to_string()))?
                .to_string();
            entries.push(RegistryEntry {
                key,
                value: kv.value().to_vec(),
            });
        }
        Ok(entries)
    }

    /// Write one record. Callers log failures; a missed publish only delays
    /// this node's visibility to others.
    pub async fn publish(&self, key: &str, value: &str) -> Result<()> {
        let mut client = self.client.clone();
        tokio::time::timeout(
            Duration::from_secs(PUT_TIMEOUT_SECS),
            client.put(key, value, None),
        )
        .await
        .map_err(|_| Error::Timeout {
            seconds: PUT_TIMEOUT_SECS,
        })?
        .map_err(|e| Error::Registry(e.to_string()))?;
        Ok(())
    }

    /// Open a watch over the peer prefix starting from the current revision.
    pub async fn watch_peers(&self) -> Result<(Watcher, WatchStream)> {
        let mut client = self.client.clone();
        client
            .watch(PEER_PREFIX, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| Error::Registry(e.to_string()))
    }
}
