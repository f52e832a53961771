//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Name this node registers and advertises under
    pub node_name: String,

    /// VPN network name (directory under `conf_dir`)
    pub net_name: String,

    /// Coordination registry endpoints
    pub registry_endpoints: Vec<String>,

    /// Metrics/health listen address
    pub metrics_listen: String,

    /// Root of the VPN daemon's configuration tree
    pub conf_dir: PathBuf,

    /// Shared config file name inside the network directory
    pub conf_file: String,

    /// Port peers dial for VPN traffic
    pub vpn_port: u16,

    /// Process name of the external VPN daemon, used for reload signalling
    pub vpn_process: String,

    /// Mesh-internal address published in this node's peer record
    pub node_address: Option<IpAddr>,

    /// Underlay endpoint published in this node's peer record
    pub node_endpoint: Option<String>,

    /// Local discovery configuration
    pub discovery: DiscoveryConfig,

    /// Startup convergence configuration
    pub convergence: ConvergenceConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_name: "node1".to_string(),
            net_name: "mesh0".to_string(),
            registry_endpoints: vec!["localhost:2379".to_string()],
            metrics_listen: "0.0.0.0:2112".to_string(),
            conf_dir: PathBuf::from("/var/run/tinc"),
            conf_file: "tinc.conf".to_string(),
            vpn_port: 655,
            vpn_process: "tincd".to_string(),
            node_address: None,
            node_endpoint: None,
            discovery: DiscoveryConfig::default(),
            convergence: ConvergenceConfig::default(),
        }
    }
}

/// Local discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Seconds between background discovery passes
    pub interval_secs: u64,

    /// Seconds one discovery query is allowed to run
    pub query_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            query_timeout_secs: 5,
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

/// Startup convergence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Milliseconds between registry polls while waiting for calm
    pub poll_interval_ms: u64,

    /// Milliseconds the peer count must hold steady before settling
    pub calm_window_ms: u64,

    /// Milliseconds after which convergence proceeds regardless
    pub max_wait_ms: u64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            calm_window_ms: 2000,
            max_wait_ms: 10000,
        }
    }
}

impl ConvergenceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn calm_window(&self) -> Duration {
        Duration::from_millis(self.calm_window_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl DaemonConfig {
    /// Load configuration from file, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.net_name, "mesh0");
        assert_eq!(config.vpn_port, 655);
        assert_eq!(config.vpn_process, "tincd");
        assert_eq!(config.convergence.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.convergence.calm_window(), Duration::from_secs(2));
        assert_eq!(config.convergence.max_wait(), Duration::from_secs(10));
        assert!(config.node_address.is_none());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let config = DaemonConfig::load(std::path::Path::new("/nonexistent/meshsync.toml")).unwrap();
        assert_eq!(config.node_name, "node1");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
node_name = "edge7"
node_address = "10.1.0.7"

[convergence]
calm_window_ms = 4000
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.node_name, "edge7");
        assert_eq!(config.node_address, Some("10.1.0.7".parse().unwrap()));
        assert_eq!(config.convergence.calm_window(), Duration::from_secs(4));
        // untouched sections keep their defaults
        assert_eq!(config.net_name, "mesh0");
        assert_eq!(config.convergence.poll_interval_ms, 500);
    }
}
