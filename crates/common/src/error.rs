//! Error types for Meshsync

use thiserror::Error;

/// Result type alias using Meshsync Error
pub type Result<T> = std::result::Result<T, Error>;

/// Meshsync error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Discovery query did not terminate")]
    DiscoveryTimeout,

    #[error("Invalid peer record: {0}")]
    InvalidPeer(String),

    #[error("Host file error: {0}")]
    HostFile(String),

    #[error("Config file not found: {}", .0.display())]
    ConfigMissing(std::path::PathBuf),

    #[error("Reload failed: {0}")]
    Reload(String),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Operation canceled")]
    Canceled,
}
