//! Meshsync Common Library
//!
//! Shared types, errors, and metrics for the Meshsync daemon.

pub mod error;
pub mod metrics;
pub mod peer;

// Re-export commonly used types
pub use error::{Error, Result};
pub use metrics::{ConnectionOp, Metrics, SyncEvent};
pub use peer::{
    decode_credential_best_effort, node_name_from_key, peer_key, PeerRecord, PEER_PREFIX,
};

/// Meshsync version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
