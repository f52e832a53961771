//! Peer records as stored in the coordination registry.
//!
//! A peer record is the JSON value stored under `/peers/<node>`; the daemon
//! both publishes its own record and consumes everyone else's. Records can
//! arrive partial or malformed, so decoding is lenient and validity is an
//! explicit check rather than a type guarantee.

use std::fmt;
use std::net::IpAddr;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// Registry key prefix under which peer records live.
pub const PEER_PREFIX: &str = "/peers/";

/// A node's self-description in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Mesh-internal address of the node, if it published one.
    #[serde(default)]
    pub address: Option<IpAddr>,
    /// VPN credential (host public key), raw or base64-encoded. May be empty.
    #[serde(default)]
    pub credential: String,
    /// Reachable underlay endpoint, `host` or `host:port`.
    #[serde(default)]
    pub endpoint: String,
}

impl PeerRecord {
    /// A record is usable only when it carries an address and an endpoint.
    /// An empty credential is allowed; some deployments distribute keys out
    /// of band.
    pub fn validate(&self) -> bool {
        self.address.is_some() && !self.endpoint.is_empty()
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = match &self.address {
            Some(ip) => ip.to_string(),
            None => "none".to_string(),
        };
        write!(
            f,
            "address={} endpoint={} credential={}",
            address,
            self.endpoint,
            redact(&self.credential)
        )
    }
}

/// Truncate a credential for log output. Anything longer than 20 characters
/// is cut to its first 20 followed by an ellipsis.
fn redact(credential: &str) -> String {
    if credential.chars().count() > 20 {
        let head: String = credential.chars().take(20).collect();
        format!("{}...", head)
    } else {
        credential.to_string()
    }
}

/// Registry key for a node's peer record.
pub fn peer_key(node_name: &str) -> String {
    format!("{}{}", PEER_PREFIX, node_name)
}

/// Node name encoded in a registry key: the last `/`-separated segment.
/// Malformed keys (empty, or ending in `/`) yield an empty name, which
/// callers treat as an invalid event.
pub fn node_name_from_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or_default()
}

/// Decode a credential that may or may not be base64. A successful decode to
/// valid UTF-8 wins; anything else returns the input verbatim, since keys
/// are also distributed as plain text.
pub fn decode_credential_best_effort(raw: &str) -> String {
    match STANDARD.decode(raw.as_bytes()) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: Option<&str>, credential: &str, endpoint: &str) -> PeerRecord {
        PeerRecord {
            address: address.map(|a| a.parse().unwrap()),
            credential: credential.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    #[test]
    fn test_validate_requires_address_and_endpoint() {
        assert!(record(Some("10.0.0.1"), "key", "1.2.3.4:655").validate());
        assert!(!record(None, "key", "1.2.3.4:655").validate());
        assert!(!record(Some("10.0.0.1"), "key", "").validate());
        assert!(!record(None, "", "").validate());
    }

    #[test]
    fn test_validate_allows_empty_credential() {
        assert!(record(Some("10.0.0.1"), "", "1.2.3.4:655").validate());
    }

    #[test]
    fn test_display_truncates_long_credential() {
        let long: String = "x".repeat(21);
        let peer = record(Some("10.0.0.1"), &long, "host:655");
        let rendered = peer.to_string();
        assert!(rendered.contains(&format!("credential={}...", "x".repeat(20))));
        assert!(!rendered.contains(&long));
    }

    #[test]
    fn test_display_keeps_short_credential() {
        let exact: String = "y".repeat(20);
        let peer = record(Some("10.0.0.1"), &exact, "host:655");
        let rendered = peer.to_string();
        assert!(rendered.ends_with(&format!("credential={}", exact)));
        assert!(!rendered.contains("..."));
    }

    #[test]
    fn test_display_without_address() {
        let peer = record(None, "k", "host:655");
        assert!(peer.to_string().contains("address=none"));
    }

    #[test]
    fn test_partial_json_decodes_with_defaults() {
        let peer: PeerRecord = serde_json::from_str(r#"{"endpoint":"host:655"}"#).unwrap();
        assert_eq!(peer.address, None);
        assert_eq!(peer.credential, "");
        assert_eq!(peer.endpoint, "host:655");
        assert!(!peer.validate());
    }

    #[test]
    fn test_unparseable_address_fails_decoding() {
        let result: std::result::Result<PeerRecord, _> =
            serde_json::from_str(r#"{"address":"not-an-ip","endpoint":"host:655"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_peer_key_roundtrip() {
        let key = peer_key("node3");
        assert_eq!(key, "/peers/node3");
        assert_eq!(node_name_from_key(&key), "node3");
    }

    #[test]
    fn test_node_name_from_malformed_keys() {
        assert_eq!(node_name_from_key(""), "");
        assert_eq!(node_name_from_key("/peers/"), "");
        assert_eq!(node_name_from_key("no-slashes"), "no-slashes");
        assert_eq!(node_name_from_key("/a/b/c"), "c");
    }

    #[test]
    fn test_decode_credential_base64() {
        let encoded = STANDARD.encode("-----BEGIN KEY-----");
        assert_eq!(decode_credential_best_effort(&encoded), "-----BEGIN KEY-----");
    }

    #[test]
    fn test_decode_credential_falls_back_on_invalid_base64() {
        assert_eq!(
            decode_credential_best_effort("not!!valid##base64"),
            "not!!valid##base64"
        );
    }

    #[test]
    fn test_decode_credential_falls_back_on_non_utf8() {
        let encoded = STANDARD.encode([0xff, 0xfe, 0x00, 0x01]);
        assert_eq!(decode_credential_best_effort(&encoded), encoded);
    }
}
