//! Peer addressing.
//!
//! A [`PeerAddr`] is the canonical identity of a peer: a `host:port` pair.
//! Malformed address strings are a configuration error and are rejected at
//! parse time, not at connect time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MeshError;

/// An immutable `host:port` peer identifier.
///
/// Equality, hashing, and ordering all follow the canonical string form,
/// so a `PeerAddr` can key the connection map and the desired-peer set.
///
/// # Example
///
/// ```
/// use meshrpc_common::PeerAddr;
///
/// let addr: PeerAddr = "127.0.0.1:9001".parse().unwrap();
/// assert_eq!(addr.host(), "127.0.0.1");
/// assert_eq!(addr.port(), 9001);
/// assert_eq!(addr.to_string(), "127.0.0.1:9001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr {
    host: String,
    port: u16,
}

impl PeerAddr {
    /// Creates an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The host component (name or IP literal).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port component.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for PeerAddr {
    type Err = MeshError;

    /// Parses `"host:port"`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidAddress`] unless the input is exactly one
    /// `:`-delimited pair with a non-empty host and a valid 16-bit port.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(2, ':');
        let port_str = parts.next().unwrap_or_default();
        let host = match parts.next() {
            Some(h) if !h.is_empty() => h,
            _ => {
                return Err(MeshError::InvalidAddress(format!(
                    "'{s}' is not a host:port pair"
                )))
            }
        };
        if host.contains(':') {
            return Err(MeshError::InvalidAddress(format!(
                "'{s}' contains more than one ':' separator"
            )));
        }
        let port: u16 = port_str.parse().map_err(|_| {
            MeshError::InvalidAddress(format!("'{port_str}' is not a valid port"))
        })?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<std::net::SocketAddr> for PeerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

// Serialized as the canonical "host:port" string so peer lists in
// configuration files deserialize directly into Vec<PeerAddr>.
impl Serialize for PeerAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let addr: PeerAddr = "localhost:9001".parse().unwrap();
        assert_eq!(addr.host(), "localhost");
        assert_eq!(addr.port(), 9001);
    }

    #[test]
    fn test_display_is_canonical() {
        let addr = PeerAddr::new("10.0.0.1", 4000);
        assert_eq!(addr.to_string(), "10.0.0.1:4000");
        let reparsed: PeerAddr = addr.to_string().parse().unwrap();
        assert_eq!(addr, reparsed);
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        assert!("localhost".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_parse_rejects_empty_host() {
        assert!(":9001".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_parse_rejects_extra_separator() {
        assert!("a:b:9001".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_parse_rejects_port_out_of_range() {
        assert!("localhost:65536".parse::<PeerAddr>().is_err());
        assert!("localhost:-1".parse::<PeerAddr>().is_err());
        assert!("localhost:port".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_equality_and_hash_follow_canonical_form() {
        use std::collections::HashSet;

        let a = PeerAddr::new("node1", 9001);
        let b: PeerAddr = "node1:9001".parse().unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_serde_round_trip_as_string() {
        let addr = PeerAddr::new("node1", 9001);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"node1:9001\"");
        let back: PeerAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    fn test_from_socket_addr() {
        let sock: std::net::SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let addr = PeerAddr::from(sock);
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }
}
