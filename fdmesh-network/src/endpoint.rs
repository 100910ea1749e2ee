//! Peer endpoint identity.
//!
//! An [`Endpoint`] identifies a peer by `(host, port)`. Endpoints are totally
//! ordered lexicographically on `(host, port)`, which is what the consensus
//! engine relies on to compute a deterministic coordinator for a round
//! (`sortAsc(self ∪ neighbors)[r mod N]`).

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A peer identified by host and port, ordered lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Best-effort conversion to a [`SocketAddr`] for actual socket I/O.
    /// `host` is expected to already be an IP literal; DNS resolution is out
    /// of scope for this framework (spec.md §6 defines addresses as `host:port`
    /// literals passed on the command line).
    pub fn to_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid endpoint {}: {}", self, e))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("endpoint '{}' is not in host:port form", s))?;
        let port: u16 = port
            .parse()
            .map_err(|_| anyhow::anyhow!("endpoint '{}' has an invalid port", s))?;
        Ok(Endpoint::new(host, port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::new(addr.ip().to_string(), addr.port())
    }
}
