use crate::Error;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

/// Externally reachable address of a request server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    /// host name or ip
    pub host: String,
    /// tcp port
    pub port: u16,
}

impl Address {
    /// Create an Address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Address {
            host: host.into(),
            port,
        }
    }

    /// `http://host:port`, the form gRPC clients dial.
    pub fn to_uri(&self) -> String {
        format!("http://{}", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(Error::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| Error::InvalidAddress(s.to_string()))?;
        Ok(Address::new(host, port))
    }
}

/// Handle to a registration, returned by `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a record may still be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// refreshed within the ttl
    Live,
    /// not refreshed within the ttl
    Stale,
}

/// One registered server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRecord {
    /// registration token
    pub token: Token,
    /// where clients reach the server
    pub address: Address,
    /// first registration
    pub registered_at: Instant,
    /// last registration or refresh
    pub refreshed_at: Instant,
}

impl ServerRecord {
    pub(crate) fn new(token: Token, address: Address, now: Instant) -> Self {
        ServerRecord {
            token,
            address,
            registered_at: now,
            refreshed_at: now,
        }
    }

    /// A record is stale once `ttl` has passed without a refresh.
    pub fn liveness(&self, now: Instant, ttl: Duration) -> Liveness {
        if now.saturating_duration_since(self.refreshed_at) >= ttl {
            Liveness::Stale
        } else {
            Liveness::Live
        }
    }
}
