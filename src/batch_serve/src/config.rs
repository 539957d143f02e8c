//! Configuration for the server, registry and client binaries.
use crate::error::Error;
use registry::Address;
use std::{net::SocketAddr, time::Duration};

/// Parse a duration written as `<number><unit>`, unit one of `ns`, `us`,
/// `ms` or `s`, e.g. `20ms`.
pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    let invalid = || {
        Error::Config(format!(
            "can't parse {:?} as a duration, use value[s|ms|us|ns]",
            s
        ))
    };
    let (value, unit): (&str, fn(u64) -> Duration) = if let Some(v) = s.strip_suffix("ns") {
        (v, Duration::from_nanos)
    } else if let Some(v) = s.strip_suffix("us") {
        (v, Duration::from_micros)
    } else if let Some(v) = s.strip_suffix("ms") {
        (v, Duration::from_millis)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, Duration::from_secs)
    } else {
        return Err(invalid());
    };
    value.trim().parse().map(unit).map_err(|_| invalid())
}

/// Request server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address the gRPC server binds.
    pub listen: SocketAddr,
    /// Address registered for clients to dial.
    pub advertise: Address,
    /// Registry url, `None` runs the server unregistered.
    pub registry: Option<String>,
    /// Longest a caller waits for its result.
    pub request_timeout: Duration,
    /// Registration refresh period, well below the registry's liveness ttl.
    pub heartbeat_interval: Duration,
    /// Deadline for one call to the registry.
    pub registry_timeout: Duration,
    /// Batching limits.
    pub batching: orchestrator::Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            advertise: Address::new("127.0.0.1", 8080),
            registry: None,
            request_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(3),
            registry_timeout: Duration::from_secs(1),
            batching: orchestrator::Config::default(),
        }
    }
}

/// Registry settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Local address the gRPC server binds.
    pub listen: SocketAddr,
    /// Servers not refreshed within this window are no longer handed out.
    pub liveness_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 7070)),
            liveness_ttl: Duration::from_secs(10),
        }
    }
}

/// Client router settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// How long a resolved address is reused without asking the registry.
    pub cache_ttl: Duration,
    /// Attempts per call, first one included.
    pub max_attempts: usize,
    /// First retry delay, doubled per retry.
    pub backoff: Duration,
    /// Upper bound of the retry delay.
    pub max_backoff: Duration,
    /// Deadline for one direct send.
    pub send_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            cache_ttl: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            send_timeout: Duration::from_secs(2),
        }
    }
}
