//! Errors surfaced to callers of the request server and the client router.
use registry::Address;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Every failure a client call can end with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The inference engine failed the batch the request ran in.
    #[error("inference engine failed: {0}")]
    Adapter(String),
    /// The caller stopped waiting after `request_timeout`.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The discovery broker could not be reached.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),
    /// The discovery broker knows no live server.
    #[error("no live servers registered")]
    NoLiveServers,
    /// A resolved server did not answer.
    #[error("server {0} unreachable: {1}")]
    Unreachable(Address, String),
    /// The payload or a request field was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The server is shutting down.
    #[error("server is shutting down")]
    Shutdown,
    /// Bad configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Machine-checkable error kind, as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// see [`Error::Adapter`]
    Adapter,
    /// see [`Error::Timeout`]
    Timeout,
    /// see [`Error::RegistryUnavailable`]
    RegistryUnavailable,
    /// see [`Error::NoLiveServers`]
    NoLiveServers,
    /// see [`Error::Unreachable`]
    Unreachable,
    /// see [`Error::InvalidRequest`]
    InvalidRequest,
    /// see [`Error::Shutdown`]
    Shutdown,
    /// see [`Error::Config`]
    Config,
}

impl ErrorKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Adapter => "adapter",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RegistryUnavailable => "registry_unavailable",
            ErrorKind::NoLiveServers => "no_live_servers",
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Shutdown => "shutdown",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "adapter" => ErrorKind::Adapter,
            "timeout" => ErrorKind::Timeout,
            "registry_unavailable" => ErrorKind::RegistryUnavailable,
            "no_live_servers" => ErrorKind::NoLiveServers,
            "unreachable" => ErrorKind::Unreachable,
            "invalid_request" => ErrorKind::InvalidRequest,
            "shutdown" => ErrorKind::Shutdown,
            "config" => ErrorKind::Config,
            other => {
                return Err(Error::InvalidRequest(format!(
                    "unknown error kind {:?}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// error kind
    pub kind: ErrorKind,
    /// human readable message
    pub message: String,
}

impl Error {
    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Adapter(_) => ErrorKind::Adapter,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::RegistryUnavailable(_) => ErrorKind::RegistryUnavailable,
            Error::NoLiveServers => ErrorKind::NoLiveServers,
            Error::Unreachable(..) => ErrorKind::Unreachable,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Shutdown => ErrorKind::Shutdown,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// JSON error body for this error
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// Message without the kind prefix, sent on the wire next to the kind.
    pub fn detail(&self) -> String {
        match self {
            Error::Adapter(m)
            | Error::Timeout(m)
            | Error::RegistryUnavailable(m)
            | Error::Unreachable(_, m)
            | Error::InvalidRequest(m)
            | Error::Config(m) => m.clone(),
            Error::NoLiveServers | Error::Shutdown => self.to_string(),
        }
    }

    /// Rebuild an error reported by a remote server from its kind and detail.
    pub fn from_remote(address: &Address, kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Adapter => Error::Adapter(message),
            ErrorKind::Timeout => Error::Timeout(message),
            ErrorKind::RegistryUnavailable => Error::RegistryUnavailable(message),
            ErrorKind::NoLiveServers => Error::NoLiveServers,
            ErrorKind::Unreachable => Error::Unreachable(address.clone(), message),
            ErrorKind::InvalidRequest => Error::InvalidRequest(message),
            ErrorKind::Shutdown => Error::Shutdown,
            ErrorKind::Config => Error::Config(message),
        }
    }

    /// Whether the client router may try again: the server went away or
    /// the registry did not answer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Unreachable(..) | Error::Shutdown | Error::RegistryUnavailable(_)
        )
    }

    /// Whether the cached server address must be dropped.
    pub fn invalidates_address(&self) -> bool {
        matches!(self, Error::Unreachable(..) | Error::Shutdown)
    }
}

impl From<orchestrator::Error> for Error {
    fn from(e: orchestrator::Error) -> Self {
        match e {
            orchestrator::Error::Adapter(message) => Error::Adapter(message),
            orchestrator::Error::Shutdown | orchestrator::Error::Dropped => Error::Shutdown,
            orchestrator::Error::InvalidConfig(message) => Error::Config(message),
            orchestrator::Error::Spawn(message) => Error::Config(message),
        }
    }
}

impl From<registry::Error> for Error {
    fn from(e: registry::Error) -> Self {
        match e {
            registry::Error::NoLiveServers => Error::NoLiveServers,
            registry::Error::Unavailable(message) => Error::RegistryUnavailable(message),
            registry::Error::UnknownToken(token) => {
                Error::InvalidRequest(format!("unknown registration token {}", token))
            }
            registry::Error::InvalidAddress(address) => Error::Config(address),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        let kinds = [
            ErrorKind::Adapter,
            ErrorKind::Timeout,
            ErrorKind::RegistryUnavailable,
            ErrorKind::NoLiveServers,
            ErrorKind::Unreachable,
            ErrorKind::InvalidRequest,
            ErrorKind::Shutdown,
            ErrorKind::Config,
        ];
        for kind in &kinds {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), *kind);
            // serde and the wire agree on names
            assert_eq!(
                serde_json::to_string(kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
        assert!("bogus".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_payload_json() {
        let payload = Error::Adapter("out of memory".to_string()).payload();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "adapter");
        assert_eq!(json["message"], "inference engine failed: out of memory");
    }

    #[test]
    fn test_retry_classes() {
        let address = Address::new("h", 1);
        assert!(Error::Unreachable(address.clone(), "refused".into()).invalidates_address());
        assert!(Error::RegistryUnavailable("down".into()).is_retryable());
        assert!(!Error::RegistryUnavailable("down".into()).invalidates_address());
        assert!(!Error::NoLiveServers.is_retryable());
        assert!(!Error::Adapter("x".into()).is_retryable());
        assert!(!Error::Timeout("1s".into()).is_retryable());
        assert_eq!(
            Error::from_remote(&address, ErrorKind::Adapter, "bad".into()),
            Error::Adapter("bad".into())
        );
    }
}
