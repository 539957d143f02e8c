#![deny(warnings)]
#![deny(missing_docs)]
#![warn(clippy::all)]

//! Discovery broker for request servers.
//!
//! Servers register the address clients should dial and keep refreshing
//! it; clients ask for one live address and then talk to that server
//! directly. No payload ever passes through the registry.

mod memory;
mod record;

pub use memory::Registry;
pub use record::{Address, Liveness, ServerRecord, Token};

use async_trait::async_trait;

/// Registry errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// No server refreshed its registration within the liveness ttl.
    #[error("no live servers registered")]
    NoLiveServers,
    /// The token does not name a current registration.
    #[error("unknown registration token {0}")]
    UnknownToken(Token),
    /// The registry could not be reached.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    /// Malformed address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Service discovery as seen by servers and clients. Implemented by the
/// in-process [`Registry`] and by remote clients of it, so callers can be
/// pointed at another discovery system without changes.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Register `address`, or refresh it if it is already registered.
    async fn register(&self, address: Address) -> Result<Token, Error>;

    /// Remove the registration named by `token`.
    async fn deregister(&self, token: Token) -> Result<(), Error>;

    /// One live address.
    async fn resolve_one(&self) -> Result<Address, Error>;

    /// Every live address.
    async fn list(&self) -> Result<Vec<Address>, Error>;
}
