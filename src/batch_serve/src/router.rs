//! Client side of the two step lookup: resolve a server through the
//! registry once, then send every call straight to it.
use crate::{config::RouterConfig, error::Error};
use async_trait::async_trait;
use engine::Output;
use parking_lot::Mutex;
use registry::{Address, Discovery};
use std::time::Instant;

/// Direct transport from client to request server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Send one payload to `address`. Transport failures must be reported
    /// as [`Error::Unreachable`].
    async fn send(&self, address: &Address, payload: &[u8]) -> Result<Output, Error>;
}

struct Cached {
    address: Address,
    resolved_at: Instant,
}

/// Routes calls to one server at a time, re-resolving when the cached
/// address is too old or stops answering.
pub struct Router<D, C> {
    discovery: D,
    connector: C,
    config: RouterConfig,
    cached: Mutex<Option<Cached>>,
}

impl<D, C> Router<D, C>
where
    D: Discovery,
    C: Connector,
{
    /// Create a Router
    pub fn new(discovery: D, connector: C, config: RouterConfig) -> Self {
        Router {
            discovery,
            connector,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Send one payload, retrying a bounded number of times.
    ///
    /// Each direct send is bounded by `send_timeout`; one that runs over
    /// counts as an unreachable server.
    /// An unreachable server drops the cached address, so the next attempt
    /// resolves a fresh one. `NoLiveServers` and errors reported by the
    /// server itself are returned without retrying.
    pub async fn infer(&self, payload: &[u8]) -> Result<Output, Error> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.backoff;
        let mut attempt = 1;
        loop {
            let error = match self.try_once(payload).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < max_attempts => e,
                Err(e) => return Err(e),
            };
            log::warn!(
                "Attempt {}/{} failed: {}, retrying in {:?}",
                attempt,
                max_attempts,
                error,
                backoff
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
            attempt += 1;
        }
    }

    async fn try_once(&self, payload: &[u8]) -> Result<Output, Error> {
        let address = self.address().await?;
        let send = self.connector.send(&address, payload);
        let result = match tokio::time::timeout(self.config.send_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(Error::Unreachable(
                address.clone(),
                format!("no answer within {:?}", self.config.send_timeout),
            )),
        };
        if let Err(e) = &result {
            if e.invalidates_address() {
                log::debug!("Dropping cached address {}: {}", address, e);
                self.invalidate();
            }
        }
        result
    }

    /// Cached address if still fresh, otherwise one resolved from the registry.
    pub async fn address(&self) -> Result<Address, Error> {
        if let Some(address) = self.cached_address() {
            return Ok(address);
        }
        let address = self.discovery.resolve_one().await?;
        log::debug!("Resolved server {}", address);
        *self.cached.lock() = Some(Cached {
            address: address.clone(),
            resolved_at: Instant::now(),
        });
        Ok(address)
    }

    /// Cached address, if still fresh.
    pub fn cached_address(&self) -> Option<Address> {
        let cached = self.cached.lock();
        cached
            .as_ref()
            .filter(|c| c.resolved_at.elapsed() < self.config.cache_ttl)
            .map(|c| c.address.clone())
    }

    /// Forget the cached address.
    pub fn invalidate(&self) {
        self.cached.lock().take();
    }
}
