use crate::{Address, Discovery, Error, Liveness, ServerRecord, Token};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

/// In-memory registry. Cheap to clone, clones share state.
///
/// Stale records are dropped lazily by whichever call sees them first, so
/// nothing older than the liveness ttl is ever listed or resolved.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
    liveness_ttl: Duration,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<Token, ServerRecord>,
    tokens: HashMap<Address, Token>,
    next_token: u64,
    cursor: usize,
}

impl Inner {
    fn prune(&mut self, now: Instant, ttl: Duration) {
        let stale: Vec<Token> = self
            .records
            .values()
            .filter(|record| record.liveness(now, ttl) == Liveness::Stale)
            .map(|record| record.token)
            .collect();
        for token in stale {
            if let Some(record) = self.records.remove(&token) {
                log::info!("Server {} {} expired", record.address, token);
                self.tokens.remove(&record.address);
            }
        }
    }
}

impl Registry {
    /// Create a registry expiring servers that do not refresh within `liveness_ttl`.
    pub fn new(liveness_ttl: Duration) -> Self {
        Registry {
            inner: Arc::new(Mutex::new(Inner::default())),
            liveness_ttl,
        }
    }

    /// Liveness ttl
    pub fn liveness_ttl(&self) -> Duration {
        self.liveness_ttl
    }

    /// Register `address`. Registering a live address again refreshes it
    /// and returns the same token.
    pub fn register(&self, address: Address) -> Token {
        self.register_at(address, Instant::now())
    }

    fn register_at(&self, address: Address, now: Instant) -> Token {
        let mut inner = self.inner.lock();
        inner.prune(now, self.liveness_ttl);
        if let Some(&token) = inner.tokens.get(&address) {
            if let Some(record) = inner.records.get_mut(&token) {
                record.refreshed_at = now;
                return token;
            }
        }
        let token = Token(inner.next_token);
        inner.next_token += 1;
        log::info!("Server {} registered as {}", address, token);
        inner.tokens.insert(address.clone(), token);
        inner
            .records
            .insert(token, ServerRecord::new(token, address, now));
        token
    }

    /// Remove a registration immediately.
    pub fn deregister(&self, token: Token) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let record = inner
            .records
            .remove(&token)
            .ok_or(Error::UnknownToken(token))?;
        inner.tokens.remove(&record.address);
        log::info!("Server {} {} deregistered", record.address, token);
        Ok(())
    }

    /// Live addresses, in registration order.
    pub fn list(&self) -> Vec<Address> {
        self.list_at(Instant::now())
    }

    fn list_at(&self, now: Instant) -> Vec<Address> {
        let mut inner = self.inner.lock();
        inner.prune(now, self.liveness_ttl);
        inner
            .records
            .values()
            .map(|record| record.address.clone())
            .collect()
    }

    /// One live address, round robin over the live set.
    pub fn resolve_one(&self) -> Result<Address, Error> {
        self.resolve_one_at(Instant::now())
    }

    fn resolve_one_at(&self, now: Instant) -> Result<Address, Error> {
        let mut inner = self.inner.lock();
        inner.prune(now, self.liveness_ttl);
        let live = inner.records.len();
        if live == 0 {
            return Err(Error::NoLiveServers);
        }
        let index = inner.cursor % live;
        inner.cursor = inner.cursor.wrapping_add(1);
        inner
            .records
            .values()
            .nth(index)
            .map(|record| record.address.clone())
            .ok_or(Error::NoLiveServers)
    }

    /// Snapshot of the live records.
    pub fn records(&self) -> Vec<ServerRecord> {
        let mut inner = self.inner.lock();
        inner.prune(Instant::now(), self.liveness_ttl);
        inner.records.values().cloned().collect()
    }
}

#[async_trait]
impl Discovery for Registry {
    async fn register(&self, address: Address) -> Result<Token, Error> {
        Ok(Registry::register(self, address))
    }

    async fn deregister(&self, token: Token) -> Result<(), Error> {
        Registry::deregister(self, token)
    }

    async fn resolve_one(&self) -> Result<Address, Error> {
        Registry::resolve_one(self)
    }

    async fn list(&self) -> Result<Vec<Address>, Error> {
        Ok(Registry::list(self))
    }
}
