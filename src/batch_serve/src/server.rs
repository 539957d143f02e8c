//! Request server: one call in, one result or typed error out.
use crate::error::Error;
use engine::Output;
use orchestrator::Handle;
use registry::{Address, Discovery, Token};
use std::time::Duration;
use tokio::sync::oneshot;

/// Terminates inference calls on top of the batching scheduler.
#[derive(Clone)]
pub struct RequestServer {
    handle: Handle,
    request_timeout: Duration,
}

impl RequestServer {
    /// Create a RequestServer
    pub fn new(handle: Handle, request_timeout: Duration) -> Self {
        RequestServer {
            handle,
            request_timeout,
        }
    }

    /// Scheduler handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Submit `payload` and wait for its result, at most `request_timeout`.
    ///
    /// A timeout only ends this caller's wait. The batch the request is in
    /// keeps running and its other members are unaffected.
    pub async fn infer(&self, payload: Vec<u8>) -> Result<Output, Error> {
        let pending = self.handle.submit(payload)?;
        let id = pending.id();
        match tokio::time::timeout(self.request_timeout, pending).await {
            Ok(response) => Ok(response?.predictions),
            Err(_) => {
                log::warn!(
                    "Request {} timed out after {:?}",
                    id,
                    self.request_timeout
                );
                Err(Error::Timeout(format!(
                    "no result within {:?}",
                    self.request_timeout
                )))
            }
        }
    }
}

/// Keep `address` registered until `stop` fires, then deregister it.
///
/// Every `interval` the address is registered again, which refreshes the
/// record. A failed refresh is logged and retried on the next tick.
pub async fn keep_registered<D>(
    discovery: &D,
    address: Address,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) where
    D: Discovery + ?Sized,
{
    let mut token: Option<Token> = None;
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => match discovery.register(address.clone()).await {
                Ok(t) => {
                    if token != Some(t) {
                        log::info!("Registered {} as {}", address, t);
                    }
                    token = Some(t);
                }
                Err(e) => log::warn!("Failed to refresh registration of {}: {}", address, e),
            },
            _ = &mut stop => break,
        }
    }
    if let Some(token) = token {
        match discovery.deregister(token).await {
            Ok(()) => log::info!("Deregistered {}", address),
            Err(e) => log::warn!("Failed to deregister {}: {}", address, e),
        }
    }
}
