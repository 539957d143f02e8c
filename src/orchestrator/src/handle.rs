//! Facade of the Orchestrator, callers use Handle as API instead of managing
//! message passing themselves.

use crate::{
    batcher::{Error, InferenceRequest, Pending},
    orchestrator::{Command, Stats},
};
use crossbeam::channel;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Handle for Orchestrator
#[derive(Clone)]
pub struct Handle {
    tx: channel::Sender<Command>,
    next_id: Arc<AtomicU64>,
}

impl Handle {
    pub(crate) fn new(tx: channel::Sender<Command>) -> Self {
        Handle {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Submit one payload. Never blocks; await the returned Pending for
    /// the result.
    pub fn submit(&self, payload: Vec<u8>) -> Result<Pending, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (request, pending) = InferenceRequest::new(id, payload);
        self.tx
            .send(Command::Submit(request))
            .map_err(|_| Error::Shutdown)?;
        Ok(pending)
    }

    /// Snapshot of the scheduler counters.
    pub fn stats(&self) -> Result<Stats, Error> {
        let (tx, rx) = channel::bounded(1);
        self.tx
            .send(Command::Stats(tx))
            .map_err(|_| Error::Shutdown)?;
        rx.recv().map_err(|_| Error::Shutdown)
    }

    /// Stop the scheduler. Blocks until every admitted request is resolved.
    pub fn shutdown(&self) -> Result<(), Error> {
        let (tx, rx) = channel::bounded(1);
        self.tx
            .send(Command::Shutdown(tx))
            .map_err(|_| Error::Shutdown)?;
        rx.recv().map_err(|_| Error::Shutdown)
    }
}
