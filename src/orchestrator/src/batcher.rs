//! Requests, batches and the completion handle a caller awaits.
use crate::config::Config;
use engine::Output;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};
use tokio::sync::oneshot;

/// Unique id of a submitted request.
pub type RequestId = u64;

/// Result delivered to one request.
pub type Response = Result<InferenceResult, Error>;

/// Errors delivered to a request or returned by the scheduler API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The inference engine failed the whole batch this request was in.
    #[error("inference engine failed: {0}")]
    Adapter(String),
    /// The scheduler is not accepting requests.
    #[error("scheduler is shut down")]
    Shutdown,
    /// The request was lost before it completed.
    #[error("request dropped before completion")]
    Dropped,
    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A scheduler thread could not be started.
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

/// Output for one request, paired with the request id.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    /// id of the originating request
    pub id: RequestId,
    /// ranked predictions
    pub predictions: Output,
}

/// A request admitted by the scheduler.
pub struct InferenceRequest {
    id: RequestId,
    payload: Vec<u8>,
    arrive_time: Instant,
    completion: Completion,
}

impl InferenceRequest {
    pub(crate) fn new(id: RequestId, payload: Vec<u8>) -> (Self, Pending) {
        let (tx, rx) = oneshot::channel();
        let request = InferenceRequest {
            id,
            payload,
            arrive_time: Instant::now(),
            completion: Completion { id, tx },
        };
        (request, Pending { id, rx })
    }

    /// Request id
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// When the request was submitted
    pub fn arrive_time(&self) -> Instant {
        self.arrive_time
    }

    /// Resolve the request without running it.
    pub(crate) fn fail(self, error: Error) {
        self.completion.resolve(Err(error));
    }
}

/// Sending half of a request's completion slot.
pub(crate) struct Completion {
    id: RequestId,
    tx: oneshot::Sender<Response>,
}

impl Completion {
    pub fn resolve(self, result: Result<Output, Error>) {
        let id = self.id;
        let response = result.map(|predictions| InferenceResult { id, predictions });
        if self.tx.send(response).is_err() {
            // the caller gave up waiting
            log::debug!("Request {} completed after its caller left", id);
        }
    }
}

/// Completion handle returned by `submit`. Resolves exactly once.
pub struct Pending {
    id: RequestId,
    rx: oneshot::Receiver<Response>,
}

impl Pending {
    /// id of the submitted request
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for Pending {
    type Output = Response;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(response)) => Poll::Ready(response),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Requests reserved up front when a batch opens; larger batches grow.
const PREALLOCATED: usize = 64;

/// The batch currently accepting requests. Only the scheduler thread
/// touches it.
pub(crate) struct Batch {
    id: u64,
    requests: Vec<InferenceRequest>,
    capacity: usize,
    deadline: Instant,
}

impl Batch {
    /// Open a batch around its first request. The wait budget starts at
    /// that request's arrival.
    pub fn open(id: u64, first: InferenceRequest, config: &Config) -> Self {
        let deadline = first.arrive_time() + config.max_batch_wait;
        let mut requests = Vec::with_capacity(config.max_batch_size.min(PREALLOCATED));
        requests.push(first);
        Batch {
            id,
            requests,
            capacity: config.max_batch_size,
            deadline,
        }
    }

    pub fn admit(&mut self, request: InferenceRequest) {
        debug_assert!(!self.is_full());
        self.requests.push(request);
    }

    pub fn is_full(&self) -> bool {
        self.requests.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Close the batch. There is no way back to an open batch.
    pub fn seal(self) -> SealedBatch {
        SealedBatch {
            id: self.id,
            requests: self.requests,
            sealed_at: Instant::now(),
        }
    }
}

/// An immutable batch waiting for, or running on, an executor.
pub(crate) struct SealedBatch {
    id: u64,
    requests: Vec<InferenceRequest>,
    sealed_at: Instant,
}

impl SealedBatch {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn sealed_at(&self) -> Instant {
        self.sealed_at
    }

    /// Split into the model inputs and, at the same positions, the
    /// completions they belong to.
    pub fn into_parts(self) -> (Vec<Vec<u8>>, Vec<Completion>) {
        self.requests
            .into_iter()
            .map(|request| (request.payload, request.completion))
            .unzip()
    }

    /// Resolve every member with `error`.
    pub fn fail(self, error: Error) {
        for request in self.requests {
            request.fail(error.clone());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::block_on;
    use engine::Prediction;
    use std::time::Duration;

    fn config(max_batch_size: usize) -> Config {
        Config {
            max_batch_size,
            max_batch_wait: Duration::from_millis(50),
            max_concurrent_batches: 1,
        }
    }

    #[test]
    fn test_batch_fills_and_seals() {
        let (first, _p0) = InferenceRequest::new(0, vec![0]);
        let arrive_time = first.arrive_time();
        let mut batch = Batch::open(7, first, &config(2));
        assert_eq!(batch.deadline(), arrive_time + Duration::from_millis(50));
        assert!(!batch.is_full());
        let (second, _p1) = InferenceRequest::new(1, vec![1]);
        batch.admit(second);
        assert!(batch.is_full());
        let sealed = batch.seal();
        assert_eq!(sealed.id(), 7);
        assert_eq!(sealed.len(), 2);
        let (inputs, completions) = sealed.into_parts();
        assert_eq!(inputs, vec![vec![0], vec![1]]);
        assert_eq!(completions.len(), 2);
    }

    #[test]
    fn test_large_batch_reserves_little() {
        let (first, _p0) = InferenceRequest::new(0, vec![0]);
        let batch = Batch::open(0, first, &config(Config::MAX_BATCH_SIZE));
        assert!(batch.requests.capacity() <= PREALLOCATED);
        assert!(!batch.is_full());
        let (first, _p1) = InferenceRequest::new(1, vec![1]);
        let batch = Batch::open(1, first, &config(4));
        assert!(batch.requests.capacity() >= 4);
    }

    #[test]
    fn test_completion_pairs_by_id() {
        let (request, pending) = InferenceRequest::new(42, b"cat".to_vec());
        let mut batch = Batch::open(0, request, &config(4));
        let (other, other_pending) = InferenceRequest::new(43, b"dog".to_vec());
        batch.admit(other);
        let (inputs, completions) = batch.seal().into_parts();
        for (input, completion) in inputs.into_iter().zip(completions).rev() {
            let label = String::from_utf8(input).unwrap();
            completion.resolve(Ok(vec![Prediction::new(label, 1.0)]));
        }
        let result = block_on(pending).unwrap();
        assert_eq!(result.id, 42);
        assert_eq!(result.predictions[0].label, "cat");
        let result = block_on(other_pending).unwrap();
        assert_eq!(result.id, 43);
        assert_eq!(result.predictions[0].label, "dog");
    }

    #[test]
    fn test_fail_resolves_all() {
        let (first, p0) = InferenceRequest::new(0, vec![]);
        let mut batch = Batch::open(0, first, &config(4));
        let (second, p1) = InferenceRequest::new(1, vec![]);
        batch.admit(second);
        batch.seal().fail(Error::Adapter("bad".to_string()));
        assert_eq!(block_on(p0), Err(Error::Adapter("bad".to_string())));
        assert_eq!(block_on(p1), Err(Error::Adapter("bad".to_string())));
    }

    #[test]
    fn test_dropped_request() {
        let (request, pending) = InferenceRequest::new(0, vec![]);
        drop(request);
        assert_eq!(block_on(pending), Err(Error::Dropped));
    }
}
