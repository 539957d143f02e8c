//! Fake models and helpers shared by the unit tests.
use engine::{Error, Inference, Output, Prediction};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(future)
}

pub(crate) fn build_model(inner: impl Inference + 'static) -> engine::Model {
    engine::Builder::new()
        .build_function(move || Ok(Box::new(inner)))
        .build()
        .unwrap()
}

/// Record of every call a fake model received.
#[derive(Clone, Default)]
pub(crate) struct Calls {
    inner: Arc<Mutex<Vec<(Instant, usize)>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Calls {
    pub fn record(&self, batch_size: usize) {
        self.inner
            .lock()
            .unwrap()
            .push((Instant::now(), batch_size));
    }

    pub fn enter(&self) {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.inner.lock().unwrap().iter().map(|c| c.1).collect()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.inner.lock().unwrap().iter().map(|c| c.0).collect()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Labels every input with its own payload, read as utf-8.
pub(crate) struct Echo {
    pub calls: Calls,
    pub delay: Duration,
    pub reentrant: bool,
}

impl Echo {
    pub fn new(calls: Calls) -> Self {
        Echo {
            calls,
            delay: Duration::from_millis(0),
            reentrant: false,
        }
    }
}

impl Inference for Echo {
    fn infer(&self, inputs: &[Vec<u8>]) -> Result<Vec<Output>, Error> {
        self.calls.enter();
        self.calls.record(inputs.len());
        thread::sleep(self.delay);
        self.calls.leave();
        Ok(inputs
            .iter()
            .map(|input| vec![Prediction::new(String::from_utf8_lossy(input), 1.0)])
            .collect())
    }

    fn reentrant(&self) -> bool {
        self.reentrant
    }
}

/// Fails every batch.
pub(crate) struct Failing(pub Calls);

impl Inference for Failing {
    fn infer(&self, inputs: &[Vec<u8>]) -> Result<Vec<Output>, Error> {
        self.0.record(inputs.len());
        Err(Error::Failed("out of memory".to_string()))
    }
}

/// Panics on every batch.
pub(crate) struct Panicking;

impl Inference for Panicking {
    fn infer(&self, _inputs: &[Vec<u8>]) -> Result<Vec<Output>, Error> {
        panic!("kernel fault")
    }
}
