use crate::batcher::{Error, SealedBatch};
use crossbeam::channel;
use engine::Model;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// Report sent back to the scheduler when a batch is done.
pub(crate) struct Finished {
    pub batch_id: u64,
    pub batch_size: usize,
    pub failed: bool,
    pub queued: Duration,
    pub elapsed: Duration,
}

/// Pool of executor threads. The pool size is the concurrency ceiling:
/// sealed batches beyond it wait in the queue.
pub(crate) struct Executor {
    tx: Option<channel::Sender<SealedBatch>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Executor {
    pub fn spawn(
        concurrency: usize,
        model: Arc<Model>,
        notify: channel::Sender<Finished>,
    ) -> Result<Self, Error> {
        let (tx, rx) = channel::unbounded::<SealedBatch>();
        let mut workers = Vec::with_capacity(concurrency);
        for i in 0..concurrency {
            let rx = rx.clone();
            let model = model.clone();
            let notify = notify.clone();
            let worker = thread::Builder::new()
                .name(format!("executor-{}", i))
                .spawn(move || {
                    for batch in rx.iter() {
                        let _ = notify.send(execute(&model, batch));
                    }
                })
                .map_err(|e| Error::Spawn(e.to_string()))?;
            workers.push(worker);
        }
        Ok(Executor {
            tx: Some(tx),
            workers,
        })
    }

    /// Queue a sealed batch. The batch is handed back if the pool is gone.
    pub fn dispatch(&self, batch: SealedBatch) -> Result<(), SealedBatch> {
        match &self.tx {
            Some(tx) => tx.send(batch).map_err(|e| e.into_inner()),
            None => Err(batch),
        }
    }

    /// Sealed batches not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Stop accepting batches and wait until the queue is drained.
    pub fn shutdown(&mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Executor thread panicked");
            }
        }
    }
}

/// Run one batch and resolve every member, in input order.
pub(crate) fn execute(model: &Model, batch: SealedBatch) -> Finished {
    let batch_id = batch.id();
    let batch_size = batch.len();
    let queued = batch.sealed_at().elapsed();
    let start = Instant::now();
    let (inputs, completions) = batch.into_parts();
    let failed = match model.infer(&inputs) {
        Ok(outputs) => {
            for (completion, output) in completions.into_iter().zip(outputs) {
                completion.resolve(Ok(output));
            }
            false
        }
        Err(e) => {
            log::warn!("Batch {} of {} requests failed: {}", batch_id, batch_size, e);
            let message = e.to_string();
            for completion in completions {
                completion.resolve(Err(Error::Adapter(message.clone())));
            }
            true
        }
    };
    Finished {
        batch_id,
        batch_size,
        failed,
        queued,
        elapsed: start.elapsed(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::batcher::{Batch, InferenceRequest};
    use crate::config::Config;
    use crate::testing::{block_on, build_model, Calls, Echo, Failing};

    fn sealed(payloads: &[&str]) -> (SealedBatch, Vec<crate::Pending>) {
        let config = Config::default();
        let mut pendings = vec![];
        let mut batch: Option<Batch> = None;
        for (id, payload) in payloads.iter().enumerate() {
            let (request, pending) = InferenceRequest::new(id as u64, payload.as_bytes().to_vec());
            pendings.push(pending);
            match batch.as_mut() {
                Some(batch) => batch.admit(request),
                None => batch = Some(Batch::open(0, request, &config)),
            }
        }
        (batch.unwrap().seal(), pendings)
    }

    #[test]
    fn test_execute() {
        let calls = Calls::default();
        let model = build_model(Echo::new(calls.clone()));
        let (batch, pendings) = sealed(&["a", "b", "c"]);
        let finished = execute(&model, batch);
        assert!(!finished.failed);
        assert_eq!(finished.batch_size, 3);
        assert_eq!(calls.sizes(), vec![3]);
        for (pending, label) in pendings.into_iter().zip(&["a", "b", "c"]) {
            assert_eq!(block_on(pending).unwrap().predictions[0].label, *label);
        }
    }

    #[test]
    fn test_execute_failure() {
        let model = build_model(Failing(Calls::default()));
        let (batch, pendings) = sealed(&["a", "b"]);
        assert!(execute(&model, batch).failed);
        for pending in pendings {
            assert!(matches!(block_on(pending), Err(Error::Adapter(_))));
        }
    }

    #[test]
    fn test_executor_pool() {
        let calls = Calls::default();
        let model = build_model(Echo::new(calls.clone()));
        let (tx, rx) = channel::unbounded();
        let mut executor = Executor::spawn(2, Arc::new(model), tx).unwrap();
        let (batch, pendings) = sealed(&["x"]);
        assert!(executor.dispatch(batch).is_ok());
        let finished = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(finished.batch_size, 1);
        assert_eq!(block_on(pendings.into_iter().next().unwrap()).unwrap().id, 0);
        executor.shutdown();
        let (batch, _) = sealed(&["y"]);
        assert!(executor.dispatch(batch).is_err());
    }
}
