//! Orchestrator
use crate::{
    batcher::{Batch, Error, InferenceRequest},
    config::Config,
    executor::{Executor, Finished},
    handle::Handle,
};
use crossbeam::channel;
use engine::Model;
use std::{sync::Arc, thread};

/// Command to Orchestrator
pub(crate) enum Command {
    /// Admit a request into the open batch
    Submit(InferenceRequest),
    /// Stats(reply_tx)
    Stats(channel::Sender<Stats>),
    /// Shutdown(ack_tx)
    Shutdown(channel::Sender<()>),
}

/// Counters maintained by the scheduler thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// requests admitted
    pub submitted: u64,
    /// batches handed to the executor pool
    pub dispatched_batches: u64,
    /// batches the model completed
    pub completed_batches: u64,
    /// batches the model failed
    pub failed_batches: u64,
    /// sealed batches waiting for a free executor
    pub queued_batches: usize,
    /// requests in the batch still accepting admissions
    pub open_batch_len: usize,
}

impl Stats {
    /// Batches dispatched and not finished yet, queued ones included.
    pub fn in_flight_batches(&self) -> u64 {
        self.dispatched_batches - self.completed_batches - self.failed_batches
    }
}

/// Orchestrator owns the open batch and the executor pool.
pub struct Orchestrator {
    config: Config,
    model: Arc<Model>,
    open: Option<Batch>,
    next_batch_id: u64,
    stats: Stats,
}

impl Orchestrator {
    pub(crate) fn new(config: Config, model: Model) -> Self {
        Orchestrator {
            config,
            model: Arc::new(model),
            open: None,
            next_batch_id: 0,
            stats: Stats::default(),
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run Orchestrator on its own thread and return the handle used to
    /// submit requests.
    pub fn run(self) -> Result<Handle, Error> {
        let (tx, rx) = channel::unbounded();
        let (finished_tx, finished_rx) = channel::unbounded();
        let executor = Executor::spawn(
            self.config.max_concurrent_batches,
            self.model.clone(),
            finished_tx,
        )?;
        thread::Builder::new()
            .name("orchestrator".to_string())
            .spawn(move || self.serve(rx, finished_rx, executor))
            .map_err(|e| Error::Spawn(e.to_string()))?;
        Ok(Handle::new(tx))
    }

    fn serve(
        mut self,
        rx: channel::Receiver<Command>,
        finished_rx: channel::Receiver<Finished>,
        mut executor: Executor,
    ) {
        let mut pool_alive = true;
        let ack_tx = loop {
            let deadline = match &self.open {
                Some(batch) => channel::at(batch.deadline()),
                None => channel::never(),
            };
            let finished = if pool_alive {
                finished_rx.clone()
            } else {
                channel::never()
            };
            channel::select! {
                recv(rx) -> cmd => match cmd {
                    Ok(Command::Submit(request)) => self.admit(request, &executor),
                    Ok(Command::Stats(reply_tx)) => {
                        let _ = reply_tx.send(self.stats(&executor));
                    }
                    Ok(Command::Shutdown(ack_tx)) => break Some(ack_tx),
                    // every handle is gone
                    Err(_) => break None,
                },
                recv(finished) -> report => match report {
                    Ok(report) => self.on_finished(report),
                    Err(_) => {
                        log::error!("Executor pool exited unexpectedly");
                        pool_alive = false;
                    }
                },
                recv(deadline) -> _ => {
                    if let Some(batch) = self.open.take() {
                        log::debug!("Batch wait elapsed with {} requests", batch.len());
                        self.dispatch(batch, &executor);
                    }
                },
            }
        };
        self.drain(&rx, &finished_rx, &mut executor);
        drop(rx);
        if let Some(ack_tx) = ack_tx {
            let _ = ack_tx.send(());
        }
    }

    fn admit(&mut self, request: InferenceRequest, executor: &Executor) {
        self.stats.submitted += 1;
        match self.open.as_mut() {
            Some(batch) => batch.admit(request),
            None => {
                self.open = Some(Batch::open(self.next_batch_id, request, &self.config));
                self.next_batch_id += 1;
            }
        }
        if self.open.as_ref().map_or(false, Batch::is_full) {
            if let Some(batch) = self.open.take() {
                self.dispatch(batch, executor);
            }
        }
    }

    fn dispatch(&mut self, batch: Batch, executor: &Executor) {
        let sealed = batch.seal();
        log::debug!("Dispatch batch {} of {}", sealed.id(), sealed.len());
        self.stats.dispatched_batches += 1;
        if let Err(sealed) = executor.dispatch(sealed) {
            log::error!("Executor pool is gone, failing batch {}", sealed.id());
            self.stats.failed_batches += 1;
            sealed.fail(Error::Shutdown);
        }
    }

    fn on_finished(&mut self, finished: Finished) {
        if finished.failed {
            self.stats.failed_batches += 1;
        } else {
            self.stats.completed_batches += 1;
        }
        log::debug!(
            "Batch {} of {} finished in {:?} after {:?} queued",
            finished.batch_id,
            finished.batch_size,
            finished.elapsed,
            finished.queued
        );
    }

    fn stats(&self, executor: &Executor) -> Stats {
        Stats {
            queued_batches: executor.queued(),
            open_batch_len: self.open.as_ref().map_or(0, Batch::len),
            ..self.stats.clone()
        }
    }

    /// Seal what is open, let the pool finish everything queued and refuse
    /// whatever arrived after the shutdown request.
    fn drain(
        &mut self,
        rx: &channel::Receiver<Command>,
        finished_rx: &channel::Receiver<Finished>,
        executor: &mut Executor,
    ) {
        if let Some(batch) = self.open.take() {
            self.dispatch(batch, executor);
        }
        executor.shutdown();
        for finished in finished_rx.try_iter() {
            self.on_finished(finished);
        }
        for cmd in rx.try_iter() {
            match cmd {
                Command::Submit(request) => request.fail(Error::Shutdown),
                Command::Stats(reply_tx) => {
                    let _ = reply_tx.send(self.stats(executor));
                }
                Command::Shutdown(ack_tx) => {
                    let _ = ack_tx.send(());
                }
            }
        }
        log::info!(
            "Orchestrator stopped after {} requests in {} batches",
            self.stats.submitted,
            self.stats.dispatched_batches
        );
    }
}

#[cfg(test)]
mod test {
    use crate::builder::Builder;
    use crate::testing::{block_on, build_model, Calls, Echo, Failing, Panicking};
    use crate::Error;
    use serial_test::serial;
    use std::{
        thread,
        time::{Duration, Instant},
    };

    fn echo(calls: &Calls) -> engine::Model {
        build_model(Echo::new(calls.clone()))
    }

    #[serial]
    #[test]
    fn test_coalesce_within_wait() {
        let calls = Calls::default();
        let handle = Builder::new()
            .max_batch_size(4)
            .max_batch_wait(Duration::from_millis(50))
            .model(echo(&calls))
            .build()
            .unwrap()
            .run()
            .unwrap();
        let pendings: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|p| handle.submit(p.as_bytes().to_vec()).unwrap())
            .collect();
        let ids: Vec<_> = pendings.iter().map(|p| p.id()).collect();
        for ((pending, id), label) in pendings.into_iter().zip(ids).zip(&["a", "b", "c"]) {
            let result = block_on(pending).unwrap();
            assert_eq!(result.id, id);
            assert_eq!(result.predictions[0].label, *label);
        }
        assert_eq!(calls.sizes(), vec![3]);
        handle.shutdown().unwrap();
    }

    #[serial]
    #[test]
    fn test_single_request_waits() {
        let calls = Calls::default();
        let wait = Duration::from_millis(40);
        let handle = Builder::new()
            .max_batch_size(8)
            .max_batch_wait(wait)
            .model(echo(&calls))
            .build()
            .unwrap()
            .run()
            .unwrap();
        let start = Instant::now();
        let pending = handle.submit(b"solo".to_vec()).unwrap();
        block_on(pending).unwrap();
        let elapsed = start.elapsed();
        assert!(calls.times()[0] >= start + wait);
        assert!(elapsed >= wait);
        assert!(elapsed < wait + Duration::from_millis(500));
        handle.shutdown().unwrap();
    }

    #[serial]
    #[test]
    fn test_full_batch_dispatches_immediately() {
        let calls = Calls::default();
        let handle = Builder::new()
            .max_batch_size(2)
            .max_batch_wait(Duration::from_secs(10))
            .model(echo(&calls))
            .build()
            .unwrap()
            .run()
            .unwrap();
        let start = Instant::now();
        let a = handle.submit(b"a".to_vec()).unwrap();
        let b = handle.submit(b"b".to_vec()).unwrap();
        block_on(a).unwrap();
        block_on(b).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.sizes(), vec![2]);
        handle.shutdown().unwrap();
    }

    #[serial]
    #[test]
    fn test_size_then_wait_trigger() {
        let calls = Calls::default();
        let handle = Builder::new()
            .max_batch_size(2)
            .max_batch_wait(Duration::from_millis(50))
            .model(echo(&calls))
            .build()
            .unwrap()
            .run()
            .unwrap();
        let start = Instant::now();
        let a = handle.submit(b"A".to_vec()).unwrap();
        thread::sleep(Duration::from_millis(5));
        let b = handle.submit(b"B".to_vec()).unwrap();
        thread::sleep(Duration::from_millis(55));
        let c = handle.submit(b"C".to_vec()).unwrap();
        assert_eq!(block_on(a).unwrap().predictions[0].label, "A");
        assert_eq!(block_on(b).unwrap().predictions[0].label, "B");
        assert_eq!(block_on(c).unwrap().predictions[0].label, "C");
        assert_eq!(calls.sizes(), vec![2, 1]);
        let times = calls.times();
        // A and B fill the first batch long before its wait runs out
        assert!(times[0] < start + Duration::from_millis(50));
        // C waits its own full budget
        assert!(times[1] >= start + Duration::from_millis(110));
        handle.shutdown().unwrap();
    }

    #[serial]
    #[test]
    fn test_adapter_failure_fans_out() {
        let calls = Calls::default();
        let handle = Builder::new()
            .max_batch_size(3)
            .max_batch_wait(Duration::from_millis(20))
            .model(build_model(Failing(calls.clone())))
            .build()
            .unwrap()
            .run()
            .unwrap();
        let pendings: Vec<_> = (0..3).map(|_| handle.submit(vec![0]).unwrap()).collect();
        for pending in pendings {
            match block_on(pending) {
                Err(Error::Adapter(message)) => assert!(message.contains("out of memory")),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(calls.sizes(), vec![3]);
        let stats = handle.stats().unwrap();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.completed_batches, 0);
        handle.shutdown().unwrap();
    }

    #[serial]
    #[test]
    fn test_panicking_model() {
        let handle = Builder::new()
            .max_batch_size(2)
            .model(build_model(Panicking))
            .build()
            .unwrap()
            .run()
            .unwrap();
        let a = handle.submit(vec![]).unwrap();
        let b = handle.submit(vec![]).unwrap();
        assert!(matches!(block_on(a), Err(Error::Adapter(_))));
        assert!(matches!(block_on(b), Err(Error::Adapter(_))));
        // the executor survives
        let c = handle.submit(vec![]).unwrap();
        assert!(matches!(block_on(c), Err(Error::Adapter(_))));
        handle.shutdown().unwrap();
    }

    #[serial]
    #[test]
    fn test_concurrency_ceiling() {
        for &ceiling in &[1, 3] {
            let calls = Calls::default();
            let mut model = Echo::new(calls.clone());
            model.delay = Duration::from_millis(30);
            model.reentrant = true;
            let handle = Builder::new()
                .max_batch_size(1)
                .max_concurrent_batches(ceiling)
                .model(build_model(model))
                .build()
                .unwrap()
                .run()
                .unwrap();
            let pendings: Vec<_> = (0..8).map(|_| handle.submit(vec![1]).unwrap()).collect();
            for pending in pendings {
                block_on(pending).unwrap();
            }
            assert_eq!(calls.sizes().len(), 8);
            assert!(calls.peak() <= ceiling);
            if ceiling > 1 {
                assert!(calls.peak() > 1);
            }
            handle.shutdown().unwrap();
        }
    }

    #[serial]
    #[test]
    fn test_non_reentrant_model_runs_alone() {
        let calls = Calls::default();
        let mut model = Echo::new(calls.clone());
        model.delay = Duration::from_millis(20);
        let orchestrator = Builder::new()
            .max_batch_size(1)
            .max_concurrent_batches(4)
            .model(build_model(model))
            .build()
            .unwrap();
        assert_eq!(orchestrator.config().max_concurrent_batches, 1);
        let handle = orchestrator.run().unwrap();
        let pendings: Vec<_> = (0..4).map(|_| handle.submit(vec![1]).unwrap()).collect();
        for pending in pendings {
            block_on(pending).unwrap();
        }
        assert_eq!(calls.peak(), 1);
        handle.shutdown().unwrap();
    }

    #[serial]
    #[test]
    fn test_shutdown_flushes_open_batch() {
        let calls = Calls::default();
        let handle = Builder::new()
            .max_batch_size(8)
            .max_batch_wait(Duration::from_secs(60))
            .model(echo(&calls))
            .build()
            .unwrap()
            .run()
            .unwrap();
        let a = handle.submit(b"a".to_vec()).unwrap();
        let b = handle.submit(b"b".to_vec()).unwrap();
        assert_eq!(handle.stats().unwrap().open_batch_len, 2);
        handle.shutdown().unwrap();
        assert_eq!(block_on(a).unwrap().predictions[0].label, "a");
        assert_eq!(block_on(b).unwrap().predictions[0].label, "b");
        assert_eq!(calls.sizes(), vec![2]);
        assert!(matches!(handle.submit(vec![]), Err(Error::Shutdown)));
    }

    #[serial]
    #[test]
    fn test_stats() {
        let calls = Calls::default();
        let handle = Builder::new()
            .max_batch_size(2)
            .model(echo(&calls))
            .build()
            .unwrap()
            .run()
            .unwrap();
        let pendings: Vec<_> = (0..4).map(|_| handle.submit(vec![1]).unwrap()).collect();
        for pending in pendings {
            block_on(pending).unwrap();
        }
        // completion reports race the last result
        thread::sleep(Duration::from_millis(20));
        let stats = handle.stats().unwrap();
        assert_eq!(stats.submitted, 4);
        assert_eq!(stats.dispatched_batches, 2);
        assert_eq!(stats.completed_batches, 2);
        assert_eq!(stats.in_flight_batches(), 0);
        assert_eq!(stats.open_batch_len, 0);
        handle.shutdown().unwrap();
    }
}
