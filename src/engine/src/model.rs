use crate::{Error, Inference, Output};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};

/// A loaded model. Built once at startup and shared read-only by every
/// batch dispatch.
pub struct Model {
    inner: Box<dyn Inference>,
    profile: Vec<(usize, Duration)>,
}

impl Model {
    /// Run one batch through the model.
    ///
    /// A panic inside the engine and a short or long output vector are both
    /// reported as errors, so a caller can always resolve every input.
    pub fn infer(&self, inputs: &[Vec<u8>]) -> Result<Vec<Output>, Error> {
        let outputs = panic::catch_unwind(AssertUnwindSafe(|| self.inner.infer(inputs)))
            .map_err(|payload| Error::Panicked(panic_message(payload)))??;
        if outputs.len() != inputs.len() {
            return Err(Error::OutputMismatch {
                expected: inputs.len(),
                actual: outputs.len(),
            });
        }
        Ok(outputs)
    }

    /// Whether concurrent batches are safe on this model.
    pub fn reentrant(&self) -> bool {
        self.inner.reentrant()
    }

    /// Measured latency per batch size, empty when the model was not warmed up.
    pub fn profile(&self) -> &[(usize, Duration)] {
        &self.profile
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Largest batch size measured during warm up.
pub const MAX_PROFILED_BATCH_SIZE: usize = 4096;

type BuildModelFn = dyn FnOnce() -> Result<Box<dyn Inference>, Error>;

/// Builder for Model
pub struct Builder {
    warmup_times: usize,
    warmup_input: Vec<u8>,
    max_batch_size: usize,
    build_function: Option<Box<BuildModelFn>>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            warmup_times: 0,
            warmup_input: vec![],
            max_batch_size: 8,
            build_function: None,
        }
    }
}

impl Builder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Builder::default()
    }

    /// Warm up runs per batch size before the measured run. Zero skips profiling.
    pub fn warmup_times(mut self, warmup_times: usize) -> Self {
        self.warmup_times = warmup_times;
        self
    }

    /// Input replicated across the warm up batches.
    pub fn warmup_input(mut self, warmup_input: Vec<u8>) -> Self {
        self.warmup_input = warmup_input;
        self
    }

    /// Largest batch size to profile.
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Function loading the model. Called exactly once by `build`.
    pub fn build_function<F>(mut self, func: F) -> Self
    where
        F: 'static + FnOnce() -> Result<Box<dyn Inference>, Error>,
    {
        self.build_function = Some(Box::new(func));
        self
    }

    /// Load the model and, when warm up is enabled, profile it.
    pub fn build(self) -> Result<Model, Error> {
        let build_function = self
            .build_function
            .ok_or_else(|| Error::Build("no build function".to_string()))?;
        let mut model = Model {
            inner: build_function()?,
            profile: vec![],
        };
        if self.warmup_times == 0 {
            return Ok(model);
        }
        let largest = self.max_batch_size.max(1).min(MAX_PROFILED_BATCH_SIZE);
        let mut batch_size = 1;
        while batch_size <= largest {
            let inputs = vec![self.warmup_input.clone(); batch_size];
            for _ in 0..self.warmup_times {
                model.infer(&inputs)?;
            }
            let now = Instant::now();
            model.infer(&inputs)?;
            model.profile.push((batch_size, now.elapsed()));
            batch_size <<= 1;
        }
        Ok(model)
    }
}
