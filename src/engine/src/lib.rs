#![deny(warnings)]
#![deny(missing_docs)]
#![warn(clippy::all)]

//! Inference engine boundary for the batching server.
//!
//! The engine is an opaque, synchronous batch computation. Everything the
//! scheduler knows about it goes through the [`Inference`] trait.

pub mod demo;
mod model;

pub use model::{Builder, Model, MAX_PROFILED_BATCH_SIZE};
use serde::{Deserialize, Serialize};

/// One ranked `(label, score)` pair produced for an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class label
    pub label: String,
    /// Score, higher is better
    pub score: f32,
}

impl Prediction {
    /// Create a Prediction
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Prediction {
            label: label.into(),
            score,
        }
    }
}

/// Ranked predictions for a single input.
pub type Output = Vec<Prediction>;

/// Errors raised by the inference engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The engine rejected or failed the batch.
    #[error("{0}")]
    Failed(String),
    /// The engine broke the one-output-per-input contract.
    #[error("engine returned {actual} outputs for {expected} inputs")]
    OutputMismatch {
        /// batch length
        expected: usize,
        /// outputs returned
        actual: usize,
    },
    /// The engine panicked while running the batch.
    #[error("engine panicked: {0}")]
    Panicked(String),
    /// The model could not be built.
    #[error("model build failed: {0}")]
    Build(String),
}

/// All models served by the scheduler implement Inference.
/// A model is loaded once and is immutable afterwards, hence Send + Sync.
pub trait Inference: Send + Sync {
    /// Run one batch. The returned outputs must have the same length and
    /// order as `inputs`.
    fn infer(&self, inputs: &[Vec<u8>]) -> Result<Vec<Output>, Error>;

    /// Whether `infer` may be called from several threads at once.
    fn reentrant(&self) -> bool {
        false
    }
}
