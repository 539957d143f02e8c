#![deny(warnings)]
#![deny(missing_docs)]
#![warn(clippy::all)]

//! Orchestrator batches single inference requests and runs every batch
//! against one loaded model.
//!
//! Requests enter through a [`Handle`]. A scheduler thread owns the open
//! batch, seals it when it is full or its wait budget runs out, and hands
//! sealed batches to a pool of executor threads.

pub mod batcher;
pub mod builder;
mod config;
pub(crate) mod executor;
pub mod handle;
pub mod orchestrator;
#[cfg(test)]
pub(crate) mod testing;

pub use crate::orchestrator::{Orchestrator, Stats};
pub use batcher::{Error, InferenceResult, Pending, RequestId, Response};
pub use builder::Builder;
pub use config::Config;
pub use handle::Handle;
