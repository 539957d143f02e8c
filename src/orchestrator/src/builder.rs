//! Builder for Orchestrator, caller should provide the Model
use crate::{batcher::Error, config::Config, orchestrator::Orchestrator};
use engine::Model;
use std::time::Duration;

/// Builder for the batching scheduler
pub struct Builder {
    config: Config,
    model: Option<Model>,
}

macro_rules! config {
    ($name:ident, $t: ty, $comment: literal) => {
        #[doc=$comment]
        pub fn $name(mut self, $name: $t) -> Self {
            self.config.$name = $name;
            self
        }
    };
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            config: Config::default(),
            model: None,
        }
    }
}

impl Builder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Builder::default()
    }

    config!(max_batch_size, usize, "Seal a batch once it holds this many requests");
    config!(max_batch_wait, Duration, "Seal a batch this long after its first request");
    config!(max_concurrent_batches, usize, "Batches running against the model at once");

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// The loaded model every batch runs on
    pub fn model(mut self, model: Model) -> Self {
        self.model = Some(model);
        self
    }

    /// Build the scheduler
    pub fn build(self) -> Result<Orchestrator, Error> {
        let mut config = self.config;
        config.validate()?;
        let model = self
            .model
            .ok_or_else(|| Error::InvalidConfig("no model registered".to_string()))?;
        if config.max_concurrent_batches > 1 && !model.reentrant() {
            log::warn!(
                "Model is not reentrant, max_concurrent_batches {} lowered to 1",
                config.max_concurrent_batches
            );
            config.max_concurrent_batches = 1;
        }
        let mut log = format!("Model registered, {:?}", config);
        if !model.profile().is_empty() {
            log = format!("{}\nProfile:", log);
            for (batch_size, t) in model.profile() {
                log = format!("{}\n{} : {:?}", log, batch_size, t);
            }
        }
        log::info!("{}", log);
        Ok(Orchestrator::new(config, model))
    }
}
