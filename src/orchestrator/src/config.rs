use crate::batcher::Error;
use std::time::Duration;

/// Batching limits.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// A batch is sealed as soon as it holds this many requests.
    pub max_batch_size: usize,
    /// A batch is sealed once this much time has passed since its first
    /// request arrived, full or not.
    pub max_batch_wait: Duration,
    /// Number of batches allowed to run against the model at once.
    pub max_concurrent_batches: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_batch_size: 8,
            max_batch_wait: Duration::from_millis(20),
            max_concurrent_batches: 1,
        }
    }
}

impl Config {
    /// Largest accepted `max_batch_size`.
    pub const MAX_BATCH_SIZE: usize = 4096;
    /// Longest accepted `max_batch_wait`.
    pub const MAX_BATCH_WAIT: Duration = Duration::from_secs(60);

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.max_batch_size == 0 || self.max_batch_size > Config::MAX_BATCH_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_batch_size must be within 1..={}, got {}",
                Config::MAX_BATCH_SIZE,
                self.max_batch_size
            )));
        }
        if self.max_batch_wait > Config::MAX_BATCH_WAIT {
            return Err(Error::InvalidConfig(format!(
                "max_batch_wait must be at most {:?}, got {:?}",
                Config::MAX_BATCH_WAIT,
                self.max_batch_wait
            )));
        }
        if self.max_concurrent_batches == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_batches must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
