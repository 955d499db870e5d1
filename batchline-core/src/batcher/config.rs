//! Configuration for the batch assembler.

use std::collections::HashMap;
use std::time::Duration;

/// Configuration for batch assembly
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Maximum payloads per committed batch (0 = unbounded)
    pub max_batch_size: usize,

    /// Minimum batch size before committing without waiting.
    /// Set to 1 to commit as soon as anything is dispatchable.
    pub min_batch_size: usize,

    /// Maximum time to wait for `min_batch_size` to be reached
    pub batch_wait: Duration,

    /// Inputs whose shapes (and shape-tensor values) must agree across a
    /// batch, keyed by tensor name
    pub enforce_equal_shape_tensors: HashMap<String, bool>,

    /// Runner instance on whose behalf batches are assembled
    pub runner_id: i64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            min_batch_size: 1,
            batch_wait: Duration::from_millis(0),
            enforce_equal_shape_tensors: HashMap::new(),
            runner_id: 0,
        }
    }
}

impl BatcherConfig {
    /// Create config optimized for low latency (commit immediately)
    pub fn low_latency() -> Self {
        Self { max_batch_size: 8, ..Self::default() }
    }

    /// Create config optimized for high throughput (wait for fuller batches)
    pub fn high_throughput() -> Self {
        Self {
            max_batch_size: 64,
            min_batch_size: 4,
            batch_wait: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("BATCHLINE_MAX_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.max_batch_size = n;
            }
        }

        if let Ok(val) = std::env::var("BATCHLINE_MIN_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.min_batch_size = n;
            }
        }

        if let Ok(val) = std::env::var("BATCHLINE_BATCH_WAIT_MS") {
            if let Ok(n) = val.parse() {
                config.batch_wait = Duration::from_millis(n);
            }
        }

        config
    }

    /// Require `tensor` to have equal shape (and shape-tensor values)
    /// across every batch
    pub fn enforce_equal_shape(mut self, tensor: impl Into<String>) -> Self {
        self.enforce_equal_shape_tensors.insert(tensor.into(), true);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatcherConfig::default();
        assert_eq!(config.max_batch_size, 32);
        assert_eq!(config.min_batch_size, 1);
        assert!(config.enforce_equal_shape_tensors.is_empty());
    }

    #[test]
    fn test_low_latency_config() {
        let config = BatcherConfig::low_latency();
        assert_eq!(config.max_batch_size, 8);
        assert_eq!(config.batch_wait, Duration::ZERO);
    }

    #[test]
    fn test_high_throughput_config() {
        let config = BatcherConfig::high_throughput();
        assert_eq!(config.max_batch_size, 64);
        assert_eq!(config.min_batch_size, 4);
    }

    #[test]
    fn test_enforce_equal_shape() {
        let config = BatcherConfig::default().enforce_equal_shape("x").enforce_equal_shape("y");
        assert_eq!(config.enforce_equal_shape_tensors.len(), 2);
        assert_eq!(config.enforce_equal_shape_tensors["x"], true);
    }
}
