//! Configuration for the scoring pipeline topology.
//!
//! Every topology and batching knob is an explicit field so the pipeline is
//! reproducible and testable at small scale (one device, one model, batch
//! size 2) as well as at production scale.

use std::time::Duration;

use crate::errors::{ModCallError, Result};

/// Configuration for a [`ModBaseNode`](crate::node::ModBaseNode).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of chunks assembled into one inference batch.
    pub batch_size: usize,
    /// Expander worker threads per device.
    pub expander_threads: usize,
    /// Capacity of the node's inbound read channel.
    pub input_capacity: usize,
    /// Hard bound on each per-model request queue.
    pub chunk_queue_capacity: usize,
    /// High-water mark: the expander generates chunks for a read only once
    /// every request queue is below this occupancy. Must not exceed
    /// `chunk_queue_capacity`.
    pub chunk_queue_high_water: usize,
    /// Capacity of the scored-batch channel feeding the aggregator.
    pub results_capacity: usize,
    /// Idle period after which a dispatcher scores a held partial batch
    /// rather than waiting for it to fill.
    pub flush_timeout: Duration,
    /// Forwarded-read count between progress log lines.
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_batch_size(128)
    }
}

impl PipelineConfig {
    /// Create a configuration sized around an inference batch capacity.
    ///
    /// Queue bounds are derived from the batch size: the request queues hold
    /// up to eight batches' worth of chunks, and the expander stops
    /// generating new chunks once a queue holds five batches' worth.
    #[must_use]
    pub fn for_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            expander_threads: 4,
            input_capacity: 1000,
            chunk_queue_capacity: batch_size.saturating_mul(8).max(1),
            chunk_queue_high_water: batch_size.saturating_mul(5).max(1),
            results_capacity: 32,
            flush_timeout: Duration::from_millis(100),
            progress_interval: 100_000,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ModCallError::InvalidParameter`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<()> {
        fn require(ok: bool, parameter: &str, reason: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(ModCallError::InvalidParameter {
                    parameter: parameter.to_string(),
                    reason: reason.to_string(),
                })
            }
        }

        require(self.batch_size > 0, "batch_size", "must be >= 1")?;
        require(self.expander_threads > 0, "expander_threads", "must be >= 1")?;
        require(self.input_capacity > 0, "input_capacity", "must be >= 1")?;
        require(self.chunk_queue_capacity > 0, "chunk_queue_capacity", "must be >= 1")?;
        require(self.chunk_queue_high_water > 0, "chunk_queue_high_water", "must be >= 1")?;
        require(
            self.chunk_queue_high_water <= self.chunk_queue_capacity,
            "chunk_queue_high_water",
            "must not exceed chunk_queue_capacity",
        )?;
        require(self.results_capacity > 0, "results_capacity", "must be >= 1")?;
        require(!self.flush_timeout.is_zero(), "flush_timeout", "must be non-zero")?;
        require(self.progress_interval > 0, "progress_interval", "must be >= 1")?;
        Ok(())
    }
}
