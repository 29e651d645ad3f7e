//! Pipeline throughput counters and the shutdown summary.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters accumulated by the pipeline workers.
///
/// All fields are atomics updated with relaxed ordering; they feed logging
/// and tests, not control flow.
#[derive(Debug, Default)]
pub struct PipelineStats {
    reads_received: AtomicU64,
    reads_forwarded: AtomicU64,
    reads_bypassed: AtomicU64,
    chunks_issued: AtomicU64,
    chunks_scored: AtomicU64,
    batches_scored: AtomicU64,
    idle_flushes: AtomicU64,
    peak_queue_len: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn note_read_received(&self) {
        self.reads_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_read_forwarded(&self) {
        self.reads_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_read_bypassed(&self) {
        self.reads_bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_chunks_issued(&self, count: u64) {
        self.chunks_issued.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn note_batch_scored(&self, chunks: u64) {
        self.batches_scored.fetch_add(1, Ordering::Relaxed);
        self.chunks_scored.fetch_add(chunks, Ordering::Relaxed);
    }

    pub(crate) fn note_idle_flush(&self) {
        self.idle_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request queue's peak occupancy; keeps the maximum seen.
    pub(crate) fn record_queue_peak(&self, peak: u64) {
        let mut current = self.peak_queue_len.load(Ordering::Relaxed);
        while peak > current {
            match self.peak_queue_len.compare_exchange_weak(
                current,
                peak,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Reads accepted from upstream.
    #[must_use]
    pub fn reads_received(&self) -> u64 {
        self.reads_received.load(Ordering::Relaxed)
    }

    /// Reads forwarded downstream (completed plus bypassed).
    #[must_use]
    pub fn reads_forwarded(&self) -> u64 {
        self.reads_forwarded.load(Ordering::Relaxed)
    }

    /// Reads that generated no chunks and skipped scoring entirely.
    #[must_use]
    pub fn reads_bypassed(&self) -> u64 {
        self.reads_bypassed.load(Ordering::Relaxed)
    }

    /// Chunks generated across all models.
    #[must_use]
    pub fn chunks_issued(&self) -> u64 {
        self.chunks_issued.load(Ordering::Relaxed)
    }

    /// Chunks scored by dispatchers.
    #[must_use]
    pub fn chunks_scored(&self) -> u64 {
        self.chunks_scored.load(Ordering::Relaxed)
    }

    /// Inference batches dispatched.
    #[must_use]
    pub fn batches_scored(&self) -> u64 {
        self.batches_scored.load(Ordering::Relaxed)
    }

    /// Partial batches flushed by the idle timeout.
    #[must_use]
    pub fn idle_flushes(&self) -> u64 {
        self.idle_flushes.load(Ordering::Relaxed)
    }

    /// Highest request-queue occupancy observed across all model roles.
    #[must_use]
    pub fn peak_queue_len(&self) -> u64 {
        self.peak_queue_len.load(Ordering::Relaxed)
    }

    /// Log a completion summary.
    pub fn log_summary(&self, elapsed: Duration) {
        info!("Modified-base scoring summary:");
        info!("  Reads: {} in, {} forwarded", self.reads_received(), self.reads_forwarded());
        if self.reads_bypassed() > 0 {
            info!("  Reads without motif hits: {}", self.reads_bypassed());
        }
        info!(
            "  Chunks: {} issued, {} scored in {} batches",
            self.chunks_issued(),
            self.chunks_scored(),
            self.batches_scored()
        );
        if self.idle_flushes() > 0 {
            info!("  Partial batches flushed on idle: {}", self.idle_flushes());
        }
        info!("  Peak request-queue occupancy: {}", self.peak_queue_len());
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 && self.reads_forwarded() > 0 {
            info!("  Elapsed: {:.1}s ({:.0} reads/s)", secs, self.reads_forwarded() as f64 / secs);
        }
    }
}
