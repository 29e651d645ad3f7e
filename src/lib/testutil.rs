//! Helpers for exercising the pipeline in tests and examples: a recording
//! sink, a deterministic scorer, and read builders.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::model::{ModelParams, ModelScorer};
use crate::read::ReadRecord;
use crate::sink::MessageSink;

/// Canonical-class score returned by [`TestScorer`] for every chunk.
pub const CANONICAL_SCORE: f32 = 0.25;
/// Modification-class score returned by [`TestScorer`] for every chunk.
pub const MOD_SCORE: f32 = 0.75;

/// Signal samples per base used by [`uniform_read`].
pub const SAMPLES_PER_BASE: usize = 10;

/// A CpG model: motif `CG`, scored base `C`, one modification (`5mC`).
#[must_use]
pub fn cpg_params() -> ModelParams {
    ModelParams {
        motif: b"CG".to_vec(),
        motif_offset: 0,
        mod_codes: vec!['m'],
        mod_long_names: vec!["5mC".to_string()],
        context_before: 8,
        context_after: 8,
    }
}

/// An adenine model: motif `A`, one modification (`6mA`).
#[must_use]
pub fn adenine_params() -> ModelParams {
    ModelParams {
        motif: b"A".to_vec(),
        motif_offset: 0,
        mod_codes: vec!['a'],
        mod_long_names: vec!["6mA".to_string()],
        context_before: 8,
        context_after: 8,
    }
}

/// Build a read with a ramp signal and a uniform alignment map of
/// [`SAMPLES_PER_BASE`] samples per base.
#[must_use]
pub fn uniform_read(id: &str, seq: &[u8]) -> Arc<ReadRecord> {
    let signal: Vec<f32> =
        (0..seq.len() * SAMPLES_PER_BASE).map(|sample| sample as f32 * 0.01).collect();
    let seq_to_sig_map: Vec<usize> = (0..=seq.len()).map(|base| base * SAMPLES_PER_BASE).collect();
    Arc::new(ReadRecord::new(id, seq.to_vec(), signal, seq_to_sig_map))
}

/// Terminal sink that records every read it receives.
#[derive(Default)]
pub struct RecordingSink {
    reads: Mutex<Vec<Arc<ReadRecord>>>,
    terminations: AtomicUsize,
}

impl RecordingSink {
    /// Create a sink ready to share with a pipeline node.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the reads received so far.
    #[must_use]
    pub fn reads(&self) -> Vec<Arc<ReadRecord>> {
        self.reads.lock().clone()
    }

    /// Number of reads received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reads.lock().len()
    }

    /// Whether no reads have been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.lock().is_empty()
    }

    /// Whether `terminate` has been called at least once.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.termination_count() > 0
    }

    /// How many times `terminate` has been called. The stage contract calls
    /// for exactly one.
    #[must_use]
    pub fn termination_count(&self) -> usize {
        self.terminations.load(Ordering::Acquire)
    }
}

impl MessageSink<Arc<ReadRecord>> for RecordingSink {
    fn push_message(&self, message: Arc<ReadRecord>) -> Result<(), Arc<ReadRecord>> {
        if self.is_terminated() {
            return Err(message);
        }
        self.reads.lock().push(message);
        Ok(())
    }

    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::AcqRel);
    }
}

/// Deterministic in-process stand-in for an accelerator-bound model.
///
/// Staged windows are copied into an internal slot buffer; `score` returns
/// [`CANONICAL_SCORE`] for the canonical class and [`MOD_SCORE`] for every
/// modification class of every slot, and records the batch size for
/// assertions.
pub struct TestScorer {
    params: ModelParams,
    staged: Mutex<Vec<Vec<f32>>>,
    batch_sizes: Mutex<Vec<usize>>,
    delay: Duration,
    fail: bool,
}

impl TestScorer {
    /// Create a scorer for the given model metadata.
    #[must_use]
    pub fn new(params: ModelParams) -> Self {
        Self {
            params,
            staged: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    /// Sleep this long inside every `score` call, simulating a busy device.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every `score` call fail, simulating a broken device.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Batch sizes of every `score` call so far, in call order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Number of `score` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.batch_sizes.lock().len()
    }
}

impl ModelScorer for TestScorer {
    fn params(&self) -> &ModelParams {
        &self.params
    }

    fn accept(&self, slot: usize, window: &[f32]) {
        let mut staged = self.staged.lock();
        if staged.len() <= slot {
            staged.resize(slot + 1, Vec::new());
        }
        staged[slot] = window.to_vec();
    }

    fn score(&self, batch_len: usize) -> anyhow::Result<Vec<Vec<f32>>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.fail {
            anyhow::bail!("synthetic inference failure");
        }
        {
            let staged = self.staged.lock();
            anyhow::ensure!(
                staged.len() >= batch_len,
                "score called for {batch_len} slots but only {} staged",
                staged.len()
            );
            anyhow::ensure!(
                staged[..batch_len]
                    .iter()
                    .all(|window| window.len() == self.params.window_len()),
                "staged window length differs from the model context window"
            );
        }
        self.batch_sizes.lock().push(batch_len);

        let classes = 1 + self.params.mod_count();
        Ok((0..batch_len)
            .map(|_| {
                let mut scores = vec![MOD_SCORE; classes];
                scores[0] = CANONICAL_SCORE;
                scores
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_read_shapes() {
        let read = uniform_read("r", b"ACGT");
        assert_eq!(read.signal.len(), 40);
        assert_eq!(read.seq_to_sig_map, vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn test_recording_sink_rejects_after_terminate() {
        let sink = RecordingSink::new();
        assert!(sink.push_message(uniform_read("r1", b"A")).is_ok());
        sink.terminate();
        assert!(sink.push_message(uniform_read("r2", b"A")).is_err());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.termination_count(), 1);
    }

    #[test]
    fn test_scorer_returns_one_vector_per_slot() {
        let scorer = TestScorer::new(cpg_params());
        scorer.accept(0, &vec![0.0; 16]);
        scorer.accept(1, &vec![1.0; 16]);
        let scores = scorer.score(2).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0], vec![CANONICAL_SCORE, MOD_SCORE]);
        assert_eq!(scorer.batch_sizes(), vec![2]);
    }

    #[test]
    fn test_failing_scorer_errors() {
        let scorer = TestScorer::new(cpg_params()).failing();
        scorer.accept(0, &vec![0.0; 16]);
        assert!(scorer.score(1).is_err());
    }
}
