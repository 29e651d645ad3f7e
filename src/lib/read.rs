//! Read records, scoring chunks, and the shared probability buffer.
//!
//! A [`ReadRecord`] is shared as `Arc<ReadRecord>` for the duration of its
//! trip through the pipeline: the expander initializes its probability
//! buffer and chunk accounting, dispatchers score chunks derived from it,
//! and the aggregator scatters results back and forwards the read once every
//! chunk has resolved. The engine never destroys a read.
//!
//! The probability buffer is shared disjoint-region memory: every chunk owns
//! a distinct slot range, so writes are plain relaxed atomic stores with no
//! lock. The completion counters that gate forwarding are updated under the
//! aggregator's working-set lock instead (see `aggregator`).

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::errors::{ModCallError, Result};
use crate::model::{ClassLayout, ModBaseInfo};

/// The canonical nucleotide alphabet, in class-layout order.
pub const CANONICAL_BASES: &[u8; 4] = b"ACGT";

/// Index of a canonical base in [`CANONICAL_BASES`], or `None` for any other
/// symbol.
#[inline]
#[must_use]
pub fn base_id(symbol: u8) -> Option<usize> {
    match symbol {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Quantize a probability-like score into a byte: `floor(score * 256)`,
/// saturating at 255.
#[inline]
#[must_use]
pub(crate) fn quantize_prob(score: f32) -> u8 {
    (score * 256.0).floor().clamp(0.0, 255.0) as u8
}

/// Per-read modified-base probability buffer.
///
/// Holds `sequence_length x num_classes` byte slots. Each sequence position
/// owns `num_classes` consecutive slots laid out per [`ClassLayout`]; the
/// default state of a position is "100% unmodified": 255 in its canonical
/// class slot, 0 elsewhere. Slots are atomics so writers touching disjoint
/// ranges need no lock.
#[derive(Debug)]
pub struct ProbBuffer {
    slots: Vec<AtomicU8>,
    num_classes: usize,
}

impl ProbBuffer {
    /// Build a buffer for `seq` with every position set to the canonical
    /// default.
    ///
    /// # Errors
    ///
    /// Returns [`ModCallError::InvalidBase`] if the sequence contains a
    /// symbol outside the A/C/G/T alphabet.
    pub(crate) fn with_defaults(read_id: &str, seq: &[u8], layout: &ClassLayout) -> Result<Self> {
        let num_classes = layout.num_classes();
        let slots: Vec<AtomicU8> =
            (0..seq.len() * num_classes).map(|_| AtomicU8::new(0)).collect();
        let buffer = Self { slots, num_classes };
        for (position, &symbol) in seq.iter().enumerate() {
            let offset =
                layout.class_offset(symbol).ok_or_else(|| ModCallError::InvalidBase {
                    read_id: read_id.to_string(),
                    symbol: symbol as char,
                    position,
                })?;
            buffer.slots[position * num_classes + offset].store(u8::MAX, Ordering::Relaxed);
        }
        Ok(buffer)
    }

    /// Probability classes per sequence position.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Total number of slots (`sequence_length x num_classes`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the buffer has no slots (empty sequence).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Store `values` starting at slot `offset`. The caller owns that slot
    /// range; ranges of concurrent writers never overlap.
    pub fn write(&self, offset: usize, values: &[u8]) {
        for (slot, &value) in self.slots[offset..offset + values.len()].iter().zip(values) {
            slot.store(value, Ordering::Relaxed);
        }
    }

    /// Read one slot.
    #[must_use]
    pub fn get(&self, index: usize) -> u8 {
        self.slots[index].load(Ordering::Relaxed)
    }

    /// Snapshot the class probabilities of one sequence position.
    #[must_use]
    pub fn position_probs(&self, position: usize) -> Vec<u8> {
        let start = position * self.num_classes;
        self.slots[start..start + self.num_classes]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect()
    }

    /// Snapshot the whole buffer.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.slots.iter().map(|slot| slot.load(Ordering::Relaxed)).collect()
    }
}

/// The per-read record flowing through the pipeline.
#[derive(Debug)]
pub struct ReadRecord {
    /// Read identifier, used in diagnostics.
    pub id: String,
    /// Nucleotide sequence over A/C/G/T.
    pub seq: Vec<u8>,
    /// Raw signal, already normalized upstream.
    pub signal: Vec<f32>,
    /// Signal offset of each base's first sample, plus a final sentinel
    /// entry; length is `seq.len() + 1`.
    pub seq_to_sig_map: Vec<usize>,
    probs: OnceLock<ProbBuffer>,
    mod_info: OnceLock<Arc<ModBaseInfo>>,
    chunks_issued: AtomicUsize,
    chunks_completed: AtomicUsize,
}

impl ReadRecord {
    /// Create a read record. The probability buffer and chunk accounting are
    /// initialized later by the expander.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        seq: Vec<u8>,
        signal: Vec<f32>,
        seq_to_sig_map: Vec<usize>,
    ) -> Self {
        Self {
            id: id.into(),
            seq,
            signal,
            seq_to_sig_map,
            probs: OnceLock::new(),
            mod_info: OnceLock::new(),
            chunks_issued: AtomicUsize::new(0),
            chunks_completed: AtomicUsize::new(0),
        }
    }

    /// The probability buffer, once the expander has initialized it.
    #[must_use]
    pub fn probs(&self) -> Option<&ProbBuffer> {
        self.probs.get()
    }

    /// The modified-base metadata attached by the expander.
    #[must_use]
    pub fn mod_info(&self) -> Option<&Arc<ModBaseInfo>> {
        self.mod_info.get()
    }

    /// Total chunks generated for this read across all models. Final before
    /// any chunk is enqueued.
    #[must_use]
    pub fn chunks_issued(&self) -> usize {
        self.chunks_issued.load(Ordering::Acquire)
    }

    /// Chunks whose results have been applied.
    #[must_use]
    pub fn chunks_completed(&self) -> usize {
        self.chunks_completed.load(Ordering::Acquire)
    }

    /// Whether every issued chunk has resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.chunks_completed() == self.chunks_issued()
    }

    /// Install the probability buffer, metadata, and final issued-chunk
    /// count. Called exactly once per read, before any chunk is enqueued.
    ///
    /// # Panics
    ///
    /// Panics if called twice for the same read.
    pub(crate) fn init_scoring(&self, probs: ProbBuffer, info: Arc<ModBaseInfo>, issued: usize) {
        assert!(
            self.probs.set(probs).is_ok(),
            "probability buffer initialized twice for read '{}'",
            self.id
        );
        let _ = self.mod_info.set(info);
        self.chunks_issued.store(issued, Ordering::Release);
    }

    /// Record one resolved chunk. Callers hold the working-set lock so the
    /// counter and the completion scan cannot race.
    pub(crate) fn note_chunk_completed(&self) {
        self.chunks_completed.fetch_add(1, Ordering::AcqRel);
    }
}

/// One unit of scoring work: an edge-padded signal window tagged with the
/// sequence position it scores, holding a non-owning reference to its source
/// read.
///
/// The reference is weak because a chunk must never extend its read's
/// lifetime; in correct operation the read is always still alive while any
/// of its chunks is in flight, since a read is only released after all of
/// its chunks have resolved.
#[derive(Debug)]
pub struct Chunk {
    source: Weak<ReadRecord>,
    role: usize,
    position: usize,
    signal: Vec<f32>,
    scores: Vec<f32>,
}

impl Chunk {
    pub(crate) fn new(
        source: &Arc<ReadRecord>,
        role: usize,
        position: usize,
        signal: Vec<f32>,
    ) -> Self {
        Self { source: Arc::downgrade(source), role, position, signal, scores: Vec::new() }
    }

    /// Index of the model role this chunk is scored by.
    #[must_use]
    pub fn role(&self) -> usize {
        self.role
    }

    /// The sequence position this chunk scores.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// The edge-padded signal window.
    #[must_use]
    pub fn signal(&self) -> &[f32] {
        &self.signal
    }

    /// The per-class scores, empty until a dispatcher has scored the chunk.
    #[must_use]
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Store the scores. Written once by the owning dispatcher, never
    /// modified again.
    pub(crate) fn set_scores(&mut self, scores: Vec<f32>) {
        debug_assert!(self.scores.is_empty(), "chunk at position {} scored twice", self.position);
        self.scores = scores;
    }

    /// The source read, or `None` if it has (unexpectedly) been dropped.
    pub(crate) fn source(&self) -> Option<Arc<ReadRecord>> {
        self.source.upgrade()
    }
}
