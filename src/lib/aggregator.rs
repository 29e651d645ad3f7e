//! Result aggregation: scatter scored chunks onto reads and forward
//! completed reads downstream.
//!
//! A single worker owns the working set of reads with outstanding chunks.
//! Score writes need no lock (each chunk owns a disjoint slot range of its
//! read's buffer); the completed-chunk counters are incremented under the
//! working-set lock, and the set is scanned once per applied batch under the
//! same lock, so "counter updated" and "set scanned" cannot race. Reads are
//! forwarded in completion order, not arrival order.
//!
//! The results channel reporting closed-and-empty is the all-dispatchers-
//! finished signal: the worker then propagates termination to the
//! downstream sink and exits.

use std::sync::Arc;

use log::{error, warn};

use crate::errors::ModCallError;
use crate::node::Shared;
use crate::progress::ProgressTracker;
use crate::read::{Chunk, ReadRecord, quantize_prob};

/// Worker loop: apply scored batches until every dispatcher has finished and
/// the pending results are drained, then terminate the downstream sink.
pub(crate) fn run(shared: &Shared, progress: &ProgressTracker) {
    while let Some(batch) = shared.results.pop() {
        if let Err(err) = apply_batch(shared, batch, progress) {
            shared.fail(err);
            break;
        }
    }
    progress.log_final();
    shared.sink.terminate();
}

/// Scatter one batch of scored chunks, then forward every read the batch
/// completed.
fn apply_batch(
    shared: &Shared,
    batch: Vec<Chunk>,
    progress: &ProgressTracker,
) -> Result<(), ModCallError> {
    let mut touched: Vec<Arc<ReadRecord>> = Vec::with_capacity(batch.len());
    for chunk in &batch {
        let Some(read) = chunk.source() else {
            // Unreachable in correct operation: a read outlives its chunks.
            error!(
                "Chunk at position {} outlived its source read; dropping its result",
                chunk.position()
            );
            continue;
        };
        scatter(shared, &read, chunk)?;
        touched.push(read);
    }

    let mut completed: Vec<Arc<ReadRecord>> = Vec::new();
    {
        let mut working = shared.working.lock();
        for read in &touched {
            read.note_chunk_completed();
        }
        let mut index = 0;
        while index < working.len() {
            if working[index].is_complete() {
                completed.push(working.swap_remove(index));
            } else {
                index += 1;
            }
        }
    }

    for read in completed {
        progress.log_if_needed(1);
        shared.stats.note_read_forwarded();
        if shared.sink.push_message(read).is_err() {
            warn!("Downstream sink rejected a completed read");
        }
    }
    Ok(())
}

/// Write one chunk's quantized scores into its read's buffer at the offset
/// determined by the scored position and the class layout.
fn scatter(shared: &Shared, read: &ReadRecord, chunk: &Chunk) -> Result<(), ModCallError> {
    let layout = shared.info.layout();
    let position = chunk.position();

    let Some(probs) = read.probs() else {
        return Err(ModCallError::InvariantViolation {
            detail: format!(
                "read '{}' reached the aggregator without an initialized probability buffer",
                read.id
            ),
        });
    };
    let Some(&symbol) = read.seq.get(position) else {
        return Err(ModCallError::InvariantViolation {
            detail: format!(
                "chunk position {position} is past the end of read '{}' ({} bases)",
                read.id,
                read.seq.len()
            ),
        });
    };
    let Some(class_offset) = layout.class_offset(symbol) else {
        return Err(ModCallError::InvariantViolation {
            detail: format!(
                "read '{}' position {position} holds unscorable symbol '{}'",
                read.id, symbol as char
            ),
        });
    };

    let offset = position * layout.num_classes() + class_offset;
    let quantized: Vec<u8> = chunk.scores().iter().map(|&score| quantize_prob(score)).collect();
    if offset + quantized.len() > (position + 1) * layout.num_classes() {
        return Err(ModCallError::InvariantViolation {
            detail: format!(
                "model role {} returned {} scores for position {position} of read '{}', \
                 overflowing its {}-class slot range",
                chunk.role(),
                quantized.len(),
                read.id,
                layout.num_classes()
            ),
        });
    }
    probs.write(offset, &quantized);
    Ok(())
}
