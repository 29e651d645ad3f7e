//! Batch assembly and dispatch workers, one per model instance handle.
//!
//! A dispatcher drains its role's request queue into a fixed-capacity batch,
//! staging each chunk's signal window into the scorer as it is taken. A full
//! batch is scored immediately; a partial batch is scored once the queue has
//! been idle for the configured flush timeout, bounding the latency of
//! stragglers. When the queue reports termination and is empty the worker
//! flushes whatever it holds and exits; the last dispatcher to exit
//! terminates the results channel feeding the aggregator.
//!
//! The queue lock is held only while moving chunks out
//! ([`BoundedChannel::drain_into`]), never across an inference call.

use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::channel::DrainStatus;
use crate::errors::ModCallError;
use crate::model::ModelScorer;
use crate::node::Shared;
use crate::read::Chunk;

/// Worker loop for one model instance handle. `handle_index` selects the
/// role's request queue (`handle_index % num_roles`), so device replicas of
/// a role drain the same queue.
pub(crate) fn run(shared: &Shared, scorer: &dyn ModelScorer, handle_index: usize) {
    let role = &shared.roles[handle_index % shared.roles.len()];
    drive(shared, scorer, role);
    shared.stats.record_queue_peak(role.queue.peak_len() as u64);
    if shared.active_dispatchers.fetch_sub(1, Ordering::AcqRel) == 1 {
        shared.results.terminate();
    }
}

/// Assemble and score batches until the queue is terminated and drained, or
/// a fatal error trips the pipeline fault.
fn drive(shared: &Shared, scorer: &dyn ModelScorer, role: &crate::node::RoleSet) {
    let batch_size = shared.batch_size;
    let mut batch: Vec<Chunk> = Vec::with_capacity(batch_size);
    let mut taken: Vec<Chunk> = Vec::with_capacity(batch_size);
    let mut idle_deadline = Instant::now() + shared.flush_timeout;

    loop {
        match role.queue.drain_into(&mut taken, batch_size - batch.len(), idle_deadline) {
            DrainStatus::Drained(_) => {
                for chunk in taken.drain(..) {
                    scorer.accept(batch.len(), chunk.signal());
                    batch.push(chunk);
                }
                idle_deadline = Instant::now() + shared.flush_timeout;
                if batch.len() == batch_size && !score_batch(shared, scorer, &mut batch) {
                    return;
                }
            }
            DrainStatus::TimedOut => {
                if !batch.is_empty() {
                    shared.stats.note_idle_flush();
                    if !score_batch(shared, scorer, &mut batch) {
                        return;
                    }
                }
                idle_deadline = Instant::now() + shared.flush_timeout;
            }
            DrainStatus::Closed => {
                if !batch.is_empty() {
                    score_batch(shared, scorer, &mut batch);
                }
                return;
            }
        }
    }
}

/// Score the held batch and hand the scored chunks to the aggregator.
///
/// Returns `false` if the pipeline is shutting down (inference failed, or
/// the results channel is terminated). A batch is never scored empty.
fn score_batch(shared: &Shared, scorer: &dyn ModelScorer, batch: &mut Vec<Chunk>) -> bool {
    debug_assert!(!batch.is_empty(), "attempted to score an empty batch");

    let scores = match scorer.score(batch.len()) {
        Ok(scores) => scores,
        Err(source) => {
            batch.clear();
            shared.fail(ModCallError::Inference { source });
            return false;
        }
    };
    if scores.len() != batch.len() {
        let got = scores.len();
        let want = batch.len();
        batch.clear();
        shared.fail(ModCallError::Inference {
            source: anyhow::anyhow!("scorer returned {got} score vectors for a batch of {want}"),
        });
        return false;
    }

    let mut scored: Vec<Chunk> = batch.drain(..).collect();
    for (chunk, chunk_scores) in scored.iter_mut().zip(scores) {
        chunk.set_scores(chunk_scores);
    }
    shared.stats.note_batch_scored(scored.len() as u64);
    shared.results.push(scored).is_ok()
}
