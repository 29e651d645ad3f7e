//! The modified-base scoring pipeline node.
//!
//! [`ModBaseNode`] owns the whole worker topology:
//!
//! ```text
//!            reads                chunks                scored batches
//! upstream ────────> [expanders] ────────> [dispatchers] ────────> [aggregator] ────> sink
//!           input     (pool per    request   (one per      results   (one thread)
//!           channel    device)     queues     model         channel
//!                                 (per role)  handle)
//! ```
//!
//! Termination cascades strictly downstream. The input channel is terminated
//! by [`ModBaseNode::join`] (or an upstream stage); the last expander to
//! drain it terminates the per-role request queues; the last dispatcher to
//! drain its queue terminates the results channel; the aggregator then
//! terminates the downstream sink. Fatal errors from any worker trip the
//! shared fault and terminate every channel, driving the same cascade from
//! error paths.

use log::{debug, error};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::aggregator;
use crate::channel::BoundedChannel;
use crate::config::PipelineConfig;
use crate::dispatcher;
use crate::errors::{ModCallError, Result};
use crate::expander;
use crate::model::{ModBaseInfo, ModelParams, ModelScorer};
use crate::progress::ProgressTracker;
use crate::read::{Chunk, ReadRecord};
use crate::sink::MessageSink;
use crate::stats::PipelineStats;

/// One model role: its metadata and the request queue shared by all device
/// replicas of the role.
pub(crate) struct RoleSet {
    pub params: ModelParams,
    pub queue: BoundedChannel<Chunk>,
}

/// State shared by every worker of one node.
pub(crate) struct Shared {
    pub input: BoundedChannel<Arc<ReadRecord>>,
    pub roles: Vec<RoleSet>,
    pub results: BoundedChannel<Vec<Chunk>>,
    /// Reads with outstanding chunks. Completion counters are updated and
    /// scanned under this lock; it is disjoint from every queue lock.
    pub working: Mutex<Vec<Arc<ReadRecord>>>,
    pub info: Arc<ModBaseInfo>,
    pub sink: Arc<dyn MessageSink<Arc<ReadRecord>>>,
    pub stats: Arc<PipelineStats>,
    fault: Mutex<Option<ModCallError>>,
    pub batch_size: usize,
    pub high_water: usize,
    pub flush_timeout: Duration,
    pub active_expanders: AtomicUsize,
    pub active_dispatchers: AtomicUsize,
}

impl Shared {
    /// Record a fatal error (the first one wins) and terminate every channel
    /// so all workers unblock, drain, and exit through the normal cascade.
    pub(crate) fn fail(&self, err: ModCallError) {
        {
            let mut slot = self.fault.lock();
            if slot.is_none() {
                error!("Fatal pipeline error: {err}");
                *slot = Some(err);
            } else {
                debug!("Suppressing subsequent pipeline error: {err}");
            }
        }
        self.input.terminate();
        for role in &self.roles {
            role.queue.terminate();
        }
        self.results.terminate();
    }

    fn take_fault(&self) -> Option<ModCallError> {
        self.fault.lock().take()
    }
}

/// The concurrent batching and scheduling engine for modified-base scoring.
///
/// Implements [`MessageSink`] so it can be chained after an upstream stage:
/// reads are pushed in with `push_message`, and fully scored reads emerge at
/// the configured downstream sink in completion order (not arrival order).
/// Call [`ModBaseNode::join`] after the upstream has finished to drain the
/// pipeline and surface any fatal error.
pub struct ModBaseNode {
    shared: Arc<Shared>,
    workers: Vec<(String, JoinHandle<()>)>,
    started: Instant,
}

impl std::fmt::Debug for ModBaseNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModBaseNode").finish_non_exhaustive()
    }
}

impl ModBaseNode {
    /// Build the node and start its workers.
    ///
    /// `scorers` holds one handle per loaded model instance, grouped
    /// device-major: with `num_devices` devices and `n` model roles, handle
    /// `i` is role `i % n` on device `i / n`. All replicas of a role must
    /// carry identical metadata.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, an empty or unevenly divided
    /// handle list, or inconsistent model metadata.
    pub fn new(
        sink: Arc<dyn MessageSink<Arc<ReadRecord>>>,
        scorers: Vec<Arc<dyn ModelScorer>>,
        num_devices: usize,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if scorers.is_empty() {
            return Err(ModCallError::InvalidParameter {
                parameter: "scorers".to_string(),
                reason: "at least one model instance handle is required".to_string(),
            });
        }
        if num_devices == 0 {
            return Err(ModCallError::InvalidParameter {
                parameter: "num_devices".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        if scorers.len() % num_devices != 0 {
            return Err(ModCallError::InvalidParameter {
                parameter: "num_devices".to_string(),
                reason: format!("must evenly divide the {} model handles", scorers.len()),
            });
        }

        let num_roles = scorers.len() / num_devices;
        let role_params: Vec<ModelParams> =
            scorers[..num_roles].iter().map(|scorer| scorer.params().clone()).collect();
        for (index, scorer) in scorers.iter().enumerate().skip(num_roles) {
            let role = index % num_roles;
            if *scorer.params() != role_params[role] {
                return Err(ModCallError::InconsistentReplica {
                    role,
                    device: index / num_roles,
                });
            }
        }
        let info = Arc::new(ModBaseInfo::from_role_params(&role_params)?);

        let roles: Vec<RoleSet> = role_params
            .into_iter()
            .map(|params| RoleSet {
                params,
                queue: BoundedChannel::new(config.chunk_queue_capacity),
            })
            .collect();

        let expander_count = config.expander_threads * num_devices;
        let shared = Arc::new(Shared {
            input: BoundedChannel::new(config.input_capacity),
            roles,
            results: BoundedChannel::new(config.results_capacity),
            working: Mutex::new(Vec::new()),
            info,
            sink,
            stats: Arc::new(PipelineStats::default()),
            fault: Mutex::new(None),
            batch_size: config.batch_size,
            high_water: config.chunk_queue_high_water,
            flush_timeout: config.flush_timeout,
            active_expanders: AtomicUsize::new(expander_count),
            active_dispatchers: AtomicUsize::new(scorers.len()),
        });

        let mut workers = Vec::with_capacity(expander_count + scorers.len() + 1);
        for index in 0..expander_count {
            let shared = Arc::clone(&shared);
            workers.push((
                format!("expander-{index}"),
                thread::spawn(move || expander::run(&shared)),
            ));
        }
        for (index, scorer) in scorers.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            workers.push((
                format!("dispatcher-{index}"),
                thread::spawn(move || dispatcher::run(&shared, scorer.as_ref(), index)),
            ));
        }
        {
            let shared = Arc::clone(&shared);
            let progress =
                ProgressTracker::new("Forwarded reads").with_interval(config.progress_interval);
            workers.push((
                "aggregator".to_string(),
                thread::spawn(move || aggregator::run(&shared, &progress)),
            ));
        }

        Ok(Self { shared, workers, started: Instant::now() })
    }

    /// The throughput counters, live while the node runs.
    #[must_use]
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.shared.stats)
    }

    /// The aggregate modified-base metadata (alphabet, long names, class
    /// layout) derived from the loaded models.
    #[must_use]
    pub fn mod_base_info(&self) -> Arc<ModBaseInfo> {
        Arc::clone(&self.shared.info)
    }

    /// Terminate the input, join every worker, and surface the first fatal
    /// error if any worker failed.
    ///
    /// The cascade guarantees every in-flight read has been forwarded (or
    /// the fault drained the pipeline) and the downstream sink has received
    /// its termination signal before this returns.
    ///
    /// # Errors
    ///
    /// Returns the first recorded worker fault, or
    /// [`ModCallError::WorkerPanicked`] if a worker died without recording
    /// one.
    pub fn join(mut self) -> Result<()> {
        self.shared.input.terminate();
        for (name, handle) in self.workers.drain(..) {
            if handle.join().is_err() {
                // Unblock anything waiting on a channel the dead worker
                // should have drained, then keep joining.
                self.shared.fail(ModCallError::WorkerPanicked { worker: name });
            }
        }
        self.shared.stats.log_summary(self.started.elapsed());
        match self.shared.take_fault() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl MessageSink<Arc<ReadRecord>> for ModBaseNode {
    fn push_message(&self, message: Arc<ReadRecord>) -> std::result::Result<(), Arc<ReadRecord>> {
        self.shared.input.push(message)
    }

    fn terminate(&self) {
        self.shared.input.terminate();
    }
}

impl Drop for ModBaseNode {
    fn drop(&mut self) {
        self.shared.input.terminate();
        for (_name, handle) in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
