//! Bounded multi-producer/multi-consumer channel with cooperative termination.
//!
//! This is the flow-control primitive for every queue in the pipeline: the
//! inbound read channel, the per-model chunk request queues, and the
//! scored-batch channel feeding the aggregator. It differs from a plain
//! bounded queue in two ways:
//!
//! - **Termination** is a first-class, idempotent signal. `terminate()` wakes
//!   every blocked producer and consumer; afterwards pushes always fail while
//!   pops keep draining buffered items and only fail once the channel is
//!   empty, so nothing in flight is lost during shutdown.
//! - **Batch drain** ([`BoundedChannel::drain_into`]) moves as many items as
//!   are available under a single lock hold, with a deadline. This is how a
//!   dispatcher assembles a batch without per-item relocking on a highly
//!   contended queue, and how it bounds the latency of a partial batch.
//!
//! FIFO order is preserved for items pushed by the same producer thread.
//! Each item is delivered to exactly one consumer.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;

/// Outcome of [`BoundedChannel::drain_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// Moved this many items into the caller's buffer.
    Drained(usize),
    /// The deadline passed with no items available.
    TimedOut,
    /// The channel is terminated and fully drained.
    Closed,
}

struct ChannelState<T> {
    items: VecDeque<T>,
    terminated: bool,
    peak: usize,
}

/// Fixed-capacity blocking channel with an idempotent termination signal.
pub struct BoundedChannel<T> {
    state: Mutex<ChannelState<T>>,
    /// Signaled when space frees up or on termination.
    space: Condvar,
    /// Signaled when items arrive or on termination.
    data: Condvar,
    capacity: usize,
}

impl<T> BoundedChannel<T> {
    /// Create a channel holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "channel capacity must be non-zero");
        Self {
            state: Mutex::new(ChannelState {
                items: VecDeque::with_capacity(capacity),
                terminated: false,
                peak: 0,
            }),
            space: Condvar::new(),
            data: Condvar::new(),
            capacity,
        }
    }

    /// The fixed capacity of the channel.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of buffered items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the channel currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Highest occupancy ever observed.
    pub fn peak_len(&self) -> usize {
        self.state.lock().peak
    }

    /// Whether `terminate()` has been called.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Non-blocking push. Fails, handing the item back, if the channel is
    /// full or terminated.
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        let mut state = self.state.lock();
        if state.terminated || state.items.len() == self.capacity {
            return Err(item);
        }
        state.items.push_back(item);
        let len = state.items.len();
        if len > state.peak {
            state.peak = len;
        }
        drop(state);
        self.data.notify_one();
        Ok(())
    }

    /// Blocking push. Suspends the caller until space is available; fails,
    /// handing the item back, once the channel is terminated.
    pub fn push(&self, item: T) -> std::result::Result<(), T> {
        let mut state = self.state.lock();
        loop {
            if state.terminated {
                return Err(item);
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                let len = state.items.len();
                if len > state.peak {
                    state.peak = len;
                }
                drop(state);
                self.data.notify_one();
                return Ok(());
            }
            self.space.wait(&mut state);
        }
    }

    /// Blocking pop. Suspends the caller until an item is available. After
    /// termination, keeps draining buffered items and returns `None` only
    /// once the channel is empty.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.space.notify_all();
                return Some(item);
            }
            if state.terminated {
                return None;
            }
            self.data.wait(&mut state);
        }
    }

    /// Non-blocking pop. Also drains buffered items after termination.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        drop(state);
        if item.is_some() {
            self.space.notify_all();
        }
        item
    }

    /// Move up to `max` items into `out` under a single lock hold.
    ///
    /// Blocks until at least one item is available, the `deadline` passes,
    /// or the channel is terminated and empty. Callers use the deadline to
    /// bound how long a partially assembled batch may sit idle.
    pub fn drain_into(&self, out: &mut Vec<T>, max: usize, deadline: Instant) -> DrainStatus {
        if max == 0 {
            return DrainStatus::Drained(0);
        }
        let mut state = self.state.lock();
        loop {
            if !state.items.is_empty() {
                let take = max.min(state.items.len());
                out.extend(state.items.drain(..take));
                drop(state);
                self.space.notify_all();
                return DrainStatus::Drained(take);
            }
            if state.terminated {
                return DrainStatus::Closed;
            }
            if self.data.wait_until(&mut state, deadline).timed_out()
                && state.items.is_empty()
                && !state.terminated
            {
                return DrainStatus::TimedOut;
            }
        }
    }

    /// Block until occupancy drops below `mark`.
    ///
    /// Returns `false` if the channel is terminated before (or while) the
    /// condition holds. This is the expander's high-water gate.
    pub fn wait_below(&self, mark: usize) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.terminated {
                return false;
            }
            if state.items.len() < mark {
                return true;
            }
            self.space.wait(&mut state);
        }
    }

    /// Signal termination. Idempotent and thread-safe; wakes every blocked
    /// producer, consumer, and high-water waiter.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        state.terminated = true;
        drop(state);
        self.space.notify_all();
        self.data.notify_all();
    }
}
