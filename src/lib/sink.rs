//! The pipeline stage interface.
//!
//! Stages compose into a directed chain: each consumes items from its own
//! bounded input channel on dedicated worker threads and forwards zero or
//! more items to a configured downstream [`MessageSink`].
//!
//! # Termination cascade
//!
//! A stage tears down in a fixed order: request termination of its own
//! input, join all of its worker threads (guaranteeing no further output
//! will be produced), then propagate `terminate()` to its sink. This
//! ordering means a downstream stage never observes "no more input" before
//! every upstream-produced item has actually arrived. Error paths invoke the
//! same cascade so a fatal condition in any worker drains the pipeline
//! instead of hanging it.

/// Receiver half of a pipeline stage connection.
pub trait MessageSink<T>: Send + Sync {
    /// Deliver one item. Blocks while the sink's input is at capacity;
    /// fails, handing the item back, once the sink has been terminated.
    fn push_message(&self, message: T) -> std::result::Result<(), T>;

    /// Signal that no further items will be pushed. Idempotent; called
    /// exactly once per upstream stage after its workers have been joined.
    fn terminate(&self);
}
