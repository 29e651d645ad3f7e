//! Custom error types for modcall operations.

use thiserror::Error;

/// Result type alias for modcall operations
pub type Result<T> = std::result::Result<T, ModCallError>;

/// Error type for modcall operations
#[derive(Error, Debug)]
pub enum ModCallError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A read's sequence contains a symbol outside the A/C/G/T alphabet
    #[error("Read '{read_id}': invalid symbol '{symbol}' at position {position}")]
    InvalidBase {
        /// The read identifier
        read_id: String,
        /// The offending symbol
        symbol: char,
        /// Sequence position of the symbol
        position: usize,
    },

    /// A read's sequence-to-signal alignment map is empty
    #[error("Read '{read_id}': alignment map is empty")]
    EmptyAlignmentMap {
        /// The read identifier
        read_id: String,
    },

    /// A read's alignment map does not have one entry per base plus a sentinel
    #[error("Read '{read_id}': alignment map has {actual} entries, expected {expected}")]
    AlignmentMapLength {
        /// The read identifier
        read_id: String,
        /// Expected number of entries (sequence length + 1)
        expected: usize,
        /// Actual number of entries
        actual: usize,
    },

    /// An alignment map entry decreases or points past the end of the signal
    #[error(
        "Read '{read_id}': alignment map entry {index} ({value}) is out of order \
         or past the signal end ({signal_len})"
    )]
    AlignmentMapRange {
        /// The read identifier
        read_id: String,
        /// Index of the offending entry
        index: usize,
        /// Value of the offending entry
        value: usize,
        /// Length of the read's signal
        signal_len: usize,
    },

    /// Model metadata contains an unrecognized base at the scored motif offset
    #[error("Model role {role}: invalid base '{symbol}' at offset {offset} of motif '{motif}'")]
    InvalidMotifBase {
        /// Index of the model role
        role: usize,
        /// The motif, as text
        motif: String,
        /// Offset of the offending base within the motif
        offset: usize,
        /// The offending symbol
        symbol: char,
    },

    /// Model metadata is internally inconsistent
    #[error("Model role {role}: {reason}")]
    InvalidModelParams {
        /// Index of the model role
        role: usize,
        /// Explanation of the inconsistency
        reason: String,
    },

    /// A device replica of a model role carries different metadata than device 0
    #[error("Model role {role}: replica on device {device} disagrees with device 0 metadata")]
    InconsistentReplica {
        /// Index of the model role
        role: usize,
        /// Index of the disagreeing device
        device: usize,
    },

    /// The inference capability failed while scoring a batch
    #[error("Inference failed: {source}")]
    Inference {
        /// The underlying failure reported by the model
        #[source]
        source: anyhow::Error,
    },

    /// A stage-local invariant did not hold; indicates a programming error
    /// or misuse of the pipeline, not bad data
    #[error("Invariant violated: {detail}")]
    InvariantViolation {
        /// Description of the violated invariant
        detail: String,
    },

    /// A pipeline worker thread panicked
    #[error("Pipeline worker '{worker}' panicked")]
    WorkerPanicked {
        /// Name of the panicked worker
        worker: String,
    },
}
