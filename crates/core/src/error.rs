//! Engine error types.
//!
//! Input-validation failures are reported to the caller and leave engine
//! state untouched. Capacity pressure (full buffers, deep compaction queues)
//! is absorbed inside the engine and never surfaces here.

use thiserror::Error;

/// Errors surfaced by the engine facade and the data-file loaders.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A vector's length does not match the engine dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// An id is outside `[0, max_elements)`.
    #[error("id {id} out of range (max_elements = {max_elements})")]
    IdOutOfRange { id: u32, max_elements: usize },

    /// Failure reading a data file.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A data file violates its declared format.
    #[error("{path}: {reason}")]
    Format { path: String, reason: String },
}
