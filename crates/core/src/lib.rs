//! # veloxann-core
//!
//! In-process approximate nearest neighbor engine: a concurrent HNSW graph
//! fed by a lock-free buffered write path, with epoch-based reclamation
//! keeping readers safe while writers republish neighbor lists.
//!
//! This is the core library crate with zero async dependencies — suitable
//! for embedding directly behind any server surface.

/// Flat write buffer: wait-free appends and brute-force top-k scans.
pub mod buffer;
/// Global configuration constants: limits, defaults, and tuning parameters.
pub mod config;
/// Squared L2 distance kernel: scalar reference and SIMD paths.
pub mod distance;
/// Epoch-based reclamation shared by all components of one engine.
pub mod ebr;
/// Engine facade: buffered inserts, background compaction, merged search.
pub mod engine;
/// Error types surfaced to callers.
pub mod error;
/// The concurrent HNSW index: nodes, insertion, and search.
pub mod hnsw;
/// Loaders for `.fvecs` / `.ivecs` data files.
pub mod io;
/// Aligned float pools backing node vectors and write buffers.
mod pool;

pub use buffer::FlatWriteBuffer;
pub use engine::{EngineConfig, VectorEngine};
pub use error::EngineError;
pub use hnsw::HnswIndex;
