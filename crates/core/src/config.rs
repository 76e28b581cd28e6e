//! Global configuration constants for veloxann.
//!
//! All tuning parameters and server defaults are defined here. These are
//! compile-time constants; runtime configuration is handled via CLI arguments
//! in the server binary.

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Controls the size of the dynamic candidate list during query.
/// Higher values improve recall at the cost of latency.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the HNSW graph.
///
/// Layer assignments are clamped to `HNSW_MAX_LAYERS - 1`. With the
/// exponential layer distribution this is effectively never reached for
/// realistic index sizes.
pub const HNSW_MAX_LAYERS: usize = 16;

/// Default capacity (in vectors) of one flat write buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 50_000;

/// Default number of background compaction threads draining sealed buffers
/// into the HNSW graph.
pub const DEFAULT_BG_THREADS: usize = 2;

/// Sealed-buffer queue depth at which foreground writers start throttling.
pub const QUEUE_SOFT_LIMIT: usize = 3;

/// Sealed-buffer queue depth at which foreground writers block until a
/// background thread drains a buffer.
pub const QUEUE_HARD_LIMIT: usize = 6;

/// How long a throttled writer sleeps (milliseconds) when the sealed-buffer
/// queue is between the soft and hard limits.
pub const THROTTLE_SLEEP_MS: u64 = 2;

/// Number of locally retired objects a thread accumulates before flushing
/// them into the global epoch buckets and attempting an epoch advance.
pub const EBR_LOCAL_RETIRE_THRESHOLD: usize = 64;

/// Number of global retire buckets. Three suffice: at most two epochs
/// (current and previous) can have live readers at any instant.
pub const EBR_EPOCH_BUCKETS: usize = 3;

/// Alignment (bytes) of pooled vector storage. Matches the widest SIMD load
/// used by the distance kernel (256-bit AVX2 lanes).
pub const VECTOR_POOL_ALIGN: usize = 32;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Default HTTP server port.
pub const DEFAULT_PORT: u16 = 8000;
