//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! A multi-layer proximity graph: higher layers are sparse long-range
//! shortcuts, layer 0 contains every node. The index is built for heavy
//! concurrency — readers navigate neighbor lists published by atomic pointer
//! swap under epoch-based reclamation, so searches never block on writers.
//!
//! Nodes live in a pool preallocated at `max_elements` and reference each
//! other by integer id, never by pointer, so graph cycles create no
//! ownership cycles.

/// Graph node, neighbor list, and the bulk-load spin lock.
pub mod node;
/// The index itself: streaming and bulk insertion, top-k search.
pub mod index;
/// Single-layer search, greedy descent, and the bounded top-k heap.
pub mod search;
/// Generation-based visited set for graph traversal.
pub mod visited;

pub use index::HnswIndex;
pub use node::NeighborList;
pub use search::TopK;
pub use visited::VisitedSet;
