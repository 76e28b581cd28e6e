//! Vector engine: dynamic write path in front of the concurrent HNSW graph.
//!
//! Inserts land in an active write buffer with one wait-free append. A full
//! buffer is sealed into a queue of immutable buffers that background
//! compaction threads drain into the graph, so foreground insert latency
//! never includes graph mutation. Searches merge a brute-force scan of the
//! buffered tail with a graph search.
//!
//! Backpressure is two-stage: writers throttle briefly once the sealed
//! queue reaches a soft limit and block on a condvar at the hard limit.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

use crate::buffer::FlatWriteBuffer;
use crate::config::{
    DEFAULT_BG_THREADS, DEFAULT_BUFFER_CAPACITY, HNSW_DEFAULT_EF_CONSTRUCTION, HNSW_DEFAULT_M,
    MAX_DIMENSION, QUEUE_HARD_LIMIT, QUEUE_SOFT_LIMIT, THROTTLE_SLEEP_MS,
};
use crate::ebr::EbrManager;
use crate::error::EngineError;
use crate::hnsw::{HnswIndex, TopK};

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Vector dimension, fixed for the engine's lifetime.
    pub dim: usize,
    /// Capacity of the node pool; ids must stay below this.
    pub max_elements: usize,
    /// HNSW M parameter (2M links on layer 0).
    pub m: usize,
    /// Candidate breadth during graph construction.
    pub ef_construction: usize,
    /// Capacity of one write buffer, in vectors.
    pub buffer_capacity: usize,
    /// Number of background compaction threads.
    pub bg_threads: usize,
}

impl EngineConfig {
    pub fn new(dim: usize, max_elements: usize) -> Self {
        Self {
            dim,
            max_elements,
            m: HNSW_DEFAULT_M,
            ef_construction: HNSW_DEFAULT_EF_CONSTRUCTION,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            bg_threads: DEFAULT_BG_THREADS,
        }
    }
}

struct Shared {
    active: Arc<FlatWriteBuffer>,
    queue: VecDeque<Arc<FlatWriteBuffer>>,
    /// Buffers already drained into the graph. Held so their vectors stay
    /// alive for any search snapshot still scanning them; freed on shutdown
    /// once the last snapshot handle drops.
    archive: Vec<Arc<FlatWriteBuffer>>,
}

struct EngineInner {
    dim: usize,
    max_elements: usize,
    buffer_capacity: usize,
    soft_limit: usize,
    hard_limit: usize,
    index: HnswIndex,
    ebr: Arc<EbrManager>,
    shared: Mutex<Shared>,
    /// Signals writers waiting for queue space.
    swap_cv: Condvar,
    /// Signals compaction workers that the queue is non-empty (or shutdown).
    worker_cv: Condvar,
    running: AtomicBool,
}

/// Facade over the write path and the HNSW graph.
///
/// All methods take `&self`; the engine is shared across request threads
/// behind an `Arc`.
pub struct VectorEngine {
    inner: Arc<EngineInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl VectorEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        if config.dim == 0 || config.dim > MAX_DIMENSION {
            return Err(EngineError::DimensionMismatch {
                expected: MAX_DIMENSION,
                got: config.dim,
            });
        }
        let ebr = EbrManager::new();
        let index = HnswIndex::new(
            config.dim,
            config.max_elements,
            config.m,
            config.ef_construction,
            Arc::clone(&ebr),
        );
        let inner = Arc::new(EngineInner {
            dim: config.dim,
            max_elements: config.max_elements,
            buffer_capacity: config.buffer_capacity,
            soft_limit: QUEUE_SOFT_LIMIT,
            hard_limit: QUEUE_HARD_LIMIT,
            index,
            ebr,
            shared: Mutex::new(Shared {
                active: Arc::new(FlatWriteBuffer::new(config.buffer_capacity, config.dim)),
                queue: VecDeque::new(),
                archive: Vec::new(),
            }),
            swap_cv: Condvar::new(),
            worker_cv: Condvar::new(),
            running: AtomicBool::new(true),
        });

        let mut workers = Vec::with_capacity(config.bg_threads);
        for worker_id in 0..config.bg_threads {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("veloxann-compact-{worker_id}"))
                .spawn(move || compaction_loop(&inner, worker_id))
                .expect("failed to spawn compaction worker");
            workers.push(handle);
        }

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    pub fn dim(&self) -> usize {
        self.inner.dim
    }

    pub fn max_elements(&self) -> usize {
        self.inner.max_elements
    }

    /// The underlying graph, for bulk-load drivers and diagnostics.
    pub fn index(&self) -> &HnswIndex {
        &self.inner.index
    }

    /// Number of sealed buffers not yet drained into the graph.
    pub fn queued_buffers(&self) -> usize {
        self.inner.shared.lock().queue.len()
    }

    fn validate(&self, vector: &[f32], id: Option<u32>) -> Result<(), EngineError> {
        if vector.len() != self.inner.dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.inner.dim,
                got: vector.len(),
            });
        }
        if let Some(id) = id {
            if id as usize >= self.inner.max_elements {
                return Err(EngineError::IdOutOfRange {
                    id,
                    max_elements: self.inner.max_elements,
                });
            }
        }
        Ok(())
    }

    /// Buffered insert: one wait-free append on the hot path, buffer
    /// rotation plus backpressure when the active buffer fills.
    pub fn insert(&self, vector: &[f32], id: u32) -> Result<(), EngineError> {
        self.validate(vector, Some(id))?;
        self.inner.insert(vector, id);
        Ok(())
    }

    /// Insert directly into the graph, bypassing the write buffers.
    ///
    /// Intended for initial loads; the caller must guarantee no concurrent
    /// searches or buffered inserts while a bulk load runs.
    pub fn bulk_insert(&self, vector: &[f32], id: u32) -> Result<(), EngineError> {
        self.validate(vector, Some(id))?;
        self.inner.index.insert_bulk(vector, id);
        Ok(())
    }

    /// Top-k search over the write buffers and the graph, merged into one
    /// ascending-by-distance id list of length ≤ k.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<u32>, EngineError> {
        self.validate(query, None)?;
        Ok(self.inner.search(query, k, ef_search))
    }

    /// Stop the compaction workers and drop archived buffers. Idempotent;
    /// also invoked on drop. Sealed buffers still queued are drained before
    /// the workers exit; the active buffer's tail is not flushed.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.worker_cv.notify_all();
        self.inner.swap_cv.notify_all();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.inner.shared.lock().archive.clear();
        self.inner.ebr.collect();
        debug!("engine shut down");
    }
}

impl Drop for VectorEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EngineInner {
    fn insert(&self, vector: &[f32], id: u32) {
        // Hot path: no rotation needed.
        let active = Arc::clone(&self.shared.lock().active);
        if active.append(vector, id) {
            return;
        }

        let mut shared = self.shared.lock();
        // Another writer may have rotated while we took the lock.
        if shared.active.append(vector, id) {
            return;
        }

        // Soft backpressure: slow the writer down without blocking it.
        if shared.queue.len() >= self.soft_limit && shared.queue.len() < self.hard_limit {
            MutexGuard::unlocked(&mut shared, || {
                thread::sleep(Duration::from_millis(THROTTLE_SLEEP_MS));
            });
        }

        // Hard backpressure: wait for a compaction worker to make room.
        while shared.queue.len() >= self.hard_limit && self.running.load(Ordering::Acquire) {
            self.swap_cv.wait(&mut shared);
        }

        // The sleeps released the lock; the buffer may have been rotated
        // (and even have room) by now.
        if shared.active.append(vector, id) {
            return;
        }

        let sealed = Arc::clone(&shared.active);
        shared.queue.push_back(sealed);
        shared.active = Arc::new(FlatWriteBuffer::new(self.buffer_capacity, self.dim));
        let appended = shared.active.append(vector, id);
        debug_assert!(appended, "fresh buffer rejected an append");
        let depth = shared.queue.len();
        drop(shared);

        debug!(queue_depth = depth, "sealed write buffer");
        self.worker_cv.notify_one();
    }

    fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<u32> {
        // Cheap snapshot: clone the buffer handles under the lock, scan
        // outside it. A handle keeps its buffer alive even if a worker
        // archives it mid-search.
        let (active, sealed) = {
            let shared = self.shared.lock();
            (
                Arc::clone(&shared.active),
                shared.queue.iter().cloned().collect::<Vec<_>>(),
            )
        };

        let mut heap = TopK::new(k);
        for buffer in &sealed {
            buffer.brute_force_topk(query, &mut heap);
        }
        active.brute_force_topk(query, &mut heap);

        for (dist, id) in self.index.search(query, k, ef_search) {
            heap.push(dist, id);
        }

        heap.into_sorted().into_iter().map(|(_, id)| id).collect()
    }
}

/// Background worker: drain sealed buffers into the graph until shutdown.
/// The queue is drained even after shutdown is signalled, so sealed inserts
/// are never dropped.
fn compaction_loop(inner: &Arc<EngineInner>, worker_id: usize) {
    debug!(worker_id, "compaction worker started");
    loop {
        let buffer = {
            let mut shared = inner.shared.lock();
            loop {
                if let Some(buffer) = shared.queue.pop_front() {
                    break Some(buffer);
                }
                if !inner.running.load(Ordering::Acquire) {
                    break None;
                }
                inner.worker_cv.wait(&mut shared);
            }
        };
        let Some(buffer) = buffer else { break };

        // Outside the lock: the RCU discipline lets several workers build
        // the graph concurrently with searches.
        let count = buffer.len();
        for i in 0..count {
            let (vector, id) = buffer.entry(i);
            inner.index.insert(vector, id);
        }
        debug!(worker_id, vectors = count, "buffer drained into graph");

        inner.shared.lock().archive.push(buffer);
        inner.swap_cv.notify_all();
        inner.ebr.collect();
    }
    inner.ebr.collect();
    debug!(worker_id, "compaction worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_engine(dim: usize, buffer_capacity: usize) -> VectorEngine {
        let mut config = EngineConfig::new(dim, 4096);
        config.m = 8;
        config.ef_construction = 40;
        config.buffer_capacity = buffer_capacity;
        config.bg_threads = 1;
        VectorEngine::new(config).unwrap()
    }

    #[test]
    fn test_dimension_validation() {
        let engine = small_engine(4, 64);
        assert!(matches!(
            engine.insert(&[1.0, 2.0], 0),
            Err(EngineError::DimensionMismatch { expected: 4, got: 2 })
        ));
        assert!(matches!(
            engine.search(&[1.0, 2.0], 5, 10),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_id_validation() {
        let engine = small_engine(4, 64);
        assert!(matches!(
            engine.insert(&[0.0; 4], 4096),
            Err(EngineError::IdOutOfRange { id: 4096, .. })
        ));
    }

    #[test]
    fn test_zero_dim_config_rejected() {
        let config = EngineConfig::new(0, 16);
        assert!(VectorEngine::new(config).is_err());
    }

    #[test]
    fn test_buffer_rotation_under_pressure() {
        let engine = small_engine(2, 4);
        for id in 0..64u32 {
            engine.insert(&[id as f32, 0.0], id).unwrap();
        }
        // Everything inserted must be findable regardless of where it sits.
        let ids = engine.search(&[10.0, 0.0], 3, 20).unwrap();
        assert!(!ids.is_empty());
        assert!(ids.contains(&10));
        engine.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let engine = small_engine(2, 8);
        engine.insert(&[1.0, 1.0], 0).unwrap();
        engine.shutdown();
        engine.shutdown();
        // Searches still serve from the graph and active buffer.
        assert_eq!(engine.search(&[1.0, 1.0], 1, 10).unwrap(), vec![0]);
    }
}
