//! Concurrent HNSW graph.
//!
//! The node pool and the vector pool are allocated up front at
//! `max_elements`, so node addresses never move and readers navigate by
//! integer id. Two insertion modes share one search routine:
//!
//! - **streaming** ([`HnswIndex::insert`]): lock-free linking via
//!   copy-append-CAS on neighbor lists, with replaced lists retired to EBR.
//!   Safe to run concurrently with searches and other streaming inserts.
//! - **bulk** ([`HnswIndex::insert_bulk`]): in-place linking under per-node
//!   spin locks with heuristic pruning, for initial loads when the caller
//!   guarantees no concurrent search traffic.

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::HNSW_MAX_LAYERS;
use crate::distance::l2;
use crate::ebr::EbrManager;
use crate::hnsw::node::{NeighborList, Node};
use crate::hnsw::search::{descend_layers, search_layer};
use crate::hnsw::visited::VisitedSet;
use crate::pool::FloatPool;

thread_local! {
    /// Reusable visited set per thread. Eliminates per-operation allocation
    /// (~4 MB for a 1M-node index).
    static VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
    /// Per-thread RNG for layer sampling.
    static LEVEL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_entropy());
}

/// Concurrent multi-layer proximity graph over a preallocated node pool.
pub struct HnswIndex {
    dim: usize,
    max_elements: usize,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    level_mult: f64,
    nodes: Box<[Node]>,
    vectors: FloatPool,
    entry_point: AtomicU32,
    max_layer: AtomicI32,
    /// Protects the rare entry-point / max-layer promotion only.
    ep_lock: Mutex<()>,
    ebr: Arc<EbrManager>,
}

impl HnswIndex {
    /// Create an empty index for vectors of `dim` floats, holding at most
    /// `max_elements` nodes.
    pub fn new(
        dim: usize,
        max_elements: usize,
        m: usize,
        ef_construction: usize,
        ebr: Arc<EbrManager>,
    ) -> Self {
        assert!(dim > 0, "dimension must be positive");
        assert!(max_elements > 0, "max_elements must be positive");
        assert!(m > 1, "M must be at least 2");
        let nodes: Vec<Node> = (0..max_elements).map(|_| Node::empty()).collect();
        Self {
            dim,
            max_elements,
            m,
            m_max0: m * 2,
            ef_construction,
            level_mult: 1.0 / (m as f64).ln(),
            nodes: nodes.into_boxed_slice(),
            vectors: FloatPool::new(max_elements, dim),
            entry_point: AtomicU32::new(0),
            max_layer: AtomicI32::new(-1),
            ep_lock: Mutex::new(()),
            ebr,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// True until the first insert publishes an entry point.
    pub fn is_empty(&self) -> bool {
        self.max_layer.load(Ordering::Acquire) < 0
    }

    /// Current top layer of the graph, or -1 when empty. Monotone.
    pub fn max_layer(&self) -> i32 {
        self.max_layer.load(Ordering::Acquire)
    }

    pub fn entry_point(&self) -> u32 {
        self.entry_point.load(Ordering::Acquire)
    }

    /// True once `id` has been inserted.
    pub fn is_initialized(&self, id: u32) -> bool {
        self.node(id).top_layer() >= 0
    }

    /// Borrow the pooled vector of an inserted node.
    pub fn vector(&self, id: u32) -> &[f32] {
        self.vectors.get(id as usize)
    }

    /// Snapshot of a node's neighbor ids at `layer` (diagnostics and tests).
    pub fn neighbors_of(&self, id: u32, layer: usize) -> Vec<u32> {
        let guard = self.ebr.pin();
        self.node(id)
            .neighbors(layer, &guard)
            .map(|l| l.to_vec())
            .unwrap_or_default()
    }

    /// Borrow a node record by id.
    #[inline]
    pub fn node(&self, id: u32) -> &Node {
        &self.nodes[id as usize]
    }

    #[inline]
    pub(crate) fn distance_to(&self, query: &[f32], id: u32) -> f32 {
        l2(query, self.vector(id))
    }

    /// Sample a node's top layer: `floor(-ln(U) * mL)` clamped to the layer cap.
    fn random_level(&self) -> usize {
        let u: f64 = LEVEL_RNG.with(|rng| rng.borrow_mut().gen::<f64>());
        let level = (-u.max(f64::MIN_POSITIVE).ln() * self.level_mult).floor() as usize;
        level.min(HNSW_MAX_LAYERS - 1)
    }

    fn max_m(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    /// Streaming insert. Safe against concurrent searches and other
    /// streaming inserts; neighbor lists are republished via CAS and old
    /// lists retired to EBR. This path does not prune, so list lengths can
    /// temporarily exceed M (2M on layer 0) under write contention.
    pub fn insert(&self, vector: &[f32], id: u32) {
        assert!(
            (id as usize) < self.max_elements,
            "id {id} beyond max_elements {}",
            self.max_elements
        );
        assert_eq!(vector.len(), self.dim, "vector length != index dimension");

        let guard = self.ebr.pin();
        let level = self.random_level();
        // SAFETY: ids are unique per caller contract, so this thread is the
        // slot's only writer; the slot becomes reachable only through edges
        // published below with release ordering.
        unsafe { self.vectors.write(id as usize, vector) };
        let node = self.node(id);
        node.init(level);

        let mut curr_max = self.max_layer.load(Ordering::Acquire);
        if curr_max == -1 {
            let _ep = self.ep_lock.lock();
            if self.max_layer.load(Ordering::Acquire) == -1 {
                self.entry_point.store(id, Ordering::Release);
                self.max_layer.store(level as i32, Ordering::Release);
                return;
            }
            curr_max = self.max_layer.load(Ordering::Acquire);
        }

        let query = self.vector(id);
        let entry = self.entry_point.load(Ordering::Acquire);

        // Phase 1: descend from the top to one layer above the node's level.
        let (mut curr, _) = descend_layers(self, query, curr_max, level as i32, entry);

        // Phase 2: link layer by layer, reusing each layer's best candidate
        // as the entry point of the next.
        VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.ensure_capacity(self.max_elements);
            let top = level.min(curr_max as usize);
            for layer in (0..=top).rev() {
                let candidates =
                    search_layer(self, query, curr, self.ef_construction, layer, &mut visited);
                for &(_, neighbor) in candidates.iter().take(self.m) {
                    if neighbor == id {
                        continue;
                    }
                    node.add_neighbor_rcu(layer, neighbor, &self.ebr, &guard);
                    self.node(neighbor)
                        .add_neighbor_rcu(layer, id, &self.ebr, &guard);
                }
                if let Some(&(_, best)) = candidates.first() {
                    curr = best;
                }
            }
        });

        // Phase 3: promote the entry point last, so the node is never
        // advertised before it is linked.
        if level as i32 > curr_max {
            let _ep = self.ep_lock.lock();
            if level as i32 > self.max_layer.load(Ordering::Acquire) {
                self.entry_point.store(id, Ordering::Release);
                self.max_layer.store(level as i32, Ordering::Release);
            }
        }
        drop(guard);
    }

    /// Bulk insert for initial loads: in-place neighbor updates under spin
    /// locks, heuristic pruning, no EBR traffic.
    ///
    /// Multiple bulk inserters may run in parallel, but the caller must
    /// guarantee no concurrent search or streaming-insert traffic.
    pub fn insert_bulk(&self, vector: &[f32], id: u32) {
        assert!(
            (id as usize) < self.max_elements,
            "id {id} beyond max_elements {}",
            self.max_elements
        );
        assert_eq!(vector.len(), self.dim, "vector length != index dimension");

        let level = self.random_level();
        // SAFETY: unique id per caller contract; bulk mode excludes readers
        // that could observe the slot before linking.
        unsafe { self.vectors.write(id as usize, vector) };
        self.node(id).init(level);

        let mut curr_max = self.max_layer.load(Ordering::Acquire);
        if curr_max == -1 {
            let _ep = self.ep_lock.lock();
            if self.max_layer.load(Ordering::Acquire) == -1 {
                self.entry_point.store(id, Ordering::Release);
                self.max_layer.store(level as i32, Ordering::Release);
                return;
            }
            curr_max = self.max_layer.load(Ordering::Acquire);
        }

        let query = self.vector(id);
        let entry = self.entry_point.load(Ordering::Acquire);
        let (mut curr, _) = descend_layers(self, query, curr_max, level as i32, entry);

        VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.ensure_capacity(self.max_elements);
            let top = level.min(curr_max as usize);
            for layer in (0..=top).rev() {
                let candidates =
                    search_layer(self, query, curr, self.ef_construction, layer, &mut visited);
                let max_m = self.max_m(layer);
                for &(_, neighbor) in candidates.iter().take(self.m) {
                    if neighbor == id {
                        continue;
                    }
                    self.add_neighbor_inplace(id, layer, neighbor, max_m);
                    self.add_neighbor_inplace(neighbor, layer, id, max_m);
                }
                if let Some(&(_, best)) = candidates.first() {
                    curr = best;
                }
            }
        });

        if level as i32 > curr_max {
            let _ep = self.ep_lock.lock();
            if level as i32 > self.max_layer.load(Ordering::Acquire) {
                self.entry_point.store(id, Ordering::Release);
                self.max_layer.store(level as i32, Ordering::Release);
            }
        }
    }

    /// Append `new_id` to `node_id`'s list at `layer` under the node's spin
    /// lock, pruning back to `max_m` on overflow. Lists are allocated once
    /// at `max_m + 1` so the append itself never reallocates.
    fn add_neighbor_inplace(&self, node_id: u32, layer: usize, new_id: u32, max_m: usize) {
        if layer >= HNSW_MAX_LAYERS {
            return;
        }
        let node = self.node(node_id);
        let _lock = node.lock.lock();

        let slot = &node.links[layer];
        let mut ptr = slot.load(Ordering::Relaxed);
        if ptr.is_null() {
            ptr = Box::into_raw(Box::new(NeighborList::with_capacity(max_m + 1)));
            slot.store(ptr, Ordering::Release);
        }
        // SAFETY: published lists live until the index drops; bulk mode has
        // no reclamation.
        let list = unsafe { &*ptr };

        if list.contains(new_id) {
            return;
        }
        list.push(new_id);
        if list.len() > max_m {
            self.prune_in_place(node_id, list, max_m);
        }
    }

    /// Heuristic neighbor selection, applied in place on bulk-load overflow.
    /// Keeps a candidate only if it is closer to the base node than to every
    /// neighbor already kept, then backfills the rejected ones in distance
    /// order until `max_m` are kept.
    fn prune_in_place(&self, node_id: u32, list: &NeighborList, max_m: usize) {
        let base = self.vector(node_id);
        let mut candidates: Vec<(f32, u32)> = list
            .iter()
            .map(|cid| (l2(base, self.vector(cid)), cid))
            .collect();
        candidates.sort_unstable_by(|a, b| {
            a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut selected: Vec<u32> = Vec::with_capacity(max_m);
        for &(dist_to_base, cid) in &candidates {
            if selected.len() >= max_m {
                break;
            }
            let diverse = selected
                .iter()
                .all(|&sid| l2(self.vector(cid), self.vector(sid)) >= dist_to_base);
            if diverse {
                selected.push(cid);
            }
        }

        if selected.len() < max_m {
            for &(_, cid) in &candidates {
                if selected.len() >= max_m {
                    break;
                }
                if !selected.contains(&cid) {
                    selected.push(cid);
                }
            }
        }

        list.overwrite(&selected);
    }

    /// Top-k search. Returns up to `k` (distance, id) pairs in ascending
    /// distance order; empty on an empty graph.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<(f32, u32)> {
        assert_eq!(query.len(), self.dim, "query length != index dimension");
        let guard = self.ebr.pin();

        let curr_max = self.max_layer.load(Ordering::Acquire);
        if curr_max < 0 || k == 0 {
            return Vec::new();
        }

        let entry = self.entry_point.load(Ordering::Acquire);
        let (curr, _) = descend_layers(self, query, curr_max, 0, entry);

        let ef = ef_search.max(k);
        let mut results = VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.ensure_capacity(self.max_elements);
            search_layer(self, query, curr, ef, 0, &mut visited)
        });
        drop(guard);

        results.truncate(k);
        results
    }
}
