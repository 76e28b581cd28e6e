//! Graph node and neighbor-list primitives.
//!
//! A [`NeighborList`] is published by swapping a node's per-layer atomic
//! pointer. On the streaming path lists are immutable once published: a
//! writer builds a copy with the new edge appended, installs it with a CAS,
//! and hands the replaced list to EBR. On the bulk-load path lists are
//! mutated in place under the node's spin lock instead.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::HNSW_MAX_LAYERS;
use crate::ebr::{EbrGuard, EbrManager};

/// One layer's adjacency list: a length plus a fixed-capacity id array.
///
/// Ids are stored as relaxed atomics so that bulk-load readers racing an
/// in-place prune observe well-defined (if momentarily stale) values. On the
/// RCU path a list is never written again after publication.
pub struct NeighborList {
    len: AtomicU32,
    ids: Box<[AtomicU32]>,
}

impl NeighborList {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let ids: Vec<AtomicU32> = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            len: AtomicU32::new(0),
            ids: ids.into_boxed_slice(),
        }
    }

    /// Copy of `old` with `id` appended. Used by the RCU publish path.
    fn cloned_with(old: Option<&NeighborList>, id: u32) -> Self {
        let old_len = old.map_or(0, |l| l.len());
        let list = Self::with_capacity(old_len + 1);
        if let Some(old) = old {
            for i in 0..old_len {
                list.ids[i].store(old.get(i), Ordering::Relaxed);
            }
        }
        list.ids[old_len].store(id, Ordering::Relaxed);
        list.len.store(old_len as u32 + 1, Ordering::Relaxed);
        list
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.len.load(Ordering::Acquire) as usize).min(self.ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn get(&self, i: usize) -> u32 {
        self.ids[i].load(Ordering::Relaxed)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.iter().any(|n| n == id)
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    /// Append without growing. Bulk-load only, under the owning node's lock.
    pub(crate) fn push(&self, id: u32) {
        let len = self.len();
        debug_assert!(len < self.capacity());
        self.ids[len].store(id, Ordering::Relaxed);
        self.len.store(len as u32 + 1, Ordering::Release);
    }

    /// Replace the contents. Bulk-load only, under the owning node's lock.
    pub(crate) fn overwrite(&self, ids: &[u32]) {
        debug_assert!(ids.len() <= self.capacity());
        for (i, &id) in ids.iter().enumerate() {
            self.ids[i].store(id, Ordering::Relaxed);
        }
        self.len.store(ids.len() as u32, Ordering::Release);
    }
}

/// Short-hold spin lock protecting in-place neighbor updates during bulk load.
pub(crate) struct SpinLock {
    locked: AtomicBool,
}

pub(crate) struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl SpinLock {
    const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock(&self) -> SpinGuard<'_> {
        while self.locked.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
        SpinGuard { lock: self }
    }
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Per-vector graph record: one atomic neighbor-list pointer per layer, the
/// node's highest layer, and the bulk-load spin lock. Cache-line aligned so
/// hot nodes do not false-share.
///
/// A slot is alive only after [`Node::init`]; a node with top layer `L` has
/// non-null lists only on layers `0..=L`.
#[repr(align(64))]
pub struct Node {
    pub(crate) links: [AtomicPtr<NeighborList>; HNSW_MAX_LAYERS],
    top_layer: AtomicI32,
    pub(crate) lock: SpinLock,
}

impl Node {
    pub(crate) fn empty() -> Self {
        Self {
            links: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            top_layer: AtomicI32::new(-1),
            lock: SpinLock::new(),
        }
    }

    /// Bring the slot to life with its assigned highest layer. The caller
    /// must have written the node's vector into the pool first.
    pub(crate) fn init(&self, top_layer: usize) {
        self.top_layer.store(top_layer as i32, Ordering::Release);
    }

    /// Highest layer this node participates in, or -1 if uninitialized.
    pub fn top_layer(&self) -> i32 {
        self.top_layer.load(Ordering::Acquire)
    }

    /// Current neighbor list at `layer`, valid for the guard's lifetime.
    pub fn neighbors<'g>(&self, layer: usize, _guard: &'g EbrGuard) -> Option<&'g NeighborList> {
        // SAFETY: the caller's guard pins this thread's epoch, so a list
        // loaded here cannot be reclaimed before the guard drops.
        unsafe { self.neighbors_unprotected(layer) }
    }

    /// Current neighbor list at `layer` without an EBR guard.
    ///
    /// # Safety
    /// The caller must either be inside an EBR read-side critical section or
    /// hold exclusive bulk-load access to the graph; otherwise the list may
    /// be reclaimed while the reference is live.
    pub(crate) unsafe fn neighbors_unprotected<'a>(
        &self,
        layer: usize,
    ) -> Option<&'a NeighborList> {
        if layer >= HNSW_MAX_LAYERS {
            return None;
        }
        self.links[layer].load(Ordering::Acquire).as_ref()
    }

    /// Publish a copy of the layer's list with `id` appended, retiring the
    /// replaced list to EBR. Lock-free; loses CAS races and retries against
    /// the freshly observed list.
    pub fn add_neighbor_rcu(
        &self,
        layer: usize,
        id: u32,
        ebr: &Arc<EbrManager>,
        _guard: &EbrGuard,
    ) {
        if layer >= HNSW_MAX_LAYERS {
            return;
        }
        let slot = &self.links[layer];
        let mut old = slot.load(Ordering::Acquire);
        loop {
            // SAFETY: `old` was loaded while pinned (the caller's guard), so
            // it is not reclaimed for the duration of this read.
            let snapshot = unsafe { old.as_ref() };
            let new_ptr = Box::into_raw(Box::new(NeighborList::cloned_with(snapshot, id)));
            match slot.compare_exchange_weak(old, new_ptr, Ordering::Release, Ordering::Acquire) {
                Ok(prev) => {
                    if !prev.is_null() {
                        // SAFETY: `prev` is unpublished as of the successful
                        // CAS; only pinned readers can still hold it.
                        unsafe { ebr.defer_drop(prev) };
                    }
                    return;
                }
                Err(current) => {
                    // SAFETY: `new_ptr` was never published.
                    drop(unsafe { Box::from_raw(new_ptr) });
                    old = current;
                }
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for link in &self.links {
            let p = link.swap(ptr::null_mut(), Ordering::Relaxed);
            if !p.is_null() {
                // SAFETY: the index is being dropped, so no reader or writer
                // can still reach this published list.
                drop(unsafe { Box::from_raw(p) });
            }
        }
    }
}
