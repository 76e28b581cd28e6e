//! Flat write buffer: bounded, wait-free appends plus brute-force scans.
//!
//! Appends reserve a slot with one fetch_add, copy the payload, then commit
//! in slot order on a separate `published` counter. Readers acquire-load
//! `published`, so a slot is never observable before its payload is fully
//! written. Two counters instead of one: a single count published before the
//! memcpy would let a scan read a reserved-but-unwritten slot.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::distance::l2;
use crate::hnsw::TopK;
use crate::pool::FloatPool;

/// Bounded append-only buffer of (id, vector) pairs.
///
/// Cache-line aligned so the hot counters of adjacent buffers never share a
/// line.
#[repr(align(64))]
pub struct FlatWriteBuffer {
    data: FloatPool,
    ids: Box<[AtomicU32]>,
    /// Slot reservation counter (may exceed capacity on overflow).
    reserved: AtomicUsize,
    /// Number of fully written slots visible to readers.
    published: AtomicUsize,
    capacity: usize,
    dim: usize,
}

impl FlatWriteBuffer {
    pub fn new(capacity: usize, dim: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be positive");
        assert!(dim > 0, "dimension must be positive");
        let ids: Vec<AtomicU32> = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            data: FloatPool::new(capacity, dim),
            ids: ids.into_boxed_slice(),
            reserved: AtomicUsize::new(0),
            published: AtomicUsize::new(0),
            capacity,
            dim,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of published entries. Entries `[0, len)` are fully written.
    #[inline]
    pub fn len(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait-free append. Returns `false` when the buffer is full — the
    /// caller rotates in a fresh buffer; this one takes no further entries.
    pub fn append(&self, vector: &[f32], id: u32) -> bool {
        debug_assert_eq!(vector.len(), self.dim);
        let slot = self.reserved.fetch_add(1, Ordering::Relaxed);
        if slot >= self.capacity {
            return false;
        }

        // SAFETY: the fetch_add above hands this slot exclusively to this
        // thread, and the slot only becomes readable after the ordered
        // `published` store below.
        unsafe { self.data.write(slot, vector) };
        self.ids[slot].store(id, Ordering::Relaxed);

        // Commit in slot order so `published` always covers fully written
        // slots. Earlier reservations finish their copy first; the wait is
        // bounded by one memcpy per predecessor.
        while self.published.load(Ordering::Acquire) != slot {
            std::hint::spin_loop();
        }
        self.published.store(slot + 1, Ordering::Release);
        true
    }

    /// Borrow a published entry.
    #[inline]
    pub fn entry(&self, i: usize) -> (&[f32], u32) {
        debug_assert!(i < self.len());
        (self.data.get(i), self.ids[i].load(Ordering::Relaxed))
    }

    /// Linear scan of all published entries into the supplied bounded heap.
    pub fn brute_force_topk(&self, query: &[f32], heap: &mut TopK) {
        let count = self.len();
        for i in 0..count {
            let (vector, id) = self.entry(i);
            heap.push(l2(query, vector), id);
        }
    }
}
