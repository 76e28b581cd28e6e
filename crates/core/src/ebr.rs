//! Epoch-based reclamation for RCU-published neighbor lists.
//!
//! Three-epoch scheme: writers retire replaced objects tagged with the
//! global epoch at retirement; the epoch advances only once every pinned
//! reader has caught up with it, so at most two epochs (current and
//! previous) can have live readers. The bucket two epochs behind is
//! therefore safe to reclaim.
//!
//! Read-side cost is two thread-local atomic stores on the outermost
//! [`EbrManager::pin`] and one on unpin. Writers batch retirements into a
//! thread-local list and only touch shared state every
//! [`EBR_LOCAL_RETIRE_THRESHOLD`] retirements.

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{EBR_EPOCH_BUCKETS, EBR_LOCAL_RETIRE_THRESHOLD};

/// A deferred deallocation: type-erased pointer plus its deleter.
struct Retired {
    ptr: *mut u8,
    deleter: unsafe fn(*mut u8),
    retire_epoch: u64,
}

// A Retired entry is the unique owner of its allocation from the moment the
// pointer is unpublished until the deleter runs.
unsafe impl Send for Retired {}

/// Per-thread epoch record scanned during epoch advancement.
#[derive(Default)]
struct Participant {
    local_epoch: AtomicU64,
    pin_count: AtomicU32,
    active: AtomicBool,
}

/// Epoch-based reclamation manager shared by every component operating on
/// one graph.
///
/// Threads register themselves on first use and unregister when they exit.
/// All components of an engine share a single manager via `Arc`.
pub struct EbrManager {
    global_epoch: AtomicU64,
    participants: Mutex<Vec<Arc<CachePadded<Participant>>>>,
    retired: [Mutex<Vec<Retired>>; EBR_EPOCH_BUCKETS],
}

/// RAII read-side critical section. Pins the current thread's epoch until
/// dropped; supports nesting (only the outermost guard publishes).
pub struct EbrGuard {
    manager: Arc<EbrManager>,
    // Guards are bound to the pinning thread's participant record.
    _not_send: PhantomData<*mut ()>,
}

struct ThreadSlot {
    manager: Arc<EbrManager>,
    participant: Arc<CachePadded<Participant>>,
    local_retired: Vec<Retired>,
}

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        self.manager.flush(&mut self.local_retired);
        self.manager.unregister(&self.participant);
        self.manager.try_advance_and_reclaim();
    }
}

thread_local! {
    static SLOTS: RefCell<Vec<ThreadSlot>> = const { RefCell::new(Vec::new()) };
}

impl EbrManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            global_epoch: AtomicU64::new(1),
            participants: Mutex::new(Vec::new()),
            retired: Default::default(),
        })
    }

    /// Enter a read-side critical section.
    ///
    /// Any pointer loaded from an RCU-published location while the returned
    /// guard is alive stays valid until the guard is dropped.
    pub fn pin(self: &Arc<Self>) -> EbrGuard {
        self.with_slot(|slot| {
            let p = &slot.participant;
            let prev = p.pin_count.load(Ordering::Relaxed);
            if prev == 0 {
                let epoch = slot.manager.global_epoch.load(Ordering::Acquire);
                p.local_epoch.store(epoch, Ordering::Release);
                p.active.store(true, Ordering::Release);
            }
            p.pin_count.store(prev + 1, Ordering::Relaxed);
        });
        EbrGuard {
            manager: Arc::clone(self),
            _not_send: PhantomData,
        }
    }

    /// Schedule `ptr` to be dropped as a `Box<T>` once no reader that could
    /// have observed it remains pinned.
    ///
    /// # Safety
    /// `ptr` must originate from `Box::into_raw` and must already be
    /// unpublished: no thread may load it after this call returns.
    pub unsafe fn defer_drop<T: Send>(self: &Arc<Self>, ptr: *mut T) {
        unsafe fn drop_box<T>(p: *mut u8) {
            drop(Box::from_raw(p as *mut T));
        }
        self.with_slot(|slot| {
            let epoch = slot.manager.global_epoch.load(Ordering::Acquire);
            slot.local_retired.push(Retired {
                ptr: ptr as *mut u8,
                deleter: drop_box::<T>,
                retire_epoch: epoch,
            });
            if slot.local_retired.len() >= EBR_LOCAL_RETIRE_THRESHOLD {
                let manager = Arc::clone(&slot.manager);
                manager.flush(&mut slot.local_retired);
                manager.try_advance_and_reclaim();
            }
        });
    }

    /// Force a flush of this thread's retired list plus one advance/reclaim
    /// attempt. Background threads call this periodically.
    pub fn collect(self: &Arc<Self>) {
        self.with_slot(|slot| {
            let manager = Arc::clone(&slot.manager);
            manager.flush(&mut slot.local_retired);
        });
        self.try_advance_and_reclaim();
    }

    pub fn current_epoch(&self) -> u64 {
        self.global_epoch.load(Ordering::Acquire)
    }

    fn with_slot<R>(self: &Arc<Self>, f: impl FnOnce(&mut ThreadSlot) -> R) -> R {
        SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            let pos = match slots.iter().position(|s| Arc::ptr_eq(&s.manager, self)) {
                Some(pos) => pos,
                None => {
                    let participant = Arc::new(CachePadded::new(Participant::default()));
                    self.participants.lock().push(Arc::clone(&participant));
                    slots.push(ThreadSlot {
                        manager: Arc::clone(self),
                        participant,
                        local_retired: Vec::with_capacity(EBR_LOCAL_RETIRE_THRESHOLD),
                    });
                    slots.len() - 1
                }
            };
            f(&mut slots[pos])
        })
    }

    fn flush(&self, local: &mut Vec<Retired>) {
        if local.is_empty() {
            return;
        }
        let mut grouped: [Vec<Retired>; EBR_EPOCH_BUCKETS] = Default::default();
        for entry in local.drain(..) {
            grouped[bucket_index(entry.retire_epoch)].push(entry);
        }
        for (i, group) in grouped.into_iter().enumerate() {
            if !group.is_empty() {
                self.retired[i].lock().extend(group);
            }
        }
    }

    fn try_advance_and_reclaim(&self) {
        let observed = self.global_epoch.load(Ordering::Acquire);
        if self.readers_caught_up(observed) {
            let _ = self.global_epoch.compare_exchange(
                observed,
                observed + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        let current = self.global_epoch.load(Ordering::Acquire);
        if current < 2 {
            return;
        }
        self.reclaim_bucket(current - 2);
    }

    /// True if every currently active reader has published the observed
    /// epoch, i.e. no reader can still hold an object retired two epochs ago.
    fn readers_caught_up(&self, observed: u64) -> bool {
        let participants = self.participants.lock();
        participants.iter().all(|p| {
            !p.active.load(Ordering::Acquire)
                || p.local_epoch.load(Ordering::Acquire) == observed
        })
    }

    fn reclaim_bucket(&self, safe_epoch: u64) {
        let mut bucket = self.retired[bucket_index(safe_epoch)].lock();
        // Epoch collisions across the modulo can leave newer entries in this
        // bucket; only entries at or below the safe epoch are freed.
        bucket.retain(|entry| {
            if entry.retire_epoch <= safe_epoch {
                unsafe { (entry.deleter)(entry.ptr) };
                false
            } else {
                true
            }
        });
    }

    fn unregister(&self, participant: &Arc<CachePadded<Participant>>) {
        let mut participants = self.participants.lock();
        if let Some(pos) = participants.iter().position(|p| Arc::ptr_eq(p, participant)) {
            participants.swap_remove(pos);
        }
    }
}

impl Drop for EbrManager {
    fn drop(&mut self) {
        // No Arc holder left, so no reader can be pinned; everything still
        // queued is safe to free.
        for bucket in &self.retired {
            let mut bucket = bucket.lock();
            for entry in bucket.drain(..) {
                unsafe { (entry.deleter)(entry.ptr) };
            }
        }
    }
}

impl Drop for EbrGuard {
    fn drop(&mut self) {
        let manager = Arc::clone(&self.manager);
        manager.with_slot(|slot| {
            let p = &slot.participant;
            let prev = p.pin_count.load(Ordering::Relaxed);
            if prev <= 1 {
                p.pin_count.store(0, Ordering::Relaxed);
                p.active.store(false, Ordering::Release);
                if slot.local_retired.len() >= EBR_LOCAL_RETIRE_THRESHOLD / 2 {
                    let manager = Arc::clone(&slot.manager);
                    manager.flush(&mut slot.local_retired);
                }
            } else {
                p.pin_count.store(prev - 1, Ordering::Relaxed);
            }
        });
    }
}

#[inline]
fn bucket_index(epoch: u64) -> usize {
    (epoch % EBR_EPOCH_BUCKETS as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Box whose Drop raises a flag, letting tests observe reclamation.
    struct FlagBox(Arc<AtomicBool>);

    impl Drop for FlagBox {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn retire_flagged(ebr: &Arc<EbrManager>) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let ptr = Box::into_raw(Box::new(FlagBox(Arc::clone(&flag))));
        unsafe { ebr.defer_drop(ptr) };
        flag
    }

    fn collect_until(ebr: &Arc<EbrManager>, flag: &AtomicBool) -> bool {
        for _ in 0..100 {
            ebr.collect();
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        flag.load(Ordering::SeqCst)
    }

    #[test]
    fn test_collect_reclaims_after_two_epochs() {
        let ebr = EbrManager::new();
        let flag = retire_flagged(&ebr);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(collect_until(&ebr, &flag));
    }

    #[test]
    fn test_pinned_reader_blocks_reclamation() {
        let ebr = EbrManager::new();
        let (pinned_tx, pinned_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let reader = {
            let ebr = Arc::clone(&ebr);
            std::thread::spawn(move || {
                let guard = ebr.pin();
                pinned_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                drop(guard);
            })
        };
        pinned_rx.recv().unwrap();

        // Retire while the reader is pinned; it must not be freed yet.
        let flag = retire_flagged(&ebr);
        for _ in 0..10 {
            ebr.collect();
        }
        assert!(!flag.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        reader.join().unwrap();
        assert!(collect_until(&ebr, &flag));
    }

    #[test]
    fn test_nested_pins() {
        let ebr = EbrManager::new();
        let outer = ebr.pin();
        let inner = ebr.pin();
        drop(inner);

        // Still pinned: retirement must survive collect attempts.
        let flag = retire_flagged(&ebr);
        for _ in 0..10 {
            ebr.collect();
        }
        assert!(!flag.load(Ordering::SeqCst));

        drop(outer);
        assert!(collect_until(&ebr, &flag));
    }

    #[test]
    fn test_epoch_advances_without_readers() {
        let ebr = EbrManager::new();
        let before = ebr.current_epoch();
        ebr.collect();
        ebr.collect();
        assert!(ebr.current_epoch() > before);
    }

    #[test]
    fn test_manager_drop_reclaims_pending() {
        let ebr = EbrManager::new();
        // Retire from a thread that exits immediately: its local list is
        // flushed into the global buckets on thread teardown, and this test
        // thread never registers a slot that would keep the manager alive.
        let flag = {
            let ebr = Arc::clone(&ebr);
            std::thread::spawn(move || retire_flagged(&ebr))
                .join()
                .unwrap()
        };
        drop(ebr);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_guard_tolerates_concurrent_retire_storm() {
        let ebr = EbrManager::new();
        let writer = {
            let ebr = Arc::clone(&ebr);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let ptr = Box::into_raw(Box::new(0u64));
                    unsafe { ebr.defer_drop(ptr) };
                }
                ebr.collect();
            })
        };
        for _ in 0..1_000 {
            let _guard = ebr.pin();
        }
        writer.join().unwrap();
    }
}
