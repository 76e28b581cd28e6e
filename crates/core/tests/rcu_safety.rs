//! Reader/writer safety of the RCU neighbor-list discipline: a held
//! snapshot must stay stable and dereferenceable while writers republish
//! and retire lists underneath it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use veloxann_core::ebr::EbrManager;
use veloxann_core::HnswIndex;

#[test]
fn held_snapshot_survives_writer_churn() {
    let ebr = EbrManager::new();
    let index = Arc::new(HnswIndex::new(4, 8, 4, 10, Arc::clone(&ebr)));
    index.insert(&[0.0; 4], 0);

    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let index = Arc::clone(&index);
        let ebr = Arc::clone(&ebr);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut appended = 1u32;
            while !stop.load(Ordering::Relaxed) && appended < 2_000 {
                // Re-pin periodically so the writer's epoch keeps advancing.
                let guard = ebr.pin();
                for _ in 0..50 {
                    index.node(0).add_neighbor_rcu(0, appended, &ebr, &guard);
                    appended += 1;
                }
                drop(guard);
                ebr.collect();
            }
        })
    };

    for _ in 0..20 {
        let guard = ebr.pin();
        if let Some(list) = index.node(0).neighbors(0, &guard) {
            let before = list.to_vec();
            // Hold the snapshot across writer churn.
            std::thread::sleep(Duration::from_millis(10));
            assert_eq!(list.to_vec(), before, "held snapshot changed");
        }
        drop(guard);
    }

    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();

    // After the churn, the final list holds every appended id exactly once.
    let guard = ebr.pin();
    let list = index.node(0).neighbors(0, &guard).unwrap();
    let ids = list.to_vec();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), ids.len(), "duplicate ids in final list");
}
