//! ANN bench: Recall@10 and QPS on synthetic data.
//!
//! Bulk-loads a uniform random corpus across all cores, then measures
//! single-threaded query throughput and recall against an exhaustive scan.
//!
//! Usage: cargo bench --bench recall

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use veloxann_core::distance::l2;
use veloxann_core::ebr::EbrManager;
use veloxann_core::HnswIndex;

const COUNT: usize = 20_000;
const DIM: usize = 32;
const M: usize = 16;
const EF_CONSTRUCTION: usize = 100;
const QUERIES: usize = 200;
const K: usize = 10;

fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn main() {
    let base = random_vectors(COUNT, DIM, 1);
    let queries = random_vectors(QUERIES, DIM, 2);

    let index = HnswIndex::new(DIM, COUNT, M, EF_CONSTRUCTION, EbrManager::new());
    let threads = std::thread::available_parallelism().map_or(4, |n| n.get());
    let next = AtomicUsize::new(0);

    let start = Instant::now();
    std::thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                if i >= COUNT {
                    break;
                }
                index.insert_bulk(&base[i], i as u32);
            });
        }
    });
    let build = start.elapsed();
    println!(
        "built {COUNT} x {DIM}d in {:.2}s ({:.0} inserts/s, {threads} threads)",
        build.as_secs_f64(),
        COUNT as f64 / build.as_secs_f64()
    );

    let ground_truth: Vec<HashSet<u32>> = queries
        .iter()
        .map(|q| {
            let mut scored: Vec<(f32, u32)> = base
                .iter()
                .enumerate()
                .map(|(i, v)| (l2(q, v), i as u32))
                .collect();
            scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            scored.into_iter().take(K).map(|(_, id)| id).collect()
        })
        .collect();

    for ef_search in [10, 50, 100, 200] {
        let start = Instant::now();
        let mut hits = 0usize;
        for (q, truth) in queries.iter().zip(&ground_truth) {
            let results = index.search(q, K, ef_search);
            hits += results
                .iter()
                .filter(|&&(_, id)| truth.contains(&id))
                .count();
        }
        let elapsed = start.elapsed();
        println!(
            "ef_search={ef_search:>4}  recall@{K}={:.4}  qps={:.0}",
            hits as f64 / (QUERIES * K) as f64,
            QUERIES as f64 / elapsed.as_secs_f64()
        );
    }
}
