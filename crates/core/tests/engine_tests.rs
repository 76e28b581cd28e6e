//! End-to-end engine scenarios: buffered and bulk inserts, merged search,
//! and behavior under concurrent read/write load.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use veloxann_core::distance::l2;
use veloxann_core::{EngineConfig, VectorEngine};

fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn exhaustive_topk(corpus: &[(u32, Vec<f32>)], query: &[f32], k: usize) -> Vec<u32> {
    let mut scored: Vec<(f32, u32)> = corpus
        .iter()
        .map(|(id, v)| (l2(query, v), *id))
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}

#[test]
fn empty_then_one() {
    let mut config = EngineConfig::new(4, 64);
    config.m = 4;
    config.ef_construction = 10;
    let engine = VectorEngine::new(config).unwrap();

    assert!(engine.search(&[0.0, 0.0, 0.0, 0.0], 5, 10).unwrap().is_empty());

    engine.insert(&[1.0, 2.0, 3.0, 4.0], 0).unwrap();
    let ids = engine.search(&[1.0, 2.0, 3.0, 4.0], 1, 10).unwrap();
    assert_eq!(ids, vec![0]);
}

#[test]
fn search_merges_graph_and_buffered_populations() {
    let dim = 8;
    let mut config = EngineConfig::new(dim, 1024);
    config.m = 8;
    config.ef_construction = 50;
    // Large buffer: streamed inserts stay buffered for the whole test.
    config.buffer_capacity = 10_000;
    let engine = VectorEngine::new(config).unwrap();

    // Population A into the graph via bulk load, clustered near the origin.
    let mut rng = SmallRng::seed_from_u64(31);
    for id in 0..100u32 {
        let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-0.5..0.5)).collect();
        engine.bulk_insert(&v, id).unwrap();
    }

    // Population B through the buffered path, clustered far away.
    for id in 100..200u32 {
        let mut v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-0.5..0.5)).collect();
        v[0] += 50.0;
        engine.insert(&v, id).unwrap();
    }
    assert_eq!(engine.queued_buffers(), 0, "buffer should not have rotated");

    // A query in cluster B must be answered from the buffered population.
    let mut query = vec![0.0f32; dim];
    query[0] = 50.0;
    let ids = engine.search(&query, 10, 50).unwrap();
    assert_eq!(ids.len(), 10);
    assert!(
        ids.iter().all(|&id| id >= 100),
        "expected only buffered ids near the far cluster, got {ids:?}"
    );

    // And a query at the origin from the graph population.
    let ids = engine.search(&vec![0.0f32; dim], 10, 50).unwrap();
    assert!(ids.iter().all(|&id| id < 100));
}

#[test]
fn concurrent_inserts_and_searches() {
    let dim = 8;
    let count = 2000usize;
    let writers = 4usize;
    let mut config = EngineConfig::new(dim, count);
    config.m = 12;
    config.ef_construction = 60;
    config.buffer_capacity = 128; // force rotations under load
    config.bg_threads = 2;
    let engine = VectorEngine::new(config).unwrap();

    let vectors = random_vectors(count, dim, 51);
    let queries = random_vectors(32, dim, 52);
    let per_writer = count / writers;

    std::thread::scope(|scope| {
        for w in 0..writers {
            let engine = &engine;
            let vectors = &vectors;
            scope.spawn(move || {
                for i in (w * per_writer)..((w + 1) * per_writer) {
                    engine.insert(&vectors[i], i as u32).unwrap();
                }
            });
        }
        for q in 0..4usize {
            let engine = &engine;
            let queries = &queries;
            scope.spawn(move || {
                for _ in 0..50 {
                    for query in &queries[q * 8..(q + 1) * 8] {
                        let ids = engine.search(query, 10, 80).unwrap();
                        assert!(ids.len() <= 10);
                        let distinct: HashSet<u32> = ids.iter().copied().collect();
                        assert_eq!(distinct.len(), ids.len(), "duplicate id in result");
                        for &id in &ids {
                            assert!((id as usize) < count);
                        }
                    }
                }
            });
        }
    });

    // Steady state: everything inserted, recall against ground truth.
    let corpus: Vec<(u32, Vec<f32>)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i as u32, v.clone()))
        .collect();
    let mut hits = 0usize;
    for query in &queries {
        let truth: HashSet<u32> = exhaustive_topk(&corpus, query, 10).into_iter().collect();
        let got = engine.search(query, 10, 200).unwrap();
        hits += got.iter().filter(|id| truth.contains(id)).count();
    }
    let recall = hits as f64 / (queries.len() * 10) as f64;
    assert!(recall >= 0.9, "recall@10 under concurrency = {recall}");

    engine.shutdown();
}

#[test]
fn bulk_then_stream() {
    let dim = 8;
    let bulk_count = 2000usize;
    let stream_count = 500usize;
    let total = bulk_count + stream_count;
    let mut config = EngineConfig::new(dim, total);
    config.m = 8;
    config.ef_construction = 40;
    config.buffer_capacity = 64;
    config.bg_threads = 2;
    let engine = VectorEngine::new(config).unwrap();

    let vectors = random_vectors(total, dim, 71);

    // Phase 1: exclusive bulk load.
    std::thread::scope(|scope| {
        for w in 0..4usize {
            let engine = &engine;
            let vectors = &vectors;
            scope.spawn(move || {
                let mut i = w;
                while i < bulk_count {
                    engine.bulk_insert(&vectors[i], i as u32).unwrap();
                    i += 4;
                }
            });
        }
    });

    // Phase 2: streaming inserts racing searches.
    std::thread::scope(|scope| {
        let engine_ref = &engine;
        let vectors_ref = &vectors;
        scope.spawn(move || {
            for i in bulk_count..total {
                engine_ref.insert(&vectors_ref[i], i as u32).unwrap();
            }
        });
        scope.spawn(move || {
            let queries = random_vectors(16, dim, 72);
            for _ in 0..40 {
                for query in &queries {
                    let ids = engine_ref.search(query, 10, 60).unwrap();
                    let distinct: HashSet<u32> = ids.iter().copied().collect();
                    assert_eq!(distinct.len(), ids.len());
                }
            }
        });
    });

    // Invariants on the final graph.
    let index = engine.index();
    assert!(index.max_layer() >= 0);
    let entry = index.entry_point();
    assert!(index.is_initialized(entry));

    // Layer-0 reachability: every reachable id is valid and initialized.
    let mut seen = HashSet::new();
    let mut frontier = vec![entry];
    seen.insert(entry);
    while let Some(id) = frontier.pop() {
        assert!((id as usize) < total);
        assert!(index.is_initialized(id));
        for n in index.neighbors_of(id, 0) {
            if seen.insert(n) {
                frontier.push(n);
            }
        }
    }
    // Pruning may orphan the odd node in the directed adjacency, but the
    // overwhelming majority of the graph must stay reachable.
    assert!(
        seen.len() >= (bulk_count * 9) / 10,
        "only {} of {bulk_count} bulk nodes reachable",
        seen.len()
    );

    // A search on the final state is sorted, distinct, and in range.
    let query = random_vectors(1, dim, 73).remove(0);
    let ids = engine.search(&query, 10, 120).unwrap();
    assert!(ids.len() <= 10);
    let distinct: HashSet<u32> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), ids.len());

    engine.shutdown();
}

#[test]
fn streamed_tail_survives_compaction() {
    let dim = 4;
    let mut config = EngineConfig::new(dim, 1024);
    config.m = 8;
    config.ef_construction = 40;
    config.buffer_capacity = 32;
    config.bg_threads = 1;
    let engine = VectorEngine::new(config).unwrap();

    let vectors = random_vectors(600, dim, 91);
    for (i, v) in vectors.iter().enumerate() {
        engine.insert(v, i as u32).unwrap();
    }

    // Wait for the compaction workers to drain the sealed queue.
    for _ in 0..500 {
        if engine.queued_buffers() == 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    assert_eq!(engine.queued_buffers(), 0);

    // Every id is findable by querying its own vector.
    for probe in [0u32, 100, 317, 599] {
        let ids = engine.search(&vectors[probe as usize], 1, 50).unwrap();
        assert_eq!(ids, vec![probe], "id {probe} lost after compaction");
    }
}
