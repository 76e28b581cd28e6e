//! Layer search primitives shared by insertion and query.
//!
//! `search_layer` is the greedy best-first expansion at one layer, driven by
//! a min-heap of frontier candidates and a bounded max-heap of results.
//! [`TopK`] is the same bounded max-heap exposed for result merging across
//! the write buffers and the graph.

use ordered_float::OrderedFloat;
use std::collections::{BinaryHeap, HashSet};

use crate::hnsw::index::HnswIndex;
use crate::hnsw::visited::VisitedSet;

/// A frontier entry: (negative distance, id).
/// BinaryHeap is a max-heap; negating the distance pops the closest first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A result entry: (distance, id). Max-heap by distance so the worst result
/// is cheap to evict.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded max-heap of the k closest (distance, id) pairs seen so far.
///
/// Ignores ids it has already accepted, so merging the same vector from a
/// write buffer and from the graph cannot produce duplicates.
pub struct TopK {
    heap: BinaryHeap<ResultEntry>,
    seen: HashSet<u32>,
    limit: usize,
}

impl TopK {
    pub fn new(limit: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(limit + 1),
            seen: HashSet::new(),
            limit,
        }
    }

    /// Offer one (distance, id) pair.
    pub fn push(&mut self, distance: f32, id: u32) {
        if self.limit == 0 {
            return;
        }
        if self.heap.len() >= self.limit {
            let worst = self.heap.peek().map_or(f32::MAX, |e| e.distance.0);
            if distance >= worst {
                return;
            }
        }
        if !self.seen.insert(id) {
            return;
        }
        self.heap.push(ResultEntry {
            distance: OrderedFloat(distance),
            id,
        });
        if self.heap.len() > self.limit {
            self.heap.pop();
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Consume the heap into an ascending-by-distance vector.
    pub fn into_sorted(self) -> Vec<(f32, u32)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.distance.0, e.id))
            .collect()
    }
}

/// Search a single layer starting from `entry`, returning the `ef` closest
/// ids in ascending distance order.
///
/// The caller must either hold an EBR guard for the duration of the call or
/// have exclusive bulk-load access to the graph; `visited` is cleared on
/// entry and must cover `max_elements` ids.
pub(crate) fn search_layer(
    index: &HnswIndex,
    query: &[f32],
    entry: u32,
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.clear();

    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst distance — avoids repeated heap peeks in the hot loop
    let mut worst_dist = f32::MAX;

    let entry_dist = index.distance_to(query, entry);
    visited.insert(entry);
    candidates.push(Candidate {
        neg_distance: OrderedFloat(-entry_dist),
        id: entry,
    });
    results.push(ResultEntry {
        distance: OrderedFloat(entry_dist),
        id: entry,
    });
    if results.len() >= ef {
        worst_dist = entry_dist;
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;

        // If the closest frontier node is farther than the worst result, stop
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        // SAFETY: covered by this function's caller contract (EBR guard or
        // exclusive bulk load).
        let Some(list) = (unsafe { index.node(candidate.id).neighbors_unprotected(layer) }) else {
            continue;
        };
        for neighbor in list.iter() {
            if !visited.insert(neighbor) {
                continue;
            }
            let dist = index.distance_to(query, neighbor);
            if results.len() < ef || dist < worst_dist {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor,
                });
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: neighbor,
                });
                if results.len() > ef {
                    results.pop();
                }
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Walk greedily from `from_layer` down to (but not into) `stop_layer`,
/// hopping to the closest neighbor at each layer until no hop improves the
/// distance. Returns the final position and its distance to the query.
///
/// Same caller contract as [`search_layer`].
pub(crate) fn descend_layers(
    index: &HnswIndex,
    query: &[f32],
    from_layer: i32,
    stop_layer: i32,
    entry: u32,
) -> (u32, f32) {
    let mut curr = entry;
    let mut curr_dist = index.distance_to(query, curr);
    for layer in ((stop_layer + 1)..=from_layer).rev() {
        loop {
            let mut changed = false;
            // SAFETY: covered by this function's caller contract.
            if let Some(list) = unsafe { index.node(curr).neighbors_unprotected(layer as usize) } {
                for neighbor in list.iter() {
                    let d = index.distance_to(query, neighbor);
                    if d < curr_dist {
                        curr_dist = d;
                        curr = neighbor;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }
    (curr, curr_dist)
}
