//! The HNSW graph.
//!
//! Standard hierarchical navigable-small-world construction: every node gets
//! a random top layer from an exponential distribution, inserts wire it to a
//! diversity-pruned neighborhood on each layer from the top down, and search
//! greedily descends the upper layers before running a beam search over
//! layer 0.
//!
//! Deviations from the textbook algorithm, all driven by the database on
//! top: nodes carry sparse u64 labels and own their vectors, deletions are
//! soft (deleted nodes keep routing searches but are never emitted), a hard
//! capacity bound turns into a typed error the caller resolves by rebuild,
//! and layer-0 search takes an admission predicate that filters results
//! without pruning traversal.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ann::{AdmissionPredicate, AnnError, AnnIndex, Neighbor};
use crate::model::VectorId;
use crate::simd::l2_squared;

use super::node::Node;
use super::visited::VisitedSet;

/// Max neighbors per upper layer.
pub const DEFAULT_M: usize = 16;

/// Beam width while building connections.
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Floor on the search beam width; the effective width is `max(k, this)`.
pub const DEFAULT_EF_SEARCH: usize = 50;

/// Random layers above this are clamped; with m = 16 the probability of even
/// reaching it is vanishing.
const MAX_LAYER_CAP: usize = 31;

/// Traversal frontier entry (min-heap: nearest first).
#[derive(Clone, Copy)]
struct Candidate {
    slot: usize,
    distance: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result-set entry (max-heap: worst first, so `pop` evicts it).
#[derive(Clone, Copy)]
struct Hit {
    slot: usize,
    distance: f32,
}

impl PartialEq for Hit {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Hit {}

impl Ord for Hit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Hit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// HNSW index over squared-L2 space, implementing [`AnnIndex`].
#[derive(Debug)]
pub struct HnswIndex {
    pub(super) nodes: Vec<Node>,
    pub(super) label_to_slot: HashMap<VectorId, usize>,
    pub(super) entry_point: Option<usize>,
    pub(super) max_layer: usize,
    pub(super) m: usize,
    pub(super) m0: usize,
    pub(super) ml: f64,
    pub(super) ef_construction: usize,
    pub(super) dim: usize,
    pub(super) capacity: usize,
    pub(super) deleted_count: usize,
    rng: StdRng,
}

impl HnswIndex {
    /// Like [`AnnIndex::with_capacity`] but with a fixed RNG seed, for
    /// deterministic graphs in tests and benchmarks.
    pub fn with_capacity_and_seed(dim: usize, capacity: usize, seed: u64) -> Self {
        Self::assemble(dim, capacity, DEFAULT_M, DEFAULT_EF_CONSTRUCTION, seed)
    }

    pub(super) fn assemble(
        dim: usize,
        capacity: usize,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> Self {
        Self {
            nodes: Vec::new(),
            label_to_slot: HashMap::new(),
            entry_point: None,
            max_layer: 0,
            m,
            m0: m * 2,
            ml: 1.0 / (m as f64).ln(),
            ef_construction,
            dim,
            capacity,
            deleted_count: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Nodes that answer searches (total minus soft-deleted).
    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.deleted_count
    }

    /// Live labels in unspecified order.
    pub fn live_labels(&self) -> Vec<VectorId> {
        self.nodes
            .iter()
            .filter(|n| !n.deleted)
            .map(|n| n.label)
            .collect()
    }

    #[inline]
    fn distance(&self, query: &[f32], slot: usize) -> f32 {
        l2_squared(query, &self.nodes[slot].vector)
    }

    fn random_layer(&mut self) -> usize {
        let r: f64 = self.rng.gen::<f64>().max(f64::MIN_POSITIVE);
        ((-r.ln() * self.ml).floor() as usize).min(MAX_LAYER_CAP)
    }

    /// Beam search on one layer from the given entry slots.
    ///
    /// Traversal covers every reachable node; `emit` decides which visited
    /// nodes may enter the result set. Keeping those concerns separate is
    /// what makes filtered search work: a node that fails the predicate
    /// still routes the walk toward nodes that pass it. Returns up to `ef`
    /// hits in ascending distance order.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[usize],
        ef: usize,
        layer: usize,
        emit: Option<&dyn Fn(usize) -> bool>,
    ) -> Vec<(usize, f32)> {
        let mut visited = VisitedSet::acquire(self.nodes.len());
        let reserve = ef.min(self.nodes.len()) + 1;
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::with_capacity(reserve);
        let mut results: BinaryHeap<Hit> = BinaryHeap::with_capacity(reserve);

        let admits = |slot: usize| emit.map_or(true, |f| f(slot));

        for &entry in entries {
            if !visited.insert(entry) {
                continue;
            }
            let distance = self.distance(query, entry);
            frontier.push(Candidate {
                slot: entry,
                distance,
            });
            if admits(entry) {
                results.push(Hit {
                    slot: entry,
                    distance,
                });
            }
        }

        while let Some(current) = frontier.pop() {
            let worst = results
                .peek()
                .map(|hit| hit.distance)
                .unwrap_or(f32::INFINITY);
            if results.len() >= ef && current.distance > worst {
                break;
            }

            for &neighbor in self.nodes[current.slot].neighbors(layer) {
                let slot = neighbor as usize;
                if !visited.insert(slot) {
                    continue;
                }
                let distance = self.distance(query, slot);
                let worst = results
                    .peek()
                    .map(|hit| hit.distance)
                    .unwrap_or(f32::INFINITY);
                if results.len() < ef || distance < worst {
                    frontier.push(Candidate { slot, distance });
                    if admits(slot) {
                        results.push(Hit { slot, distance });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<(usize, f32)> = results
            .into_iter()
            .map(|hit| (hit.slot, hit.distance))
            .collect();
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        out
    }

    /// Greedy single-step descent from `top_layer` down to (exclusive)
    /// `bottom_layer`, returning the entry slot for the next phase.
    fn greedy_descent(
        &self,
        query: &[f32],
        mut current: usize,
        top_layer: usize,
        bottom_layer: usize,
    ) -> usize {
        for layer in (bottom_layer + 1..=top_layer).rev() {
            if let Some(&(best, _)) = self.search_layer(query, &[current], 1, layer, None).first() {
                current = best;
            }
        }
        current
    }

    /// Diversity-preserving neighbor selection: a candidate is kept only if
    /// it is closer to the base point than to every already-kept neighbor,
    /// so the kept set spans directions instead of clustering. Falls back to
    /// nearest-first to fill up to `m`.
    fn select_neighbors(&self, candidates: &[(usize, f32)], m: usize) -> Vec<(usize, f32)> {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        let mut kept: Vec<(usize, f32)> = Vec::with_capacity(m);
        for &(slot, distance) in &sorted {
            if kept.len() >= m {
                break;
            }
            let vector = &self.nodes[slot].vector;
            let diverse = kept
                .iter()
                .all(|&(kept_slot, _)| l2_squared(vector, &self.nodes[kept_slot].vector) >= distance);
            if diverse {
                kept.push((slot, distance));
            }
        }

        if kept.len() < m {
            for &(slot, distance) in &sorted {
                if kept.len() >= m {
                    break;
                }
                if !kept.iter().any(|&(s, _)| s == slot) {
                    kept.push((slot, distance));
                }
            }
        }

        kept
    }

    /// Fallback entry point when the node being rewired currently *is* the
    /// entry point: the highest node among the others.
    fn alternative_entry(&self, excluding: usize) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(slot, _)| *slot != excluding)
            .max_by_key(|(_, node)| node.top_layer())
            .map(|(slot, _)| slot)
    }

    /// Wire `slot` into the graph on layers `0..=top_layer`, assuming its
    /// neighbor lists are empty. Shared by fresh inserts and in-place
    /// replacement of an existing label.
    fn link(&mut self, slot: usize) {
        let top_layer = self.nodes[slot].top_layer();

        let entry = match self.entry_point {
            None => {
                self.entry_point = Some(slot);
                self.max_layer = top_layer;
                return;
            }
            Some(entry) if entry == slot => match self.alternative_entry(slot) {
                Some(alt) => alt,
                None => return, // only node in the graph
            },
            Some(entry) => entry,
        };

        let query = self.nodes[slot].vector.clone();
        let start_layer = top_layer.min(self.max_layer);
        let mut current = self.greedy_descent(&query, entry, self.max_layer, start_layer);

        for layer in (0..=start_layer).rev() {
            let m_layer = if layer == 0 { self.m0 } else { self.m };

            let candidates: Vec<(usize, f32)> = self
                .search_layer(&query, &[current], self.ef_construction, layer, None)
                .into_iter()
                .filter(|&(s, _)| s != slot)
                .collect();

            let neighbors = self.select_neighbors(&candidates, m_layer);
            self.nodes[slot].layers[layer] = neighbors.iter().map(|&(s, _)| s as u32).collect();
            for &(neighbor_slot, _) in &neighbors {
                self.add_reverse_edge(neighbor_slot, layer, slot, m_layer);
            }

            if let Some(&(first, _)) = candidates.first() {
                current = first;
            }
        }

        if top_layer > self.max_layer {
            self.max_layer = top_layer;
            self.entry_point = Some(slot);
        }
    }

    /// Add the back edge `from → to`, re-pruning `from`'s neighborhood when
    /// it overflows the per-layer budget.
    fn add_reverse_edge(&mut self, from: usize, layer: usize, to: usize, m_layer: usize) {
        if self.nodes[from].neighbors(layer).contains(&(to as u32)) {
            return;
        }
        if self.nodes[from].neighbors(layer).len() < m_layer {
            self.nodes[from].layers[layer].push(to as u32);
            return;
        }

        let base = self.nodes[from].vector.clone();
        let merged: Vec<(usize, f32)> = self.nodes[from]
            .neighbors(layer)
            .iter()
            .map(|&s| s as usize)
            .chain(std::iter::once(to))
            .map(|s| (s, l2_squared(&base, &self.nodes[s].vector)))
            .collect();
        let pruned = self.select_neighbors(&merged, m_layer);
        self.nodes[from].layers[layer] = pruned.iter().map(|&(s, _)| s as u32).collect();
    }

    /// Re-add of an existing label. Same vector: a revival/no-op, the
    /// node's edges are still valid (this keeps snapshot reloads from
    /// perturbing the graph). New vector: rebuild the node's edges.
    fn replace(&mut self, slot: usize, vector: &[f32]) {
        if self.nodes[slot].deleted {
            self.nodes[slot].deleted = false;
            self.deleted_count -= 1;
        }
        if self.nodes[slot].vector.as_slice() == vector {
            return;
        }
        self.nodes[slot].vector = vector.to_vec();
        for layer in &mut self.nodes[slot].layers {
            layer.clear();
        }
        self.link(slot);
    }
}

impl AnnIndex for HnswIndex {
    fn with_capacity(dim: usize, capacity: usize) -> Self {
        Self::assemble(
            dim,
            capacity,
            DEFAULT_M,
            DEFAULT_EF_CONSTRUCTION,
            rand::random(),
        )
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn element_count(&self) -> usize {
        self.nodes.len()
    }

    fn add_point(&mut self, vector: &[f32], label: VectorId) -> Result<(), AnnError> {
        if vector.len() != self.dim {
            return Err(AnnError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        if let Some(&slot) = self.label_to_slot.get(&label) {
            self.replace(slot, vector);
            return Ok(());
        }

        if self.nodes.len() >= self.capacity {
            return Err(AnnError::CapacityExhausted {
                capacity: self.capacity,
            });
        }

        let top_layer = self.random_layer();
        let slot = self.nodes.len();
        self.nodes.push(Node::new(label, vector.to_vec(), top_layer));
        self.label_to_slot.insert(label, slot);
        self.link(slot);
        Ok(())
    }

    fn mark_deleted(&mut self, label: VectorId) -> Result<(), AnnError> {
        let slot = *self
            .label_to_slot
            .get(&label)
            .ok_or(AnnError::UnknownLabel(label))?;
        if !self.nodes[slot].deleted {
            self.nodes[slot].deleted = true;
            self.deleted_count += 1;
        }
        Ok(())
    }

    fn search_knn(
        &self,
        query: &[f32],
        k: usize,
        admit: Option<&dyn AdmissionPredicate>,
    ) -> Vec<Neighbor> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 || query.len() != self.dim {
            return Vec::new();
        }

        // Upper layers route unfiltered: hub nodes may themselves be
        // deleted or inadmissible and still point the right way.
        let current = self.greedy_descent(query, entry, self.max_layer, 0);

        let emit = |slot: usize| -> bool {
            let node = &self.nodes[slot];
            !node.deleted && admit.map_or(true, |p| p.is_admitted(node.label))
        };
        let ef = k.max(DEFAULT_EF_SEARCH);
        let found = self.search_layer(query, &[current], ef, 0, Some(&emit));

        let mut out: Vec<Neighbor> = found
            .into_iter()
            .take(k)
            .map(|(slot, distance)| Neighbor {
                label: self.nodes[slot].label,
                distance,
            })
            .collect();
        // Contract: heap-drain order, worst first.
        out.reverse();
        out
    }

    fn save_into(&self, writer: &mut dyn std::io::Write) -> std::io::Result<()> {
        self.serialize_into(writer)
    }

    fn load_from(reader: &mut dyn std::io::Read) -> Result<Self, AnnError> {
        Self::deserialize_from(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_vector(dim: usize, rng: &mut StdRng) -> Vec<f32> {
        (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect()
    }

    fn build_index(count: usize, dim: usize, seed: u64) -> (HnswIndex, Vec<Vec<f32>>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let vectors: Vec<Vec<f32>> = (0..count).map(|_| random_vector(dim, &mut rng)).collect();
        let mut index = HnswIndex::with_capacity_and_seed(dim, count, seed);
        for (i, v) in vectors.iter().enumerate() {
            index.add_point(v, i as VectorId).unwrap();
        }
        (index, vectors)
    }

    fn ascending(results: &[Neighbor]) -> Vec<Neighbor> {
        let mut out = results.to_vec();
        out.reverse();
        out
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = HnswIndex::with_capacity_and_seed(8, 16, 1);
        assert!(index.search_knn(&[0.0; 8], 5, None).is_empty());
        assert_eq!(index.element_count(), 0);
    }

    #[test]
    fn exact_match_ranks_first() {
        let (index, vectors) = build_index(200, 16, 7);
        for probe in [0usize, 57, 199] {
            let results = ascending(&index.search_knn(&vectors[probe], 1, None));
            assert_eq!(results[0].label, probe as VectorId);
            assert!(results[0].distance < 1e-6);
        }
    }

    #[test]
    fn results_are_worst_first_and_bounded_by_k() {
        let (index, vectors) = build_index(100, 8, 3);
        let results = index.search_knn(&vectors[0], 10, None);
        assert_eq!(results.len(), 10);
        for pair in results.windows(2) {
            assert!(
                pair[0].distance >= pair[1].distance,
                "drain order must be descending"
            );
        }
    }

    #[test]
    fn k_larger_than_population_returns_everything() {
        let (index, _) = build_index(10, 4, 11);
        let results = index.search_knn(&[0.0; 4], 100, None);
        assert_eq!(results.len(), 10);
    }

    #[test]
    fn recall_against_brute_force() {
        let (index, vectors) = build_index(1_000, 32, 42);
        let mut rng = StdRng::seed_from_u64(99);
        let k = 10;
        let mut total_recall = 0.0;
        for _ in 0..10 {
            let query = random_vector(32, &mut rng);
            let mut truth: Vec<(usize, f32)> = vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (i, l2_squared(&query, v)))
                .collect();
            truth.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            let truth_ids: std::collections::HashSet<usize> =
                truth.iter().take(k).map(|&(i, _)| i).collect();

            let got: std::collections::HashSet<usize> = index
                .search_knn(&query, k, None)
                .iter()
                .map(|n| n.label as usize)
                .collect();
            total_recall += truth_ids.intersection(&got).count() as f64 / k as f64;
        }
        let recall = total_recall / 10.0;
        assert!(recall > 0.8, "recall@10 too low: {recall:.2}");
    }

    #[test]
    fn capacity_is_enforced() {
        let mut index = HnswIndex::with_capacity_and_seed(4, 2, 5);
        index.add_point(&[0.0; 4], 1).unwrap();
        index.add_point(&[1.0; 4], 2).unwrap();
        let err = index.add_point(&[2.0; 4], 3).unwrap_err();
        assert!(matches!(err, AnnError::CapacityExhausted { capacity: 2 }));

        // Replacing an existing label does not consume capacity.
        index.add_point(&[9.0; 4], 1).unwrap();
        assert_eq!(index.element_count(), 2);
    }

    #[test]
    fn deleted_nodes_never_surface() {
        let (mut index, vectors) = build_index(50, 8, 13);
        index.mark_deleted(17).unwrap();
        let results = index.search_knn(&vectors[17], 50, None);
        assert!(results.iter().all(|n| n.label != 17));
        assert_eq!(index.live_count(), 49);

        assert!(matches!(
            index.mark_deleted(1_000),
            Err(AnnError::UnknownLabel(1_000))
        ));
        // Idempotent on an already-deleted label.
        index.mark_deleted(17).unwrap();
        assert_eq!(index.live_count(), 49);
    }

    #[test]
    fn replacing_a_label_moves_it() {
        let (mut index, vectors) = build_index(50, 8, 21);
        let target = vec![5.0; 8];
        index.add_point(&target, 30).unwrap();

        let results = ascending(&index.search_knn(&target, 1, None));
        assert_eq!(results[0].label, 30);
        assert!(results[0].distance < 1e-6);

        // Its old position no longer answers for it.
        let near_old = ascending(&index.search_knn(&vectors[30], 1, None));
        assert_ne!(near_old[0].label, 30);
    }

    #[test]
    fn deleted_label_is_revived_by_re_add() {
        let (mut index, _) = build_index(20, 4, 31);
        index.mark_deleted(5).unwrap();
        assert_eq!(index.live_count(), 19);

        let v = vec![3.0; 4];
        index.add_point(&v, 5).unwrap();
        assert_eq!(index.live_count(), 20);
        let results = ascending(&index.search_knn(&v, 1, None));
        assert_eq!(results[0].label, 5);
    }

    #[test]
    fn admission_predicate_restricts_results() {
        let (index, vectors) = build_index(200, 8, 17);
        let even = |label: VectorId| label % 2 == 0;
        let results = index.search_knn(&vectors[42], 10, Some(&even));
        assert!(!results.is_empty());
        assert!(results.iter().all(|n| n.label % 2 == 0));
        assert_eq!(ascending(&results)[0].label, 42);
    }

    #[test]
    fn tiny_admitted_set_is_still_found() {
        let (index, vectors) = build_index(300, 8, 23);
        let only = |label: VectorId| label == 123;
        let results = index.search_knn(&vectors[0], 5, Some(&only));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, 123);
    }

    #[test]
    fn rejecting_predicate_yields_empty() {
        let (index, vectors) = build_index(50, 8, 29);
        let none = |_: VectorId| false;
        assert!(index.search_knn(&vectors[0], 5, Some(&none)).is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = HnswIndex::with_capacity_and_seed(8, 4, 1);
        assert!(matches!(
            index.add_point(&[0.0; 3], 1),
            Err(AnnError::DimensionMismatch {
                expected: 8,
                actual: 3
            })
        ));
    }
}
