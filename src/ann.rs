//! The capability contract the database requires from its ANN index.
//!
//! The engine treats the graph index as a best-effort accelerator whose
//! authoritative backing is the record store, so the whole surface is this
//! small trait: insert with caller-chosen labels, soft delete, k-NN search
//! with an optional admission predicate, and an opaque binary round-trip.
//! [`HnswIndex`](crate::hnsw::HnswIndex) is the production implementation;
//! tests substitute a brute-force fake.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::model::VectorId;

#[derive(Error, Debug)]
pub enum AnnError {
    #[error("index is full ({capacity} elements); rebuild with a larger capacity")]
    CapacityExhausted { capacity: usize },

    #[error("label {0} is not present in the index")]
    UnknownLabel(VectorId),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("malformed index blob: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One search hit: a live label and its squared L2 distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub label: VectorId,
    pub distance: f32,
}

/// Filter injected into k-NN search so the graph traversal rejects
/// ineligible labels instead of post-filtering a truncated result list.
pub trait AdmissionPredicate {
    fn is_admitted(&self, label: VectorId) -> bool;
}

impl<F> AdmissionPredicate for F
where
    F: Fn(VectorId) -> bool,
{
    #[inline]
    fn is_admitted(&self, label: VectorId) -> bool {
        self(label)
    }
}

/// Approximate nearest-neighbor index over an L2 metric space.
pub trait AnnIndex: Send + Sync + Sized {
    /// Empty index for `dim`-dimensional vectors holding at most `capacity`
    /// elements (live plus soft-deleted).
    fn with_capacity(dim: usize, capacity: usize) -> Self;

    /// Construction-time element bound.
    fn capacity(&self) -> usize;

    /// Elements currently occupying capacity, soft-deleted ones included.
    fn element_count(&self) -> usize;

    /// Insert `vector` under `label`.
    ///
    /// Re-adding an existing label replaces its vector in place (reviving it
    /// if it was soft-deleted) and never consumes capacity. A new label on a
    /// full index fails with [`AnnError::CapacityExhausted`].
    fn add_point(&mut self, vector: &[f32], label: VectorId) -> Result<(), AnnError>;

    /// Soft-delete `label`: it stays in the graph for routing but is never
    /// returned from search. Fails with [`AnnError::UnknownLabel`] if absent.
    fn mark_deleted(&mut self, label: VectorId) -> Result<(), AnnError>;

    /// The `k` nearest live labels to `query`, restricted to labels the
    /// predicate admits when one is given.
    ///
    /// Results come back in heap-drain order, worst (largest distance)
    /// first; callers reverse for ascending output.
    fn search_knn(
        &self,
        query: &[f32],
        k: usize,
        admit: Option<&dyn AdmissionPredicate>,
    ) -> Vec<Neighbor>;

    /// Opaque binary serialization. `load_from` must accept exactly the
    /// bytes `save_into` produced.
    fn save_into(&self, writer: &mut dyn Write) -> io::Result<()>;

    fn load_from(reader: &mut dyn Read) -> Result<Self, AnnError>;
}
