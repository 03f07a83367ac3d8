//! Authoritative record storage.
//!
//! The `RecordStore` is the source of truth for everything the database
//! holds: the metadata index and the ANN graph are projections of it and can
//! always be rebuilt from it. Records are keyed by caller-chosen id in a
//! `BTreeMap`, so iteration is ascending by id and snapshots come out
//! byte-deterministic.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{Metadata, Vector, VectorId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A stored vector together with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub vector: Vector,
    pub metadata: Metadata,
}

/// Ordered map from vector id to owned record.
#[derive(Debug)]
pub struct RecordStore {
    dim: usize,
    records: BTreeMap<VectorId, Record>,
}

impl RecordStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            records: BTreeMap::new(),
        }
    }

    /// Dimension every stored vector must have.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn contains(&self, id: VectorId) -> bool {
        self.records.contains_key(&id)
    }

    #[inline]
    pub fn get(&self, id: VectorId) -> Option<&Record> {
        self.records.get(&id)
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Insert or overwrite. Returns the previous record for `id` so the
    /// caller can unwind its entries from the derived indexes.
    pub fn put(
        &mut self,
        id: VectorId,
        vector: Vector,
        metadata: Metadata,
    ) -> Result<Option<Record>, StoreError> {
        if vector.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        Ok(self.records.insert(id, Record { vector, metadata }))
    }

    pub fn erase(&mut self, id: VectorId) -> Option<Record> {
        self.records.remove(&id)
    }

    /// Records in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&VectorId, &Record)> {
        self.records.iter()
    }
}
