//! Inverted metadata index for conjunctive equality filters.
//!
//! Shape: `key → value → set of vector ids`. The index is a pure projection
//! of the record store; emptied value sets and key maps are erased eagerly so
//! serialization stays deterministic and ghost-free.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use crate::codec::{self, CodecError};
use crate::model::{Metadata, MetadataValue, VectorId};

/// Map-key wrapper giving `MetadataValue` the total order `BTreeMap` needs.
///
/// Sorts by tag, then payload; floats use `total_cmp` with `-0.0` normalized
/// to `+0.0` so the IEEE rule `+0 == -0` carries over to lookups. NaN filter
/// values are rejected before lookup instead (they must never match).
#[derive(Debug, Clone, PartialEq)]
struct IndexKey(MetadataValue);

impl IndexKey {
    fn new(value: &MetadataValue) -> Self {
        match value {
            MetadataValue::Float(f) if *f == 0.0 => IndexKey(MetadataValue::Float(0.0)),
            other => IndexKey(other.clone()),
        }
    }
}

impl Eq for IndexKey {}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use MetadataValue::*;
        match (&self.0, &other.0) {
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (a, b) => a.tag().cmp(&b.tag()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct MetadataIndex {
    keys: BTreeMap<String, BTreeMap<IndexKey, BTreeSet<VectorId>>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` under every `(key, value)` pair of its metadata.
    pub fn insert(&mut self, id: VectorId, metadata: &Metadata) {
        for (key, value) in metadata {
            self.keys
                .entry(key.clone())
                .or_default()
                .entry(IndexKey::new(value))
                .or_default()
                .insert(id);
        }
    }

    /// Inverse of [`insert`](Self::insert). Value sets that become empty are
    /// erased, as are keys whose value map becomes empty.
    pub fn remove(&mut self, id: VectorId, metadata: &Metadata) {
        for (key, value) in metadata {
            let Some(values) = self.keys.get_mut(key) else {
                continue;
            };
            let index_key = IndexKey::new(value);
            if let Some(ids) = values.get_mut(&index_key) {
                ids.remove(&id);
                if ids.is_empty() {
                    values.remove(&index_key);
                }
            }
            if values.is_empty() {
                self.keys.remove(key);
            }
        }
    }

    /// Ids carrying `value` under `key`, if any.
    pub fn lookup(&self, key: &str, value: &MetadataValue) -> Option<&BTreeSet<VectorId>> {
        if let MetadataValue::Float(f) = value {
            if f.is_nan() {
                return None;
            }
        }
        self.keys.get(key)?.get(&IndexKey::new(value))
    }

    /// Candidate set for a conjunctive filter: the intersection of the id
    /// sets of every `(key, value)` clause, visited in key order.
    ///
    /// Returns `None` as soon as any clause has no entries or the running
    /// intersection empties out; a `Some` result is always non-empty. An
    /// empty filter is the caller's case to handle.
    pub fn candidates(&self, filter: &Metadata) -> Option<BTreeSet<VectorId>> {
        let mut candidates: Option<BTreeSet<VectorId>> = None;
        for (key, value) in filter {
            let ids = self.lookup(key, value)?;
            candidates = Some(match candidates {
                None => ids.clone(),
                Some(current) => current.intersection(ids).copied().collect(),
            });
            if candidates.as_ref().is_some_and(|c| c.is_empty()) {
                return None;
            }
        }
        candidates
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Every id that appears anywhere in the index.
    pub fn projected_ids(&self) -> BTreeSet<VectorId> {
        self.keys
            .values()
            .flat_map(|values| values.values())
            .flatten()
            .copied()
            .collect()
    }

    /// Self-contained little-endian stream: `u64 key_count`, then per key a
    /// string, `u64 value_count`, and per value the tagged value, `u64
    /// id_count` and the ids.
    pub fn serialize_into<W: Write + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        codec::write_u64(w, self.keys.len() as u64)?;
        for (key, values) in &self.keys {
            codec::write_string(w, key)?;
            codec::write_u64(w, values.len() as u64)?;
            for (value, ids) in values {
                codec::write_value(w, &value.0)?;
                codec::write_u64(w, ids.len() as u64)?;
                for id in ids {
                    codec::write_u64(w, *id)?;
                }
            }
        }
        Ok(())
    }

    pub fn deserialize_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, CodecError> {
        let mut index = Self::new();
        let key_count = codec::read_u64(r)?;
        for _ in 0..key_count {
            let key = codec::read_string(r)?;
            let values = index.keys.entry(key).or_default();
            let value_count = codec::read_u64(r)?;
            for _ in 0..value_count {
                let value = codec::read_value(r)?;
                let ids = values.entry(IndexKey::new(&value)).or_default();
                let id_count = codec::read_u64(r)?;
                for _ in 0..id_count {
                    ids.insert(codec::read_u64(r)?);
                }
            }
        }
        Ok(index)
    }
}
