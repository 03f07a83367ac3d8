//! The database façade.
//!
//! Owns the three internal structures — record store, metadata index, ANN
//! graph — behind one reader-writer lock and keeps them mutually consistent
//! across insert, overwrite, delete, capacity overflow and snapshotting. The
//! record store is authoritative; the other two are projections that this
//! module is responsible for never letting drift.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ann::{AnnError, AnnIndex, Neighbor};
use crate::filter::MetadataIndex;
use crate::hnsw::HnswIndex;
use crate::model::{Config, Metadata, QueryResult, Vector, VectorId};
use crate::snapshot::{self, SnapshotError};
use crate::store::RecordStore;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Debug)]
struct Inner<A> {
    config: Config,
    store: RecordStore,
    metadata_index: MetadataIndex,
    ann: A,
}

/// An embedded vector database bound to one snapshot path.
///
/// All operations are synchronous and run on the caller's thread; the handle
/// is `Send + Sync` and may be shared across threads freely. Mutations
/// (`add`, `remove`, `save`) serialize behind a write lock, reads (`get`,
/// `query`, `count`) run concurrently under a read lock.
#[derive(Debug)]
pub struct Database<A: AnnIndex = HnswIndex> {
    path: PathBuf,
    inner: RwLock<Inner<A>>,
}

impl Database<HnswIndex> {
    /// Create a fresh database with the production HNSW index and write its
    /// initial snapshot to `path`, so a subsequent [`Database::load`] of the
    /// same path is well-defined.
    pub fn create<P: AsRef<Path>>(path: P, config: Config) -> Result<Self, DatabaseError> {
        Self::create_with(path, config)
    }

    /// Load a database previously saved to `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Self::load_with(path)
    }
}

impl<A: AnnIndex> Database<A> {
    /// [`Database::create`] with a caller-chosen [`AnnIndex`] implementation.
    pub fn create_with<P: AsRef<Path>>(path: P, config: Config) -> Result<Self, DatabaseError> {
        if config.vector_dim == 0 {
            return Err(DatabaseError::InvalidConfig(
                "vector_dim must be non-zero".into(),
            ));
        }
        let dim = config.vector_dim as usize;
        let inner = Inner {
            config,
            store: RecordStore::new(dim),
            metadata_index: MetadataIndex::new(),
            ann: A::with_capacity(dim, config.max_elements as usize),
        };
        let path = path.as_ref().to_path_buf();
        snapshot::write_snapshot(
            &path,
            &inner.config,
            &inner.store,
            &inner.metadata_index,
            &inner.ann,
        )?;
        Ok(Self {
            path,
            inner: RwLock::new(inner),
        })
    }

    /// [`Database::load`] with a caller-chosen [`AnnIndex`] implementation.
    pub fn load_with<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref().to_path_buf();
        let contents = snapshot::read_snapshot(&path)?;
        let config = contents.config;
        let dim = config.vector_dim as usize;

        let mut store = RecordStore::new(dim);
        for (id, vector, metadata) in contents.records {
            store
                .put(id, vector, metadata)
                .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        }

        // The graph blob is an accelerator, not the truth: if it does not
        // parse, start empty and let the re-add pass below repopulate it.
        let capacity = (config.max_elements as usize).max(store.count());
        let mut ann = if contents.ann_blob.is_empty() {
            A::with_capacity(dim, capacity)
        } else {
            match A::load_from(&mut contents.ann_blob.as_slice()) {
                Ok(ann) => ann,
                Err(err) => {
                    warn!(path = %path.display(), error = %err,
                        "ANN blob failed to load; rebuilding from records");
                    A::with_capacity(dim, capacity)
                }
            }
        };

        // Top the index up from the store. Points already present are
        // replaced in place; capacity misses mean a stale snapshot and are
        // tolerated, the index just stays partially populated.
        for (id, record) in store.iter() {
            if let Err(err) = ann.add_point(&record.vector, *id) {
                debug!(id, error = %err, "skipping record during index warm-up");
            }
        }

        Ok(Self {
            path,
            inner: RwLock::new(Inner {
                config,
                store,
                metadata_index: contents.metadata_index,
                ann,
            }),
        })
    }

    /// The snapshot path this handle reads from and writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Library version, for embedding in host diagnostics.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Insert `vector` and `metadata` under `id`, replacing any previous
    /// record with that id as an atomic delete-then-insert.
    ///
    /// Returns `false` when the vector has the wrong dimension, or when the
    /// ANN insert fails even after a capacity rebuild. In the latter case the
    /// record store keeps the new record (it is authoritative) and a later
    /// successful add or save/load cycle re-indexes it.
    pub fn add(&self, id: VectorId, vector: Vector, metadata: Metadata) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        if vector.len() != inner.config.vector_dim as usize {
            return false;
        }
        let previous = match inner.store.put(id, vector, metadata) {
            Ok(previous) => previous,
            Err(_) => return false,
        };
        if let Some(previous) = previous {
            inner.metadata_index.remove(id, &previous.metadata);
            if let Err(err) = inner.ann.mark_deleted(id) {
                debug!(id, error = %err, "stale label missing from ANN index");
            }
        }

        let Some(record) = inner.store.get(id) else {
            return false;
        };
        if let Err(err) = inner.ann.add_point(&record.vector, id) {
            if !matches!(err, AnnError::CapacityExhausted { .. }) {
                warn!(id, error = %err, "ANN insert failed");
                return false;
            }
            let new_capacity = (inner.ann.capacity() * 2).max(inner.store.count() + 10);
            info!(
                old_capacity = inner.ann.capacity(),
                new_capacity, "ANN index full, rebuilding"
            );
            match Self::rebuild_ann(&inner.store, inner.config.vector_dim as usize, new_capacity) {
                Ok(fresh) => {
                    inner.ann = fresh;
                    inner.config.max_elements = new_capacity as u64;
                }
                Err(err) => {
                    warn!(id, error = %err, "ANN rebuild failed");
                    return false;
                }
            }
            if let Err(err) = inner.ann.add_point(&record.vector, id) {
                warn!(id, error = %err, "ANN insert failed after rebuild");
                return false;
            }
        }

        inner.metadata_index.insert(id, &record.metadata);
        true
    }

    fn rebuild_ann(store: &RecordStore, dim: usize, capacity: usize) -> Result<A, AnnError> {
        let mut fresh = A::with_capacity(dim, capacity);
        for (id, record) in store.iter() {
            fresh.add_point(&record.vector, *id)?;
        }
        Ok(fresh)
    }

    /// Delete `id`. Returns `false` when it was not present.
    pub fn remove(&self, id: VectorId) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let Some(record) = inner.store.erase(id) else {
            return false;
        };
        inner.metadata_index.remove(id, &record.metadata);
        if let Err(err) = inner.ann.mark_deleted(id) {
            debug!(id, error = %err, "removed label missing from ANN index");
        }
        true
    }

    /// The vector and metadata of `id`, if present.
    pub fn get(&self, id: VectorId) -> Option<(Vector, Metadata)> {
        let inner = self.inner.read();
        inner
            .store
            .get(id)
            .map(|record| (record.vector.clone(), record.metadata.clone()))
    }

    /// Number of live records.
    pub fn count(&self) -> usize {
        self.inner.read().store.count()
    }

    /// The `n` approximate nearest neighbors of `query`, ascending by
    /// squared L2 distance. Empty when the store is empty or the query has
    /// the wrong dimension.
    pub fn query(&self, query: &[f32], n: usize) -> Vec<QueryResult> {
        let inner = self.inner.read();
        if query.len() != inner.config.vector_dim as usize || inner.store.count() == 0 {
            return Vec::new();
        }
        ascending(inner.ann.search_knn(query, n, None))
    }

    /// Like [`query`](Self::query), restricted to records whose metadata
    /// contains every `(key, value)` pair of `filter`. An empty filter is no
    /// restriction; a filter matching nothing yields an empty result.
    pub fn query_filtered(&self, query: &[f32], n: usize, filter: &Metadata) -> Vec<QueryResult> {
        let inner = self.inner.read();
        if query.len() != inner.config.vector_dim as usize || inner.store.count() == 0 {
            return Vec::new();
        }
        if filter.is_empty() {
            return ascending(inner.ann.search_knn(query, n, None));
        }
        let Some(candidates) = inner.metadata_index.candidates(filter) else {
            return Vec::new();
        };
        let admit = |label: VectorId| candidates.contains(&label);
        ascending(inner.ann.search_knn(query, n, Some(&admit)))
    }

    /// Snapshot the full state to the database path. Returns `false` on any
    /// I/O failure, in which case the previous on-disk snapshot is intact.
    pub fn save(&self) -> bool {
        let inner = self.inner.write();
        match snapshot::write_snapshot(
            &self.path,
            &inner.config,
            &inner.store,
            &inner.metadata_index,
            &inner.ann,
        ) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "snapshot save failed");
                false
            }
        }
    }

    /// Current configuration. `max_elements` reflects capacity growth from
    /// overflow rebuilds, so it can exceed the value passed at creation.
    pub fn config(&self) -> Config {
        self.inner.read().config
    }
}

/// Reverse the heap-drain (worst-first) order the ANN contract hands back.
fn ascending(drained: Vec<Neighbor>) -> Vec<QueryResult> {
    let mut out: Vec<QueryResult> = drained
        .into_iter()
        .map(|n| QueryResult {
            id: n.label,
            distance: n.distance,
        })
        .collect();
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetadataValue;
    use tempfile::tempdir;

    fn meta(pairs: &[(&str, MetadataValue)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn create_writes_an_initial_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.orion");
        let db = Database::create(&path, Config::new(2)).unwrap();
        assert!(path.exists());
        assert_eq!(db.count(), 0);

        // A freshly created path can be loaded right away.
        drop(db);
        let db = Database::load(&path).unwrap();
        assert_eq!(db.count(), 0);
    }

    #[test]
    fn create_rejects_zero_dimension() {
        let dir = tempdir().unwrap();
        let err = Database::create(dir.path().join("x"), Config::new(0)).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidConfig(_)));
    }

    #[test]
    fn add_get_remove_cycle() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("db"), Config::new(2)).unwrap();

        assert!(db.add(1, vec![0.1, 0.2], meta(&[("k", "v".into())])));
        assert_eq!(db.count(), 1);
        let (vector, metadata) = db.get(1).unwrap();
        assert_eq!(vector, vec![0.1, 0.2]);
        assert_eq!(metadata["k"], "v".into());

        assert!(db.remove(1));
        assert!(db.get(1).is_none());
        assert_eq!(db.count(), 0);
        assert!(!db.remove(1));
    }

    #[test]
    fn wrong_dimension_add_and_query_are_negative_outcomes() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("db"), Config::new(3)).unwrap();
        assert!(!db.add(1, vec![0.1], Metadata::new()));
        assert_eq!(db.count(), 0);

        db.add(1, vec![0.1, 0.2, 0.3], Metadata::new());
        assert!(db.query(&[0.1, 0.2], 5).is_empty());
    }

    #[test]
    fn query_on_empty_store_is_empty() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("db"), Config::new(2)).unwrap();
        assert!(db.query(&[0.0, 0.0], 3).is_empty());
    }

    #[test]
    fn query_orders_ascending_by_distance() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("db"), Config::new(2)).unwrap();
        db.add(1, vec![0.0, 0.0], Metadata::new());
        db.add(2, vec![0.5, 0.5], Metadata::new());
        db.add(3, vec![1.0, 1.0], Metadata::new());

        let results = db.query(&[0.1, 0.1], 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, 1);
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn empty_filter_behaves_like_unfiltered() {
        let dir = tempdir().unwrap();
        let db = Database::create(dir.path().join("db"), Config::new(2)).unwrap();
        db.add(1, vec![0.0, 0.0], meta(&[("k", "v".into())]));
        db.add(2, vec![1.0, 1.0], Metadata::new());

        let unfiltered = db.query(&[0.0, 0.0], 10);
        let filtered = db.query_filtered(&[0.0, 0.0], 10, &Metadata::new());
        assert_eq!(unfiltered, filtered);
    }

    #[test]
    fn version_is_semver_ish() {
        let version = Database::<HnswIndex>::version();
        assert!(version.split('.').count() >= 2, "got {version}");
    }
}
