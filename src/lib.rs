//! orion-db: an embeddable single-process vector database.
//!
//! Stores fixed-dimension `f32` vectors with small structured metadata
//! records, answers approximate k-nearest-neighbor queries under squared L2
//! distance — optionally restricted by a conjunctive metadata filter — and
//! persists everything as one crash-safe snapshot file. There is no server
//! and no network surface; link it in and call it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Database (db)                      │
//! │   one RwLock; add / remove / query / save / load    │
//! └─────────────────────────────────────────────────────┘
//!        │                │                   │
//!        ▼                ▼                   ▼
//! ┌─────────────┐  ┌───────────────┐  ┌───────────────┐
//! │ RecordStore │  │ MetadataIndex │  │ AnnIndex      │
//! │ (store)     │  │ (filter)      │  │ (ann / hnsw)  │
//! │ id → record │  │ key→value→ids │  │ k-NN graph    │
//! └─────────────┘  └───────────────┘  └───────────────┘
//!        └────────────────┴───────────────────┘
//!                         │
//!                         ▼
//!               ┌───────────────────┐
//!               │ snapshot + codec  │
//!               │ ORIONDB2 on disk  │
//!               └───────────────────┘
//! ```
//!
//! The record store is authoritative; the metadata index and the ANN graph
//! are projections kept in lockstep by the façade. The ANN index sits behind
//! the [`ann::AnnIndex`] trait so tests can swap in a brute-force fake.
//!
//! # Example
//!
//! ```no_run
//! use orion_db::{Config, Database, Metadata, MetadataValue};
//!
//! let db = Database::create("pets.orion", Config::new(2))?;
//!
//! let mut meta = Metadata::new();
//! meta.insert("type".into(), MetadataValue::from("animal"));
//! db.add(1, vec![0.1, 0.1], meta.clone());
//!
//! let hits = db.query_filtered(&[0.2, 0.2], 5, &meta);
//! assert_eq!(hits[0].id, 1);
//! db.save();
//! # Ok::<(), orion_db::DatabaseError>(())
//! ```

pub mod ann;
pub mod codec;
pub mod db;
pub mod filter;
pub mod hnsw;
pub mod model;
pub mod simd;
pub mod snapshot;
pub mod store;

pub use ann::{AdmissionPredicate, AnnError, AnnIndex, Neighbor};
pub use db::{Database, DatabaseError};
pub use filter::MetadataIndex;
pub use hnsw::HnswIndex;
pub use model::{Config, Metadata, MetadataValue, QueryResult, Vector, VectorId};
pub use snapshot::SnapshotError;
pub use store::{Record, RecordStore};
