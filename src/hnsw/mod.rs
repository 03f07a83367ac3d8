//! Hierarchical navigable-small-world ANN index.
//!
//! Split by concern:
//! - [`index`]: graph construction, search, deletion, capacity
//! - [`node`]: per-node storage (label, vector, adjacency, delete flag)
//! - [`visited`]: epoch-based visited tracking for traversal
//! - [`serialize`]: the self-contained binary blob embedded in snapshots

mod node;
mod serialize;
mod visited;

pub mod index;

pub use index::{HnswIndex, DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH, DEFAULT_M};
