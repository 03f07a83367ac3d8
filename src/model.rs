//! Core value types shared across the engine.

use std::collections::BTreeMap;

/// Caller-assigned identifier for a stored vector. Opaque to the engine.
pub type VectorId = u64;

/// A fixed-dimension embedding. Length must equal `Config::vector_dim`.
pub type Vector = Vec<f32>;

/// Attribute map attached to a vector, keyed by string. `BTreeMap` gives
/// key-ordered iteration, which the snapshot format relies on.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Default upper bound on index capacity when none is configured.
pub const DEFAULT_MAX_ELEMENTS: u64 = 1_000_000;

/// A single metadata attribute value.
///
/// The discriminants are load-bearing: each variant serializes with an
/// explicit tag byte (`Int` = 0, `Float` = 1, `Str` = 2) so the on-disk
/// encoding never depends on in-memory enum layout.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    /// The wire tag byte for this variant.
    #[inline]
    pub fn tag(&self) -> u8 {
        match self {
            MetadataValue::Int(_) => 0,
            MetadataValue::Float(_) => 1,
            MetadataValue::Str(_) => 2,
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

/// Database configuration, fixed at creation.
///
/// `max_elements` is the construction-time capacity of the ANN graph; the
/// engine grows it transparently on overflow, so it is a starting point, not
/// a hard limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub vector_dim: u32,
    pub max_elements: u64,
}

impl Config {
    /// Configuration with the default capacity.
    pub fn new(vector_dim: u32) -> Self {
        Self {
            vector_dim,
            max_elements: DEFAULT_MAX_ELEMENTS,
        }
    }

    /// Configuration with an explicit initial capacity.
    pub fn with_max_elements(vector_dim: u32, max_elements: u64) -> Self {
        Self {
            vector_dim,
            max_elements,
        }
    }
}

/// One k-NN hit. `distance` is squared L2, as produced by the ANN index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    pub id: VectorId,
    pub distance: f32,
}
