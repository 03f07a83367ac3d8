//! Binary round-trip for the graph.
//!
//! The blob is self-contained (parameters, vectors, adjacency, delete
//! flags) so a database snapshot can embed it and reload it without any
//! out-of-band state. Layout, all little-endian:
//!
//! ```text
//! magic "ORIONANN" (8)  version u32  dim u32  capacity u64
//! m u32  m0 u32  ef_construction u32
//! node_count u64  entry_slot u64 (u64::MAX = none)  max_layer u8
//! per node:
//!   label u64  deleted u8  top_layer u8
//!   vector: dim × f32
//!   per layer 0..=top_layer: count u32, count × u32 neighbor slots
//! ```

use std::io::{Read, Write};

use crate::ann::AnnError;
use crate::codec;

use super::index::HnswIndex;
use super::node::Node;

const MAGIC: &[u8; 8] = b"ORIONANN";
const VERSION: u32 = 1;
const NO_ENTRY: u64 = u64::MAX;

impl HnswIndex {
    pub(super) fn serialize_into<W: Write + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        codec::write_u32(w, VERSION)?;
        codec::write_u32(w, self.dim as u32)?;
        codec::write_u64(w, self.capacity as u64)?;
        codec::write_u32(w, self.m as u32)?;
        codec::write_u32(w, self.m0 as u32)?;
        codec::write_u32(w, self.ef_construction as u32)?;

        codec::write_u64(w, self.nodes.len() as u64)?;
        codec::write_u64(w, self.entry_point.map(|s| s as u64).unwrap_or(NO_ENTRY))?;
        codec::write_u8(w, self.max_layer as u8)?;

        for node in &self.nodes {
            codec::write_u64(w, node.label)?;
            codec::write_u8(w, node.deleted as u8)?;
            codec::write_u8(w, node.top_layer() as u8)?;
            for &x in &node.vector {
                codec::write_f32(w, x)?;
            }
            for layer in &node.layers {
                codec::write_u32(w, layer.len() as u32)?;
                for &neighbor in layer {
                    codec::write_u32(w, neighbor)?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn deserialize_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, AnnError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(AnnError::Corrupt("bad graph magic".into()));
        }
        let version = codec::read_u32(r)?;
        if version != VERSION {
            return Err(AnnError::Corrupt(format!(
                "unsupported graph version {version}"
            )));
        }

        let dim = codec::read_u32(r)? as usize;
        if dim == 0 || dim > (1 << 20) {
            return Err(AnnError::Corrupt(format!("implausible dimension {dim}")));
        }
        let capacity = codec::read_u64(r)? as usize;
        let m = codec::read_u32(r)? as usize;
        let m0 = codec::read_u32(r)? as usize;
        let ef_construction = codec::read_u32(r)? as usize;
        if m == 0 || m0 != m * 2 {
            return Err(AnnError::Corrupt(format!("implausible m/m0: {m}/{m0}")));
        }

        let node_count = codec::read_u64(r)? as usize;
        if node_count > capacity {
            return Err(AnnError::Corrupt(format!(
                "node count {node_count} exceeds capacity {capacity}"
            )));
        }
        let entry_raw = codec::read_u64(r)?;
        let entry_point = if entry_raw == NO_ENTRY {
            None
        } else if (entry_raw as usize) < node_count {
            Some(entry_raw as usize)
        } else {
            return Err(AnnError::Corrupt(format!(
                "entry slot {entry_raw} out of range"
            )));
        };
        let max_layer = codec::read_u8(r)? as usize;

        let mut index = Self::assemble(dim, capacity, m, ef_construction, rand::random());
        index.entry_point = entry_point;
        index.max_layer = max_layer;
        index.nodes.reserve(node_count);

        for slot in 0..node_count {
            let label = codec::read_u64(r)?;
            let deleted = codec::read_u8(r)? != 0;
            let top_layer = codec::read_u8(r)? as usize;

            let mut vector = Vec::with_capacity(dim);
            for _ in 0..dim {
                vector.push(codec::read_f32(r)?);
            }

            let mut layers = Vec::with_capacity(top_layer + 1);
            for _ in 0..=top_layer {
                let count = codec::read_u32(r)? as usize;
                if count > node_count {
                    return Err(AnnError::Corrupt(format!(
                        "neighbor count {count} exceeds node count {node_count}"
                    )));
                }
                let mut neighbors = Vec::with_capacity(count);
                for _ in 0..count {
                    let neighbor = codec::read_u32(r)?;
                    if neighbor as usize >= node_count {
                        return Err(AnnError::Corrupt(format!(
                            "neighbor slot {neighbor} out of range"
                        )));
                    }
                    neighbors.push(neighbor);
                }
                layers.push(neighbors);
            }

            if deleted {
                index.deleted_count += 1;
            }
            index.label_to_slot.insert(label, slot);
            index.nodes.push(Node {
                label,
                vector,
                deleted,
                layers,
            });
        }

        if index.label_to_slot.len() != node_count {
            return Err(AnnError::Corrupt("duplicate labels in graph".into()));
        }

        Ok(index)
    }
}
