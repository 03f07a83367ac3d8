//! Single-file `ORIONDB2` snapshots.
//!
//! # Layout (all little-endian)
//!
//! ```text
//! Offset/field              Size            Content
//! ─────────────────────────────────────────────────────────────
//! magic                     8               ASCII "ORIONDB2"
//! format_version            u32             2
//! config                    u32 + u64       vector_dim, max_elements
//! storage_count             u64             number of records
//! records[storage_count]    variable        see below
//! meta_idx_size             u64             byte length of next blob
//! meta_idx_blob             meta_idx_size   serialized metadata index
//! hnsw_size                 u64             byte length of next blob
//! hnsw_blob                 hnsw_size       opaque ANN index bytes
//! ─────────────────────────────────────────────────────────────
//! Record: id u64, vec_len u64, vec_len × f32,
//!         meta_pairs u64, meta_pairs × (String key, tagged value)
//! ```
//!
//! Records are written in ascending id order, so identical state produces
//! identical bytes. Writes go to `path + ".tmp"`, are flushed and fsynced,
//! then renamed over `path`; a failure anywhere before the rename leaves the
//! previous snapshot untouched.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::ann::AnnIndex;
use crate::codec::{self, CodecError};
use crate::filter::MetadataIndex;
use crate::model::{Config, Metadata, Vector, VectorId};
use crate::store::RecordStore;

pub const MAGIC: [u8; 8] = *b"ORIONDB2";
pub const FORMAT_VERSION: u32 = 2;

const LEGACY_MAGIC: [u8; 8] = *b"ORIONDB1";

/// Ceiling on the embedded sub-blob sizes, against corrupted length prefixes.
const MAX_BLOB_LEN: u64 = 1 << 34;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("not a database snapshot (bad magic {found:?})")]
    BadMagic { found: [u8; 8] },

    #[error("legacy ORIONDB1 snapshot; re-export it with a version-2 writer")]
    LegacyFormat,

    #[error("unsupported snapshot format version {0} (expected {FORMAT_VERSION})")]
    UnsupportedVersion(u32),

    #[error("corrupted snapshot: {0}")]
    Corrupt(String),
}

/// Everything a snapshot holds, decoded; the ANN blob stays opaque bytes so
/// the caller decides how (and whether) to revive the index.
pub struct SnapshotContents {
    pub config: Config,
    pub records: Vec<(VectorId, Vector, Metadata)>,
    pub metadata_index: MetadataIndex,
    pub ann_blob: Vec<u8>,
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Write the full engine state to `path`, atomically.
pub fn write_snapshot<A: AnnIndex>(
    path: &Path,
    config: &Config,
    store: &RecordStore,
    metadata_index: &MetadataIndex,
    ann: &A,
) -> Result<(), SnapshotError> {
    let tmp = tmp_path(path);
    if let Err(err) = write_to(&tmp, config, store, metadata_index, ann) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

fn write_to<A: AnnIndex>(
    tmp: &Path,
    config: &Config,
    store: &RecordStore,
    metadata_index: &MetadataIndex,
    ann: &A,
) -> Result<(), SnapshotError> {
    let file = File::create(tmp)?;
    let mut w = BufWriter::new(file);

    w.write_all(&MAGIC)?;
    codec::write_u32(&mut w, FORMAT_VERSION)?;
    codec::write_config(&mut w, config)?;

    codec::write_u64(&mut w, store.count() as u64)?;
    for (id, record) in store.iter() {
        codec::write_u64(&mut w, *id)?;
        codec::write_u64(&mut w, record.vector.len() as u64)?;
        for &x in &record.vector {
            codec::write_f32(&mut w, x)?;
        }
        codec::write_u64(&mut w, record.metadata.len() as u64)?;
        for (key, value) in &record.metadata {
            codec::write_string(&mut w, key)?;
            codec::write_value(&mut w, value)?;
        }
    }

    // Length-prefixed sub-blobs, staged in memory so readers can skip them.
    let mut meta_blob = Vec::new();
    metadata_index.serialize_into(&mut meta_blob)?;
    codec::write_u64(&mut w, meta_blob.len() as u64)?;
    w.write_all(&meta_blob)?;

    let mut ann_blob = Vec::new();
    ann.save_into(&mut ann_blob)?;
    codec::write_u64(&mut w, ann_blob.len() as u64)?;
    w.write_all(&ann_blob)?;

    w.flush()?;
    let file = w.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Read and validate a snapshot.
pub fn read_snapshot(path: &Path) -> Result<SnapshotContents, SnapshotError> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        if magic == LEGACY_MAGIC {
            return Err(SnapshotError::LegacyFormat);
        }
        return Err(SnapshotError::BadMagic { found: magic });
    }
    let version = codec::read_u32(&mut r)?;
    if version != FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let config = codec::read_config(&mut r)?;
    if config.vector_dim == 0 || config.vector_dim > (1 << 20) {
        return Err(SnapshotError::Corrupt(format!(
            "implausible vector dimension {}",
            config.vector_dim
        )));
    }
    let dim = config.vector_dim as u64;

    let storage_count = codec::read_u64(&mut r)?;
    let mut records = Vec::with_capacity(storage_count.min(1 << 20) as usize);
    for _ in 0..storage_count {
        let id = codec::read_u64(&mut r)?;
        let vec_len = codec::read_u64(&mut r)?;
        if vec_len != dim {
            return Err(SnapshotError::Corrupt(format!(
                "record {id} has {vec_len} components, config says {dim}"
            )));
        }
        let mut raw = vec![0u8; vec_len as usize * 4];
        r.read_exact(&mut raw)?;
        let vector: Vector = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let meta_pairs = codec::read_u64(&mut r)?;
        let mut metadata = Metadata::new();
        for _ in 0..meta_pairs {
            let key = codec::read_string(&mut r)?;
            let value = codec::read_value(&mut r)?;
            metadata.insert(key, value);
        }
        records.push((id, vector, metadata));
    }

    let metadata_index = {
        let blob = read_blob(&mut r, "metadata index")?;
        let mut slice = blob.as_slice();
        let index = MetadataIndex::deserialize_from(&mut slice)?;
        if !slice.is_empty() {
            return Err(SnapshotError::Corrupt(
                "trailing bytes in metadata index blob".into(),
            ));
        }
        index
    };

    let ann_blob = read_blob(&mut r, "ANN index")?;

    Ok(SnapshotContents {
        config,
        records,
        metadata_index,
        ann_blob,
    })
}

fn read_blob<R: Read>(r: &mut R, what: &str) -> Result<Vec<u8>, SnapshotError> {
    let len = codec::read_u64(r)?;
    if len > MAX_BLOB_LEN {
        return Err(SnapshotError::Corrupt(format!(
            "{what} blob claims {len} bytes"
        )));
    }
    let mut blob = vec![0u8; len as usize];
    r.read_exact(&mut blob)?;
    Ok(blob)
}
