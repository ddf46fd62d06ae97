//! Embedding shard files.
//!
//! A shard is one incrementally written batch of embedding vectors. Shards
//! are concatenated in file-creation order to rebuild the full matrix, and
//! each shard is written in lockstep with the record rows it describes.
//!
//! # Storage Format
//!
//! - Header (24 bytes): magic, version, dimension, row count, sequence number
//! - Rows: contiguous little-endian `f32` values, `count * dimension` of them
//!
//! The sequence number is only a tie-breaker for shards that share a
//! modification time; creation order is the ordering contract.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use memmap2::{Mmap, MmapOptions};

use crate::error::{ExplorerError, ExplorerResult, IoContext};
use crate::vector::VectorDimension;

/// Current shard format version.
const SHARD_VERSION: u32 = 1;

/// Size of the shard header in bytes.
pub(crate) const HEADER_SIZE: usize = 24;

/// Magic bytes to identify shard files.
const MAGIC_BYTES: &[u8; 4] = b"ESHD";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// File extension for shard files.
pub const SHARD_EXTENSION: &str = "shard";

/// Parsed shard header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardHeader {
    pub dimension: usize,
    pub count: usize,
    pub sequence: u64,
}

impl ShardHeader {
    /// Fails when the dimension or row count does not fit the u32 fields.
    fn encode(&self, path: &Path) -> ExplorerResult<[u8; HEADER_SIZE]> {
        let field = |value: usize| {
            u32::try_from(value).map_err(|e| ExplorerError::Persistence {
                path: path.to_path_buf(),
                source: Box::new(e),
            })
        };

        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(MAGIC_BYTES);
        bytes[4..8].copy_from_slice(&SHARD_VERSION.to_le_bytes());
        bytes[8..12].copy_from_slice(&field(self.dimension)?.to_le_bytes());
        bytes[12..16].copy_from_slice(&field(self.count)?.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.sequence.to_le_bytes());
        Ok(bytes)
    }

    fn decode(bytes: &[u8], path: &Path) -> ExplorerResult<Self> {
        let corrupt = |reason: &str| ExplorerError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_SIZE {
            return Err(corrupt("file too small to contain a shard header"));
        }
        if &bytes[0..4] != MAGIC_BYTES {
            return Err(corrupt("invalid magic bytes"));
        }

        let read_u32 = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        let version = read_u32(4);
        if version != SHARD_VERSION {
            return Err(corrupt(&format!(
                "unsupported shard version {version}, expected {SHARD_VERSION}"
            )));
        }

        let mut sequence = [0u8; 8];
        sequence.copy_from_slice(&bytes[16..24]);

        Ok(Self {
            dimension: read_u32(8) as usize,
            count: read_u32(12) as usize,
            sequence: u64::from_le_bytes(sequence),
        })
    }

    /// Reads only the header of a shard file.
    pub fn read(path: &Path) -> ExplorerResult<Self> {
        let mut file = File::open(path).with_path(path)?;
        let mut bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut bytes).map_err(|_| ExplorerError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: "file too small to contain a shard header".to_string(),
        })?;
        Self::decode(&bytes, path)
    }
}

/// A memory-mapped shard opened for reading.
#[derive(Debug)]
pub struct Shard {
    path: PathBuf,
    mmap: Mmap,
    header: ShardHeader,
}

impl Shard {
    /// Opens and validates a shard file.
    pub fn open(path: impl AsRef<Path>) -> ExplorerResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_path(path)?;
        // SAFETY: shards are immutable once persisted; writers replace files atomically
        let mmap = unsafe { MmapOptions::new().map(&file) }.with_path(path)?;
        let header = ShardHeader::decode(&mmap, path)?;

        let expected_len = HEADER_SIZE + header.count * header.dimension * BYTES_PER_F32;
        if mmap.len() != expected_len {
            return Err(ExplorerError::CorruptArtifact {
                path: path.to_path_buf(),
                reason: format!(
                    "expected {expected_len} bytes for {} rows of dimension {}, found {}",
                    header.count,
                    header.dimension,
                    mmap.len()
                ),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            header,
        })
    }

    #[must_use]
    pub fn header(&self) -> ShardHeader {
        self.header
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends all rows of this shard to a row-major buffer.
    pub fn append_rows_to(&self, out: &mut Vec<f32>) {
        out.reserve(self.header.count * self.header.dimension);
        out.extend(
            self.mmap[HEADER_SIZE..]
                .chunks_exact(BYTES_PER_F32)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
    }
}

/// Writes one shard atomically.
///
/// The data is written to a temporary file in the same directory and renamed
/// into place, so readers never observe a partially written shard.
pub fn write_shard(
    path: &Path,
    rows: &[f32],
    dimension: VectorDimension,
    sequence: u64,
) -> ExplorerResult<()> {
    let dim = dimension.get();
    if rows.len() % dim != 0 {
        return Err(ExplorerError::ShapeMismatch {
            path: path.to_path_buf(),
            expected: dim,
            actual: rows.len() % dim,
        });
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).with_path(parent)?;

    let header = ShardHeader {
        dimension: dim,
        count: rows.len() / dim,
        sequence,
    };
    let header_bytes = header.encode(path)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).with_path(parent)?;
    {
        let mut writer = std::io::BufWriter::new(tmp.as_file_mut());
        writer.write_all(&header_bytes).with_path(path)?;
        for value in rows {
            writer.write_all(&value.to_le_bytes()).with_path(path)?;
        }
        writer.flush().with_path(path)?;
    }
    tmp.as_file().sync_all().with_path(path)?;
    tmp.persist(path).map_err(|e| ExplorerError::Persistence {
        path: path.to_path_buf(),
        source: Box::new(e.error),
    })?;

    Ok(())
}

/// A shard file discovered in an embeddings directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub header: ShardHeader,
}

/// Lists shard files in creation order.
///
/// Files are ordered by modification time, then header sequence number,
/// then path. File names are never the primary key: they are not
/// zero-padded consistently, so lexical order differs from creation order.
pub fn list_shards(dir: &Path) -> ExplorerResult<Vec<ShardEntry>> {
    let entries = std::fs::read_dir(dir).with_path(dir)?;

    let mut shards = Vec::new();
    for entry in entries {
        let entry = entry.with_path(dir)?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION) {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified()).with_path(&path)?;
        let header = ShardHeader::read(&path)?;
        shards.push(ShardEntry {
            path,
            modified,
            header,
        });
    }

    shards.sort_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then(a.header.sequence.cmp(&b.header.sequence))
            .then_with(|| a.path.cmp(&b.path))
    });

    Ok(shards)
}
