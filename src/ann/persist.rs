//! Single-file persistence for the IVF-PQ index.
//!
//! # File Format
//!
//! - Magic bytes `EIVF` and a little-endian `u32` format version
//! - bincode-encoded [`IndexMetadata`]
//! - bincode-encoded [`IvfPqIndex`]
//!
//! The metadata block comes first so tools can inspect an index without
//! decoding the inverted lists. Files are written to a temporary sibling
//! and renamed over the target, so a failed build never leaves a partial
//! index behind and readers see either the old or the new file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ann::device::ComputeDevice;
use crate::ann::ivf::IvfPqIndex;
use crate::error::{ExplorerError, ExplorerResult, IoContext};

const MAGIC_BYTES: &[u8; 4] = b"EIVF";

/// Current index file version.
const FORMAT_VERSION: u32 = 1;

/// Normalization applied to vectors before training, insertion and search.
pub const NORMALIZATION_L2: &str = "l2";

/// Summary stored alongside the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub dimension: usize,
    pub ntotal: usize,
    pub nlist: usize,
    pub subquantizers: usize,
    pub bits: u32,
    pub opq: bool,
    pub training_size: usize,
    pub normalization: String,
    pub device: ComputeDevice,
    /// RFC 3339 build timestamp
    pub built_at: String,
}

impl IndexMetadata {
    /// Describes `index` as it is about to be written.
    #[must_use]
    pub fn describe(index: &IvfPqIndex, training_size: usize, device: ComputeDevice) -> Self {
        Self {
            dimension: index.dimension().get(),
            ntotal: index.ntotal(),
            nlist: index.nlist(),
            subquantizers: index.params().subquantizers,
            bits: index.params().bits,
            opq: index.has_rotation(),
            training_size,
            normalization: NORMALIZATION_L2.to_string(),
            device,
            built_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

fn persistence_error(
    path: &Path,
    source: impl std::error::Error + Send + Sync + 'static,
) -> ExplorerError {
    ExplorerError::Persistence {
        path: path.to_path_buf(),
        source: Box::new(source),
    }
}

/// Writes `index` to `path`, atomically replacing any previous file.
pub fn save_index(path: &Path, index: &IvfPqIndex, metadata: &IndexMetadata) -> ExplorerResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).with_path(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).with_path(parent)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer.write_all(MAGIC_BYTES).with_path(path)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes()).with_path(path)?;
        bincode::serde::encode_into_std_write(metadata, &mut writer, bincode_config())
            .map_err(|e| persistence_error(path, e))?;
        bincode::serde::encode_into_std_write(index, &mut writer, bincode_config())
            .map_err(|e| persistence_error(path, e))?;
        writer.flush().with_path(path)?;
    }
    tmp.as_file().sync_all().with_path(path)?;
    tmp.persist(path)
        .map_err(|e| persistence_error(path, e.error))?;

    tracing::info!(
        "Persisted index ({} vectors, dim {}) to {}",
        metadata.ntotal,
        metadata.dimension,
        path.display()
    );
    Ok(())
}

fn open_checked(path: &Path) -> ExplorerResult<BufReader<File>> {
    if !path.exists() {
        return Err(ExplorerError::IndexNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut reader = BufReader::new(File::open(path).with_path(path)?);
    let mut header = [0u8; 8];
    reader
        .read_exact(&mut header)
        .map_err(|_| ExplorerError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: "file too small to contain an index header".to_string(),
        })?;

    if &header[0..4] != MAGIC_BYTES {
        return Err(ExplorerError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: "invalid magic bytes".to_string(),
        });
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(ExplorerError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: format!("unsupported index version {version}, expected {FORMAT_VERSION}"),
        });
    }

    Ok(reader)
}

fn decode<T: serde::de::DeserializeOwned>(
    reader: &mut BufReader<File>,
    path: &Path,
) -> ExplorerResult<T> {
    bincode::serde::decode_from_std_read(reader, bincode_config()).map_err(|e| {
        ExplorerError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

/// Reads only the metadata block of an index file.
pub fn read_index_metadata(path: &Path) -> ExplorerResult<IndexMetadata> {
    let mut reader = open_checked(path)?;
    decode(&mut reader, path)
}

/// Loads a persisted index for read-only querying.
///
/// # Errors
/// - `IndexNotFound` if nothing has been built at `path`
/// - `CorruptArtifact` if the file cannot be decoded or its metadata
///   disagrees with its contents
pub fn load_index(path: &Path) -> ExplorerResult<(IndexMetadata, IvfPqIndex)> {
    let mut reader = open_checked(path)?;
    let metadata: IndexMetadata = decode(&mut reader, path)?;
    let index: IvfPqIndex = decode(&mut reader, path)?;

    if metadata.ntotal != index.ntotal() || metadata.dimension != index.dimension().get() {
        return Err(ExplorerError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: format!(
                "metadata describes {} vectors of dimension {}, index holds {} of dimension {}",
                metadata.ntotal,
                metadata.dimension,
                index.ntotal(),
                index.dimension()
            ),
        });
    }

    tracing::info!(
        "Loaded index with {} vectors (nlist={}, m={}) from {}",
        index.ntotal(),
        index.nlist(),
        metadata.subquantizers,
        path.display()
    );
    Ok((metadata, index))
}
