//! Persisted projection points.
//!
//! # Storage Format
//!
//! - Header (20 bytes): magic, version, row count (u64), column count (u32, always 3)
//! - Rows: little-endian `f32` triples `(x, y, cluster)`, one per ordinal
//!
//! The cluster id is stored as an `f32` so the artifact stays a plain
//! `[N, 3]` numeric array.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use memmap2::MmapOptions;

use crate::error::{ExplorerError, ExplorerResult, IoContext};
use crate::types::ProjectionPoint;

const POINTS_VERSION: u32 = 1;
const HEADER_SIZE: usize = 20;
const MAGIC_BYTES: &[u8; 4] = b"EPTS";
const COLUMNS: u32 = 3;
const ROW_BYTES: usize = COLUMNS as usize * 4;

fn corrupt(path: &Path, reason: impl Into<String>) -> ExplorerError {
    ExplorerError::CorruptArtifact {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn decode_header(bytes: &[u8], path: &Path) -> ExplorerResult<usize> {
    if bytes.len() < HEADER_SIZE {
        return Err(corrupt(path, "file too small to contain a points header"));
    }
    if &bytes[0..4] != MAGIC_BYTES {
        return Err(corrupt(path, "invalid magic bytes"));
    }
    let read_u32 = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

    let version = read_u32(4);
    if version != POINTS_VERSION {
        return Err(corrupt(
            path,
            format!("unsupported points version {version}, expected {POINTS_VERSION}"),
        ));
    }
    let columns = read_u32(16);
    if columns != COLUMNS {
        return Err(corrupt(path, format!("expected {COLUMNS} columns, found {columns}")));
    }

    let mut rows = [0u8; 8];
    rows.copy_from_slice(&bytes[8..16]);
    usize::try_from(u64::from_le_bytes(rows)).map_err(|_| corrupt(path, "row count overflows usize"))
}

fn missing(path: &Path) -> ExplorerError {
    ExplorerError::PointsNotFound {
        path: path.to_path_buf(),
    }
}

/// Atomically writes `points` to `path`, replacing any previous artifact.
pub fn write_points(path: &Path, points: &[ProjectionPoint]) -> ExplorerResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).with_path(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).with_path(parent)?;
    {
        let mut writer = std::io::BufWriter::new(tmp.as_file_mut());
        writer.write_all(MAGIC_BYTES).with_path(path)?;
        writer.write_all(&POINTS_VERSION.to_le_bytes()).with_path(path)?;
        writer
            .write_all(&(points.len() as u64).to_le_bytes())
            .with_path(path)?;
        writer.write_all(&COLUMNS.to_le_bytes()).with_path(path)?;
        for point in points {
            for value in point.to_triple() {
                writer.write_all(&value.to_le_bytes()).with_path(path)?;
            }
        }
        writer.flush().with_path(path)?;
    }
    tmp.as_file().sync_all().with_path(path)?;
    tmp.persist(path).map_err(|e| ExplorerError::Persistence {
        path: path.to_path_buf(),
        source: Box::new(e.error),
    })?;

    tracing::debug!("Wrote {} projection points to {}", points.len(), path.display());
    Ok(())
}

/// Reads the row count of a points artifact without loading the rows.
///
/// # Errors
/// - `PointsNotFound` if no artifact exists at `path`
/// - `CorruptArtifact` if the header is invalid
pub fn read_points_header(path: &Path) -> ExplorerResult<usize> {
    if !path.exists() {
        return Err(missing(path));
    }
    let mut file = File::open(path).with_path(path)?;
    let mut bytes = [0u8; HEADER_SIZE];
    file.read_exact(&mut bytes)
        .map_err(|_| corrupt(path, "file too small to contain a points header"))?;
    decode_header(&bytes, path)
}

/// Loads every row of a points artifact as `[x, y, cluster]`.
pub fn read_points(path: &Path) -> ExplorerResult<Vec<[f32; 3]>> {
    if !path.exists() {
        return Err(missing(path));
    }
    let file = File::open(path).with_path(path)?;
    // SAFETY: the artifact is immutable once persisted; writers replace it atomically
    let mmap = unsafe { MmapOptions::new().map(&file) }.with_path(path)?;
    let rows = decode_header(&mmap, path)?;

    let expected_len = HEADER_SIZE + rows * ROW_BYTES;
    if mmap.len() != expected_len {
        return Err(corrupt(
            path,
            format!(
                "expected {expected_len} bytes for {rows} points, found {}",
                mmap.len()
            ),
        ));
    }

    Ok(mmap[HEADER_SIZE..]
        .chunks_exact(ROW_BYTES)
        .map(|row| {
            let value = |i: usize| f32::from_le_bytes([row[i], row[i + 1], row[i + 2], row[i + 3]]);
            [value(0), value(4), value(8)]
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("projection").join("points.bin");
        let points = vec![
            ProjectionPoint { x: -1.0, y: 0.5, cluster: 0 },
            ProjectionPoint { x: 0.25, y: 1.0, cluster: 3 },
        ];

        write_points(&path, &points).unwrap();
        assert_eq!(read_points_header(&path).unwrap(), 2);
        assert_eq!(
            read_points(&path).unwrap(),
            vec![[-1.0, 0.5, 0.0], [0.25, 1.0, 3.0]]
        );
    }

    #[test]
    fn test_missing_file_is_points_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("points.bin");
        assert!(matches!(
            read_points_header(&path),
            Err(ExplorerError::PointsNotFound { .. })
        ));
        assert!(matches!(
            read_points(&path),
            Err(ExplorerError::PointsNotFound { .. })
        ));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("points.bin");
        write_points(&path, &[ProjectionPoint { x: 1.0, y: 2.0, cluster: 1 }]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        assert!(matches!(
            read_points(&path),
            Err(ExplorerError::CorruptArtifact { .. })
        ));
    }
}
