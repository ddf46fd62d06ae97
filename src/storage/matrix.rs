//! Full embedding matrix reconstructed from shards.

use std::path::Path;

use crate::error::{ExplorerError, ExplorerResult};
use crate::storage::shard::{Shard, list_shards};
use crate::vector::{VectorDimension, l2_normalize_rows};

/// Row-major `[N, D]` matrix of `f32` embeddings.
///
/// Row `i` is the vector for ordinal `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dimension: VectorDimension,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Wraps a row-major buffer, validating that it holds whole rows.
    pub fn from_flat(dimension: VectorDimension, data: Vec<f32>) -> ExplorerResult<Self> {
        if data.len() % dimension.get() != 0 {
            return Err(ExplorerError::Configuration {
                reason: format!(
                    "buffer of {} values does not hold whole rows of dimension {dimension}",
                    data.len()
                ),
            });
        }
        Ok(Self { dimension, data })
    }

    /// Builds a matrix from individual rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> ExplorerResult<Self> {
        let first = rows.first().ok_or_else(|| ExplorerError::Configuration {
            reason: "cannot build a matrix from zero rows".to_string(),
        })?;
        let dimension = VectorDimension::new(first.len())?;

        let mut data = Vec::with_capacity(rows.len() * dimension.get());
        for row in rows {
            dimension.validate_vector(row)?;
            data.extend_from_slice(row);
        }
        Ok(Self { dimension, data })
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension.get()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn row(&self, i: usize) -> &[f32] {
        let d = self.dimension.get();
        &self.data[i * d..(i + 1) * d]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.get())
    }

    #[must_use]
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// L2-normalizes every row in place.
    pub fn normalize(&mut self) {
        l2_normalize_rows(&mut self.data, self.dimension.get());
    }

    /// Copies the selected rows into a new row-major buffer.
    #[must_use]
    pub fn gather(&self, rows: &[usize]) -> Vec<f32> {
        let mut out = Vec::with_capacity(rows.len() * self.dimension.get());
        for &i in rows {
            out.extend_from_slice(self.row(i));
        }
        out
    }
}

/// Loads and concatenates every shard in `dir` in creation order.
///
/// # Errors
/// - `Io` if the directory is missing or unreadable
/// - `NoShards` if it holds no shard files
/// - `ShapeMismatch` if shards disagree on dimensionality
pub fn load_matrix(dir: impl AsRef<Path>) -> ExplorerResult<EmbeddingMatrix> {
    let dir = dir.as_ref();
    let entries = list_shards(dir)?;

    let first = entries.first().ok_or_else(|| ExplorerError::NoShards {
        dir: dir.to_path_buf(),
    })?;
    let dimension = VectorDimension::new(first.header.dimension).map_err(|_| {
        ExplorerError::CorruptArtifact {
            path: first.path.clone(),
            reason: "shard declares dimension 0".to_string(),
        }
    })?;

    let total_rows: usize = entries.iter().map(|e| e.header.count).sum();
    let mut data = Vec::with_capacity(total_rows * dimension.get());

    for entry in &entries {
        if entry.header.dimension != dimension.get() {
            return Err(ExplorerError::ShapeMismatch {
                path: entry.path.clone(),
                expected: dimension.get(),
                actual: entry.header.dimension,
            });
        }
        let shard = Shard::open(&entry.path)?;
        shard.append_rows_to(&mut data);
        tracing::debug!(
            "loaded shard {} ({} rows, seq {})",
            entry.path.display(),
            entry.header.count,
            entry.header.sequence
        );
    }

    tracing::info!(
        "Loaded embedding matrix [{total_rows}, {dimension}] from {} shards in {}",
        entries.len(),
        dir.display()
    );

    Ok(EmbeddingMatrix { dimension, data })
}

/// Sums shard row counts without loading vector data.
pub fn count_matrix_rows(dir: impl AsRef<Path>) -> ExplorerResult<usize> {
    let dir = dir.as_ref();
    let entries = list_shards(dir)?;
    if entries.is_empty() {
        return Err(ExplorerError::NoShards {
            dir: dir.to_path_buf(),
        });
    }
    Ok(entries.iter().map(|e| e.header.count).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::shard::write_shard;
    use std::fs::{File, FileTimes};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn set_mtime(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        file.set_times(FileTimes::new().set_modified(time)).unwrap();
    }

    #[test]
    fn test_shards_concatenate_in_creation_order_not_name_order() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(2).unwrap();

        // Lexically "text_embeddings_10" sorts before "text_embeddings_2"
        let first = temp_dir.path().join("text_embeddings_2.shard");
        let second = temp_dir.path().join("text_embeddings_10.shard");
        write_shard(&first, &[1.0, 1.0], dim, 0).unwrap();
        write_shard(&second, &[2.0, 2.0], dim, 1).unwrap();
        set_mtime(&first, 1_000);
        set_mtime(&second, 2_000);

        let matrix = load_matrix(temp_dir.path()).unwrap();
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.row(0), &[1.0, 1.0]);
        assert_eq!(matrix.row(1), &[2.0, 2.0]);
    }

    #[test]
    fn test_sequence_breaks_mtime_ties() {
        let temp_dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(1).unwrap();

        let a = temp_dir.path().join("b.shard");
        let b = temp_dir.path().join("a.shard");
        write_shard(&a, &[1.0], dim, 0).unwrap();
        write_shard(&b, &[2.0], dim, 1).unwrap();
        set_mtime(&a, 5_000);
        set_mtime(&b, 5_000);

        let matrix = load_matrix(temp_dir.path()).unwrap();
        assert_eq!(matrix.as_flat(), &[1.0, 2.0]);
    }

    #[test]
    fn test_missing_and_empty_directories() {
        let temp_dir = TempDir::new().unwrap();

        let missing = temp_dir.path().join("nope");
        assert!(matches!(
            load_matrix(&missing),
            Err(ExplorerError::Io { .. })
        ));

        assert!(matches!(
            load_matrix(temp_dir.path()),
            Err(ExplorerError::NoShards { .. })
        ));
    }

    #[test]
    fn test_dimension_disagreement_is_shape_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.shard");
        let b = temp_dir.path().join("b.shard");
        write_shard(&a, &[1.0, 2.0], VectorDimension::new(2).unwrap(), 0).unwrap();
        write_shard(&b, &[1.0, 2.0, 3.0], VectorDimension::new(3).unwrap(), 1).unwrap();
        set_mtime(&a, 1);
        set_mtime(&b, 2);

        assert!(matches!(
            load_matrix(temp_dir.path()),
            Err(ExplorerError::ShapeMismatch {
                expected: 2,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_from_rows_and_gather() {
        let matrix = EmbeddingMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![3.0, 4.0]])
            .unwrap();
        assert_eq!(matrix.len(), 3);
        assert_eq!(matrix.gather(&[2, 0]), vec![3.0, 4.0, 1.0, 0.0]);

        let mut normalized = matrix.clone();
        normalized.normalize();
        assert!((normalized.row(2)[0] - 0.6).abs() < 1e-6);

        assert!(EmbeddingMatrix::from_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
