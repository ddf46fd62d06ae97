//! Cross-artifact alignment checks.
//!
//! Ordinal `i` must name the same item in the embedding matrix, the record
//! table, the ANN index and the projection points. Row counts are the cheap
//! observable part of that contract: every builder checks them before it
//! persists anything, and `verify_alignment` reports them for a snapshot.

use serde::Serialize;

use crate::ann::read_index_metadata;
use crate::config::PathsConfig;
use crate::error::{ExplorerError, ExplorerResult};
use crate::projection::read_points_header;
use crate::storage::matrix::count_matrix_rows;
use crate::storage::records::RecordTable;

/// Fails with `AlignmentViolation` unless `actual == expected`.
pub fn ensure_rows(artifact: &'static str, expected: usize, actual: usize) -> ExplorerResult<()> {
    if expected != actual {
        return Err(ExplorerError::AlignmentViolation {
            artifact,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Row count of one artifact, or why it could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRows {
    Present(usize),
    Missing,
    Unreadable(String),
}

impl ArtifactRows {
    fn from_result(result: ExplorerResult<usize>) -> Self {
        match result {
            Ok(rows) => ArtifactRows::Present(rows),
            Err(
                ExplorerError::NoShards { .. }
                | ExplorerError::IndexNotFound { .. }
                | ExplorerError::RecordTableNotFound { .. }
                | ExplorerError::PointsNotFound { .. },
            ) => ArtifactRows::Missing,
            Err(ExplorerError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                ArtifactRows::Missing
            }
            Err(e) => ArtifactRows::Unreadable(e.to_string()),
        }
    }

    #[must_use]
    pub fn rows(&self) -> Option<usize> {
        match self {
            ArtifactRows::Present(rows) => Some(*rows),
            _ => None,
        }
    }
}

/// Row counts of every artifact in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlignmentReport {
    pub matrix: ArtifactRows,
    pub records: ArtifactRows,
    pub index: ArtifactRows,
    pub points: ArtifactRows,
}

impl AlignmentReport {
    /// Artifacts whose row count differs from the embedding matrix.
    #[must_use]
    pub fn violations(&self) -> Vec<ExplorerError> {
        let Some(expected) = self.matrix.rows() else {
            return Vec::new();
        };

        [
            ("record table", &self.records),
            ("ANN index", &self.index),
            ("projection points", &self.points),
        ]
        .into_iter()
        .filter_map(|(artifact, rows)| {
            rows.rows()
                .filter(|&actual| actual != expected)
                .map(|actual| ExplorerError::AlignmentViolation {
                    artifact,
                    expected,
                    actual,
                })
        })
        .collect()
    }

    /// True when every present artifact agrees with the matrix and nothing
    /// is unreadable.
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        let unreadable = [&self.matrix, &self.records, &self.index, &self.points]
            .iter()
            .any(|a| matches!(a, ArtifactRows::Unreadable(_)));
        !unreadable && self.violations().is_empty()
    }
}

/// Reads the row count of every artifact without loading vector data.
#[must_use]
pub fn verify_alignment(paths: &PathsConfig) -> AlignmentReport {
    let report = AlignmentReport {
        matrix: ArtifactRows::from_result(count_matrix_rows(&paths.embeddings_dir)),
        records: ArtifactRows::from_result(RecordTable::open(&paths.records_file).map(|t| t.len())),
        index: ArtifactRows::from_result(
            read_index_metadata(&paths.index_file).map(|m| m.ntotal),
        ),
        points: ArtifactRows::from_result(read_points_header(&paths.points_file)),
    };

    for violation in report.violations() {
        tracing::warn!("{violation}");
    }
    report
}
