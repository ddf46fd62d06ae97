//! Error types for the embedding retrieval pipeline
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages. Build-time failures abort
//! the whole job; query-time failures are converted to an [`ErrorResponse`]
//! at the request boundary.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::vector::{ClusteringError, VectorError};

/// Main error type for store, build and query operations
#[derive(Error, Debug)]
pub enum ExplorerError {
    /// Bad or missing configuration
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Unsupported modality '{modality}'. No encoder is registered for it")]
    UnsupportedModality { modality: String },

    /// Shards disagree on dimensionality
    #[error(
        "Shard '{path}' has dimension {actual}, expected {expected}. All shards of a snapshot must come from the same encoder"
    )]
    ShapeMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    /// File system errors
    #[error("I/O failure on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No embedding shards found in '{dir}'")]
    NoShards { dir: PathBuf },

    #[error("ANN index not found at '{path}'")]
    IndexNotFound { path: PathBuf },

    #[error("Record table not found at '{path}'")]
    RecordTableNotFound { path: PathBuf },

    #[error("Projection points not found at '{path}'")]
    PointsNotFound { path: PathBuf },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Encoder for '{modality}' failed: {reason}")]
    EmbeddingFailure { modality: String, reason: String },

    /// An ordinal outside `[0, N)` reached a lookup. Never expected in a consistent snapshot
    #[error("Ordinal {ordinal} is out of range for a table of {len} records")]
    OutOfRangeOrdinal { ordinal: u64, len: usize },

    #[error("Alignment violation: {artifact} has {actual} rows, expected {expected}")]
    AlignmentViolation {
        artifact: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Training failed during {stage}: {reason}")]
    Training { stage: &'static str, reason: String },

    #[error("Failed to persist '{path}': {source}")]
    Persistence {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Artifact '{path}' appears to be corrupted: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error(transparent)]
    Vector(#[from] VectorError),
}

impl ExplorerError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::Configuration { .. } => "CONFIG_ERROR",
            Self::UnsupportedModality { .. } => "UNSUPPORTED_MODALITY",
            Self::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            Self::Io { .. } => "IO_ERROR",
            Self::NoShards { .. } => "NO_SHARDS",
            Self::IndexNotFound { .. } => "INDEX_NOT_FOUND",
            Self::RecordTableNotFound { .. } => "RECORD_TABLE_NOT_FOUND",
            Self::PointsNotFound { .. } => "POINTS_NOT_FOUND",
            Self::InvalidQuery { .. } => "INVALID_QUERY",
            Self::EmbeddingFailure { .. } => "EMBEDDING_FAILURE",
            Self::OutOfRangeOrdinal { .. } => "OUT_OF_RANGE_ORDINAL",
            Self::AlignmentViolation { .. } => "ALIGNMENT_VIOLATION",
            Self::Training { .. } => "TRAINING_FAILED",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::CorruptArtifact { .. } => "CORRUPT_ARTIFACT",
            Self::Vector(_) => "VECTOR_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::IndexNotFound { .. } => vec![
                "Run 'embedscope build-index' to build the ANN index",
                "Check that paths.index_file points at the built artifact",
            ],
            Self::RecordTableNotFound { .. } | Self::NoShards { .. } => vec![
                "Run 'embedscope ingest' to embed the dataset first",
                "Check paths.records_file and paths.embeddings_dir in settings.toml",
            ],
            Self::PointsNotFound { .. } => {
                vec!["Run 'embedscope project' to compute the 2D layout"]
            }
            Self::ShapeMismatch { .. } => vec![
                "Remove shards produced by a different encoder",
                "Re-run ingest into an empty embeddings directory",
            ],
            Self::AlignmentViolation { .. } | Self::OutOfRangeOrdinal { .. } => vec![
                "Rebuild the index and projection from the current snapshot",
                "Run 'embedscope verify' to see which artifact is stale",
            ],
            Self::CorruptArtifact { .. } => vec![
                "Rebuild the artifact from scratch",
                "Check for disk errors or filesystem corruption",
            ],
            Self::UnsupportedModality { .. } => {
                vec!["Supported query modalities are configured under [encoders]"]
            }
            Self::Io { .. } | Self::Persistence { .. } => vec![
                "Check that the file exists and you have read/write permissions",
                "Check available disk space",
            ],
            _ => vec![],
        }
    }

    /// True for conditions that only a rebuild of the snapshot can fix.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Self::IndexNotFound { .. }
                | Self::RecordTableNotFound { .. }
                | Self::PointsNotFound { .. }
                | Self::AlignmentViolation { .. }
                | Self::CorruptArtifact { .. }
        )
    }
}

impl From<ClusteringError> for ExplorerError {
    fn from(err: ClusteringError) -> Self {
        Self::Training {
            stage: "clustering",
            reason: err.to_string(),
        }
    }
}

/// Structured error reported to callers of the query API.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub requires_rebuild: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl From<&ExplorerError> for ErrorResponse {
    fn from(err: &ExplorerError) -> Self {
        Self {
            code: err.status_code(),
            message: err.to_string(),
            requires_rebuild: err.requires_rebuild(),
            suggestions: err
                .recovery_suggestions()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Result type alias for pipeline operations
pub type ExplorerResult<T> = Result<T, ExplorerError>;

/// Helper trait for attaching a path to I/O errors
pub trait IoContext<T> {
    fn with_path(self, path: &Path) -> ExplorerResult<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, path: &Path) -> ExplorerResult<T> {
        self.map_err(|source| ExplorerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
