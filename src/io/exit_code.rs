//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success - operation completed (an empty result set is a success)
//! - `1`: General error - unspecified failure
//! - `2`: Blocking error - the snapshot is inconsistent and must be rebuilt
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::error::ExplorerError;

/// Standard exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Critical error that should halt automation (code 2)
    BlockingError = 2,

    /// A required artifact has not been built yet (code 3)
    NotFound = 3,

    /// Malformed query or input (code 4)
    InvalidInput = 4,

    /// File I/O error (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Artifact corruption detected (code 7)
    IndexCorrupted = 7,

    /// Modality or operation not supported (code 8)
    UnsupportedOperation = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    /// Convert an `ExplorerError` to the appropriate exit code.
    ///
    /// Maps specific error types to semantic exit codes that scripts
    /// can use to determine appropriate recovery actions.
    pub fn from_error(error: &ExplorerError) -> Self {
        match error {
            // Missing artifacts are recoverable by running the producing job
            ExplorerError::IndexNotFound { .. }
            | ExplorerError::RecordTableNotFound { .. }
            | ExplorerError::PointsNotFound { .. }
            | ExplorerError::NoShards { .. } => ExitCode::NotFound,

            // Misaligned artifacts are blocking
            ExplorerError::AlignmentViolation { .. }
            | ExplorerError::OutOfRangeOrdinal { .. }
            | ExplorerError::ShapeMismatch { .. } => ExitCode::BlockingError,

            ExplorerError::CorruptArtifact { .. } => ExitCode::IndexCorrupted,
            ExplorerError::InvalidQuery { .. } => ExitCode::InvalidInput,
            ExplorerError::Io { .. } | ExplorerError::Persistence { .. } => ExitCode::IoError,
            ExplorerError::Configuration { .. } => ExitCode::ConfigError,
            ExplorerError::UnsupportedModality { .. } => ExitCode::UnsupportedOperation,

            _ => ExitCode::GeneralError,
        }
    }

    /// Check if this exit code indicates a blocking error.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Get a human-readable description of the exit code.
    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Blocking error - rebuild the snapshot",
            ExitCode::NotFound => "Artifact not found",
            ExitCode::InvalidInput => "Invalid input",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::IndexCorrupted => "Artifact corrupted",
            ExitCode::UnsupportedOperation => "Unsupported operation",
        }
    }
}
