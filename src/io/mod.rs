//! Input/Output handling for the CLI.
//!
//! This module provides:
//! - Unified output formatting (text, JSON)
//! - Consistent error handling and exit codes

pub mod exit_code;
pub mod format;
pub mod output;

pub use exit_code::ExitCode;
pub use format::{JsonResponse, OutputFormat, ResponseMeta, format_utc_timestamp};
pub use output::OutputManager;
