//! Format definitions for CLI output.
//!
//! Provides the JSON envelope shared by every command in `--json` mode.

use chrono::Utc;
use serde::Serialize;

use crate::error::{ErrorResponse, ExplorerError};
use crate::io::exit_code::ExitCode;

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text (default)
    Text,
    /// JSON for tool integration
    Json,
}

impl OutputFormat {
    /// Create format from JSON flag.
    #[must_use]
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Standard JSON response envelope.
#[derive(Debug, Serialize)]
pub struct JsonResponse<T = serde_json::Value>
where
    T: Serialize,
{
    /// Status: "success" or "error"
    pub status: String,

    /// Result code ("OK" or an error status code such as "INDEX_NOT_FOUND")
    pub code: String,

    pub message: String,

    /// Actual data payload (only for success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    /// Structured error (only for errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,

    /// Exit code for shell scripts
    pub exit_code: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

/// Response metadata.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub version: String,
    pub timestamp: String,
}

impl ResponseMeta {
    #[must_use]
    pub fn now() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: format_utc_timestamp(),
        }
    }
}

impl<T> JsonResponse<T>
where
    T: Serialize,
{
    /// Create a success response with data.
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            code: "OK".to_string(),
            message: "Operation completed successfully".to_string(),
            data: Some(data),
            error: None,
            exit_code: ExitCode::Success as u8,
            meta: None,
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: ResponseMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl JsonResponse<serde_json::Value> {
    /// Create an error response from an `ExplorerError`.
    pub fn from_error(error: &ExplorerError) -> Self {
        Self {
            status: "error".to_string(),
            code: error.status_code(),
            message: error.to_string(),
            data: None,
            error: Some(ErrorResponse::from(error)),
            exit_code: ExitCode::from_error(error) as u8,
            meta: None,
        }
    }
}

/// Format current time as a "YYYY-MM-DD HH:MM:SS UTC" string.
pub fn format_utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
