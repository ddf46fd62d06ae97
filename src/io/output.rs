//! Output management for CLI commands.
//!
//! Handles formatting and display for different output formats,
//! providing a unified interface for text and JSON output.

use serde::Serialize;
use std::io::{self, Write};

use crate::error::ExplorerError;
use crate::io::exit_code::ExitCode;
use crate::io::format::{JsonResponse, OutputFormat, ResponseMeta};

/// Manages output formatting and display.
pub struct OutputManager {
    format: OutputFormat,
    stdout: Box<dyn Write>,
    stderr: Box<dyn Write>,
}

impl OutputManager {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
        }
    }

    /// Create an output manager for testing with custom writers.
    #[cfg(test)]
    pub fn new_with_writers(
        format: OutputFormat,
        stdout: Box<dyn Write>,
        stderr: Box<dyn Write>,
    ) -> Self {
        Self {
            format,
            stdout,
            stderr,
        }
    }

    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Output a successful result.
    ///
    /// In JSON mode, wraps `data` in a success envelope. In text mode,
    /// prints the pre-rendered `text` instead.
    pub fn success<T>(&mut self, data: &T, text: impl FnOnce() -> String) -> io::Result<ExitCode>
    where
        T: Serialize,
    {
        match self.format {
            OutputFormat::Json => {
                let response = JsonResponse::success(data).with_meta(ResponseMeta::now());
                writeln!(self.stdout, "{}", serde_json::to_string_pretty(&response)?)?;
            }
            OutputFormat::Text => {
                writeln!(self.stdout, "{}", text())?;
            }
        }
        Ok(ExitCode::Success)
    }

    /// Output an error with suggestions.
    pub fn error(&mut self, error: &ExplorerError) -> io::Result<ExitCode> {
        match self.format {
            OutputFormat::Json => {
                let response = JsonResponse::from_error(error);
                writeln!(self.stderr, "{}", serde_json::to_string_pretty(&response)?)?;
            }
            OutputFormat::Text => {
                writeln!(self.stderr, "Error: {error}")?;
                for suggestion in error.recovery_suggestions() {
                    writeln!(self.stderr, "  Suggestion: {suggestion}")?;
                }
            }
        }
        Ok(ExitCode::from_error(error))
    }

    /// Output informational message (text mode only).
    pub fn info(&mut self, message: &str) -> io::Result<()> {
        if matches!(self.format, OutputFormat::Text) {
            writeln!(self.stderr, "{message}")?;
        }
        Ok(())
    }
}
