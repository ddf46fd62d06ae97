//! Rich terminal display utilities for CLI output.
//!
//! Provides styled tables, progress bars, and formatted output.

pub mod progress;
pub mod tables;
pub mod theme;

pub use progress::{create_progress_bar, create_spinner, progress_bar_if};
pub use tables::{
    TableBuilder, create_alignment_table, create_build_table, create_ingest_table,
    create_projection_table, create_records_table,
};
pub use theme::{THEME, Theme};
