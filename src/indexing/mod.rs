//! Offline jobs that write the snapshot: embedding ingest and index build.

pub mod builder;
pub mod ingest;

pub use builder::{BuildReport, IndexBuilder};
pub use ingest::{EmbedJob, IngestReport};
