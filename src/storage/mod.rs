//! Embedding store: shard files, the positional record table and the
//! alignment checks that tie them to derived artifacts.

pub mod alignment;
pub mod matrix;
pub mod records;
pub mod shard;

pub use alignment::{AlignmentReport, ArtifactRows, ensure_rows, verify_alignment};
pub use matrix::{EmbeddingMatrix, count_matrix_rows, load_matrix};
pub use records::{RecordTable, append_records};
pub use shard::{SHARD_EXTENSION, Shard, ShardEntry, ShardHeader, list_shards, write_shard};
