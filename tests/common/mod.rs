//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;

use embedscope::MediaType;
use embedscope::config::{IndexConfig, PathsConfig};
use embedscope::storage::{append_records, write_shard};
use embedscope::vector::VectorDimension;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

/// A dataset snapshot laid out in a temporary directory.
pub struct Snapshot {
    pub dir: TempDir,
    pub paths: PathsConfig,
}

impl Snapshot {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = dir.path();
        let paths = PathsConfig {
            embeddings_dir: root.join("data").join("embeddings"),
            records_file: root.join("data").join("data_chunk.tsv"),
            index_file: root.join("index").join("index.bin"),
            points_file: root.join("projection").join("points.bin"),
        };
        Self { dir, paths }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `rows` as shards of `chunk` rows, with one text record per row.
    ///
    /// Record `i` holds the string `item-{i}`.
    pub fn write_store(&self, rows: &[f32], dim: usize, chunk: usize) {
        let dimension = VectorDimension::new(dim).expect("non-zero dimension");
        let total = rows.len() / dim;
        let mut start = 0;
        let mut sequence = 0u64;
        while start < total {
            let end = (start + chunk).min(total);
            let shard = self
                .paths
                .embeddings_dir
                .join(format!("text_embeddings_{sequence}.shard"));
            write_shard(&shard, &rows[start * dim..end * dim], dimension, sequence)
                .expect("Failed to write shard");
            let items: Vec<String> = (start..end).map(|i| format!("item-{i}")).collect();
            append_records(&self.paths.records_file, &items, MediaType::Text)
                .expect("Failed to append records");
            start = end;
            sequence += 1;
        }
    }
}

/// Uniform random rows in `[-1, 1)`.
pub fn random_rows(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}

/// Index parameters small enough for a 64 x 8 matrix.
pub fn small_index_config() -> IndexConfig {
    IndexConfig {
        training_size: 64,
        nlist: 4,
        subquantizers: 2,
        bits: 6,
        opq_iterations: 2,
        kmeans_iterations: 20,
        nprobe: 4,
        seed: 7,
        use_accelerator: false,
    }
}
