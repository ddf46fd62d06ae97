//! Offline ANN index build.
//!
//! Loads the embedding matrix, normalizes it, trains the composite quantizer
//! on a sampled subset, adds every row in ordinal order and persists the
//! result. Any failure aborts before the persist step, so a previous index
//! file is either left untouched or atomically replaced.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::ann::{ComputeDevice, DeviceRegistry, IndexMetadata, IndexParams, IvfPqIndex, save_index};
use crate::config::{IndexConfig, PathsConfig};
use crate::error::ExplorerResult;
use crate::storage::{EmbeddingMatrix, RecordTable, ensure_rows, load_matrix};

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub rows: usize,
    pub dimension: usize,
    pub training_rows: usize,
    pub nlist: usize,
    pub subquantizers: usize,
    pub opq: bool,
    pub device: ComputeDevice,
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,
}

/// Builds IVF-PQ indexes from the embedding store.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    config: IndexConfig,
    devices: DeviceRegistry,
}

impl IndexBuilder {
    #[must_use]
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            devices: DeviceRegistry::new(),
        }
    }

    /// Registers accelerator backends checked before each build.
    #[must_use]
    pub fn with_devices(mut self, devices: DeviceRegistry) -> Self {
        self.devices = devices;
        self
    }

    #[must_use]
    pub fn params(&self) -> IndexParams {
        IndexParams {
            nlist: self.config.nlist,
            subquantizers: self.config.subquantizers,
            bits: self.config.bits,
            nprobe: self.config.nprobe,
            opq_iterations: self.config.opq_iterations,
            kmeans_iterations: self.config.kmeans_iterations,
        }
    }

    /// Trains and populates an index in memory.
    ///
    /// Internal id `i` of the returned index is row `i` of `matrix`.
    pub fn build(&self, mut matrix: EmbeddingMatrix) -> ExplorerResult<(IvfPqIndex, BuildReport)> {
        let started = Instant::now();
        let mut index = IvfPqIndex::new(matrix.dimension(), self.params())?;
        let n = matrix.len();

        matrix.normalize();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let amount = self.config.training_size.min(n);
        let mut sample = rand::seq::index::sample(&mut rng, n, amount).into_vec();
        sample.sort_unstable();
        let training = matrix.gather(&sample);
        tracing::info!("Sampled {} of {n} rows for training", sample.len());

        index.train(&training, &mut rng)?;
        drop(training);

        index.add(matrix.as_flat())?;
        ensure_rows("ANN index", n, index.ntotal())?;

        let (device, backend) = self.devices.select(self.config.use_accelerator);
        if let Some(backend) = backend {
            backend.upload(&index, true)?;
            tracing::info!("Mirrored index onto {device} with 16-bit storage");
        } else {
            tracing::debug!("No accelerator available, index stays on the CPU");
        }

        let report = BuildReport {
            rows: n,
            dimension: matrix.dimension().get(),
            training_rows: sample.len(),
            nlist: index.nlist(),
            subquantizers: self.config.subquantizers,
            opq: index.has_rotation(),
            device,
            elapsed: started.elapsed(),
            index_path: None,
        };
        Ok((index, report))
    }

    /// Full offline job: load, align-check, build, persist.
    pub fn build_from_store(&self, paths: &PathsConfig) -> ExplorerResult<BuildReport> {
        let matrix = load_matrix(&paths.embeddings_dir)?;
        check_record_table(&paths.records_file, matrix.len())?;

        let (index, mut report) = self.build(matrix)?;
        let metadata = IndexMetadata::describe(&index, report.training_rows, report.device.clone());
        save_index(&paths.index_file, &index, &metadata)?;

        report.index_path = Some(paths.index_file.clone());
        tracing::info!(
            "Index build finished: {} rows in {:.2?}",
            report.rows,
            report.elapsed
        );
        Ok(report)
    }
}

/// Refuses to build against a record table of a different snapshot.
///
/// A missing table is tolerated with a warning; a present one must have
/// exactly one row per matrix row.
pub(crate) fn check_record_table(path: &Path, rows: usize) -> ExplorerResult<()> {
    if !path.exists() {
        tracing::warn!(
            "Record table {} does not exist; search results cannot be resolved until it is written",
            path.display()
        );
        return Ok(());
    }
    let table = RecordTable::open(path)?;
    ensure_rows("record table", rows, table.len())
}
