//! Embed job: the single writer of the embedding store.
//!
//! Items are encoded in batches and flushed every `chunk_size` rows as one
//! shard followed by exactly one record-table append for the same rows. The
//! shard goes first; if the append then fails the job stops and `verify`
//! reports the store as misaligned rather than silently continuing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::display::progress_bar_if;
use crate::error::{ExplorerError, ExplorerResult, IoContext};
use crate::storage::{RecordTable, append_records, ensure_rows, list_shards, write_shard};
use crate::types::MediaType;
use crate::vector::{Encoder, VectorDimension};

/// Summary of one embed job run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub media_type: MediaType,
    pub rows: usize,
    pub shards: usize,
    pub dimension: usize,
    pub elapsed: Duration,
}

/// Encodes items and appends them to the store in lockstep chunks.
pub struct EmbedJob {
    encoder: Arc<dyn Encoder>,
    embeddings_dir: PathBuf,
    records_file: PathBuf,
    chunk_size: usize,
    batch_size: usize,
    source_lang: String,
    show_progress: bool,
}

impl EmbedJob {
    pub fn new(
        encoder: Arc<dyn Encoder>,
        embeddings_dir: impl Into<PathBuf>,
        records_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            encoder,
            embeddings_dir: embeddings_dir.into(),
            records_file: records_file.into(),
            chunk_size: 1000,
            batch_size: 32,
            source_lang: "eng_Latn".to_string(),
            show_progress: false,
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_source_lang(mut self, source_lang: impl Into<String>) -> Self {
        self.source_lang = source_lang.into();
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Reads one item per non-empty line of `input` and ingests them.
    pub fn run_file(&self, input: &Path) -> ExplorerResult<IngestReport> {
        let contents = std::fs::read_to_string(input).with_path(input)?;
        let items: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        self.run(&items)
    }

    /// Encodes `items` and appends them to the store.
    ///
    /// # Errors
    /// - `AlignmentViolation` if the store is already misaligned
    /// - `ShapeMismatch` if the encoder dimension differs from existing shards
    /// - `EmbeddingFailure` if the encoder returns fewer vectors than inputs
    pub fn run<S: AsRef<str>>(&self, items: &[S]) -> ExplorerResult<IngestReport> {
        let started = Instant::now();
        let media_type = self.encoder.modality();
        let dimension = self.encoder.dimension();

        let mut sequence = self.check_store(dimension)?;
        let progress = progress_bar_if(
            self.show_progress,
            items.len() as u64,
            &format!("embedding {media_type} items"),
        );

        let mut shards = 0;
        for chunk in items.chunks(self.chunk_size) {
            let mut rows = Vec::with_capacity(chunk.len() * dimension.get());
            for batch in chunk.chunks(self.batch_size) {
                let inputs: Vec<&str> = batch.iter().map(AsRef::as_ref).collect();
                let vectors = self.encoder.embed_batch(&inputs, &self.source_lang)?;
                if vectors.len() != inputs.len() {
                    return Err(ExplorerError::EmbeddingFailure {
                        modality: media_type.to_string(),
                        reason: format!(
                            "encoder returned {} vectors for {} inputs",
                            vectors.len(),
                            inputs.len()
                        ),
                    });
                }
                for vector in &vectors {
                    dimension.validate_vector(vector)?;
                    rows.extend_from_slice(vector);
                }
                progress.inc(batch.len() as u64);
            }

            let path = self
                .embeddings_dir
                .join(format!("{media_type}_embeddings_{sequence}.shard"));
            write_shard(&path, &rows, dimension, sequence)?;
            append_records(&self.records_file, chunk, media_type)?;

            tracing::debug!("wrote shard {} with {} rows", path.display(), chunk.len());
            sequence += 1;
            shards += 1;
        }

        progress.finish_and_clear();
        let report = IngestReport {
            media_type,
            rows: items.len(),
            shards,
            dimension: dimension.get(),
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Ingested {} {media_type} rows into {} shards",
            report.rows,
            report.shards
        );
        Ok(report)
    }

    /// Validates the existing store and returns the next shard sequence number.
    fn check_store(&self, dimension: VectorDimension) -> ExplorerResult<u64> {
        let shards = if self.embeddings_dir.exists() {
            list_shards(&self.embeddings_dir)?
        } else {
            Vec::new()
        };

        if let Some(first) = shards.first()
            && first.header.dimension != dimension.get()
        {
            return Err(ExplorerError::ShapeMismatch {
                path: first.path.clone(),
                expected: first.header.dimension,
                actual: dimension.get(),
            });
        }

        let matrix_rows: usize = shards.iter().map(|s| s.header.count).sum();
        let record_rows = if self.records_file.exists() {
            RecordTable::open(&self.records_file)?.len()
        } else {
            0
        };
        ensure_rows("record table", matrix_rows, record_rows)?;

        Ok(shards
            .iter()
            .map(|s| s.header.sequence + 1)
            .max()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::load_matrix;
    use crate::types::Ordinal;
    use crate::vector::MockEncoder;
    use tempfile::TempDir;

    fn encoder(dim: usize) -> Arc<dyn Encoder> {
        Arc::new(MockEncoder::new(
            MediaType::Text,
            VectorDimension::new(dim).unwrap(),
        ))
    }

    #[test]
    fn test_chunks_write_aligned_shards_and_records() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("embeddings");
        let records = temp_dir.path().join("data_chunk.tsv");
        let items: Vec<String> = (0..25).map(|i| format!("sentence {i}")).collect();

        let report = EmbedJob::new(encoder(4), &dir, &records)
            .with_chunk_size(10)
            .with_batch_size(3)
            .run(&items)
            .unwrap();
        assert_eq!(report.rows, 25);
        assert_eq!(report.shards, 3);

        let matrix = load_matrix(&dir).unwrap();
        let table = RecordTable::open(&records).unwrap();
        assert_eq!(matrix.len(), 25);
        assert_eq!(table.len(), 25);

        let mock = MockEncoder::new(MediaType::Text, VectorDimension::new(4).unwrap());
        for i in [0usize, 9, 10, 24] {
            let record = table.get(Ordinal::new(i as u32)).unwrap();
            assert_eq!(record.data, items[i]);
            assert_eq!(matrix.row(i), mock.embed(&items[i], "eng_Latn").unwrap().as_slice());
        }
    }

    #[test]
    fn test_second_run_continues_sequence() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("embeddings");
        let records = temp_dir.path().join("data_chunk.tsv");

        let job = EmbedJob::new(encoder(4), &dir, &records).with_chunk_size(2);
        job.run(&["a", "b", "c"]).unwrap();
        job.run(&["d"]).unwrap();

        let shards = list_shards(&dir).unwrap();
        let mut sequences: Vec<u64> = shards.iter().map(|s| s.header.sequence).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(dir.join("text_embeddings_2.shard").exists());
    }

    #[test]
    fn test_dimension_change_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("embeddings");
        let records = temp_dir.path().join("data_chunk.tsv");

        EmbedJob::new(encoder(4), &dir, &records).run(&["a"]).unwrap();
        let result = EmbedJob::new(encoder(8), &dir, &records).run(&["b"]);
        assert!(matches!(result, Err(ExplorerError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_silent_encoder_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("embeddings");
        let records = temp_dir.path().join("data_chunk.tsv");
        let silent: Arc<dyn Encoder> = Arc::new(
            MockEncoder::new(MediaType::Text, VectorDimension::new(4).unwrap()).silent(),
        );

        let result = EmbedJob::new(silent, &dir, &records).run(&["a", "b"]);
        assert!(matches!(result, Err(ExplorerError::EmbeddingFailure { .. })));
        assert!(!records.exists());
    }

    #[test]
    fn test_misaligned_store_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("embeddings");
        let records = temp_dir.path().join("data_chunk.tsv");
        append_records(&records, &["orphan"], MediaType::Text).unwrap();

        let result = EmbedJob::new(encoder(4), &dir, &records).run(&["a"]);
        assert!(matches!(
            result,
            Err(ExplorerError::AlignmentViolation { .. })
        ));
    }
}
