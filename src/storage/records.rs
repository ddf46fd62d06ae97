//! Positional raw-record table.
//!
//! A tab-separated file with a `data` and a `media_type` column, one row per
//! ordinal, appended in the same order as the shards are written. The header
//! is written on first append only.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::{ExplorerError, ExplorerResult, IoContext};
use crate::types::{MediaType, Ordinal, RawRecord};

const HEADER: [&str; 2] = ["data", "media_type"];

/// Appends rows of one media type to the record table.
///
/// Creates the table (and its parent directory) with a header on first
/// write. Must be called exactly once per shard, right after that shard is
/// persisted, so record row `i` keeps describing matrix row `i`.
///
/// Returns the number of rows appended.
pub fn append_records<S: AsRef<str>>(
    path: &Path,
    rows: &[S],
    media_type: MediaType,
) -> ExplorerResult<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_path(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_path(path)?;
    let is_new = file.metadata().with_path(path)?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(file);

    let csv_err = |e: csv::Error| ExplorerError::Persistence {
        path: path.to_path_buf(),
        source: Box::new(e),
    };

    if is_new {
        writer.write_record(HEADER).map_err(csv_err)?;
    }
    for row in rows {
        writer
            .write_record([row.as_ref(), media_type.as_str()])
            .map_err(csv_err)?;
    }
    writer.flush().with_path(path)?;

    Ok(rows.len())
}

/// Parsed record table held in memory for random access by ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTable {
    path: PathBuf,
    rows: Vec<(String, MediaType)>,
}

impl RecordTable {
    /// Reads and parses the whole table.
    ///
    /// # Errors
    /// - `RecordTableNotFound` if the file does not exist
    /// - `CorruptArtifact` on a bad header, ragged row or unknown media type
    pub fn open(path: impl AsRef<Path>) -> ExplorerResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ExplorerError::RecordTableNotFound {
                path: path.to_path_buf(),
            });
        }

        let corrupt = |reason: String| ExplorerError::CorruptArtifact {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_path(path)
            .map_err(|e| corrupt(e.to_string()))?;

        let headers = reader.headers().map_err(|e| corrupt(e.to_string()))?;
        if headers.iter().collect::<Vec<_>>() != HEADER {
            return Err(corrupt(format!(
                "expected header 'data\\tmedia_type', found '{}'",
                headers.iter().collect::<Vec<_>>().join("\\t")
            )));
        }

        let mut rows = Vec::new();
        for (row_idx, result) in reader.records().enumerate() {
            let record = result.map_err(|e| corrupt(format!("row {row_idx}: {e}")))?;
            let data = record
                .get(0)
                .ok_or_else(|| corrupt(format!("row {row_idx}: missing data column")))?;
            let media_type = record
                .get(1)
                .ok_or_else(|| corrupt(format!("row {row_idx}: missing media_type column")))?
                .parse::<MediaType>()
                .map_err(|e| corrupt(format!("row {row_idx}: {e}")))?;
            rows.push((data.to_string(), media_type));
        }

        tracing::debug!("Loaded record table with {} rows from {}", rows.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the record at `ordinal`, or `None` past the end of the table.
    #[must_use]
    pub fn get(&self, ordinal: Ordinal) -> Option<RawRecord> {
        self.rows
            .get(ordinal.as_usize())
            .map(|(data, media_type)| RawRecord {
                ordinal,
                data: data.clone(),
                media_type: *media_type,
            })
    }

    /// Materializes records for the given ordinals, preserving their order.
    ///
    /// # Errors
    /// `OutOfRangeOrdinal` if any ordinal is past the end of the table.
    pub fn lookup(&self, ordinals: &[Ordinal]) -> ExplorerResult<Vec<RawRecord>> {
        ordinals
            .iter()
            .map(|&ordinal| {
                self.get(ordinal).ok_or(ExplorerError::OutOfRangeOrdinal {
                    ordinal: u64::from(ordinal.get()),
                    len: self.rows.len(),
                })
            })
            .collect()
    }
}
