//! Process-wide query context.
//!
//! Holds the expensive read-only resources behind the query API: one
//! encoder per modality, the parsed record table, the loaded ANN index and
//! the projection points. Each is loaded on first use and then shared by
//! every request for the lifetime of the context. Concurrent first callers
//! race for a write lock; the winner loads, the others observe its value.
//! A failed load is not cached, so the next request retries it.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ann::{IndexMetadata, IvfPqIndex, NORMALIZATION_L2, load_index};
use crate::config::{EncoderSettings, PathsConfig, Settings};
use crate::error::{ErrorResponse, ExplorerError, ExplorerResult};
use crate::projection::read_points;
use crate::storage::{RecordTable, ensure_rows};
use crate::types::{Modality, Ordinal, RawRecord};
use crate::vector::{Encoder, EncoderFactory, EncoderSpec, FastEmbedFactory, l2_normalize};

/// One similarity query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text, or an image path or URI for image queries
    pub query_data: String,
    pub modality: Modality,
    /// Source language hint; the configured default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>,
}

impl SearchRequest {
    pub fn new(query_data: impl Into<String>, modality: Modality) -> Self {
        Self {
            query_data: query_data.into(),
            modality,
            source_lang: None,
        }
    }

    pub fn text(query_data: impl Into<String>) -> Self {
        Self::new(query_data, Modality::Text)
    }

    #[must_use]
    pub fn with_source_lang(mut self, source_lang: impl Into<String>) -> Self {
        self.source_lang = Some(source_lang.into());
        self
    }
}

/// A loaded index with the metadata it was persisted with.
#[derive(Debug)]
pub struct LoadedIndex {
    pub metadata: IndexMetadata,
    pub index: IvfPqIndex,
}

type Slot<T> = RwLock<Option<Arc<T>>>;

/// Returns the cached value, loading it under the write lock on first use.
fn load_once<T>(slot: &Slot<T>, load: impl FnOnce() -> ExplorerResult<T>) -> ExplorerResult<Arc<T>> {
    if let Some(value) = slot.read().as_ref() {
        return Ok(Arc::clone(value));
    }
    let mut guard = slot.write();
    if let Some(value) = guard.as_ref() {
        return Ok(Arc::clone(value));
    }
    let value = Arc::new(load()?);
    *guard = Some(Arc::clone(&value));
    Ok(value)
}

/// Shared state for the query API.
pub struct ExplorerContext {
    paths: PathsConfig,
    encoder_settings: EncoderSettings,
    nprobe: Option<usize>,
    factory: Arc<dyn EncoderFactory>,
    encoders: DashMap<Modality, Arc<dyn Encoder>>,
    records: Slot<RecordTable>,
    index: Slot<LoadedIndex>,
    points: Slot<Vec<[f32; 3]>>,
}

impl std::fmt::Debug for ExplorerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorerContext")
            .field("paths", &self.paths)
            .field("encoders_loaded", &self.encoders.len())
            .field("records_loaded", &self.records.read().is_some())
            .field("index_loaded", &self.index.read().is_some())
            .field("points_loaded", &self.points.read().is_some())
            .finish()
    }
}

impl ExplorerContext {
    pub fn new(
        paths: PathsConfig,
        encoder_settings: EncoderSettings,
        factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        Self {
            paths,
            encoder_settings,
            nprobe: None,
            factory,
            encoders: DashMap::new(),
            records: RwLock::new(None),
            index: RwLock::new(None),
            points: RwLock::new(None),
        }
    }

    /// Context over the configured workspace with fastembed encoders.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.resolved_paths(),
            settings.encoders.clone(),
            Arc::new(FastEmbedFactory),
        )
        .with_nprobe(settings.index.nprobe)
    }

    /// Overrides the number of searched cells stored in the index.
    #[must_use]
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = Some(nprobe);
        self
    }

    #[must_use]
    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    /// Encoder for `modality`, created once per context.
    pub fn encoder(&self, modality: Modality) -> ExplorerResult<Arc<dyn Encoder>> {
        if let Some(encoder) = self.encoders.get(&modality) {
            return Ok(Arc::clone(encoder.value()));
        }
        let spec = EncoderSpec::for_modality(modality, &self.encoder_settings)?;
        let entry = self.encoders.entry(modality).or_try_insert_with(|| {
            tracing::info!("Loading {modality} encoder");
            self.factory.create(&spec)
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// The record table, parsed once per context.
    pub fn records(&self) -> ExplorerResult<Arc<RecordTable>> {
        load_once(&self.records, || {
            let table = RecordTable::open(&self.paths.records_file)?;
            tracing::info!("Cached record table with {} rows", table.len());
            Ok(table)
        })
    }

    /// The ANN index, loaded once per context.
    pub fn index(&self) -> ExplorerResult<Arc<LoadedIndex>> {
        load_once(&self.index, || {
            let (metadata, mut index) = load_index(&self.paths.index_file)?;
            if metadata.normalization != NORMALIZATION_L2 {
                return Err(ExplorerError::CorruptArtifact {
                    path: self.paths.index_file.clone(),
                    reason: format!(
                        "index was built with '{}' normalization, queries use '{NORMALIZATION_L2}'",
                        metadata.normalization
                    ),
                });
            }
            if let Some(nprobe) = self.nprobe {
                index.set_nprobe(nprobe);
            }
            Ok(LoadedIndex { metadata, index })
        })
    }

    fn points(&self) -> ExplorerResult<Arc<Vec<[f32; 3]>>> {
        load_once(&self.points, || {
            let points = read_points(&self.paths.points_file)?;
            tracing::info!("Cached {} projection points", points.len());
            Ok(points)
        })
    }

    /// Returns up to `k` records most similar to the query, best first.
    ///
    /// Fewer than `k` records come back only when the index holds fewer
    /// candidates; an empty result is a valid answer, never a masked error.
    ///
    /// # Errors
    /// - `InvalidQuery` for an empty query or `k == 0`
    /// - `UnsupportedModality` when no encoder exists for the modality
    /// - `IndexNotFound` / `RecordTableNotFound` before a build
    /// - `EmbeddingFailure` when the encoder returns nothing
    pub fn search(&self, request: &SearchRequest, k: usize) -> ExplorerResult<Vec<RawRecord>> {
        if request.query_data.trim().is_empty() {
            return Err(ExplorerError::InvalidQuery {
                reason: "query must not be empty".to_string(),
            });
        }
        if k == 0 {
            return Err(ExplorerError::InvalidQuery {
                reason: "k must be at least 1".to_string(),
            });
        }
        // Fail on unsupported modalities before touching any artifact
        EncoderSpec::for_modality(request.modality, &self.encoder_settings)?;

        let loaded = self.index()?;
        let records = self.records()?;
        ensure_rows("record table", loaded.index.ntotal(), records.len())?;

        let encoder = self.encoder(request.modality)?;
        let source_lang = request
            .source_lang
            .as_deref()
            .unwrap_or(&self.encoder_settings.source_lang);
        let mut query = encoder.embed(&request.query_data, source_lang)?;
        l2_normalize(&mut query);

        let neighbors = loaded.index.search(&query, k)?;
        let ordinals: Vec<Ordinal> = neighbors.iter().filter_map(|n| n.ordinal).collect();
        tracing::debug!(
            "{} query matched {} of {k} slots",
            request.modality,
            ordinals.len()
        );

        records.lookup(&ordinals)
    }

    /// The projection artifact as `[x, y, cluster]` rows in ordinal order.
    ///
    /// # Errors
    /// - `PointsNotFound` before the projection job has run
    /// - `AlignmentViolation` when the points no longer match the record table
    pub fn get_embeddings(&self) -> ExplorerResult<Vec<[f32; 3]>> {
        let points = self.points()?;
        let records = self.records()?;
        ensure_rows("projection points", records.len(), points.len())?;
        Ok(points.as_ref().clone())
    }

    /// Records for the given ordinals, in the order given.
    ///
    /// # Errors
    /// `OutOfRangeOrdinal` if any ordinal is outside the record table.
    pub fn get_embeddings_details(&self, ordinals: &[Ordinal]) -> ExplorerResult<Vec<RawRecord>> {
        if ordinals.is_empty() {
            return Ok(Vec::new());
        }
        self.records()?.lookup(ordinals)
    }
}

/// Converts a query result into the structured request-boundary form.
pub fn into_reply<T>(result: ExplorerResult<T>) -> Result<T, ErrorResponse> {
    result.map_err(|err| {
        tracing::warn!("Request failed: {err}");
        ErrorResponse::from(&err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;
    use crate::vector::{MockEncoder, MockEncoderFactory, VectorDimension};
    use tempfile::TempDir;

    fn paths(root: &std::path::Path) -> PathsConfig {
        PathsConfig {
            embeddings_dir: root.join("embeddings"),
            records_file: root.join("data_chunk.tsv"),
            index_file: root.join("index.bin"),
            points_file: root.join("points.bin"),
        }
    }

    fn context(root: &std::path::Path, factory: Arc<MockEncoderFactory>) -> ExplorerContext {
        ExplorerContext::new(paths(root), EncoderSettings::default(), factory)
    }

    fn text_factory() -> Arc<MockEncoderFactory> {
        Arc::new(MockEncoderFactory::new().with_encoder(MockEncoder::new(
            MediaType::Text,
            VectorDimension::new(4).unwrap(),
        )))
    }

    #[test]
    fn test_empty_query_is_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(temp_dir.path(), text_factory());
        let result = ctx.search(&SearchRequest::text("   "), 5);
        assert!(matches!(result, Err(ExplorerError::InvalidQuery { .. })));
    }

    #[test]
    fn test_search_without_index_is_index_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(temp_dir.path(), text_factory());
        let result = ctx.search(&SearchRequest::text("hello"), 5);
        assert!(matches!(result, Err(ExplorerError::IndexNotFound { .. })));
    }

    #[test]
    fn test_video_is_unsupported() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(temp_dir.path(), text_factory());
        let result = ctx.search(&SearchRequest::new("clip.mp4", Modality::Video), 5);
        assert!(matches!(
            result,
            Err(ExplorerError::UnsupportedModality { .. })
        ));
    }

    #[test]
    fn test_encoder_is_created_once() {
        let temp_dir = TempDir::new().unwrap();
        let factory = text_factory();
        let ctx = context(temp_dir.path(), Arc::clone(&factory));

        let first = ctx.encoder(Modality::Text).unwrap();
        let second = ctx.encoder(Modality::Text).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 1);
    }

    #[test]
    fn test_missing_points_and_details() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(temp_dir.path(), text_factory());
        assert!(matches!(
            ctx.get_embeddings(),
            Err(ExplorerError::PointsNotFound { .. })
        ));
        assert!(ctx.get_embeddings_details(&[]).unwrap().is_empty());
        assert!(matches!(
            ctx.get_embeddings_details(&[Ordinal::new(0)]),
            Err(ExplorerError::RecordTableNotFound { .. })
        ));
    }

    #[test]
    fn test_reply_carries_status_code() {
        let reply = into_reply::<()>(Err(ExplorerError::IndexNotFound {
            path: "index.bin".into(),
        }));
        let response = reply.unwrap_err();
        assert_eq!(response.code, "INDEX_NOT_FOUND");
        assert!(response.requires_rebuild);
    }
}
