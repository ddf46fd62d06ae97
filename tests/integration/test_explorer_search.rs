//! Similarity search and record lookup through `ExplorerContext`.

use std::sync::Arc;

use embedscope::config::EncoderSettings;
use embedscope::vector::{MockEncoder, MockEncoderFactory, VectorDimension};
use embedscope::{
    ExplorerContext, ExplorerError, IndexBuilder, MediaType, Ordinal, SearchRequest,
};

use crate::common::{Snapshot, random_rows, small_index_config};

const DIM: usize = 8;

fn built_snapshot() -> (Snapshot, Vec<f32>) {
    let snapshot = Snapshot::new();
    let rows = random_rows(64, DIM, 11);
    snapshot.write_store(&rows, DIM, 16);
    IndexBuilder::new(small_index_config())
        .build_from_store(&snapshot.paths)
        .unwrap();
    (snapshot, rows)
}

fn text_factory(rows: &[f32]) -> Arc<MockEncoderFactory> {
    let encoder = MockEncoder::new(MediaType::Text, VectorDimension::new(DIM).unwrap())
        .with_fixed("seventh", rows[7 * DIM..8 * DIM].to_vec());
    Arc::new(MockEncoderFactory::new().with_encoder(encoder))
}

fn context(snapshot: &Snapshot, factory: Arc<MockEncoderFactory>) -> ExplorerContext {
    ExplorerContext::new(snapshot.paths.clone(), EncoderSettings::default(), factory)
}

#[test]
fn test_query_equal_to_a_row_finds_that_row_first() {
    let (snapshot, rows) = built_snapshot();
    let explorer = context(&snapshot, text_factory(&rows));

    let results = explorer.search(&SearchRequest::text("seventh"), 5).unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].ordinal, Ordinal::new(7));
    assert_eq!(results[0].data, "item-7");
    assert_eq!(results[0].media_type, MediaType::Text);
}

#[test]
fn test_k_larger_than_collection_returns_every_row() {
    let (snapshot, rows) = built_snapshot();
    let explorer = context(&snapshot, text_factory(&rows));

    let results = explorer.search(&SearchRequest::text("seventh"), 100).unwrap();
    assert_eq!(results.len(), 64);

    // An unbounded k is served, not a crash
    let results = explorer
        .search(&SearchRequest::text("seventh"), usize::MAX)
        .unwrap();
    assert_eq!(results.len(), 64);
    assert_eq!(results[0].ordinal, Ordinal::new(7));
}

#[test]
fn test_encoder_is_loaded_once_per_context() {
    let (snapshot, rows) = built_snapshot();
    let factory = text_factory(&rows);
    let explorer = context(&snapshot, Arc::clone(&factory));

    for query in ["seventh", "anything", "else"] {
        explorer.search(&SearchRequest::text(query), 3).unwrap();
    }
    assert_eq!(factory.created(), 1);
}

#[test]
fn test_search_before_build_reports_missing_index() {
    let snapshot = Snapshot::new();
    snapshot.write_store(&random_rows(10, DIM, 1), DIM, 10);
    let factory = text_factory(&random_rows(10, DIM, 1));
    let explorer = context(&snapshot, Arc::clone(&factory));

    let err = explorer.search(&SearchRequest::text("seventh"), 3).unwrap_err();
    assert!(matches!(err, ExplorerError::IndexNotFound { .. }));
    assert_eq!(err.status_code(), "INDEX_NOT_FOUND");
    // No model is loaded for a query that cannot be answered
    assert_eq!(factory.created(), 0);
}

#[test]
fn test_audio_queries_go_through_an_injected_encoder() {
    let (snapshot, rows) = built_snapshot();
    let speech = MockEncoder::new(MediaType::Audio, VectorDimension::new(DIM).unwrap())
        .with_fixed("clip-7.wav", rows[7 * DIM..8 * DIM].to_vec());
    let factory = Arc::new(MockEncoderFactory::new().with_encoder(speech));
    let explorer = context(&snapshot, Arc::clone(&factory));

    let request = SearchRequest::new("clip-7.wav", MediaType::Audio);
    let results = explorer.search(&request, 3).unwrap();
    assert_eq!(results[0].ordinal, Ordinal::new(7));
    assert_eq!(factory.created(), 1);
}

#[test]
fn test_audio_without_a_speech_encoder_is_unsupported() {
    let (snapshot, rows) = built_snapshot();
    let explorer = context(&snapshot, text_factory(&rows));

    let request = SearchRequest::new("clip-7.wav", MediaType::Audio);
    let err = explorer.search(&request, 3).unwrap_err();
    assert!(matches!(err, ExplorerError::UnsupportedModality { .. }));
}

#[test]
fn test_video_queries_are_unsupported() {
    let (snapshot, rows) = built_snapshot();
    let explorer = context(&snapshot, text_factory(&rows));

    let request = SearchRequest::new("clip.mp4", MediaType::Video);
    let err = explorer.search(&request, 3).unwrap_err();
    assert!(matches!(err, ExplorerError::UnsupportedModality { .. }));
}

#[test]
fn test_details_follow_requested_order() {
    let (snapshot, rows) = built_snapshot();
    let explorer = context(&snapshot, text_factory(&rows));

    let ordinals = [Ordinal::new(12), Ordinal::new(0), Ordinal::new(12)];
    let records = explorer.get_embeddings_details(&ordinals).unwrap();
    let data: Vec<&str> = records.iter().map(|r| r.data.as_str()).collect();
    assert_eq!(data, ["item-12", "item-0", "item-12"]);

    assert!(explorer.get_embeddings_details(&[]).unwrap().is_empty());

    let err = explorer
        .get_embeddings_details(&[Ordinal::new(64)])
        .unwrap_err();
    assert!(matches!(err, ExplorerError::OutOfRangeOrdinal { ordinal: 64, len: 64 }));
}
