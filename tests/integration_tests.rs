// Gateway file to expose integration tests from the integration/ subdirectory
// This file allows Rust's test runner to discover tests in subdirectories

mod common;

#[path = "integration/test_index_persistence.rs"]
mod test_index_persistence;

#[path = "integration/test_explorer_search.rs"]
mod test_explorer_search;

#[path = "integration/test_projection_pipeline.rs"]
mod test_projection_pipeline;

#[path = "integration/test_snapshot_alignment.rs"]
mod test_snapshot_alignment;
