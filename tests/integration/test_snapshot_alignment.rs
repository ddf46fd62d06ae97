//! Every artifact of a snapshot must describe the same ordinals.

use std::sync::Arc;

use embedscope::config::{ClusteringConfig, EncoderSettings, IndexConfig, ProjectionConfig};
use embedscope::projection::read_points;
use embedscope::storage::{ArtifactRows, append_records, list_shards, verify_alignment, write_shard};
use embedscope::vector::{MockEncoder, MockEncoderFactory, VectorDimension};
use embedscope::{
    ExplorerContext, ExplorerError, IndexBuilder, MediaType, Ordinal, ProjectionEngine,
    SearchRequest,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::{Snapshot, random_rows, small_index_config};

fn build_all(snapshot: &Snapshot) {
    IndexBuilder::new(small_index_config())
        .build_from_store(&snapshot.paths)
        .unwrap();
    ProjectionEngine::new(ProjectionConfig {
        n_neighbors: 5,
        n_epochs: Some(30),
        clustering: ClusteringConfig::None,
        ..ProjectionConfig::default()
    })
    .project_from_store(&snapshot.paths)
    .unwrap();
}

#[test]
fn test_built_snapshot_is_aligned() {
    let snapshot = Snapshot::new();
    snapshot.write_store(&random_rows(64, 8, 2), 8, 25);
    build_all(&snapshot);

    let report = verify_alignment(&snapshot.paths);
    assert_eq!(report.matrix, ArtifactRows::Present(64));
    assert_eq!(report.records, ArtifactRows::Present(64));
    assert_eq!(report.index, ArtifactRows::Present(64));
    assert_eq!(report.points, ArtifactRows::Present(64));
    assert!(report.is_aligned());
}

#[test]
fn test_empty_snapshot_reports_missing_artifacts() {
    let snapshot = Snapshot::new();
    let report = verify_alignment(&snapshot.paths);
    assert_eq!(report.matrix, ArtifactRows::Missing);
    assert_eq!(report.index, ArtifactRows::Missing);
    assert!(report.violations().is_empty());
}

#[test]
fn test_extra_record_row_is_detected_and_blocks_search() {
    let snapshot = Snapshot::new();
    let rows = random_rows(64, 8, 4);
    snapshot.write_store(&rows, 8, 32);
    build_all(&snapshot);

    append_records(&snapshot.paths.records_file, &["stray"], MediaType::Text).unwrap();

    let report = verify_alignment(&snapshot.paths);
    assert!(!report.is_aligned());
    let violations = report.violations();
    assert_eq!(violations.len(), 1);
    assert!(matches!(
        violations[0],
        ExplorerError::AlignmentViolation {
            artifact: "record table",
            expected: 64,
            actual: 65,
        }
    ));

    let encoder = MockEncoder::new(MediaType::Text, VectorDimension::new(8).unwrap());
    let explorer = ExplorerContext::new(
        snapshot.paths.clone(),
        EncoderSettings::default(),
        Arc::new(MockEncoderFactory::new().with_encoder(encoder)),
    );
    let err = explorer.search(&SearchRequest::text("query"), 3).unwrap_err();
    assert!(matches!(err, ExplorerError::AlignmentViolation { .. }));
}

const DIM: usize = 8;
const ROWS: usize = 300;
const SHARD_ROWS: usize = 70;

/// PQ fine enough that a stored row is always its own nearest neighbor.
fn precise_index_config() -> IndexConfig {
    IndexConfig {
        training_size: ROWS,
        subquantizers: 4,
        bits: 8,
        ..small_index_config()
    }
}

#[test]
fn test_every_ordinal_maps_to_its_own_record_across_shards() {
    let snapshot = Snapshot::new();
    let rows = random_rows(ROWS, DIM, 17);
    snapshot.write_store(&rows, DIM, SHARD_ROWS);
    assert_eq!(list_shards(&snapshot.paths.embeddings_dir).unwrap().len(), 5);

    IndexBuilder::new(precise_index_config())
        .build_from_store(&snapshot.paths)
        .unwrap();

    let encoder = (0..ROWS).fold(
        MockEncoder::new(MediaType::Text, VectorDimension::new(DIM).unwrap()),
        |encoder, i| encoder.with_fixed(format!("row-{i}"), rows[i * DIM..(i + 1) * DIM].to_vec()),
    );
    let explorer = ExplorerContext::new(
        snapshot.paths.clone(),
        EncoderSettings::default(),
        Arc::new(MockEncoderFactory::new().with_encoder(encoder)),
    );

    for i in 0..ROWS {
        let results = explorer
            .search(&SearchRequest::text(format!("row-{i}")), 1)
            .unwrap();
        assert_eq!(results[0].ordinal, Ordinal::from_position(i).unwrap());
        assert_eq!(results[0].data, format!("item-{i}"), "row {i} resolved to another record");
    }
}

/// Row `i` sits in group `i % 3`; groups are far apart along separate axes.
fn interleaved_groups() -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(29);
    let mut rows = Vec::with_capacity(ROWS * DIM);
    for i in 0..ROWS {
        let group = i % 3;
        rows.extend((0..DIM).map(|axis| {
            let center = if axis == group { 3.0 } else { 0.0 };
            center + rng.random_range(-0.1f32..0.1)
        }));
    }
    rows
}

#[test]
fn test_projection_row_comes_from_the_same_ordinal() {
    let snapshot = Snapshot::new();
    snapshot.write_store(&interleaved_groups(), DIM, SHARD_ROWS);

    ProjectionEngine::new(ProjectionConfig {
        n_neighbors: 10,
        n_epochs: Some(100),
        clustering: ClusteringConfig::Centroid { clusters: 3 },
        ..ProjectionConfig::default()
    })
    .project_from_store(&snapshot.paths)
    .unwrap();

    let points = read_points(&snapshot.paths.points_file).unwrap();
    assert_eq!(points.len(), ROWS);

    let labels: Vec<f32> = (0..3).map(|group| points[group][2]).collect();
    assert_ne!(labels[0], labels[1]);
    assert_ne!(labels[1], labels[2]);
    assert_ne!(labels[0], labels[2]);
    for (i, point) in points.iter().enumerate() {
        assert_eq!(point[2], labels[i % 3], "point {i} landed in another group");
    }
}

#[test]
fn test_stale_projection_is_not_served_after_new_ingest() {
    let snapshot = Snapshot::new();
    let rows = random_rows(64, DIM, 6);
    snapshot.write_store(&rows, DIM, 32);
    build_all(&snapshot);

    // A later ingest grows the store without re-running the projection
    let extra = random_rows(1, DIM, 7);
    write_shard(
        &snapshot.paths.embeddings_dir.join("text_embeddings_9.shard"),
        &extra,
        VectorDimension::new(DIM).unwrap(),
        9,
    )
    .unwrap();
    append_records(&snapshot.paths.records_file, &["late"], MediaType::Text).unwrap();

    let explorer = ExplorerContext::new(
        snapshot.paths.clone(),
        EncoderSettings::default(),
        Arc::new(MockEncoderFactory::new()),
    );
    assert!(matches!(
        explorer.get_embeddings(),
        Err(ExplorerError::AlignmentViolation {
            artifact: "projection points",
            expected: 65,
            actual: 64,
        })
    ));
}
