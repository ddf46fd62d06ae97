//! Projection job from the embedding store to the points artifact.

use std::sync::Arc;

use embedscope::config::{ClusteringConfig, EncoderSettings, ProjectionConfig};
use embedscope::projection::{ClusterLabel, read_points, remap_noise};
use embedscope::vector::MockEncoderFactory;
use embedscope::{ExplorerContext, ExplorerError, ProjectionEngine};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::Snapshot;

const DIM: usize = 8;

/// Two tight blobs: rows `0..n` near `+1`, rows `n..2n` near `-1`.
fn two_blobs(n: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(21);
    let mut rows = Vec::with_capacity(2 * n * DIM);
    for center in [1.0f32, -1.0] {
        for _ in 0..n {
            rows.extend((0..DIM).map(|_| center + rng.random_range(-0.05..0.05)));
        }
    }
    rows
}

fn config(clustering: ClusteringConfig) -> ProjectionConfig {
    ProjectionConfig {
        n_neighbors: 8,
        n_epochs: Some(100),
        clustering,
        ..ProjectionConfig::default()
    }
}

#[test]
fn test_noise_takes_the_id_after_the_largest_cluster() {
    let labels = [
        ClusterLabel::Assigned(0),
        ClusterLabel::Noise,
        ClusterLabel::Assigned(2),
        ClusterLabel::Noise,
    ];
    assert_eq!(remap_noise(&labels), vec![0, 3, 2, 3]);

    let all_noise = [ClusterLabel::Noise; 3];
    assert_eq!(remap_noise(&all_noise), vec![0, 0, 0]);
}

#[test]
fn test_project_from_store_writes_one_point_per_row() {
    let snapshot = Snapshot::new();
    snapshot.write_store(&two_blobs(20), DIM, 15);

    let engine = ProjectionEngine::new(config(ClusteringConfig::Centroid { clusters: 2 }));
    let report = engine.project_from_store(&snapshot.paths).unwrap();
    assert_eq!(report.rows, 40);
    assert_eq!(report.noise_points, 0);

    let points = read_points(&snapshot.paths.points_file).unwrap();
    assert_eq!(points.len(), 40);
    for [x, y, cluster] in &points {
        assert!((-1.0..=1.0).contains(x));
        assert!((-1.0..=1.0).contains(y));
        assert!(*cluster == 0.0 || *cluster == 1.0);
    }

    // Each blob lands in a single cluster of its own
    let first = points[0][2];
    let second = points[20][2];
    assert_ne!(first, second);
    assert!(points[..20].iter().all(|p| p[2] == first));
    assert!(points[20..].iter().all(|p| p[2] == second));
}

#[test]
fn test_density_labels_are_non_negative_and_contiguous_with_noise() {
    let snapshot = Snapshot::new();
    snapshot.write_store(&two_blobs(20), DIM, 40);

    let engine = ProjectionEngine::new(config(ClusteringConfig::Density {
        eps: 0.2,
        min_samples: 4,
    }));
    let report = engine.project_from_store(&snapshot.paths).unwrap();
    let points = read_points(&snapshot.paths.points_file).unwrap();

    let max = points.iter().map(|p| p[2] as u32).max().unwrap();
    assert_eq!(report.clusters, max as usize + 1);
    assert!(points.iter().all(|p| p[2] >= 0.0 && p[2].fract() == 0.0));
    if report.noise_points > 0 {
        let noise = points.iter().filter(|p| p[2] as u32 == max).count();
        assert!(noise >= report.noise_points);
    }
}

#[test]
fn test_explorer_serves_projection_points() {
    let snapshot = Snapshot::new();
    let explorer = ExplorerContext::new(
        snapshot.paths.clone(),
        EncoderSettings::default(),
        Arc::new(MockEncoderFactory::new()),
    );
    assert!(matches!(
        explorer.get_embeddings(),
        Err(ExplorerError::PointsNotFound { .. })
    ));

    snapshot.write_store(&two_blobs(10), DIM, 20);
    ProjectionEngine::new(config(ClusteringConfig::None))
        .project_from_store(&snapshot.paths)
        .unwrap();

    // Failed loads are not cached
    let points = explorer.get_embeddings().unwrap();
    assert_eq!(points.len(), 20);
    assert!(points.iter().all(|p| p[2] == 0.0));
}
