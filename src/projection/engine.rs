//! Offline projection job: layout, rescale, cluster, persist.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{PathsConfig, ProjectionConfig};
use crate::error::{ExplorerError, ExplorerResult};
use crate::indexing::builder::check_record_table;
use crate::projection::cluster::{cluster_points, remap_noise};
use crate::projection::points::write_points;
use crate::projection::rescale::rescale_axes;
use crate::projection::umap::{UmapParams, fit_transform};
use crate::storage::{EmbeddingMatrix, ensure_rows, load_matrix};
use crate::types::ProjectionPoint;

/// Summary of a finished projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionReport {
    pub rows: usize,
    pub epochs: usize,
    pub clusters: usize,
    pub noise_points: usize,
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_path: Option<PathBuf>,
}

/// Builds the 2D scatter layout of the embedding store.
#[derive(Debug, Clone)]
pub struct ProjectionEngine {
    config: ProjectionConfig,
}

impl ProjectionEngine {
    #[must_use]
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    /// Projects every row of `matrix`; point `i` describes row `i`.
    pub fn project(&self, matrix: &EmbeddingMatrix) -> ExplorerResult<(Vec<ProjectionPoint>, ProjectionReport)> {
        let started = Instant::now();
        if self.config.n_components != 2 {
            return Err(ExplorerError::Configuration {
                reason: format!(
                    "projection.n_components must be 2 for the (x, y, cluster) artifact, got {}",
                    self.config.n_components
                ),
            });
        }

        let params = UmapParams::from(&self.config);
        let mut layout = fit_transform(matrix.as_flat(), matrix.dimension().get(), &params)?;

        if let Some(range) = self.config.rescale {
            rescale_axes(&mut layout.coords, layout.n_components, range)?;
        }

        let xy: Vec<[f32; 2]> = layout
            .coords
            .chunks_exact(2)
            .map(|c| [c[0], c[1]])
            .collect();
        let labels = cluster_points(&xy, &self.config.clustering, self.config.seed)?;
        let noise_points = labels.iter().filter(|l| l.is_noise()).count();
        let ids = remap_noise(&labels);

        let points: Vec<ProjectionPoint> = xy
            .iter()
            .zip(&ids)
            .map(|(&[x, y], &cluster)| ProjectionPoint { x, y, cluster })
            .collect();
        ensure_rows("projection points", matrix.len(), points.len())?;

        let clusters = ids.iter().max().map_or(0, |max| *max as usize + 1);
        if noise_points > 0 {
            tracing::info!(
                "{noise_points} noise points assigned to trailing cluster {}",
                clusters - 1
            );
        }

        let report = ProjectionReport {
            rows: points.len(),
            epochs: layout.epochs,
            clusters,
            noise_points,
            elapsed: started.elapsed(),
            points_path: None,
        };
        Ok((points, report))
    }

    /// Full offline job: load, align-check, project, persist.
    pub fn project_from_store(&self, paths: &PathsConfig) -> ExplorerResult<ProjectionReport> {
        let matrix = load_matrix(&paths.embeddings_dir)?;
        check_record_table(&paths.records_file, matrix.len())?;

        let (points, mut report) = self.project(&matrix)?;
        write_points(&paths.points_file, &points)?;

        report.points_path = Some(paths.points_file.clone());
        tracing::info!(
            "Projection finished: {} points, {} clusters in {:.2?}",
            report.rows,
            report.clusters,
            report.elapsed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusteringConfig;
    use crate::projection::points::read_points;
    use crate::storage::{append_records, write_shard};
    use crate::types::MediaType;
    use crate::vector::VectorDimension;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    fn config() -> ProjectionConfig {
        ProjectionConfig {
            n_neighbors: 5,
            n_epochs: Some(30),
            ..ProjectionConfig::default()
        }
    }

    fn random_matrix(n: usize, dim: usize) -> EmbeddingMatrix {
        let mut rng = StdRng::seed_from_u64(11);
        let data = (0..n * dim).map(|_| rng.random_range(-1.0..1.0)).collect();
        EmbeddingMatrix::from_flat(VectorDimension::new(dim).unwrap(), data).unwrap()
    }

    #[test]
    fn test_points_are_rescaled_and_aligned() {
        let matrix = random_matrix(40, 8);
        let engine = ProjectionEngine::new(ProjectionConfig {
            clustering: ClusteringConfig::Centroid { clusters: 3 },
            ..config()
        });
        let (points, report) = engine.project(&matrix).unwrap();

        assert_eq!(points.len(), 40);
        assert_eq!(report.rows, 40);
        assert_eq!(report.noise_points, 0);
        assert!(report.clusters <= 3);
        for p in &points {
            assert!((-1.0..=1.0).contains(&p.x));
            assert!((-1.0..=1.0).contains(&p.y));
            assert!((p.cluster as usize) < report.clusters);
        }
    }

    #[test]
    fn test_density_noise_has_no_sentinel() {
        let matrix = random_matrix(30, 4);
        let engine = ProjectionEngine::new(ProjectionConfig {
            clustering: ClusteringConfig::Density {
                eps: 1e-6,
                min_samples: 2,
            },
            ..config()
        });
        let (points, report) = engine.project(&matrix).unwrap();

        // Nothing is that dense, so every point is noise in cluster 0
        assert_eq!(report.noise_points, 30);
        assert_eq!(report.clusters, 1);
        assert!(points.iter().all(|p| p.cluster == 0));
    }

    #[test]
    fn test_three_components_are_rejected() {
        let engine = ProjectionEngine::new(ProjectionConfig {
            n_components: 3,
            ..config()
        });
        assert!(matches!(
            engine.project(&random_matrix(10, 4)),
            Err(ExplorerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_project_from_store_persists_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let paths = PathsConfig {
            embeddings_dir: temp_dir.path().join("embeddings"),
            records_file: temp_dir.path().join("data_chunk.tsv"),
            index_file: temp_dir.path().join("index.bin"),
            points_file: temp_dir.path().join("projection").join("points.bin"),
        };
        let matrix = random_matrix(20, 4);
        write_shard(
            &paths.embeddings_dir.join("text_embeddings_0.shard"),
            matrix.as_flat(),
            matrix.dimension(),
            0,
        )
        .unwrap();
        let rows: Vec<String> = (0..20).map(|i| format!("row {i}")).collect();
        append_records(&paths.records_file, &rows, MediaType::Text).unwrap();

        let engine = ProjectionEngine::new(ProjectionConfig {
            clustering: ClusteringConfig::None,
            ..config()
        });
        let report = engine.project_from_store(&paths).unwrap();
        assert_eq!(report.points_path.as_deref(), Some(paths.points_file.as_path()));

        let stored = read_points(&paths.points_file).unwrap();
        assert_eq!(stored.len(), 20);
        assert!(stored.iter().all(|p| p[2] == 0.0));
    }

    #[test]
    fn test_misaligned_records_abort_before_persist() {
        let temp_dir = TempDir::new().unwrap();
        let paths = PathsConfig {
            embeddings_dir: temp_dir.path().join("embeddings"),
            records_file: temp_dir.path().join("data_chunk.tsv"),
            index_file: temp_dir.path().join("index.bin"),
            points_file: temp_dir.path().join("points.bin"),
        };
        let matrix = random_matrix(10, 4);
        write_shard(
            &paths.embeddings_dir.join("text_embeddings_0.shard"),
            matrix.as_flat(),
            matrix.dimension(),
            0,
        )
        .unwrap();
        append_records(&paths.records_file, &["just one"], MediaType::Text).unwrap();

        let result = ProjectionEngine::new(config()).project_from_store(&paths);
        assert!(matches!(
            result,
            Err(ExplorerError::AlignmentViolation { .. })
        ));
        assert!(!paths.points_file.exists());
    }
}
