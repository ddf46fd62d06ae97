//! Clustering of projected 2D points.
//!
//! Density clustering marks outliers as [`ClusterLabel::Noise`]; the
//! persisted artifact needs a concrete id for every point, so
//! [`remap_noise`] folds all noise into one trailing cluster.

use std::collections::{HashMap, VecDeque};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::config::ClusteringConfig;
use crate::error::{ExplorerError, ExplorerResult};
use crate::vector::{KMeansParams, Metric, kmeans};

/// Cluster membership of one point before the noise remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterLabel {
    Assigned(u32),
    Noise,
}

impl ClusterLabel {
    #[must_use]
    pub fn is_noise(&self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }
}

/// Clusters `points` according to `config`.
pub fn cluster_points(
    points: &[[f32; 2]],
    config: &ClusteringConfig,
    seed: u64,
) -> ExplorerResult<Vec<ClusterLabel>> {
    match *config {
        ClusteringConfig::None => Ok(vec![ClusterLabel::Assigned(0); points.len()]),
        ClusteringConfig::Density { eps, min_samples } => dbscan(points, eps, min_samples),
        ClusteringConfig::Centroid { clusters } => {
            let ids = kmeans_2d(points, clusters, seed)?;
            Ok(ids.into_iter().map(ClusterLabel::Assigned).collect())
        }
    }
}

/// Replaces every noise label with `max(assigned) + 1`.
///
/// When nothing was assigned the noise cluster is `0`.
#[must_use]
pub fn remap_noise(labels: &[ClusterLabel]) -> Vec<u32> {
    let noise_id = labels
        .iter()
        .filter_map(|label| match label {
            ClusterLabel::Assigned(id) => Some(*id),
            ClusterLabel::Noise => None,
        })
        .max()
        .map_or(0, |max| max + 1);

    labels
        .iter()
        .map(|label| match label {
            ClusterLabel::Assigned(id) => *id,
            ClusterLabel::Noise => noise_id,
        })
        .collect()
}

type Cell = (i64, i64);

fn cell_of(point: &[f32; 2], eps: f32) -> Cell {
    (
        (point[0] / eps).floor() as i64,
        (point[1] / eps).floor() as i64,
    )
}

/// DBSCAN over 2D points with a uniform grid of `eps`-sized cells.
///
/// A point is a core point when at least `min_samples` points, itself
/// included, lie within `eps`. Cluster ids follow discovery order.
pub fn dbscan(points: &[[f32; 2]], eps: f32, min_samples: usize) -> ExplorerResult<Vec<ClusterLabel>> {
    if !(eps.is_finite() && eps > 0.0) {
        return Err(ExplorerError::Configuration {
            reason: format!("density clustering eps must be positive, got {eps}"),
        });
    }
    if min_samples == 0 {
        return Err(ExplorerError::Configuration {
            reason: "density clustering min_samples must be at least 1".to_string(),
        });
    }

    let mut grid: HashMap<Cell, Vec<u32>> = HashMap::new();
    for (i, point) in points.iter().enumerate() {
        grid.entry(cell_of(point, eps)).or_default().push(i as u32);
    }

    let eps2 = eps * eps;
    let neighborhoods: Vec<Vec<u32>> = points
        .par_iter()
        .map(|point| {
            let (cx, cy) = cell_of(point, eps);
            let mut found = Vec::new();
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let Some(members) = grid.get(&(cx + dx, cy + dy)) else {
                        continue;
                    };
                    for &j in members {
                        let other = &points[j as usize];
                        let d0 = point[0] - other[0];
                        let d1 = point[1] - other[1];
                        if d0 * d0 + d1 * d1 <= eps2 {
                            found.push(j);
                        }
                    }
                }
            }
            found
        })
        .collect();

    let is_core = |i: usize| neighborhoods[i].len() >= min_samples;
    let mut labels: Vec<Option<ClusterLabel>> = vec![None; points.len()];
    let mut next_id = 0u32;
    let mut queue = VecDeque::new();

    for start in 0..points.len() {
        if labels[start].is_some() {
            continue;
        }
        if !is_core(start) {
            labels[start] = Some(ClusterLabel::Noise);
            continue;
        }

        let id = ClusterLabel::Assigned(next_id);
        next_id += 1;
        labels[start] = Some(id);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            if !is_core(current) {
                continue;
            }
            for &j in &neighborhoods[current] {
                let j = j as usize;
                match labels[j] {
                    None => {
                        labels[j] = Some(id);
                        queue.push_back(j);
                    }
                    // Border point first seen from a non-core position
                    Some(ClusterLabel::Noise) => labels[j] = Some(id),
                    Some(ClusterLabel::Assigned(_)) => {}
                }
            }
        }
    }

    let labels: Vec<ClusterLabel> = labels
        .into_iter()
        .map(|label| label.unwrap_or(ClusterLabel::Noise))
        .collect();
    let noise = labels.iter().filter(|l| l.is_noise()).count();
    tracing::debug!("DBSCAN found {next_id} clusters and {noise} noise points");
    Ok(labels)
}

/// Euclidean k-means on 2D points.
///
/// The cluster count is capped at the number of points.
pub fn kmeans_2d(points: &[[f32; 2]], clusters: usize, seed: u64) -> ExplorerResult<Vec<u32>> {
    if clusters == 0 {
        return Err(ExplorerError::Configuration {
            reason: "centroid clustering needs at least one cluster".to_string(),
        });
    }
    if points.is_empty() {
        return Ok(Vec::new());
    }
    let k = clusters.min(points.len());
    if k < clusters {
        tracing::warn!("Requested {clusters} clusters for {} points, using {k}", points.len());
    }

    let flat: Vec<f32> = points.iter().flatten().copied().collect();
    let mut rng = StdRng::seed_from_u64(seed);
    let result = kmeans(&flat, 2, k, &KMeansParams::new(Metric::Euclidean), &mut rng)?;
    Ok(result.assignments)
}
