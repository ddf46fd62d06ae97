//! K-means clustering used for coarse cells, PQ codebooks and 2D clusters.
//!
//! Pure Rust Lloyd iterations over row-major `f32` data with K-means++
//! seeding. The metric is selectable: spherical (cosine) k-means for coarse
//! cells over unit vectors, squared Euclidean for residual codebooks and
//! projected points.
//!
//! # Algorithm Details
//! - Initialization: K-means++ (distance-squared weighted sampling)
//! - Assignment step parallelized with rayon
//! - Empty clusters are re-seeded from a random input row
//! - Stops when assignments are stable, centroid movement drops below the
//!   tolerance, or after `max_iterations`

use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;

use crate::vector::normalize::{cosine_similarity, l2_normalize, squared_euclidean};

/// Default maximum number of Lloyd iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Default convergence tolerance for mean centroid movement.
pub const DEFAULT_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Distance used for assignment and seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Spherical k-means: maximize cosine similarity, centroids kept at unit length
    Cosine,
    /// Minimize squared Euclidean distance, centroids are plain means
    Euclidean,
}

impl Metric {
    /// Distance where smaller is closer, used by K-means++ seeding.
    #[inline]
    fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
            Metric::Euclidean => squared_euclidean(a, b),
        }
    }
}

/// Parameters for a clustering run.
#[derive(Debug, Clone, Copy)]
pub struct KMeansParams {
    pub metric: Metric,
    pub max_iterations: usize,
    pub tolerance: f32,
}

impl KMeansParams {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Row-major centroids, `k * dimension` values.
    pub centroids: Vec<f32>,

    /// Zero-based cluster assignment for each input row.
    pub assignments: Vec<u32>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

impl KMeansResult {
    /// Returns centroid `i` as a slice.
    pub fn centroid(&self, i: usize, dimension: usize) -> &[f32] {
        &self.centroids[i * dimension..(i + 1) * dimension]
    }
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are loaded before clustering"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Data length {len} is not a multiple of dimension {dimension}\nSuggestion: Ensure all vectors have the same dimension"
    )]
    DimensionMismatch { len: usize, dimension: usize },

    #[error(
        "Failed to initialize centroids\nSuggestion: Check that vectors contain valid floating-point values"
    )]
    InitializationFailed,
}

/// Performs K-means clustering on row-major data.
///
/// # Arguments
/// * `data` - Row-major input vectors (`n * dimension` values)
/// * `dimension` - Length of each row
/// * `k` - Number of clusters (must be >= 1 and <= number of rows)
/// * `params` - Metric and stopping criteria
/// * `rng` - Random source for seeding and empty-cluster recovery
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans<R: Rng + ?Sized>(
    data: &[f32],
    dimension: usize,
    k: usize,
    params: &KMeansParams,
    rng: &mut R,
) -> Result<KMeansResult, ClusteringError> {
    if dimension == 0 || data.len() % dimension != 0 {
        return Err(ClusteringError::DimensionMismatch {
            len: data.len(),
            dimension,
        });
    }
    let n = data.len() / dimension;
    if n == 0 {
        return Err(ClusteringError::EmptyVectorSet);
    }
    if k == 0 || k > n {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let mut centroids = initialize_centroids_kmeans_plus_plus(data, dimension, k, params.metric, rng)?;
    let mut assignments = vec![u32::MAX; n];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let new_assignments: Vec<u32> = data
            .par_chunks(dimension)
            .map(|row| assign_to_nearest_centroid(row, &centroids, dimension, params.metric).0 as u32)
            .collect();

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= params.max_iterations {
            break;
        }

        let new_centroids = update_centroids(data, dimension, &assignments, k, params.metric, rng);
        let movement = calculate_centroid_movement(&centroids, &new_centroids, dimension, params.metric);
        centroids = new_centroids;

        if movement < params.tolerance {
            // Centroids moved; refresh assignments once so they match the returned centroids
            assignments = data
                .par_chunks(dimension)
                .map(|row| {
                    assign_to_nearest_centroid(row, &centroids, dimension, params.metric).0 as u32
                })
                .collect();
            break;
        }
    }

    if iterations >= params.max_iterations {
        tracing::debug!(
            "k-means (k={k}, n={n}) stopped at the iteration limit of {}",
            params.max_iterations
        );
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Finds the nearest centroid to `vector`.
///
/// Returns the zero-based centroid index and its distance under `metric`
/// (cosine distance or squared Euclidean, smaller is closer).
pub fn assign_to_nearest_centroid(
    vector: &[f32],
    centroids: &[f32],
    dimension: usize,
    metric: Metric,
) -> (usize, f32) {
    let mut best_distance = f32::INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.chunks_exact(dimension).enumerate() {
        let distance = metric.distance(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best_cluster = i;
        }
    }

    (best_cluster, best_distance)
}

/// Updates centroids as the mean of their assigned rows.
fn update_centroids<R: Rng + ?Sized>(
    data: &[f32],
    dimension: usize,
    assignments: &[u32],
    k: usize,
    metric: Metric,
    rng: &mut R,
) -> Vec<f32> {
    let mut new_centroids = vec![0.0f32; k * dimension];
    let mut cluster_sizes = vec![0usize; k];

    for (row, &cluster) in data.chunks_exact(dimension).zip(assignments.iter()) {
        let cluster = cluster as usize;
        let target = &mut new_centroids[cluster * dimension..(cluster + 1) * dimension];
        for (acc, &value) in target.iter_mut().zip(row.iter()) {
            *acc += value;
        }
        cluster_sizes[cluster] += 1;
    }

    let n = data.len() / dimension;
    for (centroid, &size) in new_centroids.chunks_exact_mut(dimension).zip(cluster_sizes.iter()) {
        if size == 0 {
            // Empty cluster: re-seed from a random row
            let random_idx = rng.random_range(0..n);
            centroid.copy_from_slice(&data[random_idx * dimension..(random_idx + 1) * dimension]);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
        }
        if metric == Metric::Cosine {
            l2_normalize(centroid);
        }
    }

    new_centroids
}

/// Initializes centroids using the K-means++ algorithm.
///
/// K-means++ selects initial centroids that are far apart, leading to
/// better convergence properties than random initialization.
fn initialize_centroids_kmeans_plus_plus<R: Rng + ?Sized>(
    data: &[f32],
    dimension: usize,
    k: usize,
    metric: Metric,
    rng: &mut R,
) -> Result<Vec<f32>, ClusteringError> {
    let n = data.len() / dimension;
    let row = |i: usize| &data[i * dimension..(i + 1) * dimension];

    let mut centroids = Vec::with_capacity(k * dimension);
    let mut chosen = vec![false; n];

    let first_idx = rng.random_range(0..n);
    push_centroid(&mut centroids, row(first_idx), metric);
    chosen[first_idx] = true;

    // Squared distance of each row to its nearest chosen centroid
    let mut min_distances: Vec<f32> = data
        .par_chunks(dimension)
        .map(|r| {
            let d = metric.distance(r, &centroids[..dimension]);
            d * d
        })
        .collect();

    while centroids.len() < k * dimension {
        let total: f32 = min_distances.iter().sum();

        let next_idx = if total < EPSILON {
            // All rows coincide with chosen centroids; fall back to unchosen rows
            match chosen.iter().position(|c| !c) {
                Some(idx) => idx,
                None => break,
            }
        } else {
            let target = rng.random::<f32>() * total;
            let mut cumulative = 0.0;
            let mut selected = None;
            for (i, &distance) in min_distances.iter().enumerate() {
                cumulative += distance;
                if distance > 0.0 && cumulative >= target {
                    selected = Some(i);
                    break;
                }
            }
            // Rounding errors can leave the target unreached; take the farthest row
            selected.unwrap_or_else(|| {
                min_distances
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(n - 1)
            })
        };

        chosen[next_idx] = true;
        let start = centroids.len();
        push_centroid(&mut centroids, row(next_idx), metric);
        let newest = &centroids[start..start + dimension];

        min_distances
            .par_iter_mut()
            .zip(data.par_chunks(dimension))
            .for_each(|(current, r)| {
                let d = metric.distance(r, newest);
                *current = current.min(d * d);
            });
    }

    if centroids.len() != k * dimension {
        return Err(ClusteringError::InitializationFailed);
    }

    Ok(centroids)
}

fn push_centroid(centroids: &mut Vec<f32>, row: &[f32], metric: Metric) {
    let start = centroids.len();
    centroids.extend_from_slice(row);
    if metric == Metric::Cosine {
        l2_normalize(&mut centroids[start..]);
    }
}

/// Calculates the mean movement of centroids between iterations.
fn calculate_centroid_movement(old: &[f32], new: &[f32], dimension: usize, metric: Metric) -> f32 {
    let k = old.len() / dimension;
    old.chunks_exact(dimension)
        .zip(new.chunks_exact(dimension))
        .map(|(old_c, new_c)| metric.distance(old_c, new_c))
        .sum::<f32>()
        / k as f32
}
