//! UMAP-style manifold projection.
//!
//! Pure Rust neighborhood-graph embedding over row-major `f32` data:
//!
//! 1. Exact k-nearest-neighbor graph (Euclidean, rayon parallel)
//! 2. Per-point smooth distance calibration and fuzzy union of the
//!    directed memberships
//! 3. PCA initialization scaled to a box of half-width 10
//! 4. Seeded stochastic gradient descent with negative sampling
//!
//! The same input and seed always produce the same layout.
//!
//! The neighbor graph is brute force: `O(n^2 * dim)` distance evaluations.
//! That is fine for the tens of thousands of rows an explorer snapshot holds
//! and slow beyond a few hundred thousand; past [`EXACT_KNN_WARN_ROWS`] a
//! warning is logged so long offline runs are not a surprise.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::ProjectionConfig;
use crate::error::{ExplorerError, ExplorerResult};

/// Datasets up to this many rows get the longer default schedule.
const SMALL_DATASET_ROWS: usize = 10_000;
const SMALL_DATASET_EPOCHS: usize = 500;
const LARGE_DATASET_EPOCHS: usize = 200;

/// Half-width of the initial layout box.
const INIT_SCALE: f32 = 10.0;

/// Row count above which the brute-force neighbor search is reported as slow.
pub const EXACT_KNN_WARN_ROWS: usize = 200_000;

/// Per-coordinate gradient clip.
const GRADIENT_CLIP: f32 = 4.0;

const SMOOTH_K_TOLERANCE: f32 = 1e-5;
const SMOOTH_K_ITERATIONS: usize = 64;
const MIN_K_DIST_SCALE: f32 = 1e-3;
const POWER_ITERATIONS: usize = 100;

/// Layout parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct UmapParams {
    pub n_neighbors: usize,
    pub n_components: usize,
    pub min_dist: f32,
    pub spread: f32,
    pub n_epochs: Option<usize>,
    pub negative_sample_rate: usize,
    pub learning_rate: f32,
    pub seed: u64,
}

impl From<&ProjectionConfig> for UmapParams {
    fn from(config: &ProjectionConfig) -> Self {
        Self {
            n_neighbors: config.n_neighbors,
            n_components: config.n_components,
            min_dist: config.min_dist,
            spread: config.spread,
            n_epochs: config.n_epochs,
            negative_sample_rate: config.negative_sample_rate,
            learning_rate: config.learning_rate,
            seed: config.seed,
        }
    }
}

impl Default for UmapParams {
    fn default() -> Self {
        Self::from(&ProjectionConfig::default())
    }
}

impl UmapParams {
    /// Epoch count, picking the default schedule from the dataset size when unset.
    #[must_use]
    pub fn epochs_for(&self, rows: usize) -> usize {
        self.n_epochs.unwrap_or(if rows <= SMALL_DATASET_ROWS {
            SMALL_DATASET_EPOCHS
        } else {
            LARGE_DATASET_EPOCHS
        })
    }

    fn validate(&self) -> ExplorerResult<()> {
        let invalid = |reason: String| Err(ExplorerError::Configuration { reason });
        if self.n_neighbors < 2 {
            return invalid(format!(
                "projection.n_neighbors must be at least 2, got {}",
                self.n_neighbors
            ));
        }
        if self.n_components == 0 {
            return invalid("projection.n_components must be at least 1".to_string());
        }
        if self.spread.is_nan() || self.spread <= 0.0 {
            return invalid(format!("projection.spread must be positive, got {}", self.spread));
        }
        if !(0.0..=self.spread).contains(&self.min_dist) {
            return invalid(format!(
                "projection.min_dist must lie in [0, spread], got {}",
                self.min_dist
            ));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return invalid(format!(
                "projection.learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        Ok(())
    }
}

/// Low-dimensional coordinates, row-major `rows * n_components`.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub coords: Vec<f32>,
    pub n_components: usize,
    pub epochs: usize,
}

impl Layout {
    #[must_use]
    pub fn len(&self) -> usize {
        self.coords.len() / self.n_components
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    #[must_use]
    pub fn point(&self, i: usize) -> &[f32] {
        &self.coords[i * self.n_components..(i + 1) * self.n_components]
    }
}

/// Projects `data` (rows of length `dimension`) to `params.n_components` dimensions.
///
/// # Errors
/// - `Configuration` for invalid parameters
/// - `Training` when `data` is empty or ragged
pub fn fit_transform(data: &[f32], dimension: usize, params: &UmapParams) -> ExplorerResult<Layout> {
    params.validate()?;
    if dimension == 0 || data.len() % dimension != 0 {
        return Err(ExplorerError::Training {
            stage: "projection",
            reason: format!("{} values do not form rows of dimension {dimension}", data.len()),
        });
    }
    let n = data.len() / dimension;
    if n == 0 {
        return Err(ExplorerError::Training {
            stage: "projection",
            reason: "no vectors to project".to_string(),
        });
    }

    let components = params.n_components;
    if n == 1 {
        return Ok(Layout {
            coords: vec![0.0; components],
            n_components: components,
            epochs: 0,
        });
    }

    let k = params.n_neighbors.min(n - 1);
    let mut rng = StdRng::seed_from_u64(params.seed);

    if n > EXACT_KNN_WARN_ROWS {
        tracing::warn!(
            "Exact neighbor search over {n} rows is quadratic and may take a long time"
        );
    }
    let neighbors = knn_graph(data, dimension, k);
    tracing::debug!("Built {k}-NN graph over {n} rows");

    let edges = fuzzy_union(&neighbors, k);
    tracing::debug!("Fuzzy graph has {} undirected edges", edges.len());

    let mut coords = pca_init(data, dimension, components, &mut rng);
    let (a, b) = find_ab_params(params.spread, params.min_dist);
    let epochs = params.epochs_for(n);

    optimize_layout(&mut coords, components, &edges, a, b, epochs, params, &mut rng);
    tracing::info!("Projected {n} rows to {components} dimensions in {epochs} epochs");

    Ok(Layout {
        coords,
        n_components: components,
        epochs,
    })
}

/// Exact k nearest neighbors of every row, closest first, self excluded.
///
/// Compares every pair of rows, so cost grows with the square of `n`.
fn knn_graph(data: &[f32], dimension: usize, k: usize) -> Vec<Vec<(u32, f32)>> {
    let n = data.len() / dimension;
    (0..n)
        .into_par_iter()
        .map(|i| {
            let row = &data[i * dimension..(i + 1) * dimension];
            let mut distances: Vec<(u32, f32)> = data
                .chunks_exact(dimension)
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(j, other)| (j as u32, euclidean(row, other)))
                .collect();
            let by_distance = |a: &(u32, f32), b: &(u32, f32)| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0));
            if distances.len() > k {
                distances.select_nth_unstable_by(k - 1, by_distance);
                distances.truncate(k);
            }
            distances.sort_unstable_by(by_distance);
            distances
        })
        .collect()
}

#[inline]
fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Finds `(rho, sigma)` so the smoothed memberships of one point sum to `log2(k)`.
fn smooth_knn_dist(distances: &[f32], k: usize, mean_distance: f32) -> (f32, f32) {
    let target = (k as f32).log2();
    let rho = distances.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut sigma = 1.0f32;

    for _ in 0..SMOOTH_K_ITERATIONS {
        let total: f32 = distances
            .iter()
            .map(|&d| {
                let shifted = d - rho;
                if shifted > 0.0 { (-shifted / sigma).exp() } else { 1.0 }
            })
            .sum();

        if (total - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if total > target {
            hi = sigma;
            sigma = (lo + hi) / 2.0;
        } else {
            lo = sigma;
            sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    let local_mean = distances.iter().sum::<f32>() / distances.len().max(1) as f32;
    let floor = if rho > 0.0 {
        MIN_K_DIST_SCALE * local_mean
    } else {
        MIN_K_DIST_SCALE * mean_distance
    };
    (rho, sigma.max(floor).max(f32::MIN_POSITIVE))
}

/// Undirected edge `(head, tail, weight)` of the fuzzy graph.
type Edge = (u32, u32, f32);

/// Combines directed memberships `a` and `b` of each pair as `a + b - ab`.
///
/// Edges come out sorted by endpoint so the optimizer sees them in a stable order.
fn fuzzy_union(neighbors: &[Vec<(u32, f32)>], k: usize) -> Vec<Edge> {
    let mean_distance = {
        let (sum, count) = neighbors
            .iter()
            .flatten()
            .fold((0.0f64, 0usize), |(s, c), &(_, d)| (s + f64::from(d), c + 1));
        if count == 0 { 0.0 } else { (sum / count as f64) as f32 }
    };

    let directed: Vec<Vec<(u32, f32)>> = neighbors
        .par_iter()
        .map(|row| {
            let distances: Vec<f32> = row.iter().map(|&(_, d)| d).collect();
            let (rho, sigma) = smooth_knn_dist(&distances, k, mean_distance);
            row.iter()
                .map(|&(j, d)| {
                    let weight = if d - rho <= 0.0 { 1.0 } else { (-(d - rho) / sigma).exp() };
                    (j, weight)
                })
                .collect()
        })
        .collect();

    let mut pairs: BTreeMap<(u32, u32), (f32, f32)> = BTreeMap::new();
    for (i, row) in directed.iter().enumerate() {
        let i = i as u32;
        for &(j, weight) in row {
            if i < j {
                pairs.entry((i, j)).or_default().0 = weight;
            } else {
                pairs.entry((j, i)).or_default().1 = weight;
            }
        }
    }

    pairs
        .into_iter()
        .map(|((i, j), (a, b))| (i, j, a + b - a * b))
        .filter(|&(_, _, w)| w > 0.0)
        .collect()
}

/// Projects centered data on its top principal axes, scaled to `INIT_SCALE`.
///
/// Principal axes come from power iteration with deflation against the
/// previously found axes. Degenerate inputs fall back to a random layout.
fn pca_init(data: &[f32], dimension: usize, components: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / dimension;

    let mut mean = vec![0.0f64; dimension];
    for row in data.chunks_exact(dimension) {
        for (m, &v) in mean.iter_mut().zip(row) {
            *m += f64::from(v);
        }
    }
    for m in &mut mean {
        *m /= n as f64;
    }
    let centered: Vec<f64> = data
        .chunks_exact(dimension)
        .flat_map(|row| row.iter().zip(&mean).map(|(&v, m)| f64::from(v) - m))
        .collect();

    let mut axes: Vec<Vec<f64>> = Vec::with_capacity(components);
    for _ in 0..components {
        let mut v: Vec<f64> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
        orthogonalize(&mut v, &axes);
        if !normalize(&mut v) {
            break;
        }

        for _ in 0..POWER_ITERATIONS {
            // v <- Xc^T (Xc v)
            let projected: Vec<f64> = centered
                .par_chunks(dimension)
                .map(|row| row.iter().zip(&v).map(|(x, y)| x * y).sum())
                .collect();
            let mut next = vec![0.0f64; dimension];
            for (row, &p) in centered.chunks_exact(dimension).zip(&projected) {
                for (acc, &x) in next.iter_mut().zip(row) {
                    *acc += x * p;
                }
            }
            orthogonalize(&mut next, &axes);
            if !normalize(&mut next) {
                break;
            }
            v = next;
        }
        axes.push(v);
    }

    let mut coords = vec![0.0f32; n * components];
    for (i, row) in centered.chunks_exact(dimension).enumerate() {
        for (c, axis) in axes.iter().enumerate() {
            coords[i * components + c] = row.iter().zip(axis).map(|(x, y)| x * y).sum::<f64>() as f32;
        }
    }

    let max_abs = coords.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if max_abs <= f32::EPSILON {
        tracing::debug!("Input has no variance, using a random initial layout");
        return (0..n * components)
            .map(|_| rng.random_range(-INIT_SCALE..INIT_SCALE))
            .collect();
    }

    let scale = INIT_SCALE / max_abs;
    for value in &mut coords {
        *value = *value * scale + rng.random_range(-1e-4..1e-4);
    }
    coords
}

fn orthogonalize(v: &mut [f64], axes: &[Vec<f64>]) {
    for axis in axes {
        let projection: f64 = v.iter().zip(axis).map(|(x, y)| x * y).sum();
        for (x, a) in v.iter_mut().zip(axis) {
            *x -= projection * a;
        }
    }
}

fn normalize(v: &mut [f64]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm < 1e-12 {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Fits `1 / (1 + a x^(2b))` to the target membership curve.
///
/// The target is 1 below `min_dist` and decays as `exp(-(x - min_dist) / spread)`
/// beyond it. Solved with Levenberg-Marquardt over 300 samples in `[0, 3 * spread]`.
pub fn find_ab_params(spread: f32, min_dist: f32) -> (f32, f32) {
    let spread = f64::from(spread);
    let min_dist = f64::from(min_dist);
    let samples = 300;
    let xs: Vec<f64> = (0..samples)
        .map(|i| spread * 3.0 * i as f64 / (samples - 1) as f64)
        .collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();

    let cost = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
                r * r
            })
            .sum()
    };

    let (mut a, mut b) = (1.0f64, 1.0f64);
    let mut lambda = 1e-3;
    let mut current = cost(a, b);

    for _ in 0..200 {
        let (mut jtj, mut jtr) = ([[0.0f64; 2]; 2], [0.0f64; 2]);
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let p = x.powf(2.0 * b);
            let denom = (1.0 + a * p).powi(2);
            let r = 1.0 / (1.0 + a * p) - y;
            let da = -p / denom;
            let db = -a * p * 2.0 * x.ln() / denom;
            let grad = [da, db];
            for row in 0..2 {
                jtr[row] += grad[row] * r;
                for col in 0..2 {
                    jtj[row][col] += grad[row] * grad[col];
                }
            }
        }

        let m00 = jtj[0][0] * (1.0 + lambda);
        let m11 = jtj[1][1] * (1.0 + lambda);
        let det = m00 * m11 - jtj[0][1] * jtj[1][0];
        if det.abs() < 1e-18 {
            break;
        }
        let step_a = -(m11 * jtr[0] - jtj[0][1] * jtr[1]) / det;
        let step_b = -(m00 * jtr[1] - jtj[1][0] * jtr[0]) / det;

        let (next_a, next_b) = ((a + step_a).max(1e-6), (b + step_b).max(1e-6));
        let next = cost(next_a, next_b);
        if next < current {
            let converged = (current - next) < 1e-12;
            a = next_a;
            b = next_b;
            current = next;
            lambda /= 10.0;
            if converged {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }

    (a as f32, b as f32)
}

#[inline]
fn clip(value: f32) -> f32 {
    value.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

/// Seeded SGD over the fuzzy graph.
///
/// Each undirected edge is sampled in both directions, proportionally to its
/// weight, and followed by `negative_sample_rate` repulsive samples.
#[allow(clippy::too_many_arguments)]
fn optimize_layout(
    coords: &mut [f32],
    components: usize,
    edges: &[Edge],
    a: f32,
    b: f32,
    epochs: usize,
    params: &UmapParams,
    rng: &mut StdRng,
) {
    let n = coords.len() / components;
    let max_weight = edges.iter().fold(0.0f32, |m, e| m.max(e.2));
    if max_weight <= 0.0 || epochs == 0 {
        return;
    }

    // Directed copies of every edge whose weight survives the schedule
    let mut heads = Vec::with_capacity(edges.len() * 2);
    let mut tails = Vec::with_capacity(edges.len() * 2);
    let mut epochs_per_sample = Vec::with_capacity(edges.len() * 2);
    let min_weight = max_weight / epochs as f32;
    for &(i, j, w) in edges {
        if w < min_weight {
            continue;
        }
        for (head, tail) in [(i, j), (j, i)] {
            heads.push(head as usize);
            tails.push(tail as usize);
            epochs_per_sample.push(max_weight / w);
        }
    }

    let negative_rate = params.negative_sample_rate.max(1) as f32;
    let epochs_per_negative: Vec<f32> = epochs_per_sample.iter().map(|e| e / negative_rate).collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    let mut current = vec![0.0f32; components];
    for epoch in 0..epochs {
        let alpha = params.learning_rate * (1.0 - epoch as f32 / epochs as f32);
        let epoch_f = epoch as f32;

        for e in 0..heads.len() {
            if next_sample[e] > epoch_f {
                continue;
            }
            let (i, j) = (heads[e], tails[e]);

            current.copy_from_slice(&coords[i * components..(i + 1) * components]);
            let dist2: f32 = (0..components)
                .map(|d| {
                    let diff = current[d] - coords[j * components + d];
                    diff * diff
                })
                .sum();
            let attract = if dist2 > 0.0 {
                -2.0 * a * b * dist2.powf(b - 1.0) / (a * dist2.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..components {
                let grad = clip(attract * (current[d] - coords[j * components + d]));
                current[d] += grad * alpha;
                coords[j * components + d] -= grad * alpha;
            }
            next_sample[e] += epochs_per_sample[e];

            let negatives = ((epoch_f - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
            for _ in 0..negatives {
                let other = rng.random_range(0..n);
                if other == i {
                    continue;
                }
                let dist2: f32 = (0..components)
                    .map(|d| {
                        let diff = current[d] - coords[other * components + d];
                        diff * diff
                    })
                    .sum();
                let repel = if dist2 > 0.0 {
                    2.0 * b / ((0.001 + dist2) * (a * dist2.powf(b) + 1.0))
                } else {
                    0.0
                };
                for d in 0..components {
                    let grad = if repel > 0.0 {
                        clip(repel * (current[d] - coords[other * components + d]))
                    } else {
                        GRADIENT_CLIP
                    };
                    current[d] += grad * alpha;
                }
            }
            next_negative[e] += negatives as f32 * epochs_per_negative[e];

            coords[i * components..(i + 1) * components].copy_from_slice(&current);
        }
    }
}
