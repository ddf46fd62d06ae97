//! Optimized product quantization rotation.
//!
//! Learns an orthogonal matrix `R` so that product-quantizing `R x` loses
//! less information than quantizing `x` directly. Training alternates two
//! steps over the training rows:
//!
//! 1. Fix `R`, train a product quantizer on the rotated rows and reconstruct
//!    them.
//! 2. Fix the reconstructions `Ŷ`, solve the orthogonal Procrustes problem
//!    `min ||X Rᵀ - Ŷ||` whose solution is the orthogonal polar factor of
//!    `Ŷᵀ X`.
//!
//! The polar factor is computed with the scaled Newton iteration
//! `Xₖ₊₁ = (γXₖ + γ⁻¹Xₖ⁻ᵀ) / 2` in `f64`.

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ann::pq::ProductQuantizer;
use crate::error::{ExplorerError, ExplorerResult};
use crate::vector::{dot, squared_euclidean};

/// Upper bound on Newton iterations for the polar decomposition.
const MAX_POLAR_ITERATIONS: usize = 50;

/// Relative change at which the polar iteration is considered converged.
const POLAR_TOLERANCE: f64 = 1e-10;

/// Pivots below this (relative to the largest entry) make a matrix singular.
const SINGULAR_PIVOT: f64 = 1e-12;

/// A learned `D x D` orthogonal rotation, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpqRotation {
    dimension: usize,
    matrix: Vec<f32>,
}

impl OpqRotation {
    #[must_use]
    pub fn identity(dimension: usize) -> Self {
        let mut matrix = vec![0.0f32; dimension * dimension];
        for i in 0..dimension {
            matrix[i * dimension + i] = 1.0;
        }
        Self { dimension, matrix }
    }

    fn from_f64(dimension: usize, matrix: &[f64]) -> Self {
        Self {
            dimension,
            matrix: matrix.iter().map(|&v| v as f32).collect(),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Computes `out = R x`.
    pub fn apply(&self, vector: &[f32], out: &mut [f32]) {
        debug_assert_eq!(vector.len(), self.dimension);
        for (value, row) in out.iter_mut().zip(self.matrix.chunks_exact(self.dimension)) {
            *value = dot(row, vector);
        }
    }

    #[must_use]
    pub fn rotate(&self, vector: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimension];
        self.apply(vector, &mut out);
        out
    }

    /// Rotates every row of a row-major matrix in parallel.
    #[must_use]
    pub fn rotate_rows(&self, data: &[f32]) -> Vec<f32> {
        let d = self.dimension;
        let mut out = vec![0.0f32; data.len()];
        out.par_chunks_mut(d)
            .zip(data.par_chunks(d))
            .for_each(|(dst, src)| self.apply(src, dst));
        out
    }

    /// Largest absolute deviation of `R Rᵀ` from the identity.
    #[must_use]
    pub fn orthogonality_error(&self) -> f32 {
        let d = self.dimension;
        let mut worst = 0.0f32;
        for i in 0..d {
            for j in 0..d {
                let value = dot(
                    &self.matrix[i * d..(i + 1) * d],
                    &self.matrix[j * d..(j + 1) * d],
                );
                let target = if i == j { 1.0 } else { 0.0 };
                worst = worst.max((value - target).abs());
            }
        }
        worst
    }
}

/// Parameters for OPQ training.
#[derive(Debug, Clone, Copy)]
pub struct OpqParams {
    pub subquantizers: usize,
    pub bits: u32,
    /// Alternating PQ / Procrustes rounds; `0` yields the identity.
    pub iterations: usize,
    /// Lloyd iterations for each inner PQ training.
    pub pq_iterations: usize,
}

/// Learns an OPQ rotation on row-major training data.
pub fn train_opq<R: Rng + ?Sized>(
    data: &[f32],
    dimension: usize,
    params: &OpqParams,
    rng: &mut R,
) -> ExplorerResult<OpqRotation> {
    if params.iterations == 0 {
        return Ok(OpqRotation::identity(dimension));
    }

    let n = data.len() / dimension;
    let mut rotation = OpqRotation::from_f64(dimension, &random_orthogonal(dimension, rng));
    let mut reconstructed = vec![0.0f32; data.len()];

    for iteration in 0..params.iterations {
        let rotated = rotation.rotate_rows(data);
        let pq = ProductQuantizer::train(
            &rotated,
            dimension,
            params.subquantizers,
            params.bits,
            params.pq_iterations,
            rng,
        )?;

        reconstructed
            .par_chunks_mut(dimension)
            .zip(rotated.par_chunks(dimension))
            .for_each(|(dst, src)| {
                let mut codes = vec![0u8; pq.code_size()];
                pq.encode(src, &mut codes);
                pq.decode(&codes, dst);
            });

        let error: f32 = rotated
            .chunks_exact(dimension)
            .zip(reconstructed.chunks_exact(dimension))
            .map(|(a, b)| squared_euclidean(a, b))
            .sum::<f32>()
            / n.max(1) as f32;
        tracing::debug!("OPQ iteration {iteration}: mean quantization error {error:.6}");

        let correlation = cross_product(&reconstructed, data, dimension);
        match polar_orthogonal(&correlation, dimension) {
            Some(next) => rotation = OpqRotation::from_f64(dimension, &next),
            None => {
                tracing::warn!(
                    "OPQ iteration {iteration}: reconstruction correlation is singular, keeping the previous rotation"
                );
                break;
            }
        }
    }

    let error = rotation.orthogonality_error();
    if !error.is_finite() || error > 1e-2 {
        return Err(ExplorerError::Training {
            stage: "OPQ rotation",
            reason: format!("learned rotation is not orthogonal (max deviation {error})"),
        });
    }

    Ok(rotation)
}

/// Computes `Aᵀ B` for two row-major `[n, d]` matrices.
fn cross_product(a: &[f32], b: &[f32], d: usize) -> Vec<f64> {
    a.par_chunks(d)
        .zip(b.par_chunks(d))
        .fold(
            || vec![0.0f64; d * d],
            |mut acc, (row_a, row_b)| {
                for (i, &ai) in row_a.iter().enumerate() {
                    if ai == 0.0 {
                        continue;
                    }
                    let ai = f64::from(ai);
                    for (slot, &bj) in acc[i * d..(i + 1) * d].iter_mut().zip(row_b) {
                        *slot += ai * f64::from(bj);
                    }
                }
                acc
            },
        )
        .reduce(
            || vec![0.0f64; d * d],
            |mut left, right| {
                for (l, r) in left.iter_mut().zip(right) {
                    *l += r;
                }
                left
            },
        )
}

/// Random orthogonal matrix from Gram-Schmidt over uniform rows.
fn random_orthogonal<R: Rng + ?Sized>(d: usize, rng: &mut R) -> Vec<f64> {
    let mut matrix = vec![0.0f64; d * d];
    let mut i = 0;
    while i < d {
        let mut row: Vec<f64> = (0..d).map(|_| rng.random_range(-1.0..1.0)).collect();
        for j in 0..i {
            let basis = &matrix[j * d..(j + 1) * d];
            let projection: f64 = row.iter().zip(basis).map(|(a, b)| a * b).sum();
            for (value, b) in row.iter_mut().zip(basis) {
                *value -= projection * b;
            }
        }
        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < 1e-6 {
            continue;
        }
        for (slot, value) in matrix[i * d..(i + 1) * d].iter_mut().zip(&row) {
            *slot = value / norm;
        }
        i += 1;
    }
    matrix
}

fn frobenius(m: &[f64]) -> f64 {
    m.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn transpose(m: &[f64], d: usize) -> Vec<f64> {
    let mut out = vec![0.0f64; d * d];
    for i in 0..d {
        for j in 0..d {
            out[j * d + i] = m[i * d + j];
        }
    }
    out
}

/// Gauss-Jordan inverse with partial pivoting. `None` if singular.
fn invert(m: &[f64], d: usize) -> Option<Vec<f64>> {
    let scale = m.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return None;
    }

    let mut a = m.to_vec();
    let mut inv = vec![0.0f64; d * d];
    for i in 0..d {
        inv[i * d + i] = 1.0;
    }

    for col in 0..d {
        let pivot_row = (col..d).max_by(|&x, &y| {
            a[x * d + col].abs().total_cmp(&a[y * d + col].abs())
        })?;
        let pivot = a[pivot_row * d + col];
        if pivot.abs() < SINGULAR_PIVOT * scale {
            return None;
        }
        if pivot_row != col {
            for k in 0..d {
                a.swap(col * d + k, pivot_row * d + k);
                inv.swap(col * d + k, pivot_row * d + k);
            }
        }

        for k in 0..d {
            a[col * d + k] /= pivot;
            inv[col * d + k] /= pivot;
        }

        for row in 0..d {
            if row == col {
                continue;
            }
            let factor = a[row * d + col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..d {
                a[row * d + k] -= factor * a[col * d + k];
                inv[row * d + k] -= factor * inv[col * d + k];
            }
        }
    }

    Some(inv)
}

/// Orthogonal factor `U Vᵀ` of `m = U Σ Vᵀ`. `None` if `m` is singular.
fn polar_orthogonal(m: &[f64], d: usize) -> Option<Vec<f64>> {
    let mut x = m.to_vec();

    for _ in 0..MAX_POLAR_ITERATIONS {
        let inverse = invert(&x, d)?;
        let gamma = (frobenius(&inverse) / frobenius(&x)).sqrt();
        let inverse_t = transpose(&inverse, d);

        let next: Vec<f64> = x
            .iter()
            .zip(&inverse_t)
            .map(|(a, b)| 0.5 * (gamma * a + b / gamma))
            .collect();

        let change = x.iter().zip(&next).map(|(a, b)| (a - b) * (a - b)).sum::<f64>().sqrt();
        let size = frobenius(&next);
        x = next;
        if change <= POLAR_TOLERANCE * size {
            break;
        }
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::l2_norm;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_invert_recovers_identity() {
        let m = vec![4.0, 7.0, 2.0, 6.0];
        let inv = invert(&m, 2).unwrap();
        assert!((inv[0] - 0.6).abs() < 1e-12);
        assert!((inv[1] + 0.7).abs() < 1e-12);
        assert!((inv[2] + 0.2).abs() < 1e-12);
        assert!((inv[3] - 0.4).abs() < 1e-12);

        assert!(invert(&[1.0, 2.0, 2.0, 4.0], 2).is_none());
    }

    #[test]
    fn test_polar_factor_of_scaled_rotation() {
        // diag(3, 0.5) applied after a 30 degree rotation: the polar factor
        // of S Q with S symmetric positive definite is Q.
        let (s, c) = (0.5f64, 3.0f64.sqrt() / 2.0);
        let q = [c, -s, s, c];
        let m = [3.0 * q[0], 3.0 * q[1], 0.5 * q[2], 0.5 * q[3]];

        let polar = polar_orthogonal(&m, 2).unwrap();
        for (p, e) in polar.iter().zip(q.iter()) {
            assert!((p - e).abs() < 1e-9, "{polar:?} != {q:?}");
        }
    }

    #[test]
    fn test_random_orthogonal_is_orthogonal() {
        let mut rng = StdRng::seed_from_u64(11);
        let rotation = OpqRotation::from_f64(6, &random_orthogonal(6, &mut rng));
        assert!(rotation.orthogonality_error() < 1e-5);
    }

    #[test]
    fn test_trained_rotation_preserves_norms() {
        let mut rng = StdRng::seed_from_u64(12);
        let data: Vec<f32> = (0..128 * 8).map(|_| rng.random_range(-1.0..1.0)).collect();
        let params = OpqParams {
            subquantizers: 2,
            bits: 4,
            iterations: 3,
            pq_iterations: 5,
        };

        let rotation = train_opq(&data, 8, &params, &mut rng).unwrap();
        assert!(rotation.orthogonality_error() < 1e-3);

        for row in data.chunks(8).take(16) {
            let rotated = rotation.rotate(row);
            assert!((l2_norm(&rotated) - l2_norm(row)).abs() < 1e-3);
        }
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let mut rng = StdRng::seed_from_u64(13);
        let params = OpqParams {
            subquantizers: 2,
            bits: 4,
            iterations: 0,
            pq_iterations: 5,
        };
        let rotation = train_opq(&[1.0, 2.0, 3.0, 4.0], 4, &params, &mut rng).unwrap();
        assert_eq!(rotation, OpqRotation::identity(4));
        assert_eq!(rotation.rotate(&[1.0, 2.0, 3.0, 4.0]), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
