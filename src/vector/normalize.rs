//! L2 normalization shared by index build and query time.
//!
//! Cosine similarity is computed as an inner product on unit vectors, so the
//! exact same routine must run over the matrix before training/insertion and
//! over every query vector before search.

use rayon::prelude::*;

/// Norms below this are treated as zero vectors and left untouched.
pub const NORM_EPSILON: f32 = 1e-10;

/// Normalizes a vector in-place to unit length.
///
/// Returns the original norm. Zero vectors are left as-is.
pub fn l2_normalize(vector: &mut [f32]) -> f32 {
    let norm = l2_norm(vector);
    if norm > NORM_EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
    norm
}

/// Creates a normalized copy of a vector.
#[must_use]
pub fn l2_normalized(vector: &[f32]) -> Vec<f32> {
    let mut normalized = vector.to_vec();
    l2_normalize(&mut normalized);
    normalized
}

/// Normalizes every row of a row-major matrix in parallel.
pub fn l2_normalize_rows(data: &mut [f32], dimension: usize) {
    debug_assert_eq!(data.len() % dimension, 0);
    data.par_chunks_mut(dimension).for_each(|row| {
        l2_normalize(row);
    });
}

#[inline]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Computes cosine similarity between two vectors.
///
/// Returns a value in `[-1, 1]`, or `0.0` if either vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot(a, b) / (norm_a * norm_b)
    }
}
