//! Product quantizer for IVF residuals.
//!
//! Splits each vector into `m` contiguous sub-vectors and quantizes each one
//! against its own codebook of `ksub <= 256` centroids, so a vector compresses
//! to `m` one-byte codes. Queries are scored with asymmetric inner-product
//! lookup tables (the query stays in full precision).

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ExplorerError, ExplorerResult};
use crate::vector::{KMeansParams, Metric, assign_to_nearest_centroid, dot, kmeans};

/// Maximum bits per sub-quantizer code (codes are stored as `u8`).
pub const MAX_BITS: u32 = 8;

/// Trained product quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    subquantizers: usize,
    sub_dim: usize,
    ksub: usize,
    /// Codebooks laid out as `[m][ksub][sub_dim]`
    codebooks: Vec<f32>,
}

impl ProductQuantizer {
    /// Trains codebooks on row-major `data`.
    ///
    /// The codebook size is `2^bits`, reduced to the number of training rows
    /// when fewer rows are available.
    pub fn train<R: Rng + ?Sized>(
        data: &[f32],
        dimension: usize,
        subquantizers: usize,
        bits: u32,
        iterations: usize,
        rng: &mut R,
    ) -> ExplorerResult<Self> {
        validate_layout(dimension, subquantizers, bits)?;

        let n = data.len() / dimension;
        if n == 0 {
            return Err(ExplorerError::Training {
                stage: "product quantizer",
                reason: "training set is empty".to_string(),
            });
        }

        let sub_dim = dimension / subquantizers;
        let mut ksub = 1usize << bits;
        if ksub > n {
            tracing::warn!(
                "product quantizer: only {n} training rows for {ksub} centroids per sub-quantizer, reducing codebook size to {n}"
            );
            ksub = n;
        }

        let params = KMeansParams::new(Metric::Euclidean).with_max_iterations(iterations);
        let mut codebooks = Vec::with_capacity(subquantizers * ksub * sub_dim);
        let mut sub_vectors = Vec::with_capacity(n * sub_dim);

        for sub in 0..subquantizers {
            sub_vectors.clear();
            for row in data.chunks_exact(dimension) {
                sub_vectors.extend_from_slice(&row[sub * sub_dim..(sub + 1) * sub_dim]);
            }

            let result = kmeans(&sub_vectors, sub_dim, ksub, &params, rng)?;
            codebooks.extend_from_slice(&result.centroids);
        }

        Ok(Self {
            dimension,
            subquantizers,
            sub_dim,
            ksub,
            codebooks,
        })
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of code bytes per vector.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.subquantizers
    }

    #[must_use]
    pub fn ksub(&self) -> usize {
        self.ksub
    }

    fn codebook(&self, sub: usize) -> &[f32] {
        let len = self.ksub * self.sub_dim;
        &self.codebooks[sub * len..(sub + 1) * len]
    }

    /// Encodes one vector into `code_size()` bytes.
    pub fn encode(&self, vector: &[f32], codes: &mut [u8]) {
        debug_assert_eq!(vector.len(), self.dimension);
        debug_assert_eq!(codes.len(), self.subquantizers);

        for (sub, code) in codes.iter_mut().enumerate() {
            let sub_vector = &vector[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            let (nearest, _) = assign_to_nearest_centroid(
                sub_vector,
                self.codebook(sub),
                self.sub_dim,
                Metric::Euclidean,
            );
            *code = nearest as u8;
        }
    }

    /// Reconstructs the approximate vector for `codes`.
    pub fn decode(&self, codes: &[u8], out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.dimension);

        for (sub, &code) in codes.iter().enumerate() {
            let start = code as usize * self.sub_dim;
            out[sub * self.sub_dim..(sub + 1) * self.sub_dim]
                .copy_from_slice(&self.codebook(sub)[start..start + self.sub_dim]);
        }
    }

    /// Precomputes `<query_sub, centroid>` for every sub-quantizer centroid.
    ///
    /// The table is laid out as `[m][ksub]`.
    #[must_use]
    pub fn inner_product_table(&self, query: &[f32]) -> Vec<f32> {
        let mut table = Vec::with_capacity(self.subquantizers * self.ksub);
        for sub in 0..self.subquantizers {
            let query_sub = &query[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            table.extend(
                self.codebook(sub)
                    .chunks_exact(self.sub_dim)
                    .map(|centroid| dot(query_sub, centroid)),
            );
        }
        table
    }

    /// Sums lookup-table entries for one encoded vector.
    #[inline]
    #[must_use]
    pub fn score_codes(&self, table: &[f32], codes: &[u8]) -> f32 {
        codes
            .iter()
            .enumerate()
            .map(|(sub, &code)| table[sub * self.ksub + code as usize])
            .sum()
    }
}

/// Checks that a PQ layout is usable for `dimension`.
pub fn validate_layout(dimension: usize, subquantizers: usize, bits: u32) -> ExplorerResult<()> {
    if subquantizers == 0 || dimension % subquantizers != 0 {
        return Err(ExplorerError::Configuration {
            reason: format!(
                "dimension {dimension} must be divisible by the number of sub-quantizers ({subquantizers})"
            ),
        });
    }
    if bits == 0 || bits > MAX_BITS {
        return Err(ExplorerError::Configuration {
            reason: format!("bits per sub-quantizer must be in 1..={MAX_BITS}, got {bits}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::squared_euclidean;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn random_data(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dim).map(|_| rng.random_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_layout_validation() {
        assert!(validate_layout(8, 3, 8).is_err());
        assert!(validate_layout(8, 0, 8).is_err());
        assert!(validate_layout(8, 2, 9).is_err());
        assert!(validate_layout(8, 2, 0).is_err());
        assert!(validate_layout(8, 4, 8).is_ok());
    }

    #[test]
    fn test_codebook_shrinks_to_training_size() {
        let data = random_data(20, 4, 1);
        let mut rng = StdRng::seed_from_u64(2);
        let pq = ProductQuantizer::train(&data, 4, 2, 8, 10, &mut rng).unwrap();
        assert_eq!(pq.ksub(), 20);
        assert_eq!(pq.code_size(), 2);
    }

    #[test]
    fn test_training_rows_reconstruct_exactly_when_ksub_equals_n() {
        let data = random_data(16, 4, 3);
        let mut rng = StdRng::seed_from_u64(4);
        let pq = ProductQuantizer::train(&data, 4, 2, 4, 25, &mut rng).unwrap();

        let mut codes = [0u8; 2];
        let mut decoded = [0.0f32; 4];
        for row in data.chunks(4) {
            pq.encode(row, &mut codes);
            pq.decode(&codes, &mut decoded);
            assert!(squared_euclidean(row, &decoded) < 1e-8);
        }
    }

    #[test]
    fn test_table_score_matches_decoded_inner_product() {
        let data = random_data(200, 8, 5);
        let mut rng = StdRng::seed_from_u64(6);
        let pq = ProductQuantizer::train(&data, 8, 4, 4, 10, &mut rng).unwrap();

        let query = random_data(1, 8, 7);
        let table = pq.inner_product_table(&query);

        let mut codes = [0u8; 4];
        let mut decoded = [0.0f32; 8];
        for row in data.chunks(8).take(10) {
            pq.encode(row, &mut codes);
            pq.decode(&codes, &mut decoded);
            let expected = dot(&query, &decoded);
            assert!((pq.score_codes(&table, &codes) - expected).abs() < 1e-5);
        }
    }
}
