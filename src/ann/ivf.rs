//! Inverted-file index with product-quantized residuals (IVF-PQ).
//!
//! Vectors are first rotated by a learned OPQ matrix, then assigned to the
//! closest coarse cell; the residual against that cell's centroid is stored
//! as a PQ code in the cell's inverted list. Search probes the `nprobe` best
//! cells and scores candidates by inner product:
//!
//! `<q, x> ≈ <Rq, c> + <Rq, r̂>`
//!
//! where `c` is the cell centroid and `r̂` the decoded residual. Ids are
//! assigned sequentially on `add`, so internal id `i` is row `i` of the
//! inserted matrix.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ann::opq::{OpqParams, OpqRotation, train_opq};
use crate::ann::pq::{ProductQuantizer, validate_layout};
use crate::error::{ExplorerError, ExplorerResult};
use crate::types::Ordinal;
use crate::vector::{KMeansParams, Metric, VectorDimension, dot, kmeans};

/// Structural parameters of an IVF-PQ index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    /// Number of coarse cells.
    pub nlist: usize,
    /// Number of PQ sub-quantizers; must divide the dimension.
    pub subquantizers: usize,
    /// Bits per sub-quantizer code.
    pub bits: u32,
    /// Cells searched per query.
    pub nprobe: usize,
    /// OPQ rounds; `0` disables the rotation.
    pub opq_iterations: usize,
    /// Lloyd iterations for coarse and residual k-means.
    pub kmeans_iterations: usize,
}

/// One search result slot.
///
/// `ordinal` is `None` when fewer than `k` candidates were found in the
/// searched cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub ordinal: Option<Ordinal>,
    pub score: f32,
}

impl Neighbor {
    const EMPTY: Self = Self {
        ordinal: None,
        score: f32::NEG_INFINITY,
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct InvertedList {
    ids: Vec<u32>,
    /// `ids.len() * code_size` bytes
    codes: Vec<u8>,
}

/// Trained IVF-PQ index over inner-product similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfPqIndex {
    dimension: VectorDimension,
    params: IndexParams,
    rotation: Option<OpqRotation>,
    /// Row-major coarse centroids in the rotated space, `nlist * dimension`
    centroids: Vec<f32>,
    pq: Option<ProductQuantizer>,
    lists: Vec<InvertedList>,
    ntotal: usize,
}

impl IvfPqIndex {
    /// Creates an untrained index, validating the PQ layout.
    pub fn new(dimension: VectorDimension, params: IndexParams) -> ExplorerResult<Self> {
        validate_layout(dimension.get(), params.subquantizers, params.bits)?;
        if params.nlist == 0 {
            return Err(ExplorerError::Configuration {
                reason: "nlist must be at least 1".to_string(),
            });
        }
        Ok(Self {
            dimension,
            params,
            rotation: None,
            centroids: Vec::new(),
            pq: None,
            lists: Vec::new(),
            ntotal: 0,
        })
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    /// Number of coarse cells actually trained.
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    /// Number of inserted vectors.
    #[must_use]
    pub fn ntotal(&self) -> usize {
        self.ntotal
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.pq.is_some()
    }

    #[must_use]
    pub fn has_rotation(&self) -> bool {
        self.rotation.is_some()
    }

    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.params.nprobe = nprobe.max(1);
    }

    /// Trains rotation, coarse cells and residual codebooks on `training`.
    ///
    /// `training` must already be normalized the same way as the vectors
    /// that will be added and queried.
    pub fn train<R: Rng + ?Sized>(&mut self, training: &[f32], rng: &mut R) -> ExplorerResult<()> {
        let d = self.dimension.get();
        if training.is_empty() || training.len() % d != 0 {
            return Err(ExplorerError::Training {
                stage: "index training",
                reason: format!(
                    "training buffer of {} values does not hold whole rows of dimension {d}",
                    training.len()
                ),
            });
        }
        let n = training.len() / d;

        tracing::info!(
            "Training IVF-PQ on {n} vectors (nlist={}, m={}, bits={}, opq_iterations={})",
            self.params.nlist,
            self.params.subquantizers,
            self.params.bits,
            self.params.opq_iterations
        );

        let rotation = if self.params.opq_iterations > 0 {
            let opq = OpqParams {
                subquantizers: self.params.subquantizers,
                bits: self.params.bits,
                iterations: self.params.opq_iterations,
                pq_iterations: self.params.kmeans_iterations,
            };
            Some(train_opq(training, d, &opq, rng)?)
        } else {
            None
        };
        let rotated = match &rotation {
            Some(r) => r.rotate_rows(training),
            None => training.to_vec(),
        };

        let mut nlist = self.params.nlist;
        if nlist > n {
            tracing::warn!("only {n} training vectors for {nlist} coarse cells, reducing nlist to {n}");
            nlist = n;
        }

        let coarse_params =
            KMeansParams::new(Metric::Cosine).with_max_iterations(self.params.kmeans_iterations);
        let coarse = kmeans(&rotated, d, nlist, &coarse_params, rng)?;
        tracing::debug!("coarse quantizer converged after {} iterations", coarse.iterations);

        let mut residuals = rotated;
        for (row, &cell) in residuals.chunks_exact_mut(d).zip(&coarse.assignments) {
            let centroid = coarse.centroid(cell as usize, d);
            for (value, c) in row.iter_mut().zip(centroid) {
                *value -= c;
            }
        }

        let pq = ProductQuantizer::train(
            &residuals,
            d,
            self.params.subquantizers,
            self.params.bits,
            self.params.kmeans_iterations,
            rng,
        )?;

        self.rotation = rotation;
        self.centroids = coarse.centroids;
        self.pq = Some(pq);
        self.lists = vec![InvertedList::default(); nlist];
        self.ntotal = 0;

        Ok(())
    }

    fn rotated(&self, vector: &[f32]) -> Vec<f32> {
        match &self.rotation {
            Some(r) => r.rotate(vector),
            None => vector.to_vec(),
        }
    }

    fn nearest_cell(&self, vector: &[f32]) -> usize {
        let d = self.dimension.get();
        let mut best = (0usize, f32::NEG_INFINITY);
        for (cell, centroid) in self.centroids.chunks_exact(d).enumerate() {
            let score = dot(vector, centroid);
            if score > best.1 {
                best = (cell, score);
            }
        }
        best.0
    }

    /// Appends row-major vectors, assigning ids `ntotal..ntotal + n`.
    pub fn add(&mut self, data: &[f32]) -> ExplorerResult<()> {
        let d = self.dimension.get();
        let pq = self.pq.as_ref().ok_or(crate::vector::VectorError::NotTrained)?;
        if data.len() % d != 0 {
            return Err(ExplorerError::Vector(
                crate::vector::VectorError::DimensionMismatch {
                    expected: d,
                    actual: data.len() % d,
                },
            ));
        }
        let n = data.len() / d;
        if u32::try_from(self.ntotal + n).is_err() {
            return Err(ExplorerError::Configuration {
                reason: format!("index cannot hold more than {} vectors", u32::MAX),
            });
        }

        let encoded: Vec<(usize, Vec<u8>)> = data
            .par_chunks(d)
            .map(|row| {
                let mut rotated = self.rotated(row);
                let cell = self.nearest_cell(&rotated);
                for (value, c) in rotated.iter_mut().zip(&self.centroids[cell * d..(cell + 1) * d]) {
                    *value -= c;
                }
                let mut codes = vec![0u8; pq.code_size()];
                pq.encode(&rotated, &mut codes);
                (cell, codes)
            })
            .collect();

        for (offset, (cell, codes)) in encoded.into_iter().enumerate() {
            let list = &mut self.lists[cell];
            list.ids.push((self.ntotal + offset) as u32);
            list.codes.extend_from_slice(&codes);
        }
        self.ntotal += n;

        tracing::debug!("added {n} vectors, ntotal={}", self.ntotal);
        Ok(())
    }

    /// Returns `min(k, ntotal)` slots ordered by descending similarity.
    ///
    /// Slots the searched cells cannot fill carry `ordinal: None`.
    pub fn search(&self, query: &[f32], k: usize) -> ExplorerResult<Vec<Neighbor>> {
        self.search_with_nprobe(query, k, self.params.nprobe)
    }

    pub fn search_with_nprobe(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> ExplorerResult<Vec<Neighbor>> {
        let d = self.dimension.get();
        let pq = self.pq.as_ref().ok_or(crate::vector::VectorError::NotTrained)?;
        self.dimension.validate_vector(query)?;
        let slots = k.min(self.ntotal);
        if slots == 0 {
            return Ok(Vec::new());
        }

        let rotated = self.rotated(query);
        let table = pq.inner_product_table(&rotated);

        let mut cells: Vec<(usize, f32)> = self
            .centroids
            .chunks_exact(d)
            .map(|centroid| dot(&rotated, centroid))
            .enumerate()
            .collect();
        cells.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        cells.truncate(nprobe.max(1));

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(slots + 1);
        let code_size = pq.code_size();
        for (cell, base) in cells {
            let list = &self.lists[cell];
            for (&id, codes) in list.ids.iter().zip(list.codes.chunks_exact(code_size)) {
                let candidate = Candidate {
                    score: base + pq.score_codes(&table, codes),
                    id,
                };
                if heap.len() < slots {
                    heap.push(candidate);
                } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                    heap.pop();
                    heap.push(candidate);
                }
            }
        }

        let mut results: Vec<Neighbor> = heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                ordinal: Some(Ordinal::new(c.id)),
                score: c.score,
            })
            .collect();
        results.resize(slots, Neighbor::EMPTY);

        Ok(results)
    }
}

/// Heap entry ordered so that "better" compares as smaller: higher score
/// first, ties broken by lower id. The max-heap top is the worst candidate.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::l2_normalize_rows;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn unit_rows(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data: Vec<f32> = (0..n * dim).map(|_| rng.random_range(-1.0..1.0)).collect();
        l2_normalize_rows(&mut data, dim);
        data
    }

    fn small_params() -> IndexParams {
        IndexParams {
            nlist: 4,
            subquantizers: 2,
            bits: 6,
            nprobe: 4,
            opq_iterations: 2,
            kmeans_iterations: 25,
        }
    }

    fn build(data: &[f32], dim: usize, params: IndexParams) -> IvfPqIndex {
        let mut rng = StdRng::seed_from_u64(42);
        let mut index = IvfPqIndex::new(VectorDimension::new(dim).unwrap(), params).unwrap();
        index.train(data, &mut rng).unwrap();
        index.add(data).unwrap();
        index
    }

    #[test]
    fn test_candidate_ordering() {
        let better = Candidate { score: 0.9, id: 5 };
        let worse = Candidate { score: 0.1, id: 1 };
        assert!(better < worse);

        let tie_low = Candidate { score: 0.5, id: 1 };
        let tie_high = Candidate { score: 0.5, id: 2 };
        assert!(tie_low < tie_high);
    }

    #[test]
    fn test_untrained_index_rejects_add_and_search() {
        let mut index = IvfPqIndex::new(VectorDimension::new(8).unwrap(), small_params()).unwrap();
        assert!(!index.is_trained());
        assert!(index.add(&[0.0; 8]).is_err());
        assert!(index.search(&[0.0; 8], 3).is_err());
    }

    #[test]
    fn test_invalid_layout_is_configuration_error() {
        let mut params = small_params();
        params.subquantizers = 3;
        assert!(matches!(
            IvfPqIndex::new(VectorDimension::new(8).unwrap(), params),
            Err(ExplorerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_self_query_returns_own_ordinal_first() {
        let dim = 8;
        let data = unit_rows(64, dim, 7);
        let index = build(&data, dim, small_params());
        assert_eq!(index.ntotal(), 64);

        let query = &data[7 * dim..8 * dim];
        let results = index.search(query, 5).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].ordinal, Some(Ordinal::new(7)));
        assert!(results[0].score > 0.95);

        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_k_is_capped_by_collection_size() {
        let dim = 4;
        let data = unit_rows(3, dim, 8);
        let params = IndexParams {
            nlist: 1,
            subquantizers: 2,
            bits: 2,
            nprobe: 1,
            opq_iterations: 0,
            kmeans_iterations: 10,
        };
        let index = build(&data, dim, params);

        let results = index.search(&data[..dim], 5).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|n| n.ordinal.is_some()));

        let results = index.search(&data[..dim], usize::MAX).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_pads_with_empty_slots_when_searched_cells_are_short() {
        let dim = 4;
        let data = unit_rows(8, dim, 8);
        let params = IndexParams {
            nlist: 4,
            subquantizers: 2,
            bits: 2,
            nprobe: 1,
            opq_iterations: 0,
            kmeans_iterations: 10,
        };
        let index = build(&data, dim, params);

        let results = index.search(&data[..dim], 8).unwrap();
        assert_eq!(results.len(), 8);
        let filled = results.iter().filter(|n| n.ordinal.is_some()).count();
        assert!(filled >= 1 && filled < 8);
        assert!(results[filled..].iter().all(|n| n.ordinal.is_none()));
    }

    #[test]
    fn test_nlist_is_capped_by_training_size() {
        let dim = 4;
        let data = unit_rows(3, dim, 9);
        let mut params = small_params();
        params.subquantizers = 2;
        params.opq_iterations = 0;
        params.nlist = 16;
        let index = build(&data, dim, params);
        assert_eq!(index.nlist(), 3);
    }

    #[test]
    fn test_query_dimension_is_checked() {
        let dim = 8;
        let data = unit_rows(32, dim, 10);
        let index = build(&data, dim, small_params());
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(ExplorerError::Vector(_))
        ));
    }
}
