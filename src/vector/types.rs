//! Dimension newtype and the error type for vector math.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of every row in a snapshot: shards, index and query vectors alike.
///
/// Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct VectorDimension(usize);

impl VectorDimension {
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::ZeroDimension);
        }
        Ok(Self(dim))
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Checks that `vector` has exactly this many components.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() == self.0 {
            Ok(())
        } else {
            Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            })
        }
    }
}

impl TryFrom<usize> for VectorDimension {
    type Error = VectorError;

    fn try_from(dim: usize) -> Result<Self, Self::Error> {
        Self::new(dim)
    }
}

impl From<VectorDimension> for usize {
    fn from(dim: VectorDimension) -> usize {
        dim.0
    }
}

impl std::fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector has {actual} components, expected {expected}\nSuggestion: Query with the encoder the snapshot was embedded with"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector dimension cannot be zero")]
    ZeroDimension,

    #[error("Index has no trained quantizer\nSuggestion: Train on a sample before adding or searching")]
    NotTrained,
}
