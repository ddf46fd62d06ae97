//! Vector math and encoders shared by index build, search and projection.
//!
//! # Architecture
//! - `normalize`: the single L2 normalization routine used at build and
//!   query time
//! - `clustering`: k-means with selectable metric, used for coarse cells,
//!   PQ codebooks and 2D centroid clustering
//! - `embedding`: the encoder capability (`embed(modality, input, lang)`)
//!   with fastembed-backed and mock implementations

mod clustering;
mod embedding;
mod normalize;
mod types;

pub use clustering::{
    ClusteringError, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE, KMeansParams, KMeansResult,
    Metric, assign_to_nearest_centroid, kmeans,
};
pub use embedding::{
    Encoder, EncoderFactory, EncoderSpec, FastEmbedFactory, FastEmbedImageEncoder,
    FastEmbedTextEncoder, MockEncoder, MockEncoderFactory, image_model_dimension, model_to_string,
    parse_image_model, parse_text_model,
};
pub use normalize::{
    NORM_EPSILON, cosine_similarity, dot, l2_norm, l2_normalize, l2_normalize_rows, l2_normalized,
    squared_euclidean,
};
pub use types::{VectorDimension, VectorError};
