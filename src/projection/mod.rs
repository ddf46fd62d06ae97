//! 2D projection and clustering of the embedding store.

pub mod cluster;
pub mod engine;
pub mod points;
pub mod rescale;
pub mod umap;

pub use cluster::{ClusterLabel, cluster_points, dbscan, kmeans_2d, remap_noise};
pub use engine::{ProjectionEngine, ProjectionReport};
pub use points::{read_points, read_points_header, write_points};
pub use rescale::rescale_axes;
pub use umap::{Layout, UmapParams, find_ab_params, fit_transform};
