//! Approximate nearest-neighbor index.
//!
//! A pure Rust OPQ + IVF + PQ composite quantizer scored by inner product.
//! Callers feed L2-normalized vectors so inner product equals cosine
//! similarity, both when building and when querying.

mod device;
mod ivf;
mod opq;
mod persist;
mod pq;

pub use device::{AcceleratorBackend, ComputeDevice, DeviceRegistry};
pub use ivf::{IndexParams, IvfPqIndex, Neighbor};
pub use opq::{OpqParams, OpqRotation, train_opq};
pub use persist::{IndexMetadata, NORMALIZATION_L2, load_index, read_index_metadata, save_index};
pub use pq::{MAX_BITS, ProductQuantizer};
