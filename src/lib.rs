//! The main library module for embedscope.
//!
//! An embedding retrieval pipeline over one multimodal dataset snapshot:
//! embedding shards plus a positional record table, an OPQ/IVF-PQ index for
//! similarity search, and a 2D projection with cluster labels. Every artifact
//! is aligned by [`Ordinal`].

pub mod ann;
pub mod config;
pub mod display;
pub mod error;
pub mod explorer;
pub mod indexing;
pub mod io;
pub mod projection;
pub mod storage;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{ErrorResponse, ExplorerError, ExplorerResult};
pub use explorer::{ExplorerContext, SearchRequest};
pub use indexing::{BuildReport, EmbedJob, IndexBuilder, IngestReport};
pub use projection::{ProjectionEngine, ProjectionReport};
pub use types::{MediaType, Modality, Ordinal, ProjectionPoint, RawRecord};
