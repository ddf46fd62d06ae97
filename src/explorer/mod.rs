//! Online query API: similarity search, projection points and record details.

mod context;

pub use context::{ExplorerContext, LoadedIndex, SearchRequest, into_reply};
