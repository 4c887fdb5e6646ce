//! Filesystem-resident vector store for semantic code search.
//!
//! Records are JSON files placed in directories derived from a quantized
//! projection of their embedding. A persisted HNSW index accelerates
//! search and is kept consistent with the records through an explicit
//! staleness protocol; when it cannot be used, search degrades to scanning
//! the quantized neighbourhood of the query.

pub mod cache;
pub mod collection;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod io;
pub mod query;
pub mod storage;
pub mod vector;

// Explicit exports for better API clarity
pub use cache::IndexCache;
pub use collection::{
    Collection, CollectionHealth, CollectionManager, CollectionOptions, CollectionParams,
    SessionSummary, WriteSession,
};
pub use config::Settings;
pub use embedding::{EmbeddingGenerator, HashEmbeddingGenerator};
pub use error::{ErrorContext, StoreError, StoreResult};
pub use index::{AnnIndexManager, ChangeSet, IndexState, StalenessCoordinator, UpdateMode};
pub use query::{AccuracyLevel, QueryEngine, SearchFilter, SearchOutcome, SearchResult};
pub use storage::{IdIndex, Payload, PayloadKey, PayloadValue, RecordStore, VectorRecord};
pub use vector::{Score, VectorDimension, VectorError, VectorPathEncoder};
