//! The approximate nearest neighbour index over a collection's records,
//! its on-disk form and the staleness protocol guarding it.

mod changes;
mod manager;
mod persist;
mod staleness;

pub use changes::ChangeSet;
pub use manager::{AnnIndexManager, DEFAULT_REBUILD_THRESHOLD, UpdateMode, UpdateReport};
pub use persist::{ANN_INDEX_FILE, AnnHit, AnnIndex};
pub use staleness::{IndexState, StalenessCoordinator};
