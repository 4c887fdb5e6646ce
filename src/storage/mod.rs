//! Filesystem persistence: record files, the per-process id index, the
//! collection metadata document and the collection lock.

pub mod fsutil;
mod id_index;
mod lock;
mod metadata;
pub mod payload_keys;
mod record;
mod record_store;

pub use id_index::IdIndex;
pub use lock::{CollectionLock, LOCK_FILE};
pub use metadata::{
    AnnIndexState, AnnParams, CollectionMetadata, DistanceSpace, METADATA_FILE, METADATA_VERSION,
    now_millis,
};
pub use payload_keys::PayloadKey;
pub use record::{
    MAX_FILENAME_BYTES, Payload, PayloadValue, RECORD_EXTENSION, RECORD_PREFIX, VectorRecord,
    id_from_filename, record_filename,
};
pub use record_store::{RecordStore, ScanResult};
