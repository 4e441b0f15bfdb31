//! Path-keyed metadata store.
//!
//! The store is a flat KV namespace whose keys are absolute paths and whose
//! values are serialized [`scratchfs_types::Metadata`] records. Concurrent
//! size mutations never lock the key: writers submit small *merge operands*
//! ([`merge::MergeOperand`]) and the engine folds them into the stored value
//! when the key is next read. Two interchangeable back-ends exist behind
//! [`backend::MetadataBackend`]:
//!
//! - [`mem::MemBackend`] -- BTreeMap under a coarse lock, merge emulated by
//!   read-modify-write (always available).
//! - `rocks::RocksBackend` -- RocksDB with the engine installed as its
//!   merge-operator hook (feature-gated behind `"rocksdb"`).

pub mod backend;
pub mod merge;
pub mod mem;
pub mod reserve;

#[cfg(feature = "rocksdb")]
pub mod rocks;

pub use backend::{DirEntry, DirEntryExt, MetaDb, MetadataBackend};
pub use merge::MergeOperand;
pub use reserve::OffsetReserveMap;
