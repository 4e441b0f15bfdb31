//! Node-local chunk storage.
//!
//! Each file path owns a directory under the daemon's chunk root; each chunk
//! is a plain file in it named by its chunk id. There is no caching beyond
//! the OS page cache and no CRC; chunk lifetime is subordinate to the path's
//! metadata record.

pub mod chunk_storage;

pub use chunk_storage::{ChunkStat, ChunkStorage};
