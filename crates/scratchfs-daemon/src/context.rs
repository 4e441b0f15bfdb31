//! Daemon-wide state, passed explicitly to every handler.

use std::path::Path;
use std::sync::Arc;

use scratchfs_kv::MetaDb;
use scratchfs_storage::ChunkStorage;
use scratchfs_types::Result;
use scratchfs_types::config::CHUNK_SIZE;

use crate::stats::OpStats;

/// Persistent engine handles for the daemon process lifetime: the metadata
/// store, the local chunk storage and the operation counters.
pub struct DaemonContext {
    db: MetaDb,
    storage: ChunkStorage,
    stats: OpStats,
}

impl DaemonContext {
    /// Open both engines under `root`. `backend` names the metadata engine
    /// (see [`scratchfs_kv::backend`]).
    pub fn open(root: &Path, backend: &str) -> Result<Arc<Self>> {
        let db = MetaDb::open(&root.join("metadata"), backend)?;
        let storage = ChunkStorage::new(root.join("chunks"), CHUNK_SIZE)?;
        Ok(Arc::new(Self {
            db,
            storage,
            stats: OpStats::new(),
        }))
    }

    /// Build a context from already-open engines. Used by tests.
    pub fn from_parts(db: MetaDb, storage: ChunkStorage) -> Arc<Self> {
        Arc::new(Self {
            db,
            storage,
            stats: OpStats::new(),
        })
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    pub fn storage(&self) -> &ChunkStorage {
        &self.storage
    }

    pub fn stats(&self) -> &OpStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_with_mem_backend() {
        let dir = TempDir::new().unwrap();
        let ctx = DaemonContext::open(dir.path(), "mem").unwrap();
        assert_eq!(ctx.storage().chunk_size(), CHUNK_SIZE);
    }

    #[test]
    fn test_open_with_bad_backend() {
        let dir = TempDir::new().unwrap();
        assert!(DaemonContext::open(dir.path(), "nope").is_err());
    }
}
