//! Deterministic placement of metadata keys and chunks onto daemons.

use std::sync::Arc;

use xxhash_rust::xxh64::xxh64;

use crate::hosts::HostTable;
use crate::path_cache::PathCache;

/// Seed for the placement hash. Must be identical on clients and daemons.
const PLACEMENT_SEED: u64 = 0x00C0_FFEE;

/// The placement hash every party must agree on.
pub fn placement_hash(s: &str) -> u64 {
    xxh64(s.as_bytes(), PLACEMENT_SEED)
}

/// Hash-based placement over a federated host table.
///
/// Placement is a two-step function: `locate_instance` picks the ScratchFS
/// instance that owns the path (from the path cache, falling back to the
/// local instance), then the daemon within that instance is
/// `(hash + replica) mod instance_size`, offset by the instance's position
/// in the federated table.
#[derive(Debug, Clone)]
pub struct HashDistributor {
    table: Arc<HostTable>,
    cache: Arc<PathCache>,
    local_instance: usize,
}

impl HashDistributor {
    pub fn new(table: Arc<HostTable>, cache: Arc<PathCache>, local_instance: usize) -> Self {
        assert!(local_instance < table.instance_count());
        Self {
            table,
            cache,
            local_instance,
        }
    }

    pub fn host_table(&self) -> &HostTable {
        &self.table
    }

    pub fn path_cache(&self) -> &PathCache {
        &self.cache
    }

    pub fn local_instance(&self) -> usize {
        self.local_instance
    }

    /// The instance that owns `path`: its cached binding if one exists,
    /// otherwise the local instance.
    pub fn locate_instance(&self, path: &str) -> usize {
        self.cache.get(path).unwrap_or(self.local_instance)
    }

    /// Global daemon index owning `path`'s metadata record (or the replica
    /// `replica` of it).
    pub fn locate_metadata(&self, path: &str, replica: u32) -> usize {
        let instance = self.locate_instance(path);
        let size = u64::from(self.table.instance_size(instance));
        let offset = placement_hash(path).wrapping_add(u64::from(replica)) % size;
        self.table.instance_offset(instance) + offset as usize
    }

    /// Global daemon index owning chunk `chunk_id` of `path` (or its
    /// replica).
    ///
    /// When the instance has no more daemons than the replica index the
    /// placement wraps and duplicate replicas are accepted: replication
    /// degrades to fewer effective copies.
    pub fn locate_chunk(&self, path: &str, chunk_id: u64, replica: u32) -> usize {
        let instance = self.locate_instance(path);
        let size = u64::from(self.table.instance_size(instance));
        let key = format!("{path}{chunk_id}");
        let offset = placement_hash(&key).wrapping_add(u64::from(replica)) % size;
        self.table.instance_offset(instance) + offset as usize
    }

    /// All daemons that may hold entries of directory `path`.
    ///
    /// The root spans the whole federated table. A path bound to an
    /// instance spans only that instance's daemons; an unbound path could
    /// live anywhere.
    pub fn locate_directory(&self, path: &str) -> Vec<usize> {
        if path == "/" {
            return (0..self.table.len()).collect();
        }
        match self.cache.get(path) {
            Some(instance) => self.table.instance_range(instance).collect(),
            None => (0..self.table.len()).collect(),
        }
    }
}
