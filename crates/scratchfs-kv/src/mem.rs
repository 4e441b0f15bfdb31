//! In-memory metadata back-end.
//!
//! A `BTreeMap` behind a coarse `parking_lot::RwLock`. Merge is emulated by
//! read-modify-write while holding the write lock, so resolution happens
//! eagerly at submit time instead of lazily on read; the observable contract
//! (folded value on `get`, reservation published before the submitter's
//! read returns) is the same as the merge-operator engine's.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use scratchfs_types::errno;
use scratchfs_types::{Result, make_error, make_error_msg};

use crate::backend::{MetadataBackend, prefix_scan_end};
use crate::merge::{self, MergeOperand};
use crate::reserve::OffsetReserveMap;

/// BTreeMap-backed engine. Always available; the daemon default for tests
/// and diskless runs.
#[derive(Default, Debug)]
pub struct MemBackend {
    data: RwLock<BTreeMap<String, String>>,
    reserve: OffsetReserveMap,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl MetadataBackend for MemBackend {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn get(&self, key: &str) -> Result<String> {
        match self.data.read().get(key) {
            Some(v) => Ok(v.clone()),
            None => make_error(errno::ENOENT),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        debug_assert!(scratchfs_types::path::is_absolute(key));
        debug_assert!(!scratchfs_types::path::has_trailing_slash(key));
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.write();
        if data.contains_key(key) {
            return make_error(errno::EEXIST);
        }
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.data.write().remove(key) {
            Some(_) => Ok(()),
            None => make_error(errno::ENOENT),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn update(&self, old_key: &str, new_key: &str, value: &str) -> Result<()> {
        let mut data = self.data.write();
        if !data.contains_key(old_key) {
            return make_error_msg(errno::ENOENT, format!("update of missing key {old_key:?}"));
        }
        data.remove(old_key);
        data.insert(new_key.to_string(), value.to_string());
        Ok(())
    }

    fn merge(&self, key: &str, operand: &MergeOperand) -> Result<()> {
        let serialized = operand.serialize();
        let mut data = self.data.write();
        let existing = data.get(key).cloned();
        let folded = merge::resolve(existing.as_deref(), [serialized.as_str()], &self.reserve)?;
        data.insert(key.to_string(), folded);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let data = self.data.read();
        let upper = match prefix_scan_end(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        let range = (Bound::Included(prefix.to_string()), upper);
        Ok(data
            .range(range)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn reserve(&self) -> &OffsetReserveMap {
        &self.reserve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scratchfs_types::Metadata;
    use scratchfs_types::metadata::S_IFREG;
    use std::sync::Arc;

    fn record(size: u64) -> Metadata {
        let mut md = Metadata::new(S_IFREG | 0o644);
        md.set_size(size);
        md
    }

    #[test]
    fn test_basic_put_get() {
        let db = MemBackend::new();
        assert!(db.is_empty());
        db.put("/a", "value").unwrap();
        assert_eq!(db.get("/a").unwrap(), "value");
        assert_eq!(db.get("/missing").unwrap_err().code(), errno::ENOENT);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_put_if_absent_conflict() {
        let db = MemBackend::new();
        db.put_if_absent("/k", "v").unwrap();
        let err = db.put_if_absent("/k", "v2").unwrap_err();
        assert_eq!(err.code(), errno::EEXIST);
        // First value wins.
        assert_eq!(db.get("/k").unwrap(), "v");
    }

    #[test]
    fn test_remove() {
        let db = MemBackend::new();
        db.put("/k", "v").unwrap();
        db.remove("/k").unwrap();
        assert_eq!(db.remove("/k").unwrap_err().code(), errno::ENOENT);
        assert!(!db.exists("/k").unwrap());
    }

    #[test]
    fn test_update_renames_atomically() {
        let db = MemBackend::new();
        db.put("/old", "v1").unwrap();
        db.update("/old", "/new", "v2").unwrap();
        assert!(!db.exists("/old").unwrap());
        assert_eq!(db.get("/new").unwrap(), "v2");

        assert_eq!(
            db.update("/gone", "/x", "v").unwrap_err().code(),
            errno::ENOENT
        );
    }

    #[test]
    fn test_scan_prefix_order_and_bounds() {
        let db = MemBackend::new();
        db.put("/d/b", "2").unwrap();
        db.put("/d/a", "1").unwrap();
        db.put("/d/c", "3").unwrap();
        db.put("/e", "x").unwrap();
        db.put("/c", "y").unwrap();

        let pairs = db.scan_prefix("/d/").unwrap();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["/d/a", "/d/b", "/d/c"]);
    }

    #[test]
    fn test_merge_create_then_appends() {
        let db = MemBackend::new();
        db.merge("/f", &MergeOperand::create(&record(0))).unwrap();
        // Duplicate create is a no-op.
        db.merge("/f", &MergeOperand::create(&record(999))).unwrap();

        let id_a = db.reserve().next_merge_id();
        let id_b = db.reserve().next_merge_id();
        db.merge("/f", &MergeOperand::increase_append(4096, id_a))
            .unwrap();
        db.merge("/f", &MergeOperand::increase_append(4096, id_b))
            .unwrap();

        let md = Metadata::parse(&db.get("/f").unwrap()).unwrap();
        assert_eq!(md.size(), 8192);
        assert_eq!(db.reserve().take(id_a), Some(0));
        assert_eq!(db.reserve().take(id_b), Some(4096));
    }

    #[test]
    fn test_merge_without_create_is_corruption() {
        let db = MemBackend::new();
        let err = db
            .merge("/ghost", &MergeOperand::decrease(0))
            .unwrap_err();
        assert_eq!(err.code(), errno::EIO);
        // The failed merge must not materialize the key.
        assert!(!db.exists("/ghost").unwrap());
    }

    #[test]
    fn test_parallel_appends_get_disjoint_ranges() {
        // The invariant behind lock-free parallel appends: for concurrent
        // appends of sA and sB onto starting size s0, the returned offsets
        // are {s0, s0+sA} or {s0, s0+sB} and the final size is s0+sA+sB.
        let db = Arc::new(MemBackend::new());
        db.put("/log", &record(0).serialize()).unwrap();

        let (s_a, s_b) = (4096u64, 1024u64);
        let db_a = Arc::clone(&db);
        let db_b = Arc::clone(&db);
        let ha = std::thread::spawn(move || db_a.increase_size("/log", s_a, 0, true).unwrap());
        let hb = std::thread::spawn(move || db_b.increase_size("/log", s_b, 0, true).unwrap());
        let (oa, ob) = (ha.join().unwrap(), hb.join().unwrap());

        let final_size = Metadata::parse(&db.get("/log").unwrap()).unwrap().size();
        assert_eq!(final_size, s_a + s_b);
        let mut offsets = [(oa, s_a), (ob, s_b)];
        offsets.sort();
        assert_eq!(offsets[0].0, 0);
        assert_eq!(offsets[1].0, offsets[0].1);
    }
}
