//! The merge-id offset-reserve map.
//!
//! An append-mode size increase reserves a byte range whose start is unknown
//! until the merge engine folds the operand. The engine deposits the start
//! offset here under the operand's 16-bit merge id; the submitting caller
//! takes it (with erase) right after forcing resolution with a `get`.
//! Entries live for microseconds. A caller that dies between submit and take
//! leaves a stale entry behind; the 16-bit id space bounds that leak and a
//! later id collision is resolved by the caller retrying, which is accepted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};

use parking_lot::Mutex;

/// Shared map from merge id to the reserved starting offset.
#[derive(Debug, Default)]
pub struct OffsetReserveMap {
    offsets: Mutex<HashMap<u16, u64>>,
    next_id: AtomicU16,
}

impl OffsetReserveMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a fresh merge id. Wraps at 2^16; see the module note on
    /// collisions.
    pub fn next_merge_id(&self) -> u16 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Deposit the reserved offset for `merge_id`. Called by the merge
    /// engine during resolution.
    pub fn put(&self, merge_id: u16, offset: u64) {
        self.offsets.lock().insert(merge_id, offset);
    }

    /// Take the reserved offset for `merge_id`, erasing the entry.
    pub fn take(&self, merge_id: u16) -> Option<u64> {
        self.offsets.lock().remove(&merge_id)
    }

    /// Number of entries currently parked in the map.
    pub fn len(&self) -> usize {
        self.offsets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_take_erases() {
        let map = OffsetReserveMap::new();
        map.put(7, 4096);
        assert_eq!(map.take(7), Some(4096));
        assert_eq!(map.take(7), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_ids_are_distinct() {
        let map = OffsetReserveMap::new();
        let a = map.next_merge_id();
        let b = map.next_merge_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_concurrent_put_take() {
        let map = Arc::new(OffsetReserveMap::new());
        let mut handles = Vec::new();
        for i in 0..8u16 {
            let m = Arc::clone(&map);
            handles.push(std::thread::spawn(move || {
                m.put(i, u64::from(i) * 100);
                m.take(i)
            }));
        }
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.join().unwrap(), Some(i as u64 * 100));
        }
        assert!(map.is_empty());
    }
}
