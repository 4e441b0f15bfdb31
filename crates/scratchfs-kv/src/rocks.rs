//! RocksDB metadata back-end.
//!
//! The primary engine: the merge resolution from [`crate::merge`] is
//! installed as RocksDB's merge-operator hook, so operand submission is a
//! plain `Merge` write and folding happens inside the engine on the next
//! read of the key.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{DB, Direction, IteratorMode, MergeOperands, Options, WriteBatch};
use tracing::error;

use scratchfs_types::errno;
use scratchfs_types::{Result, Status, make_error, make_error_msg};

use crate::backend::MetadataBackend;
use crate::merge::{self, MergeOperand};
use crate::reserve::OffsetReserveMap;

/// RocksDB-backed engine. One database per daemon, open for the process
/// lifetime.
#[derive(Debug)]
pub struct RocksBackend {
    db: DB,
    reserve: Arc<OffsetReserveMap>,
}

fn rocks_err(e: rocksdb::Error) -> Status {
    Status::with_message(errno::EIO, e.to_string())
}

impl RocksBackend {
    /// Open (or create) the database under `path` with the merge operator
    /// installed.
    pub fn open(path: &Path) -> Result<Self> {
        let reserve = Arc::new(OffsetReserveMap::new());

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let full_reserve = Arc::clone(&reserve);
        let full_merge = move |key: &[u8],
                               existing: Option<&[u8]>,
                               operands: &MergeOperands|
              -> Option<Vec<u8>> {
            let existing = match existing {
                Some(bytes) => match std::str::from_utf8(bytes) {
                    Ok(s) => Some(s),
                    Err(_) => {
                        error!(key = ?String::from_utf8_lossy(key), "non-utf8 base record");
                        return None;
                    }
                },
                None => None,
            };
            let ops = operands
                .into_iter()
                .map(std::str::from_utf8)
                .collect::<std::result::Result<Vec<&str>, _>>();
            let ops = match ops {
                Ok(ops) => ops,
                Err(_) => {
                    error!(key = ?String::from_utf8_lossy(key), "non-utf8 merge operand");
                    return None;
                }
            };
            match merge::resolve(existing, ops, &full_reserve) {
                Ok(folded) => Some(folded.into_bytes()),
                Err(status) => {
                    error!(
                        key = ?String::from_utf8_lossy(key),
                        %status,
                        "merge resolution failed"
                    );
                    None
                }
            }
        };
        // Partial merges would reorder operand folding; decline them so
        // every fold sees the full chronological sequence.
        let partial_merge =
            |_key: &[u8], _existing: Option<&[u8]>, _operands: &MergeOperands| -> Option<Vec<u8>> {
                None
            };
        opts.set_merge_operator("scratchfs-metadata-merge", full_merge, partial_merge);

        let db = DB::open(&opts, path).map_err(rocks_err)?;
        Ok(Self { db, reserve })
    }
}

impl MetadataBackend for RocksBackend {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    fn get(&self, key: &str) -> Result<String> {
        match self.db.get(key.as_bytes()).map_err(rocks_err)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|_| Status::with_message(errno::EIO, format!("non-utf8 value at {key:?}"))),
            None => make_error(errno::ENOENT),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        debug_assert!(scratchfs_types::path::is_absolute(key));
        debug_assert!(!scratchfs_types::path::has_trailing_slash(key));
        self.db.put(key.as_bytes(), value.as_bytes()).map_err(rocks_err)
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<()> {
        // Check-then-put without a lock, like the original backend; the
        // create path tolerates the race because creation goes through the
        // idempotent create operand.
        if self.exists(key)? {
            return make_error(errno::EEXIST);
        }
        self.put(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        if !self.exists(key)? {
            return make_error(errno::ENOENT);
        }
        self.db.delete(key.as_bytes()).map_err(rocks_err)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.db.get(key.as_bytes()).map_err(rocks_err)?.is_some())
    }

    fn update(&self, old_key: &str, new_key: &str, value: &str) -> Result<()> {
        if !self.exists(old_key)? {
            return make_error_msg(errno::ENOENT, format!("update of missing key {old_key:?}"));
        }
        let mut batch = WriteBatch::default();
        batch.delete(old_key.as_bytes());
        batch.put(new_key.as_bytes(), value.as_bytes());
        self.db.write(batch).map_err(rocks_err)
    }

    fn merge(&self, key: &str, operand: &MergeOperand) -> Result<()> {
        self.db
            .merge(key.as_bytes(), operand.serialize().as_bytes())
            .map_err(rocks_err)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(rocks_err)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8(key.into_vec())
                .map_err(|_| Status::with_message(errno::EIO, "non-utf8 key in scan"))?;
            let value = String::from_utf8(value.into_vec())
                .map_err(|_| Status::with_message(errno::EIO, format!("non-utf8 value at {key:?}")))?;
            out.push((key, value));
        }
        Ok(out)
    }

    fn reserve(&self) -> &OffsetReserveMap {
        &self.reserve
    }
}
