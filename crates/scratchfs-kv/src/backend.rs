//! The metadata back-end interface and the engine selector.
//!
//! [`MetadataBackend`] is the seam between the daemon and whichever KV
//! engine it was started with. All operations are synchronous; the engines
//! provide their own concurrency control. `scan_prefix` materializes a
//! stable snapshot of the matching range.

use std::path::Path;

use scratchfs_types::errno;
use scratchfs_types::{Metadata, Result, Status, make_error_msg};

use crate::mem::MemBackend;
use crate::merge::MergeOperand;
use crate::reserve::OffsetReserveMap;

/// One directory entry as returned by a single shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Directory entry with the extra fields of the extended listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryExt {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub ctime: i64,
}

/// Minimal synchronous KV interface over path-keyed metadata records.
pub trait MetadataBackend: Send + Sync {
    /// Engine identifier for logs.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<String>;

    /// Overwrite.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Store only if the key is absent; `EEXIST` otherwise.
    fn put_if_absent(&self, key: &str, value: &str) -> Result<()>;

    /// `ENOENT` if the key is absent.
    fn remove(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Atomic rename + overwrite: `old_key` disappears, `new_key` gets
    /// `value`.
    fn update(&self, old_key: &str, new_key: &str, value: &str) -> Result<()>;

    /// Append an operand to the key. Resolution is lazy; a subsequent `get`
    /// observes the folded value.
    fn merge(&self, key: &str, operand: &MergeOperand) -> Result<()>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in
    /// lexicographic order, from a stable snapshot.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// The offset-reserve map shared with the merge engine.
    fn reserve(&self) -> &OffsetReserveMap;

    /// Submit an increase-size operand and return the offset at which the
    /// caller should perform its I/O.
    ///
    /// In append mode the operand reserves `[prev_size, prev_size + io_size)`
    /// and the reserved start is recovered through the reserve map after a
    /// blocking read of the key forces resolution.
    fn increase_size(&self, key: &str, io_size: u64, offset: u64, append: bool) -> Result<u64> {
        if append {
            let merge_id = self.reserve().next_merge_id();
            self.merge(key, &MergeOperand::increase_append(io_size, merge_id))?;
            // Force resolution so the engine deposits our start offset.
            self.get(key)?;
            self.reserve().take(merge_id).ok_or_else(|| {
                Status::with_message(
                    errno::EIO,
                    format!("append reservation for merge id {merge_id} was not published"),
                )
            })
        } else {
            self.merge(key, &MergeOperand::increase_extend(io_size, offset))?;
            Ok(offset)
        }
    }

    /// Submit a decrease-size operand.
    fn decrease_size(&self, key: &str, new_size: u64) -> Result<()> {
        self.merge(key, &MergeOperand::decrease(new_size))
    }

    /// Direct children of `dir`, excluding rename tombstones.
    fn get_dirents(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let prefix = dir_prefix(dir);
        let mut entries = Vec::new();
        for (key, value) in self.scan_prefix(&prefix)? {
            let name = &key[prefix.len()..];
            if name.is_empty() || name.contains('/') {
                // The directory's own record, or a deeper descendant.
                continue;
            }
            let md = parse_record(&key, &value)?;
            if md.is_tombstone() {
                continue;
            }
            entries.push(DirEntry {
                name: name.to_string(),
                is_dir: md.is_directory(),
            });
        }
        Ok(entries)
    }

    /// Like [`MetadataBackend::get_dirents`] but carrying size and ctime.
    fn get_dirents_extended(&self, dir: &str) -> Result<Vec<DirEntryExt>> {
        let prefix = dir_prefix(dir);
        let mut entries = Vec::new();
        for (key, value) in self.scan_prefix(&prefix)? {
            let name = &key[prefix.len()..];
            if name.is_empty() || name.contains('/') {
                continue;
            }
            let md = parse_record(&key, &value)?;
            if md.is_tombstone() {
                continue;
            }
            entries.push(DirEntryExt {
                name: name.to_string(),
                is_dir: md.is_directory(),
                size: md.size(),
                ctime: md.ctime(),
            });
        }
        Ok(entries)
    }
}

fn parse_record(key: &str, value: &str) -> Result<Metadata> {
    Metadata::parse(value)
        .map_err(|e| Status::with_message(errno::EIO, format!("corrupt record at {key:?}: {e}")))
}

/// Add the trailing slash that turns a directory path into a scan prefix.
/// The root keeps its single slash.
fn dir_prefix(dir: &str) -> String {
    debug_assert!(dir.starts_with('/'));
    if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}/")
    }
}

/// The smallest key strictly greater than every key with `prefix`, or `None`
/// when the prefix is all `0xff` bytes and the scan is unbounded above.
pub(crate) fn prefix_scan_end(prefix: &str) -> Option<String> {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(&last) = bytes.last() {
        if last == 0xff {
            bytes.pop();
        } else {
            *bytes.last_mut().unwrap() += 1;
            // Prefixes are paths, which are valid UTF-8; bumping the final
            // non-0xff byte keeps them so.
            return Some(String::from_utf8(bytes).expect("prefix stays utf-8"));
        }
    }
    None
}

/// The engine selected at daemon startup. A plain sum type: the choice never
/// changes at runtime.
#[derive(Debug)]
pub enum MetaDb {
    Mem(MemBackend),
    #[cfg(feature = "rocksdb")]
    Rocks(crate::rocks::RocksBackend),
}

/// Backend identifier accepted by [`MetaDb::open`].
pub const MEM_BACKEND: &str = "mem";
/// Backend identifier accepted by [`MetaDb::open`].
pub const ROCKSDB_BACKEND: &str = "rocksdb";

impl MetaDb {
    /// Open the engine named by `backend` with its storage under `path`.
    #[allow(unused_variables)]
    pub fn open(path: &Path, backend: &str) -> Result<Self> {
        match backend {
            MEM_BACKEND => Ok(MetaDb::Mem(MemBackend::new())),
            #[cfg(feature = "rocksdb")]
            ROCKSDB_BACKEND => Ok(MetaDb::Rocks(crate::rocks::RocksBackend::open(
                &path.join(ROCKSDB_BACKEND),
            )?)),
            #[cfg(not(feature = "rocksdb"))]
            ROCKSDB_BACKEND => make_error_msg(
                errno::EINVAL,
                "rocksdb backend requested but not compiled in",
            ),
            other => make_error_msg(errno::EINVAL, format!("unknown metadata backend {other:?}")),
        }
    }

    fn inner(&self) -> &dyn MetadataBackend {
        match self {
            MetaDb::Mem(b) => b,
            #[cfg(feature = "rocksdb")]
            MetaDb::Rocks(b) => b,
        }
    }
}

impl MetadataBackend for MetaDb {
    fn name(&self) -> &'static str {
        self.inner().name()
    }
    fn get(&self, key: &str) -> Result<String> {
        self.inner().get(key)
    }
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.inner().put(key, value)
    }
    fn put_if_absent(&self, key: &str, value: &str) -> Result<()> {
        self.inner().put_if_absent(key, value)
    }
    fn remove(&self, key: &str) -> Result<()> {
        self.inner().remove(key)
    }
    fn exists(&self, key: &str) -> Result<bool> {
        self.inner().exists(key)
    }
    fn update(&self, old_key: &str, new_key: &str, value: &str) -> Result<()> {
        self.inner().update(old_key, new_key, value)
    }
    fn merge(&self, key: &str, operand: &MergeOperand) -> Result<()> {
        self.inner().merge(key, operand)
    }
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.inner().scan_prefix(prefix)
    }
    fn reserve(&self) -> &OffsetReserveMap {
        self.inner().reserve()
    }
}
