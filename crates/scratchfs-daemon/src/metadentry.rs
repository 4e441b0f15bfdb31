//! Metadata operations over the daemon's shard.
//!
//! Thin orchestration between the RPC surface and the KV layer: every
//! function here owns exactly one key's worth of work.

use scratchfs_kv::{MergeOperand, MetadataBackend};
use scratchfs_proto::metadata::{UpdateFlags, UpdateMetadentryReq};
use scratchfs_types::errno;
use scratchfs_types::{Metadata, Result, Status, metadata::S_IFLNK};

use crate::context::DaemonContext;

/// Create the metadata entry for `path` via a create operand. Idempotent:
/// creating an existing path leaves it untouched.
pub fn create(ctx: &DaemonContext, path: &str, mode: u32) -> Result<()> {
    if !scratchfs_types::path::is_valid_key(path) {
        return Err(Status::with_message(
            errno::EINVAL,
            format!("not a valid metadata key: {path:?}"),
        ));
    }
    let mut md = Metadata::new(mode);
    md.init_acm_time();
    ctx.db().merge(path, &MergeOperand::create(&md))
}

/// Create a symlink entry pointing at `target_path`.
pub fn mk_symlink(ctx: &DaemonContext, path: &str, target_path: &str) -> Result<()> {
    let mut md = Metadata::with_target_path(S_IFLNK | 0o777, target_path);
    md.init_acm_time();
    ctx.db().merge(path, &MergeOperand::create(&md))
}

/// Fetch and parse the record of `path`.
pub fn get(ctx: &DaemonContext, path: &str) -> Result<Metadata> {
    let value = ctx.db().get(path)?;
    Metadata::parse(&value)
        .map_err(|e| Status::with_message(errno::EIO, format!("corrupt record at {path:?}: {e}")))
}

/// The raw serialized record of `path`, as sent over the wire by `stat`.
pub fn get_serialized(ctx: &DaemonContext, path: &str) -> Result<String> {
    ctx.db().get(path)
}

/// Current size of `path`.
pub fn get_size(ctx: &DaemonContext, path: &str) -> Result<u64> {
    Ok(get(ctx, path)?.size())
}

/// Submit an increase-size operand; returns the offset the caller should
/// write at (the reserved range start in append mode).
pub fn update_size(
    ctx: &DaemonContext,
    path: &str,
    io_size: u64,
    offset: u64,
    append: bool,
) -> Result<u64> {
    if !ctx.db().exists(path)? {
        return Err(Status::new(errno::ENOENT));
    }
    ctx.db().increase_size(path, io_size, offset, append)
}

/// Submit a decrease-size operand.
pub fn decrease_size(ctx: &DaemonContext, path: &str, new_size: u64) -> Result<()> {
    if !ctx.db().exists(path)? {
        return Err(Status::new(errno::ENOENT));
    }
    ctx.db().decrease_size(path, new_size)
}

/// Remove the record, returning its `(size, mode)` so the caller can decide
/// whether data chunks need removing elsewhere.
pub fn remove(ctx: &DaemonContext, path: &str) -> Result<(u64, u32)> {
    let md = get(ctx, path)?;
    ctx.db().remove(path)?;
    Ok((md.size(), md.mode()))
}

/// Selectively overwrite record fields according to the request's mask.
pub fn update(ctx: &DaemonContext, req: &UpdateMetadentryReq) -> Result<()> {
    let mut md = get(ctx, &req.path)?;
    apply_update(&mut md, req, &req.flags);
    ctx.db().put(&req.path, &md.serialize())
}

fn apply_update(md: &mut Metadata, req: &UpdateMetadentryReq, flags: &UpdateFlags) {
    if flags.link_count {
        md.set_link_count(req.link_count);
    }
    if flags.size {
        md.set_size(req.size);
    }
    if flags.blocks {
        md.set_blocks(req.blocks);
    }
    if flags.atime {
        md.set_atime(req.atime);
    }
    if flags.mtime {
        md.set_mtime(req.mtime);
    }
    if flags.ctime {
        md.set_ctime(req.ctime);
    }
    if flags.rename_path {
        md.set_rename_path(req.rename_path.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scratchfs_kv::MetaDb;
    use scratchfs_storage::ChunkStorage;
    use scratchfs_types::config::CHUNK_SIZE;
    use scratchfs_types::metadata::{S_IFREG, TOMBSTONE_BLOCKS};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx() -> (TempDir, Arc<DaemonContext>) {
        let dir = TempDir::new().unwrap();
        let db = MetaDb::open(dir.path(), "mem").unwrap();
        let storage = ChunkStorage::new(dir.path().join("chunks"), CHUNK_SIZE).unwrap();
        (dir, DaemonContext::from_parts(db, storage))
    }

    #[test]
    fn test_create_then_get() {
        let (_dir, ctx) = ctx();
        create(&ctx, "/a", S_IFREG | 0o644).unwrap();
        let md = get(&ctx, "/a").unwrap();
        assert_eq!(md.mode(), S_IFREG | 0o644);
        assert_eq!(md.size(), 0);
    }

    #[test]
    fn test_create_is_idempotent() {
        let (_dir, ctx) = ctx();
        create(&ctx, "/a", S_IFREG | 0o644).unwrap();
        update_size(&ctx, "/a", 100, 0, false).unwrap();
        // A second create must not reset the size.
        create(&ctx, "/a", S_IFREG | 0o600).unwrap();
        assert_eq!(get_size(&ctx, "/a").unwrap(), 100);
    }

    #[test]
    fn test_create_rejects_malformed_keys() {
        let (_dir, ctx) = ctx();
        for bad in ["relative", "/trailing/", "/a//b"] {
            assert_eq!(
                create(&ctx, bad, S_IFREG | 0o644).unwrap_err().code(),
                errno::EINVAL
            );
        }
    }

    #[test]
    fn test_get_missing_is_enoent() {
        let (_dir, ctx) = ctx();
        assert_eq!(get(&ctx, "/ghost").unwrap_err().code(), errno::ENOENT);
    }

    #[test]
    fn test_update_size_append_chain() {
        let (_dir, ctx) = ctx();
        create(&ctx, "/log", S_IFREG | 0o644).unwrap();
        assert_eq!(update_size(&ctx, "/log", 10, 0, true).unwrap(), 0);
        assert_eq!(update_size(&ctx, "/log", 10, 0, true).unwrap(), 10);
        assert_eq!(get_size(&ctx, "/log").unwrap(), 20);
    }

    #[test]
    fn test_update_size_missing_is_enoent() {
        let (_dir, ctx) = ctx();
        assert_eq!(
            update_size(&ctx, "/ghost", 10, 0, true).unwrap_err().code(),
            errno::ENOENT
        );
    }

    #[test]
    fn test_remove_returns_size_and_mode() {
        let (_dir, ctx) = ctx();
        create(&ctx, "/f", S_IFREG | 0o644).unwrap();
        update_size(&ctx, "/f", 4096, 0, false).unwrap();
        let (size, mode) = remove(&ctx, "/f").unwrap();
        assert_eq!(size, 4096);
        assert_eq!(mode, S_IFREG | 0o644);
        assert_eq!(get(&ctx, "/f").unwrap_err().code(), errno::ENOENT);
    }

    #[test]
    fn test_mk_symlink() {
        let (_dir, ctx) = ctx();
        mk_symlink(&ctx, "/link", "/the/target").unwrap();
        let md = get(&ctx, "/link").unwrap();
        assert!(md.is_symlink());
        assert_eq!(md.target_path(), "/the/target");
    }

    #[test]
    fn test_update_masked_fields() {
        let (_dir, ctx) = ctx();
        create(&ctx, "/f", S_IFREG | 0o644).unwrap();
        let req = UpdateMetadentryReq {
            path: "/f".into(),
            size: 555,
            blocks: TOMBSTONE_BLOCKS,
            mtime: 42,
            flags: UpdateFlags {
                blocks: true,
                mtime: true,
                ..Default::default()
            },
            ..Default::default()
        };
        update(&ctx, &req).unwrap();
        let md = get(&ctx, "/f").unwrap();
        // Only masked fields moved.
        assert_eq!(md.size(), 0);
        assert_eq!(md.blocks(), TOMBSTONE_BLOCKS);
        assert_eq!(md.mtime(), 42);
        assert!(md.is_tombstone());
    }

    #[test]
    fn test_decrease_size() {
        let (_dir, ctx) = ctx();
        create(&ctx, "/f", S_IFREG | 0o644).unwrap();
        update_size(&ctx, "/f", 1000, 0, false).unwrap();
        decrease_size(&ctx, "/f", 10).unwrap();
        assert_eq!(get_size(&ctx, "/f").unwrap(), 10);
    }
}
