//! Metadata RPC forwarders.
//!
//! No errno leaks through thread-locals here: every function returns an
//! explicit `Result` whose `Status` carries the POSIX code.

use std::collections::HashSet;

use futures::future::join_all;
use tracing::{debug, error};

use scratchfs_proto::dirents::{Dirent, DirentExt};
use scratchfs_proto::metadata::*;
use scratchfs_proto::{decode_message, dirents, encode_message, ids};
use scratchfs_types::arithmetic::chunk_id_for_offset;
use scratchfs_types::config::CHUNK_SIZE;
use scratchfs_types::errno;
use scratchfs_types::{Metadata, Result, Status, make_error};

use crate::context::ClientContext;
use crate::forward_data;

async fn call_metadata<Req, Rsp>(
    ctx: &ClientContext,
    target: usize,
    method: u16,
    req: &Req,
) -> Result<Rsp>
where
    Req: serde::Serialize,
    Rsp: serde::de::DeserializeOwned,
{
    let reply = ctx
        .rpc()
        .call(
            &ctx.daemon_addr(target),
            ids::METADATA_SERVICE,
            method,
            encode_message(req)?,
        )
        .await?;
    decode_message(&reply)
}

fn check(err: i32) -> Result<()> {
    if err != 0 {
        return Err(Status::new(err));
    }
    Ok(())
}

/// Create the metadata entry for `path`.
pub async fn forward_create(ctx: &ClientContext, path: &str, mode: u32) -> Result<()> {
    let target = ctx.distributor().locate_metadata(path, 0);
    let rsp: CreateRsp = call_metadata(
        ctx,
        target,
        ids::metadata::CREATE,
        &CreateReq {
            path: path.to_string(),
            mode,
        },
    )
    .await?;
    check(rsp.err)
}

/// Fetch `path`'s record.
///
/// With a single instance this is one RPC to the owning daemon. In a
/// federated namespace every instance is asked concurrently; the instance
/// with the smallest priority value wins, and the path cache learns the
/// binding so subsequent placements route there directly.
pub async fn forward_stat(ctx: &ClientContext, path: &str) -> Result<Metadata> {
    let table = ctx.hosts();
    if table.is_single_instance() {
        let target = ctx.distributor().locate_metadata(path, 0);
        let rsp: StatRsp = call_metadata(
            ctx,
            target,
            ids::metadata::STAT,
            &StatReq {
                path: path.to_string(),
            },
        )
        .await?;
        check(rsp.err)?;
        return parse_record(path, &rsp.db_val);
    }

    // One concurrent stat per instance, each to the daemon the path hashes
    // to within that instance.
    let mut calls = Vec::with_capacity(table.instance_count());
    for instance in 0..table.instance_count() {
        let target = instance_local_metadata_target(ctx, path, instance);
        let req = StatReq {
            path: path.to_string(),
        };
        calls.push(async move {
            let rsp: Result<StatRsp> =
                call_metadata(ctx, target, ids::metadata::STAT, &req).await;
            (instance, rsp)
        });
    }

    let mut winner: Option<(usize, String)> = None;
    let mut first_err: Option<Status> = None;
    for (instance, outcome) in join_all(calls).await {
        match outcome {
            Ok(rsp) if rsp.err == 0 => {
                let better = match &winner {
                    Some((best, _)) => table.priority(instance) < table.priority(*best),
                    None => true,
                };
                if better {
                    winner = Some((instance, rsp.db_val));
                }
            }
            Ok(rsp) => {
                if rsp.err != errno::ENOENT && first_err.is_none() {
                    first_err = Some(Status::new(rsp.err));
                }
            }
            Err(e) => {
                error!(path, instance, error = %e, "federated stat leg failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }

    match winner {
        Some((instance, db_val)) => {
            ctx.distributor().path_cache().insert(path, instance);
            parse_record(path, &db_val)
        }
        None => Err(first_err.unwrap_or_else(|| Status::new(errno::ENOENT))),
    }
}

/// The daemon `path` hashes to within `instance`, ignoring the path cache.
/// Used by the federated stat fan-out, which probes every instance.
fn instance_local_metadata_target(ctx: &ClientContext, path: &str, instance: usize) -> usize {
    let table = ctx.hosts();
    // Same hash as the distributor, scoped to the probed instance.
    let probe = scratchfs_placement::distributor::placement_hash(path);
    table.instance_offset(instance) + (probe % u64::from(table.instance_size(instance))) as usize
}

fn parse_record(path: &str, db_val: &str) -> Result<Metadata> {
    Metadata::parse(db_val)
        .map_err(|e| Status::with_message(errno::EIO, format!("corrupt record for {path:?}: {e}")))
}

/// Remove `path`: metadata first, then data chunks.
///
/// The metadata reply carries size and mode; when the file is small
/// (`size / chunk_size < daemon count`) only the daemons that can own its
/// chunks receive a `remove_data` RPC, otherwise the owning instance is
/// broadcast. The daemon holding the metadata entry dropped its local
/// chunks during `remove_metadata`, so it is skipped.
pub async fn forward_remove(ctx: &ClientContext, path: &str) -> Result<()> {
    use scratchfs_types::config::IMPLICIT_DATA_REMOVAL;
    use scratchfs_types::metadata::{S_IFMT, S_IFREG};

    let metadata_target = ctx.distributor().locate_metadata(path, 0);
    let rsp: RemoveMetadataRsp = call_metadata(
        ctx,
        metadata_target,
        ids::metadata::REMOVE_METADATA,
        &RemoveMetadataReq {
            path: path.to_string(),
        },
    )
    .await?;
    check(rsp.err)?;

    // Directories and empty files carry no chunks.
    if rsp.mode & S_IFMT != S_IFREG || rsp.size == 0 {
        return Ok(());
    }

    let mut targets: HashSet<usize> = HashSet::new();
    if rsp.size / CHUNK_SIZE < ctx.hosts().len() as u64 {
        // Small file: contact only the daemons that could own a chunk.
        let chunk_end = chunk_id_for_offset(rsp.size, CHUNK_SIZE);
        for chunk_id in 0..=chunk_end {
            for replica in 0..=ctx.replica_count() {
                targets.insert(ctx.distributor().locate_chunk(path, chunk_id, replica));
            }
        }
    } else {
        let instance = ctx.distributor().locate_instance(path);
        targets.extend(ctx.hosts().instance_range(instance));
    }
    if IMPLICIT_DATA_REMOVAL {
        targets.remove(&metadata_target);
    }

    forward_data::forward_remove_data(ctx, path, targets.into_iter().collect()).await
}

/// Submit a decrease-size operand for `path`.
pub async fn forward_decr_size(ctx: &ClientContext, path: &str, new_size: u64) -> Result<()> {
    let target = ctx.distributor().locate_metadata(path, 0);
    let rsp: DecrSizeRsp = call_metadata(
        ctx,
        target,
        ids::metadata::DECR_SIZE,
        &DecrSizeReq {
            path: path.to_string(),
            new_size,
        },
    )
    .await?;
    check(rsp.err)
}

/// Selectively overwrite record fields.
pub async fn forward_update_metadentry(
    ctx: &ClientContext,
    path: &str,
    md: &Metadata,
    flags: UpdateFlags,
) -> Result<()> {
    let target = ctx.distributor().locate_metadata(path, 0);
    let rsp: UpdateMetadentryRsp = call_metadata(
        ctx,
        target,
        ids::metadata::UPDATE_METADENTRY,
        &UpdateMetadentryReq {
            path: path.to_string(),
            link_count: md.link_count(),
            size: md.size(),
            blocks: md.blocks(),
            atime: md.atime(),
            mtime: md.mtime(),
            ctime: md.ctime(),
            rename_path: md.rename_path().to_string(),
            flags,
        },
    )
    .await?;
    check(rsp.err)
}

/// Rename `old_path` to `new_path`.
///
/// The old entry becomes a tombstone (`blocks = -1`, `rename_path`
/// pointing at the new name) that listings skip; the new name is created
/// as a link resolving back to the old path, where the data chunks stay.
pub async fn forward_rename(
    ctx: &ClientContext,
    old_path: &str,
    new_path: &str,
    md: &Metadata,
) -> Result<()> {
    let mut tombstone = md.clone();
    tombstone.set_blocks(scratchfs_types::metadata::TOMBSTONE_BLOCKS);
    tombstone.set_rename_path(new_path);
    forward_update_metadentry(
        ctx,
        old_path,
        &tombstone,
        UpdateFlags {
            blocks: true,
            rename_path: true,
            ..Default::default()
        },
    )
    .await?;

    forward_mk_symlink(ctx, new_path, old_path).await
}

/// Submit an increase-size operand during a write; returns the starting
/// offset the merge engine reserved for this caller.
pub async fn forward_update_metadentry_size(
    ctx: &ClientContext,
    path: &str,
    size: u64,
    offset: u64,
    append: bool,
) -> Result<u64> {
    let target = ctx.distributor().locate_metadata(path, 0);
    let rsp: UpdateMetadentrySizeRsp = call_metadata(
        ctx,
        target,
        ids::metadata::UPDATE_METADENTRY_SIZE,
        &UpdateMetadentrySizeReq {
            path: path.to_string(),
            size,
            offset,
            append,
        },
    )
    .await?;
    check(rsp.err)?;
    Ok(rsp.ret_offset)
}

/// Current size of `path`.
pub async fn forward_get_metadentry_size(ctx: &ClientContext, path: &str) -> Result<u64> {
    let target = ctx.distributor().locate_metadata(path, 0);
    let rsp: GetMetadentrySizeRsp = call_metadata(
        ctx,
        target,
        ids::metadata::GET_METADENTRY_SIZE,
        &GetMetadentrySizeReq {
            path: path.to_string(),
        },
    )
    .await?;
    check(rsp.err)?;
    Ok(rsp.ret_size)
}

/// Collect the directory entries of `path` from every daemon that may hold
/// a shard of it.
///
/// Listings of `/` deduplicate by `(name, type)`: in a federated namespace
/// several instances hold their own root-level entries.
pub async fn forward_get_dirents(ctx: &ClientContext, path: &str) -> Result<Vec<Dirent>> {
    let targets = ctx.distributor().locate_directory(path);
    debug!(path, targets = targets.len(), "get_dirents fan-out");

    let calls = targets.iter().map(|&target| {
        let req = GetDirentsReq {
            path: path.to_string(),
        };
        async move {
            let rsp: Result<GetDirentsRsp> =
                call_metadata(ctx, target, ids::metadata::GET_DIRENTS, &req).await;
            (target, rsp)
        }
    });

    let mut err: Option<Status> = None;
    let mut entries = Vec::new();
    let mut root_seen: HashSet<(String, bool)> = HashSet::new();
    for (target, outcome) in join_all(calls).await {
        match outcome {
            Ok(rsp) if rsp.err == 0 => {
                for entry in dirents::decode_dirents(&rsp.data, rsp.dirents_size)? {
                    if path == "/" && !root_seen.insert((entry.name.clone(), entry.is_dir)) {
                        continue;
                    }
                    entries.push(entry);
                }
            }
            Ok(rsp) => {
                error!(path, host = target, err = rsp.err, "dirents leg failed");
                if err.is_none() {
                    err = Some(Status::new(rsp.err));
                }
            }
            Err(e) => {
                error!(path, host = target, error = %e, "dirents leg unreachable");
                if err.is_none() {
                    err = Some(e);
                }
            }
        }
    }

    match err {
        Some(e) => Err(e),
        None => Ok(entries),
    }
}

/// Extended listing from one specific daemon, for tools that walk shards
/// server by server.
pub async fn forward_get_dirents_extended(
    ctx: &ClientContext,
    path: &str,
    server: usize,
) -> Result<Vec<DirentExt>> {
    let targets = ctx.distributor().locate_directory(path);
    if server >= targets.len() {
        return make_error(errno::EINVAL);
    }
    let rsp: GetDirentsExtendedRsp = call_metadata(
        ctx,
        targets[server],
        ids::metadata::GET_DIRENTS_EXTENDED,
        &GetDirentsExtendedReq {
            path: path.to_string(),
        },
    )
    .await?;
    check(rsp.err)?;
    dirents::decode_dirents_extended(&rsp.data, rsp.dirents_size)
}

/// The file system configuration a daemon was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsConfig {
    pub chunk_size: u64,
    pub dirents_buf_size: u64,
    pub implicit_data_removal: bool,
    pub backend: String,
}

/// Fetch the cluster configuration from the first daemon. Called once at
/// startup; a chunk-size disagreement there is unrecoverable.
pub async fn forward_get_fs_config(ctx: &ClientContext) -> Result<FsConfig> {
    let rsp: GetFsConfigRsp =
        call_metadata(ctx, 0, ids::metadata::GET_FS_CONFIG, &GetFsConfigReq {}).await?;
    check(rsp.err)?;
    Ok(FsConfig {
        chunk_size: rsp.chunk_size,
        dirents_buf_size: rsp.dirents_buf_size,
        implicit_data_removal: rsp.implicit_data_removal,
        backend: rsp.backend,
    })
}

/// Create a symlink at `path` pointing to `target_path`.
pub async fn forward_mk_symlink(
    ctx: &ClientContext,
    path: &str,
    target_path: &str,
) -> Result<()> {
    let target = ctx.distributor().locate_metadata(path, 0);
    let rsp: MkSymlinkRsp = call_metadata(
        ctx,
        target,
        ids::metadata::MK_SYMLINK,
        &MkSymlinkReq {
            path: path.to_string(),
            target_path: target_path.to_string(),
        },
    )
    .await?;
    check(rsp.err)
}
