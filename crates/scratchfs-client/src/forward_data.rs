//! Data RPC forwarders: the write/read fan-out, truncation and chunk-space
//! accounting.
//!
//! A write or read is split into chunks, every chunk (and every replica of
//! it) is assigned to a daemon, and one RPC per distinct daemon carries the
//! bitset of its chunks plus the matching slice of the user buffer. All
//! replies are awaited before reduction; an early failure never
//! short-circuits the fan-out. Byte counts are reported as zero whenever
//! the reduced status is an error: partial-success counts are deliberately
//! not returned.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use tracing::{debug, error};

use scratchfs_proto::data::*;
use scratchfs_proto::{bitset, decode_message, encode_message, ids};
use scratchfs_types::arithmetic::{chunk_id_for_offset, chunk_lpad, chunk_rpad, is_chunk_aligned};
use scratchfs_types::config::CHUNK_SIZE;
use scratchfs_types::errno;
use scratchfs_types::{Result, Status, make_error_msg};

use crate::context::ClientContext;
use crate::forward_metadata;

/// How often a read is retried with fresh placement before giving up.
const READ_RETRIES: u32 = 3;

/// Aggregate chunk-space numbers across every daemon in the federated
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkStat {
    pub chunk_size: u64,
    pub chunk_total: u64,
    pub chunk_free: u64,
}

async fn call_data<Req, Rsp>(
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
            ids::DATA_SERVICE,
            method,
            encode_message(req)?,
        )
        .await?;
    decode_message(&reply)
}

/// Per-destination assignment for one fan-out.
struct Assignment {
    /// Ascending chunk ids this destination owns.
    chunks: Vec<u64>,
    /// One bit per chunk of the whole request range.
    bits: Vec<u8>,
    owns_start: bool,
    owns_end: bool,
}

/// Assign every chunk of `[chunk_start, chunk_end]` (and each replica copy)
/// to its daemon.
fn assign_chunks(
    ctx: &ClientContext,
    path: &str,
    chunk_start: u64,
    chunk_end: u64,
    copies: u32,
) -> (Vec<usize>, HashMap<usize, Assignment>) {
    let chunk_total = chunk_end - chunk_start + 1;
    let mut order: Vec<usize> = Vec::new();
    let mut assignments: HashMap<usize, Assignment> = HashMap::new();

    for chunk_id in chunk_start..=chunk_end {
        for copy in 0..=copies {
            let target = ctx.distributor().locate_chunk(path, chunk_id, copy);
            let entry = assignments.entry(target).or_insert_with(|| {
                order.push(target);
                Assignment {
                    chunks: Vec::new(),
                    bits: bitset::bitset_for(chunk_total),
                    owns_start: false,
                    owns_end: false,
                }
            });
            bitset::set_bit(&mut entry.bits, chunk_id - chunk_start);
            // Replica wrap-around can land two copies of one chunk on the
            // same daemon; it still transfers the chunk once.
            if entry.chunks.last() != Some(&chunk_id) {
                entry.chunks.push(chunk_id);
            }
            if chunk_id == chunk_start {
                entry.owns_start = true;
            }
            if chunk_id == chunk_end {
                entry.owns_end = true;
            }
        }
    }
    (order, assignments)
}

/// Bytes this destination moves, after the first-chunk offset and the
/// last-chunk underrun adjustments.
fn destination_size(a: &Assignment, offset: u64, end: u64) -> u64 {
    let mut total = a.chunks.len() as u64 * CHUNK_SIZE;
    if a.owns_start {
        total -= chunk_lpad(offset, CHUNK_SIZE);
    }
    if a.owns_end && !is_chunk_aligned(end, CHUNK_SIZE) {
        total -= chunk_rpad(end, CHUNK_SIZE);
    }
    total
}

/// Position of `chunk_id`'s bytes inside the caller's contiguous buffer.
fn buffer_position(chunk_id: u64, chunk_start: u64, lpad: u64) -> usize {
    if chunk_id == chunk_start {
        0
    } else {
        ((chunk_id - chunk_start) * CHUNK_SIZE - lpad) as usize
    }
}

/// Write `buf` at `offset`, fanning out to every daemon that owns a chunk
/// (or replica) of the range. Returns the written byte count.
///
/// With replication enabled the reduction checks coverage instead of
/// per-leg status: the OR of all acknowledged bitsets must cover the full
/// chunk range, and the nominal `buf.len()` is reported on success.
pub async fn forward_write(
    ctx: &ClientContext,
    path: &str,
    buf: &[u8],
    offset: u64,
) -> Result<u64> {
    if buf.is_empty() {
        return Ok(0);
    }
    let copies = ctx.replica_count();
    let write_size = buf.len() as u64;
    let chunk_start = chunk_id_for_offset(offset, CHUNK_SIZE);
    let chunk_end = chunk_id_for_offset(offset + write_size - 1, CHUNK_SIZE);
    let chunk_total = chunk_end - chunk_start + 1;
    let lpad = chunk_lpad(offset, CHUNK_SIZE);

    let (order, assignments) = assign_chunks(ctx, path, chunk_start, chunk_end, copies);

    let calls = order.iter().map(|&target| {
        let a = &assignments[&target];
        let total_chunk_size = destination_size(a, offset, offset + write_size);
        let mut data = Vec::with_capacity(total_chunk_size as usize);
        for &chunk_id in &a.chunks {
            let start = buffer_position(chunk_id, chunk_start, lpad);
            let cap = if chunk_id == chunk_start {
                (CHUNK_SIZE - lpad) as usize
            } else {
                CHUNK_SIZE as usize
            };
            let end = (start + cap).min(buf.len());
            data.extend_from_slice(&buf[start..end]);
        }
        debug_assert_eq!(data.len() as u64, total_chunk_size);

        let req = WriteDataReq {
            path: path.to_string(),
            offset: if a.owns_start { lpad } else { 0 },
            wbitset: a.bits.clone(),
            chunk_n: a.chunks.len() as u64,
            chunk_start,
            chunk_end,
            total_chunk_size,
            data,
        };
        debug!(
            host = target,
            path,
            chunk_start,
            chunk_end,
            chunks = req.chunk_n,
            size = total_chunk_size,
            offset = req.offset,
            "posting write"
        );
        async move {
            let rsp: Result<WriteDataRsp> =
                call_data(ctx, target, ids::data::WRITE_DATA, &req).await;
            (target, rsp)
        }
    });

    let results = join_all(calls).await;

    // Reduce. Every reply was awaited; the first non-zero status in
    // destination order wins.
    let mut err: Option<Status> = None;
    let mut out_size: u64 = 0;
    let mut coverage = bitset::bitset_for(chunk_total);
    for (target, outcome) in results {
        match outcome {
            Ok(rsp) if rsp.err == 0 => {
                out_size += rsp.io_size;
                bitset::or_into(&mut coverage, &assignments[&target].bits);
            }
            Ok(rsp) => {
                error!(host = target, path, err = rsp.err, "daemon reported write error");
                if err.is_none() {
                    err = Some(Status::new(rsp.err));
                }
            }
            Err(e) => {
                error!(host = target, path, error = %e, "write rpc failed");
                if err.is_none() {
                    err = Some(e);
                }
            }
        }
    }

    if copies > 0 {
        // Replicated writes succeed iff at least one copy of every chunk
        // was acknowledged, regardless of individual leg failures.
        return if bitset::covers(&coverage, chunk_total) {
            Ok(write_size)
        } else {
            Err(err.unwrap_or_else(|| Status::new(errno::EIO)))
        };
    }
    match err {
        Some(e) => Err(e),
        None => Ok(out_size),
    }
}

/// Read into `buf` from `offset`. `failed` accumulates daemons observed to
/// fail; with replication enabled their chunks are routed to a random
/// other replica on the next attempt.
pub async fn forward_read(
    ctx: &ClientContext,
    path: &str,
    buf: &mut [u8],
    offset: u64,
    failed: &mut HashSet<usize>,
) -> Result<u64> {
    if buf.is_empty() {
        return Ok(0);
    }
    let copies = ctx.replica_count();
    let read_size = buf.len() as u64;
    let chunk_start = chunk_id_for_offset(offset, CHUNK_SIZE);
    let chunk_end = chunk_id_for_offset(offset + read_size - 1, CHUNK_SIZE);
    let chunk_total = chunk_end - chunk_start + 1;
    let lpad = chunk_lpad(offset, CHUNK_SIZE);

    // Place every chunk, avoiding daemons already seen to fail.
    let mut order: Vec<usize> = Vec::new();
    let mut assignments: HashMap<usize, Assignment> = HashMap::new();
    for chunk_id in chunk_start..=chunk_end {
        let mut target = ctx.distributor().locate_chunk(path, chunk_id, 0);
        if copies > 0 && failed.contains(&target) {
            let candidates: HashSet<usize> = (0..=copies)
                .map(|r| ctx.distributor().locate_chunk(path, chunk_id, r))
                .collect();
            if candidates.iter().all(|c| failed.contains(c)) {
                return make_error_msg(
                    errno::EIO,
                    format!("all replicas of chunk {chunk_id} of {path:?} have failed"),
                );
            }
            while failed.contains(&target) {
                target = ctx
                    .distributor()
                    .locate_chunk(path, chunk_id, ctx.random_replica());
            }
        }
        let entry = assignments.entry(target).or_insert_with(|| {
            order.push(target);
            Assignment {
                chunks: Vec::new(),
                bits: bitset::bitset_for(chunk_total),
                owns_start: false,
                owns_end: false,
            }
        });
        bitset::set_bit(&mut entry.bits, chunk_id - chunk_start);
        entry.chunks.push(chunk_id);
        if chunk_id == chunk_start {
            entry.owns_start = true;
        }
        if chunk_id == chunk_end {
            entry.owns_end = true;
        }
    }

    let calls = order.iter().map(|&target| {
        let a = &assignments[&target];
        let total_chunk_size = destination_size(a, offset, offset + read_size);
        let req = ReadDataReq {
            path: path.to_string(),
            offset: if a.owns_start { lpad } else { 0 },
            rbitset: a.bits.clone(),
            chunk_n: a.chunks.len() as u64,
            chunk_start,
            chunk_end,
            total_chunk_size,
        };
        debug!(
            host = target,
            path,
            chunk_start,
            chunk_end,
            chunks = req.chunk_n,
            size = total_chunk_size,
            offset = req.offset,
            "posting read"
        );
        async move {
            let rsp: Result<ReadDataRsp> = call_data(ctx, target, ids::data::READ_DATA, &req).await;
            (target, rsp)
        }
    });

    let results = join_all(calls).await;

    let mut err: Option<Status> = None;
    let mut out_size: u64 = 0;
    for (target, outcome) in results {
        match outcome {
            Ok(rsp) if rsp.err == 0 => {
                for segment in rsp.segments {
                    let pos = buffer_position(segment.chunk_id, chunk_start, lpad);
                    buf[pos..pos + segment.data.len()].copy_from_slice(&segment.data);
                }
                out_size += rsp.io_size;
            }
            Ok(rsp) => {
                error!(host = target, path, err = rsp.err, "daemon reported read error");
                if err.is_none() {
                    err = Some(Status::new(rsp.err));
                }
            }
            Err(e) => {
                error!(host = target, path, error = %e, "read rpc failed");
                // Remember the daemon so the caller retries around it.
                failed.insert(target);
                if err.is_none() {
                    err = Some(Status::with_message(errno::EIO, e.describe()));
                }
            }
        }
    }

    match err {
        Some(e) => Err(e),
        None => Ok(out_size),
    }
}

/// Drop every chunk at or beyond `new_size`, contacting only the daemons
/// that can own one across all replicas.
pub async fn forward_truncate(
    ctx: &ClientContext,
    path: &str,
    current_size: u64,
    new_size: u64,
) -> Result<()> {
    debug_assert!(current_size > new_size);
    let chunk_start = chunk_id_for_offset(new_size, CHUNK_SIZE);
    let chunk_end = chunk_id_for_offset(current_size - 1, CHUNK_SIZE);

    let mut targets: HashSet<usize> = HashSet::new();
    for chunk_id in chunk_start..=chunk_end {
        for replica in 0..=ctx.replica_count() {
            targets.insert(ctx.distributor().locate_chunk(path, chunk_id, replica));
        }
    }

    let calls = targets.into_iter().map(|target| {
        let req = TruncDataReq {
            path: path.to_string(),
            new_size,
        };
        async move {
            let rsp: Result<TruncDataRsp> =
                call_data(ctx, target, ids::data::TRUNC_DATA, &req).await;
            (target, rsp)
        }
    });

    reduce_errs(path, join_all(calls).await.into_iter().map(|(t, r)| {
        (t, r.map(|rsp| rsp.err))
    }))
}

/// Fan `remove_data` out to `targets`.
pub async fn forward_remove_data(
    ctx: &ClientContext,
    path: &str,
    targets: Vec<usize>,
) -> Result<()> {
    let calls = targets.into_iter().map(|target| {
        let req = RemoveDataReq {
            path: path.to_string(),
        };
        async move {
            let rsp: Result<RemoveDataRsp> =
                call_data(ctx, target, ids::data::REMOVE_DATA, &req).await;
            (target, rsp)
        }
    });

    reduce_errs(path, join_all(calls).await.into_iter().map(|(t, r)| {
        (t, r.map(|rsp| rsp.err))
    }))
}

/// Await-all error reduction: the first non-zero status in destination
/// order wins.
fn reduce_errs(path: &str, outcomes: impl Iterator<Item = (usize, Result<i32>)>) -> Result<()> {
    let mut err: Option<Status> = None;
    for (target, outcome) in outcomes {
        match outcome {
            Ok(0) => {}
            Ok(code) => {
                error!(host = target, path, err = code, "daemon reported error");
                if err.is_none() {
                    err = Some(Status::new(code));
                }
            }
            Err(e) => {
                error!(host = target, path, error = %e, "rpc failed");
                if err.is_none() {
                    err = Some(e);
                }
            }
        }
    }
    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Sum the chunk-space statistics of every daemon in the federated table.
pub async fn forward_get_chunk_stat(ctx: &ClientContext) -> Result<ChunkStat> {
    let calls = (0..ctx.hosts().len()).map(|target| {
        let req = ChunkStatReq {};
        async move {
            let rsp: Result<ChunkStatRsp> =
                call_data(ctx, target, ids::data::CHUNK_STAT, &req).await;
            (target, rsp)
        }
    });

    let mut err: Option<Status> = None;
    let mut stat = ChunkStat {
        chunk_size: CHUNK_SIZE,
        chunk_total: 0,
        chunk_free: 0,
    };
    for (target, outcome) in join_all(calls).await {
        match outcome {
            Ok(rsp) if rsp.err == 0 => {
                debug_assert_eq!(rsp.chunk_size, CHUNK_SIZE);
                stat.chunk_total += rsp.chunk_total;
                stat.chunk_free += rsp.chunk_free;
            }
            Ok(rsp) => {
                error!(host = target, err = rsp.err, "chunk stat leg failed");
                if err.is_none() {
                    err = Some(Status::new(rsp.err));
                }
            }
            Err(e) => {
                // A single unreachable daemon does not void the aggregate.
                error!(host = target, error = %e, "chunk stat leg unreachable");
            }
        }
    }
    match err {
        Some(e) => Err(e),
        None => Ok(stat),
    }
}

/// Write with size propagation: submit the size operand first (receiving
/// the reserved offset in append mode), then fan the bytes out.
pub async fn write_file(
    ctx: &ClientContext,
    path: &str,
    buf: &[u8],
    offset: u64,
    append: bool,
) -> Result<u64> {
    if buf.is_empty() {
        return Ok(0);
    }
    let write_offset =
        forward_metadata::forward_update_metadentry_size(ctx, path, buf.len() as u64, offset, append)
            .await?;
    forward_write(ctx, path, buf, write_offset).await
}

/// Read with bounded retry: on a fan-out failure the failed daemons are
/// excluded and the read is repeated with fresh placement, up to
/// [`READ_RETRIES`] times when replicas exist.
pub async fn read_file(ctx: &ClientContext, path: &str, buf: &mut [u8], offset: u64) -> Result<u64> {
    let mut failed: HashSet<usize> = HashSet::new();
    let mut attempt = 0;
    loop {
        match forward_read(ctx, path, buf, offset, &mut failed).await {
            Ok(n) => return Ok(n),
            Err(e)
                if e.code() == errno::EIO
                    && ctx.replica_count() > 0
                    && attempt < READ_RETRIES =>
            {
                attempt += 1;
                debug!(path, attempt, "retrying read around failed daemons");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Truncate with size propagation: shrink the metadata record, then drop
/// the affected chunks.
pub async fn truncate_file(ctx: &ClientContext, path: &str, new_size: u64) -> Result<()> {
    let current_size = forward_metadata::forward_get_metadentry_size(ctx, path).await?;
    if new_size > current_size {
        return make_error_msg(
            errno::EINVAL,
            format!("cannot truncate {path:?} upward ({current_size} -> {new_size})"),
        );
    }
    if new_size == current_size {
        return Ok(());
    }
    forward_metadata::forward_decr_size(ctx, path, new_size).await?;
    forward_truncate(ctx, path, current_size, new_size).await
}
