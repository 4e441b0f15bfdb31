//! Data RPC handlers.
//!
//! A write or read request names a chunk range and the bitset of chunks
//! this daemon owns within it. The owner of the first chunk subtracts the
//! request's in-chunk offset; the owner of the last chunk subtracts the
//! tail underrun (which falls out of clamping by the remaining byte count);
//! all middle chunks move in full. Payload bytes are packed in ascending
//! chunk order.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use scratchfs_net::ServiceHandler;
use scratchfs_net::service::dispatch_error;
use scratchfs_proto::data::*;
use scratchfs_proto::{bitset, decode_message, encode_message, ids};
use scratchfs_types::Result;
use scratchfs_types::errno;

use crate::context::DaemonContext;
use crate::stats::SizeOp;

/// Sanity checks applied before the chunk loop trusts a request: the chunk
/// range must be ordered, the bitset must cover it, and the first-chunk
/// offset must fall inside a chunk.
fn range_is_valid(bits: &[u8], chunk_start: u64, chunk_end: u64, offset: u64, chunk_size: u64) -> bool {
    chunk_start <= chunk_end
        && offset < chunk_size
        && bits.len() as u64 >= (chunk_end - chunk_start + 1 + 7) / 8
}

/// Dispatches the data service methods into the chunk storage.
pub struct DataService {
    ctx: Arc<DaemonContext>,
}

impl DataService {
    pub fn new(ctx: Arc<DaemonContext>) -> Self {
        Self { ctx }
    }

    fn write_data(&self, req: WriteDataReq) -> WriteDataRsp {
        debug!(
            path = %req.path,
            chunk_start = req.chunk_start,
            chunk_end = req.chunk_end,
            chunks = req.chunk_n,
            total = req.total_chunk_size,
            offset = req.offset,
            "write_data"
        );
        let chunk_size = self.ctx.storage().chunk_size();
        if req.data.len() as u64 != req.total_chunk_size
            || !range_is_valid(&req.wbitset, req.chunk_start, req.chunk_end, req.offset, chunk_size)
        {
            return WriteDataRsp {
                err: errno::EINVAL,
                io_size: 0,
            };
        }
        let mut consumed: u64 = 0;
        let mut io_size: u64 = 0;
        for chunk_id in req.chunk_start..=req.chunk_end {
            if !bitset::get_bit(&req.wbitset, chunk_id - req.chunk_start) {
                continue;
            }
            let off_in_chunk = if chunk_id == req.chunk_start {
                req.offset
            } else {
                0
            };
            let len = (chunk_size - off_in_chunk).min(req.total_chunk_size - consumed);
            let slice = &req.data[consumed as usize..(consumed + len) as usize];
            match self
                .ctx
                .storage()
                .write_chunk(&req.path, chunk_id, slice, off_in_chunk)
            {
                Ok(written) => io_size += written,
                Err(e) => {
                    return WriteDataRsp {
                        err: e.code(),
                        io_size: 0,
                    };
                }
            }
            consumed += len;
        }
        self.ctx.stats().add_size(SizeOp::WriteSize, io_size);
        WriteDataRsp { err: 0, io_size }
    }

    fn read_data(&self, req: ReadDataReq) -> ReadDataRsp {
        debug!(
            path = %req.path,
            chunk_start = req.chunk_start,
            chunk_end = req.chunk_end,
            chunks = req.chunk_n,
            total = req.total_chunk_size,
            offset = req.offset,
            "read_data"
        );
        let chunk_size = self.ctx.storage().chunk_size();
        if !range_is_valid(&req.rbitset, req.chunk_start, req.chunk_end, req.offset, chunk_size) {
            return ReadDataRsp {
                err: errno::EINVAL,
                io_size: 0,
                segments: Vec::new(),
            };
        }
        let mut assigned: u64 = 0;
        let mut io_size: u64 = 0;
        let mut segments = Vec::new();
        for chunk_id in req.chunk_start..=req.chunk_end {
            if !bitset::get_bit(&req.rbitset, chunk_id - req.chunk_start) {
                continue;
            }
            let off_in_chunk = if chunk_id == req.chunk_start {
                req.offset
            } else {
                0
            };
            let len = (chunk_size - off_in_chunk).min(req.total_chunk_size - assigned);
            match self
                .ctx
                .storage()
                .read_chunk(&req.path, chunk_id, off_in_chunk, len)
            {
                Ok(data) => {
                    io_size += data.len() as u64;
                    // Short reads at EOF are normal; empty chunks carry no
                    // segment.
                    if !data.is_empty() {
                        segments.push(ChunkSegment { chunk_id, data });
                    }
                }
                Err(e) => {
                    return ReadDataRsp {
                        err: e.code(),
                        io_size: 0,
                        segments: Vec::new(),
                    };
                }
            }
            assigned += len;
        }
        self.ctx.stats().add_size(SizeOp::ReadSize, io_size);
        ReadDataRsp {
            err: 0,
            io_size,
            segments,
        }
    }

    fn trunc_data(&self, req: TruncDataReq) -> TruncDataRsp {
        debug!(path = %req.path, new_size = req.new_size, "trunc_data");
        let chunk_size = self.ctx.storage().chunk_size();
        let result = if req.new_size == 0 {
            self.ctx.storage().trim_chunk_space(&req.path, 0)
        } else {
            let last_chunk = (req.new_size - 1) / chunk_size;
            let within = req.new_size - last_chunk * chunk_size;
            self.ctx
                .storage()
                .trim_chunk_space(&req.path, last_chunk + 1)
                .and_then(|()| {
                    if within < chunk_size {
                        // The boundary chunk survives shortened; an aligned
                        // new size leaves it untouched.
                        self.ctx
                            .storage()
                            .truncate_chunk_file(&req.path, last_chunk, within)
                    } else {
                        Ok(())
                    }
                })
        };
        TruncDataRsp {
            err: result.err().map_or(0, |e| e.code()),
        }
    }

    fn remove_data(&self, req: RemoveDataReq) -> RemoveDataRsp {
        debug!(path = %req.path, "remove_data");
        RemoveDataRsp {
            err: self
                .ctx
                .storage()
                .destroy_chunk_space(&req.path)
                .err()
                .map_or(0, |e| e.code()),
        }
    }

    fn chunk_stat(&self, _req: ChunkStatReq) -> ChunkStatRsp {
        match self.ctx.storage().chunk_stat() {
            Ok(stat) => ChunkStatRsp {
                err: 0,
                chunk_size: stat.chunk_size,
                chunk_total: stat.chunk_total,
                chunk_free: stat.chunk_free,
            },
            Err(e) => ChunkStatRsp {
                err: e.code(),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl ServiceHandler for DataService {
    fn service_id(&self) -> u16 {
        ids::DATA_SERVICE
    }

    fn service_name(&self) -> &str {
        "data"
    }

    async fn handle(&self, method_id: u16, request: Bytes) -> Result<Bytes> {
        match method_id {
            ids::data::WRITE_DATA => encode_message(&self.write_data(decode_message(&request)?)),
            ids::data::READ_DATA => encode_message(&self.read_data(decode_message(&request)?)),
            ids::data::TRUNC_DATA => encode_message(&self.trunc_data(decode_message(&request)?)),
            ids::data::REMOVE_DATA => encode_message(&self.remove_data(decode_message(&request)?)),
            ids::data::CHUNK_STAT => encode_message(&self.chunk_stat(decode_message(&request)?)),
            other => Err(dispatch_error(format!("data service has no method {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scratchfs_kv::MetaDb;
    use scratchfs_storage::ChunkStorage;
    use scratchfs_types::config::CHUNK_SIZE;
    use std::path::Path;
    use tempfile::TempDir;

    fn service() -> (TempDir, DataService) {
        let dir = TempDir::new().unwrap();
        let db = MetaDb::open(Path::new("/unused"), "mem").unwrap();
        let storage = ChunkStorage::new(dir.path().join("chunks"), CHUNK_SIZE).unwrap();
        (dir, DataService::new(DaemonContext::from_parts(db, storage)))
    }

    fn one_chunk_write(path: &str, offset: u64, data: &[u8]) -> WriteDataReq {
        let chunk_start = offset / CHUNK_SIZE;
        let chunk_end = (offset + data.len() as u64 - 1) / CHUNK_SIZE;
        let n = chunk_end - chunk_start + 1;
        let mut wbitset = bitset::bitset_for(n);
        for i in 0..n {
            bitset::set_bit(&mut wbitset, i);
        }
        WriteDataReq {
            path: path.into(),
            offset: offset % CHUNK_SIZE,
            wbitset,
            chunk_n: n,
            chunk_start,
            chunk_end,
            total_chunk_size: data.len() as u64,
            data: data.to_vec(),
        }
    }

    fn matching_read(path: &str, offset: u64, len: u64) -> ReadDataReq {
        let chunk_start = offset / CHUNK_SIZE;
        let chunk_end = (offset + len - 1) / CHUNK_SIZE;
        let n = chunk_end - chunk_start + 1;
        let mut rbitset = bitset::bitset_for(n);
        for i in 0..n {
            bitset::set_bit(&mut rbitset, i);
        }
        ReadDataReq {
            path: path.into(),
            offset: offset % CHUNK_SIZE,
            rbitset,
            chunk_n: n,
            chunk_start,
            chunk_end,
            total_chunk_size: len,
        }
    }

    #[tokio::test]
    async fn test_write_read_single_chunk() {
        let (_dir, svc) = service();
        let rsp = svc.write_data(one_chunk_write("/f", 0, b"HELLO"));
        assert_eq!(rsp.err, 0);
        assert_eq!(rsp.io_size, 5);

        let rsp = svc.read_data(matching_read("/f", 0, 5));
        assert_eq!(rsp.err, 0);
        assert_eq!(rsp.io_size, 5);
        assert_eq!(rsp.segments[0].data, b"HELLO");

        assert_eq!(svc.ctx.stats().count(crate::stats::IopsOp::Write), 1);
        assert_eq!(svc.ctx.stats().count(crate::stats::IopsOp::Read), 1);
        assert_eq!(svc.ctx.stats().bytes(SizeOp::WriteSize), 5);
    }

    #[tokio::test]
    async fn test_write_straddles_chunks() {
        let (_dir, svc) = service();
        // Write 8 bytes starting 4 bytes before a chunk boundary.
        let offset = CHUNK_SIZE - 4;
        let payload = b"abcdefgh";
        let rsp = svc.write_data(one_chunk_write("/f", offset, payload));
        assert_eq!(rsp.err, 0);
        assert_eq!(rsp.io_size, 8);

        // First chunk got its tail, second its head.
        assert_eq!(
            svc.ctx
                .storage()
                .read_chunk("/f", 0, CHUNK_SIZE - 4, 4)
                .unwrap(),
            b"abcd"
        );
        assert_eq!(svc.ctx.storage().read_chunk("/f", 1, 0, 4).unwrap(), b"efgh");

        let rsp = svc.read_data(matching_read("/f", offset, 8));
        assert_eq!(rsp.io_size, 8);
        let mut out = Vec::new();
        for seg in &rsp.segments {
            out.extend_from_slice(&seg.data);
        }
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn test_partial_bitset_writes_only_owned_chunks() {
        let (_dir, svc) = service();
        // Range covers chunks 0..=2 but this daemon owns only 0 and 2.
        let mut wbitset = bitset::bitset_for(3);
        bitset::set_bit(&mut wbitset, 0);
        bitset::set_bit(&mut wbitset, 2);
        let data = vec![0xAA; 2 * CHUNK_SIZE as usize];
        let rsp = svc.write_data(WriteDataReq {
            path: "/f".into(),
            offset: 0,
            wbitset,
            chunk_n: 2,
            chunk_start: 0,
            chunk_end: 2,
            total_chunk_size: data.len() as u64,
            data,
        });
        assert_eq!(rsp.err, 0);
        assert_eq!(rsp.io_size, 2 * CHUNK_SIZE);
        assert!(!svc.ctx.storage().read_chunk("/f", 0, 0, 1).unwrap().is_empty());
        assert!(svc.ctx.storage().read_chunk("/f", 1, 0, 1).unwrap().is_empty());
        assert!(!svc.ctx.storage().read_chunk("/f", 2, 0, 1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_beyond_data_returns_zero_bytes() {
        let (_dir, svc) = service();
        svc.write_data(one_chunk_write("/f", 0, b"tiny"));
        // Chunk 7 was never written.
        let rsp = svc.read_data(matching_read("/f", 7 * CHUNK_SIZE, 64));
        assert_eq!(rsp.err, 0);
        assert_eq!(rsp.io_size, 0);
        assert!(rsp.segments.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_payload_is_einval() {
        let (_dir, svc) = service();
        let mut req = one_chunk_write("/f", 0, b"1234");
        req.total_chunk_size = 99;
        let rsp = svc.write_data(req);
        assert_eq!(rsp.err, errno::EINVAL);
    }

    #[tokio::test]
    async fn test_trunc_to_chunk_boundary_drops_higher_chunks() {
        let (_dir, svc) = service();
        let data = vec![0x11; (3 * CHUNK_SIZE) as usize];
        svc.write_data(one_chunk_write("/f", 0, &data));

        svc.trunc_data(TruncDataReq {
            path: "/f".into(),
            new_size: CHUNK_SIZE,
        });
        assert_eq!(
            svc.ctx
                .storage()
                .read_chunk("/f", 0, 0, CHUNK_SIZE)
                .unwrap()
                .len(),
            CHUNK_SIZE as usize
        );
        assert!(svc.ctx.storage().read_chunk("/f", 1, 0, 1).unwrap().is_empty());
        assert!(svc.ctx.storage().read_chunk("/f", 2, 0, 1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trunc_mid_chunk_shortens_in_place() {
        let (_dir, svc) = service();
        let data = vec![0x22; (3 * CHUNK_SIZE) as usize];
        svc.write_data(one_chunk_write("/f", 0, &data));

        let new_size = CHUNK_SIZE / 2;
        svc.trunc_data(TruncDataReq {
            path: "/f".into(),
            new_size,
        });
        let chunk0 = svc.ctx.storage().read_chunk("/f", 0, 0, CHUNK_SIZE).unwrap();
        assert_eq!(chunk0.len() as u64, new_size);
        assert!(svc.ctx.storage().read_chunk("/f", 1, 0, 1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_data_and_chunk_stat() {
        let (_dir, svc) = service();
        svc.write_data(one_chunk_write("/f", 0, b"gone soon"));
        let rsp = svc.remove_data(RemoveDataReq { path: "/f".into() });
        assert_eq!(rsp.err, 0);
        assert!(svc.ctx.storage().read_chunk("/f", 0, 0, 9).unwrap().is_empty());

        let stat = svc.chunk_stat(ChunkStatReq {});
        assert_eq!(stat.err, 0);
        assert_eq!(stat.chunk_size, CHUNK_SIZE);
        assert!(stat.chunk_total > 0);
    }
}
