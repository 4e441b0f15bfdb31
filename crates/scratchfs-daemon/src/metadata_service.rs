//! Metadata RPC handlers.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use scratchfs_kv::MetadataBackend;
use scratchfs_net::ServiceHandler;
use scratchfs_net::service::dispatch_error;
use scratchfs_proto::metadata::*;
use scratchfs_proto::{decode_message, dirents, encode_message, ids};
use scratchfs_types::Result;
use scratchfs_types::config::IMPLICIT_DATA_REMOVAL;
use scratchfs_types::metadata::{S_IFMT, S_IFREG};

use crate::context::DaemonContext;
use crate::metadentry;
use crate::stats::IopsOp;

/// How many leading entries of a listing fit into the caller's receive
/// buffer. Entries past the budget are dropped with a warning.
fn fit_to_budget(path: &str, count: usize, cost: impl Fn(usize) -> usize) -> usize {
    use scratchfs_types::config::DIRENTS_BUF_SIZE;

    let mut used = 0usize;
    for i in 0..count {
        used += cost(i);
        if used > DIRENTS_BUF_SIZE {
            warn!(path, kept = i, total = count, "directory listing truncated to buffer budget");
            return i;
        }
    }
    count
}

/// Dispatches the metadata service methods into [`metadentry`].
pub struct MetadataService {
    ctx: Arc<DaemonContext>,
}

impl MetadataService {
    pub fn new(ctx: Arc<DaemonContext>) -> Self {
        Self { ctx }
    }

    fn create(&self, req: CreateReq) -> CreateRsp {
        debug!(path = %req.path, mode = req.mode, "create");
        self.ctx.stats().add_iops(IopsOp::Create);
        let err = metadentry::create(&self.ctx, &req.path, req.mode)
            .err()
            .map_or(0, |e| e.code());
        CreateRsp { err }
    }

    fn stat(&self, req: StatReq) -> StatRsp {
        debug!(path = %req.path, "stat");
        self.ctx.stats().add_iops(IopsOp::Stat);
        match metadentry::get_serialized(&self.ctx, &req.path) {
            Ok(db_val) => StatRsp { err: 0, db_val },
            Err(e) => StatRsp {
                err: e.code(),
                db_val: String::new(),
            },
        }
    }

    fn remove_metadata(&self, req: RemoveMetadataReq) -> RemoveMetadataRsp {
        debug!(path = %req.path, "remove_metadata");
        self.ctx.stats().add_iops(IopsOp::Remove);
        match metadentry::remove(&self.ctx, &req.path) {
            Ok((size, mode)) => {
                // When this daemon may also hold chunks of the path, drop
                // them in the same request and spare the caller one RPC.
                if IMPLICIT_DATA_REMOVAL && mode & S_IFMT == S_IFREG && size > 0 {
                    if let Err(e) = self.ctx.storage().destroy_chunk_space(&req.path) {
                        return RemoveMetadataRsp {
                            err: e.code(),
                            size,
                            mode,
                        };
                    }
                }
                RemoveMetadataRsp { err: 0, size, mode }
            }
            Err(e) => RemoveMetadataRsp {
                err: e.code(),
                size: 0,
                mode: 0,
            },
        }
    }

    fn decr_size(&self, req: DecrSizeReq) -> DecrSizeRsp {
        debug!(path = %req.path, new_size = req.new_size, "decr_size");
        let err = metadentry::decrease_size(&self.ctx, &req.path, req.new_size)
            .err()
            .map_or(0, |e| e.code());
        DecrSizeRsp { err }
    }

    fn update_metadentry(&self, req: UpdateMetadentryReq) -> UpdateMetadentryRsp {
        debug!(path = %req.path, "update_metadentry");
        let err = metadentry::update(&self.ctx, &req)
            .err()
            .map_or(0, |e| e.code());
        UpdateMetadentryRsp { err }
    }

    fn update_metadentry_size(&self, req: UpdateMetadentrySizeReq) -> UpdateMetadentrySizeRsp {
        debug!(
            path = %req.path,
            size = req.size,
            offset = req.offset,
            append = req.append,
            "update_metadentry_size"
        );
        match metadentry::update_size(&self.ctx, &req.path, req.size, req.offset, req.append) {
            Ok(ret_offset) => UpdateMetadentrySizeRsp { err: 0, ret_offset },
            Err(e) => UpdateMetadentrySizeRsp {
                err: e.code(),
                ret_offset: 0,
            },
        }
    }

    fn get_metadentry_size(&self, req: GetMetadentrySizeReq) -> GetMetadentrySizeRsp {
        match metadentry::get_size(&self.ctx, &req.path) {
            Ok(ret_size) => GetMetadentrySizeRsp { err: 0, ret_size },
            Err(e) => GetMetadentrySizeRsp {
                err: e.code(),
                ret_size: 0,
            },
        }
    }

    fn get_dirents(&self, req: GetDirentsReq) -> GetDirentsRsp {
        debug!(path = %req.path, "get_dirents");
        self.ctx.stats().add_iops(IopsOp::Dirent);
        match self.ctx.db().get_dirents(&req.path) {
            Ok(mut entries) => {
                // Keep the reply inside the caller's listing buffer budget.
                let kept = fit_to_budget(&req.path, entries.len(), |i| {
                    1 + entries[i].name.len() + 1
                });
                entries.truncate(kept);
                let data = dirents::encode_dirents(
                    entries.iter().map(|e| (e.name.as_str(), e.is_dir)),
                );
                GetDirentsRsp {
                    err: 0,
                    dirents_size: entries.len() as u64,
                    data,
                }
            }
            Err(e) => GetDirentsRsp {
                err: e.code(),
                dirents_size: 0,
                data: Vec::new(),
            },
        }
    }

    fn get_dirents_extended(&self, req: GetDirentsExtendedReq) -> GetDirentsExtendedRsp {
        debug!(path = %req.path, "get_dirents_extended");
        match self.ctx.db().get_dirents_extended(&req.path) {
            Ok(mut entries) => {
                let kept = fit_to_budget(&req.path, entries.len(), |i| {
                    1 + 8 + 8 + entries[i].name.len() + 1
                });
                entries.truncate(kept);
                let data = dirents::encode_dirents_extended(
                    entries
                        .iter()
                        .map(|e| (e.name.as_str(), e.is_dir, e.size, e.ctime)),
                );
                GetDirentsExtendedRsp {
                    err: 0,
                    dirents_size: entries.len() as u64,
                    data,
                }
            }
            Err(e) => GetDirentsExtendedRsp {
                err: e.code(),
                dirents_size: 0,
                data: Vec::new(),
            },
        }
    }

    fn get_fs_config(&self, _req: GetFsConfigReq) -> GetFsConfigRsp {
        use scratchfs_types::config::DIRENTS_BUF_SIZE;

        GetFsConfigRsp {
            err: 0,
            chunk_size: self.ctx.storage().chunk_size(),
            dirents_buf_size: DIRENTS_BUF_SIZE as u64,
            implicit_data_removal: IMPLICIT_DATA_REMOVAL,
            backend: self.ctx.db().name().to_string(),
        }
    }

    fn mk_symlink(&self, req: MkSymlinkReq) -> MkSymlinkRsp {
        debug!(path = %req.path, target = %req.target_path, "mk_symlink");
        let err = metadentry::mk_symlink(&self.ctx, &req.path, &req.target_path)
            .err()
            .map_or(0, |e| e.code());
        MkSymlinkRsp { err }
    }
}

#[async_trait]
impl ServiceHandler for MetadataService {
    fn service_id(&self) -> u16 {
        ids::METADATA_SERVICE
    }

    fn service_name(&self) -> &str {
        "metadata"
    }

    async fn handle(&self, method_id: u16, request: Bytes) -> Result<Bytes> {
        match method_id {
            ids::metadata::CREATE => encode_message(&self.create(decode_message(&request)?)),
            ids::metadata::STAT => encode_message(&self.stat(decode_message(&request)?)),
            ids::metadata::REMOVE_METADATA => {
                encode_message(&self.remove_metadata(decode_message(&request)?))
            }
            ids::metadata::DECR_SIZE => encode_message(&self.decr_size(decode_message(&request)?)),
            ids::metadata::UPDATE_METADENTRY => {
                encode_message(&self.update_metadentry(decode_message(&request)?))
            }
            ids::metadata::UPDATE_METADENTRY_SIZE => {
                encode_message(&self.update_metadentry_size(decode_message(&request)?))
            }
            ids::metadata::GET_METADENTRY_SIZE => {
                encode_message(&self.get_metadentry_size(decode_message(&request)?))
            }
            ids::metadata::GET_DIRENTS => {
                encode_message(&self.get_dirents(decode_message(&request)?))
            }
            ids::metadata::GET_DIRENTS_EXTENDED => {
                encode_message(&self.get_dirents_extended(decode_message(&request)?))
            }
            ids::metadata::MK_SYMLINK => {
                encode_message(&self.mk_symlink(decode_message(&request)?))
            }
            ids::metadata::GET_FS_CONFIG => {
                encode_message(&self.get_fs_config(decode_message(&request)?))
            }
            other => Err(dispatch_error(format!(
                "metadata service has no method {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scratchfs_kv::MetaDb;
    use scratchfs_storage::ChunkStorage;
    use scratchfs_types::config::CHUNK_SIZE;
    use scratchfs_types::errno;
    use std::path::Path;
    use tempfile::TempDir;

    fn service() -> (TempDir, MetadataService) {
        let dir = TempDir::new().unwrap();
        let db = MetaDb::open(Path::new("/unused"), "mem").unwrap();
        let storage = ChunkStorage::new(dir.path().join("chunks"), CHUNK_SIZE).unwrap();
        let ctx = DaemonContext::from_parts(db, storage);
        (dir, MetadataService::new(ctx))
    }

    #[tokio::test]
    async fn test_create_stat_via_dispatch() {
        let (_dir, svc) = service();
        let req = encode_message(&CreateReq {
            path: "/a".into(),
            mode: S_IFREG | 0o644,
        })
        .unwrap();
        let rsp: CreateRsp =
            decode_message(&svc.handle(ids::metadata::CREATE, req).await.unwrap()).unwrap();
        assert_eq!(rsp.err, 0);

        let req = encode_message(&StatReq { path: "/a".into() }).unwrap();
        let rsp: StatRsp =
            decode_message(&svc.handle(ids::metadata::STAT, req).await.unwrap()).unwrap();
        assert_eq!(rsp.err, 0);
        let md = scratchfs_types::Metadata::parse(&rsp.db_val).unwrap();
        assert_eq!(md.mode(), S_IFREG | 0o644);
    }

    #[tokio::test]
    async fn test_stat_missing_carries_enoent() {
        let (_dir, svc) = service();
        let req = encode_message(&StatReq {
            path: "/ghost".into(),
        })
        .unwrap();
        let rsp: StatRsp =
            decode_message(&svc.handle(ids::metadata::STAT, req).await.unwrap()).unwrap();
        assert_eq!(rsp.err, errno::ENOENT);
    }

    #[tokio::test]
    async fn test_remove_metadata_removes_local_chunks() {
        let (_dir, svc) = service();
        svc.create(CreateReq {
            path: "/f".into(),
            mode: S_IFREG | 0o644,
        });
        svc.update_metadentry_size(UpdateMetadentrySizeReq {
            path: "/f".into(),
            size: 10,
            offset: 0,
            append: false,
        });
        svc.ctx
            .storage()
            .write_chunk("/f", 0, b"0123456789", 0)
            .unwrap();

        let rsp = svc.remove_metadata(RemoveMetadataReq { path: "/f".into() });
        assert_eq!(rsp.err, 0);
        assert_eq!(rsp.size, 10);
        assert!(
            svc.ctx
                .storage()
                .read_chunk("/f", 0, 0, 10)
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_dirents_via_dispatch() {
        let (_dir, svc) = service();
        for path in ["/d/x", "/d/y"] {
            svc.create(CreateReq {
                path: path.into(),
                mode: S_IFREG | 0o644,
            });
        }
        let req = encode_message(&GetDirentsReq { path: "/d".into() }).unwrap();
        let rsp: GetDirentsRsp =
            decode_message(&svc.handle(ids::metadata::GET_DIRENTS, req).await.unwrap()).unwrap();
        assert_eq!(rsp.err, 0);
        assert_eq!(rsp.dirents_size, 2);
        let entries = dirents::decode_dirents(&rsp.data, rsp.dirents_size).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_unknown_method_is_dispatch_error() {
        let (_dir, svc) = service();
        assert!(svc.handle(999, Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_append_offsets_are_sequential() {
        let (_dir, svc) = service();
        svc.create(CreateReq {
            path: "/log".into(),
            mode: S_IFREG | 0o644,
        });
        let rsp1 = svc.update_metadentry_size(UpdateMetadentrySizeReq {
            path: "/log".into(),
            size: 4096,
            offset: 0,
            append: true,
        });
        let rsp2 = svc.update_metadentry_size(UpdateMetadentrySizeReq {
            path: "/log".into(),
            size: 4096,
            offset: 0,
            append: true,
        });
        assert_eq!(rsp1.ret_offset, 0);
        assert_eq!(rsp2.ret_offset, 4096);
    }
}
