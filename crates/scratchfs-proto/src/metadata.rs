//! Metadata service RPC types.

use serde::{Deserialize, Serialize};

/// Create a metadata entry for `path`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateReq {
    pub path: String,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateRsp {
    pub err: i32,
}

/// Fetch the serialized metadata record of `path`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatReq {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatRsp {
    pub err: i32,
    /// The record as stored, serialized with the `|`-token format.
    pub db_val: String,
}

/// Remove the metadata entry. The reply carries size and mode so the caller
/// can decide whether (and where) data chunks need removing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoveMetadataReq {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoveMetadataRsp {
    pub err: i32,
    pub size: u64,
    pub mode: u32,
}

/// Submit a decrease-size operand for `path`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecrSizeReq {
    pub path: String,
    pub new_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecrSizeRsp {
    pub err: i32,
}

/// Which fields of an `UpdateMetadentryReq` are to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateFlags {
    pub link_count: bool,
    pub size: bool,
    pub blocks: bool,
    pub atime: bool,
    pub mtime: bool,
    pub ctime: bool,
    pub rename_path: bool,
}

/// Selectively overwrite record fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateMetadentryReq {
    pub path: String,
    pub link_count: u64,
    pub size: u64,
    pub blocks: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub rename_path: String,
    pub flags: UpdateFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateMetadentryRsp {
    pub err: i32,
}

/// Submit an increase-size operand for `path` during a write.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateMetadentrySizeReq {
    pub path: String,
    pub size: u64,
    pub offset: u64,
    pub append: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateMetadentrySizeRsp {
    pub err: i32,
    /// The starting offset the merge engine assigned to this write.
    pub ret_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetMetadentrySizeReq {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetMetadentrySizeRsp {
    pub err: i32,
    pub ret_size: u64,
}

/// List the direct children this daemon's shard holds for `path`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetDirentsReq {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetDirentsRsp {
    pub err: i32,
    pub dirents_size: u64,
    /// Entries packed with the layout in [`crate::dirents`].
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetDirentsExtendedReq {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetDirentsExtendedRsp {
    pub err: i32,
    pub dirents_size: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MkSymlinkReq {
    pub path: String,
    pub target_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MkSymlinkRsp {
    pub err: i32,
}

/// Ask a daemon for the file system configuration the cluster was built
/// with. Sent once at client startup to verify both sides agree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetFsConfigReq {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetFsConfigRsp {
    pub err: i32,
    pub chunk_size: u64,
    pub dirents_buf_size: u64,
    pub implicit_data_removal: bool,
    /// Metadata engine identifier, for diagnostics.
    pub backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode_message, encode_message};

    fn roundtrip<T>(val: &T) -> T
    where
        T: serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug + PartialEq,
    {
        decode_message(&encode_message(val).unwrap()).unwrap()
    }

    #[test]
    fn test_create_roundtrip() {
        let req = CreateReq {
            path: "/a/b".into(),
            mode: 0o100644,
        };
        assert_eq!(roundtrip(&req), req);
        let rsp = CreateRsp { err: 17 };
        assert_eq!(roundtrip(&rsp), rsp);
    }

    #[test]
    fn test_stat_roundtrip() {
        let rsp = StatRsp {
            err: 0,
            db_val: "33188|5|0|0|0|0|0||".into(),
        };
        assert_eq!(roundtrip(&rsp), rsp);
    }

    #[test]
    fn test_update_size_roundtrip() {
        let req = UpdateMetadentrySizeReq {
            path: "/log".into(),
            size: 4096,
            offset: 0,
            append: true,
        };
        assert_eq!(roundtrip(&req), req);
        let rsp = UpdateMetadentrySizeRsp {
            err: 0,
            ret_offset: 8192,
        };
        assert_eq!(roundtrip(&rsp), rsp);
    }

    #[test]
    fn test_update_metadentry_flags() {
        let req = UpdateMetadentryReq {
            path: "/p".into(),
            blocks: -1,
            flags: UpdateFlags {
                blocks: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let back = roundtrip(&req);
        assert_eq!(back.blocks, -1);
        assert!(back.flags.blocks);
        assert!(!back.flags.size);
    }
}
