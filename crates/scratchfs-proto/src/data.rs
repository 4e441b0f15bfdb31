//! Data service RPC types.
//!
//! Both `write_data` and `read_data` name a chunk range and a bitset of the
//! chunks the recipient owns within it. The recipient subtracts the
//! first-chunk offset and the last-chunk underrun from its per-chunk
//! lengths; all middle chunks move in full. Write payloads pack the
//! destination's byte ranges in ascending chunk order; read replies carry
//! per-chunk segments so a short read at EOF scatters correctly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteDataReq {
    pub path: String,
    /// Byte offset into the first chunk of the range (zero unless this
    /// destination owns `chunk_start`).
    pub offset: u64,
    /// One bit per chunk in `[chunk_start, chunk_end]`.
    pub wbitset: Vec<u8>,
    /// Number of chunks assigned to this destination.
    pub chunk_n: u64,
    pub chunk_start: u64,
    pub chunk_end: u64,
    /// Total payload bytes for this destination.
    pub total_chunk_size: u64,
    /// This destination's byte ranges, packed in ascending chunk order.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteDataRsp {
    pub err: i32,
    pub io_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadDataReq {
    pub path: String,
    pub offset: u64,
    pub rbitset: Vec<u8>,
    pub chunk_n: u64,
    pub chunk_start: u64,
    pub chunk_end: u64,
    pub total_chunk_size: u64,
}

/// Bytes of one chunk, as much of the requested range as existed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkSegment {
    pub chunk_id: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadDataRsp {
    pub err: i32,
    pub io_size: u64,
    pub segments: Vec<ChunkSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TruncDataReq {
    pub path: String,
    pub new_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TruncDataRsp {
    pub err: i32,
}

/// Remove all chunks of `path` held by the recipient. Safe without
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoveDataReq {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoveDataRsp {
    pub err: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkStatReq {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkStatRsp {
    pub err: i32,
    pub chunk_size: u64,
    pub chunk_total: u64,
    pub chunk_free: u64,
}
