//! Payload encoding helpers shared by both ends of every RPC.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use scratchfs_types::errno;
use scratchfs_types::{Result, Status};

/// Encode a message payload.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Bytes> {
    bincode::serialize(msg)
        .map(Bytes::from)
        .map_err(|e| Status::with_message(errno::EIO, format!("encode failed: {e}")))
}

/// Decode a message payload.
pub fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Status::with_message(errno::EIO, format!("decode failed: {e}")))
}
