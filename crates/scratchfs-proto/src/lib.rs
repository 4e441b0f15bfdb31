//! RPC wire types.
//!
//! One request/response struct pair per operation, serde-serialized with
//! bincode. Every response carries the operation's errno in an `err` field;
//! transport- and decode-level failures travel separately in the reply
//! envelope (see `scratchfs-net`).

pub mod bitset;
pub mod data;
pub mod dirents;
pub mod ids;
pub mod metadata;
pub mod registry;
pub mod wire;

pub use wire::{decode_message, encode_message};
