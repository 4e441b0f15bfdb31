//! RPC plumbing: message framing over TCP, the service registry, and the
//! client/server endpoints.
//!
//! Every message is framed by an 8-byte [`message::MessageHeader`] carrying
//! a crc32c checksum (with a magic low byte) and the payload length.
//! Requests address a `(service_id, method_id)` pair; replies are a
//! [`message::ReplyEnvelope`] separating transport/dispatch status from the
//! operation payload.

pub mod client;
pub mod error;
pub mod message;
pub mod server;
pub mod service;

pub use client::RpcClient;
pub use error::NetError;
pub use server::{RpcServer, ServerHandle};
pub use service::{ServiceHandler, ServiceRegistry};
