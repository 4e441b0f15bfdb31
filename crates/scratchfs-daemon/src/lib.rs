//! The ScratchFS daemon: one process per storage node, owning a shard of
//! path-keyed metadata and a shard of data chunks.
//!
//! The RPC surface is split into a metadata service and a data service,
//! both dispatching into a shared [`context::DaemonContext`]. Operation
//! errors travel as errno values inside each response; only undecodable
//! requests become dispatch errors.

pub mod context;
pub mod data_service;
pub mod metadata_service;
pub mod metadentry;
pub mod stats;

pub use context::DaemonContext;
pub use data_service::DataService;
pub use metadata_service::MetadataService;
