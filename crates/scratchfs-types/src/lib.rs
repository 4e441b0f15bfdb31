//! Shared types for ScratchFS.
//!
//! Everything that both the client and the daemon need to agree on lives
//! here: the errno-based status codes, the metadata record and its textual
//! serialization, chunk arithmetic, and transport URIs.

pub mod arithmetic;
pub mod config;
pub mod errno;
pub mod metadata;
pub mod path;
pub mod result;
pub mod status;
pub mod uri;

// Re-export commonly used items at the crate root.
pub use metadata::{FileType, Metadata, MetadataParseError};
pub use result::{Result, make_error, make_error_msg};
pub use status::Status;
pub use uri::{TransportUri, UriParseError};
