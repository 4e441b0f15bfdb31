//! Placement: which daemon owns a metadata key or a chunk.
//!
//! The client resolves every operation in two steps: first the owning
//! *instance* (an independent ScratchFS deployment inside the federated
//! namespace), then the daemon within that instance. Both steps are
//! deterministic and identical on every client, so no coordination is
//! needed at request time.

pub mod distributor;
pub mod hosts;
pub mod path_cache;

pub use distributor::HashDistributor;
pub use hosts::{Endpoint, HostFileError, HostTable, InstanceSpec};
pub use path_cache::PathCache;
