//! The Registry: a standalone daemon that federates per-workflow ScratchFS
//! instances into one namespace.
//!
//! Workflows register their host manifests under a name; a client's
//! `request` names the workflows it wants and receives merged host and
//! host-config files, priority-ordered and deduplicated. Nothing is
//! persisted: registry state dies with the process, like the file systems
//! it federates.

pub mod merge;
pub mod service;
pub mod state;

pub use merge::merge_workflows;
pub use service::RegistryService;
pub use state::{RegistryState, WorkflowManifest};
