//! Registered workflow manifests.

use dashmap::DashMap;

/// Where a workflow's host manifests live on the shared filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowManifest {
    pub host_config_file: String,
    pub host_file: String,
}

/// Concurrent map from workflow name to its manifest paths.
#[derive(Debug, Default)]
pub struct RegistryState {
    workflows: DashMap<String, WorkflowManifest>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-register a workflow.
    pub fn register(&self, name: impl Into<String>, manifest: WorkflowManifest) {
        self.workflows.insert(name.into(), manifest);
    }

    pub fn get(&self, name: &str) -> Option<WorkflowManifest> {
        self.workflows.get(name).map(|m| m.clone())
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}
