//! Per-process client state.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use scratchfs_net::RpcClient;
use scratchfs_placement::hosts::{
    HostTable, load_host_config_file, load_host_file, read_registry_file,
};
use scratchfs_placement::{HashDistributor, PathCache};
use scratchfs_types::errno;
use scratchfs_types::{Result, make_error_msg};

use crate::forward_registry;

/// Everything a forwarder needs: the mount root, the federated host table,
/// the distributor with its path cache, the replica count and the RPC
/// handle. Built once at startup; passed by reference everywhere (no
/// globals).
#[derive(Debug)]
pub struct ClientContext {
    mount_root: String,
    table: Arc<HostTable>,
    distributor: HashDistributor,
    rpc: RpcClient,
    /// Number of extra copies per chunk (0 disables replication).
    replica_count: u32,
    /// Replica selection on read retry. Seeded at startup; deterministic in
    /// tests.
    retry_rng: Mutex<StdRng>,
}

impl ClientContext {
    /// Build a context over an already-loaded host table.
    pub fn new(
        mount_root: impl Into<String>,
        table: Arc<HostTable>,
        local_instance: usize,
        replica_count: u32,
    ) -> Arc<Self> {
        Self::with_rng(
            mount_root,
            table,
            local_instance,
            replica_count,
            StdRng::from_entropy(),
        )
    }

    /// Like [`ClientContext::new`] with a caller-seeded retry PRNG.
    pub fn with_seed(
        mount_root: impl Into<String>,
        table: Arc<HostTable>,
        local_instance: usize,
        replica_count: u32,
        seed: u64,
    ) -> Arc<Self> {
        Self::with_rng(
            mount_root,
            table,
            local_instance,
            replica_count,
            StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(
        mount_root: impl Into<String>,
        table: Arc<HostTable>,
        local_instance: usize,
        replica_count: u32,
        rng: StdRng,
    ) -> Arc<Self> {
        let cache = Arc::new(PathCache::new());
        let distributor = HashDistributor::new(Arc::clone(&table), cache, local_instance);
        Arc::new(Self {
            mount_root: mount_root.into(),
            table,
            distributor,
            rpc: RpcClient::new(),
            replica_count,
            retry_rng: Mutex::new(rng),
        })
    }

    /// Full startup path: read the registry file, ask the Registry to merge
    /// `flow_list`, then load the federated host files it wrote.
    ///
    /// An empty merged host file is a fatal startup error.
    pub async fn init_from_registry(
        mount_root: impl Into<String>,
        registry_file: &Path,
        flow_list: &str,
        out_host_config_file: &Path,
        out_host_file: &Path,
        replica_count: u32,
    ) -> Result<Arc<Self>> {
        let registry_uri = read_registry_file(registry_file)?;
        let rpc = RpcClient::new();
        forward_registry::forward_request_registry(
            &rpc,
            registry_uri.authority(),
            flow_list,
            out_host_config_file,
            out_host_file,
        )
        .await?;

        let endpoints = load_host_file(out_host_file)?;
        if endpoints.is_empty() {
            return make_error_msg(
                errno::EINVAL,
                format!("federated host file {} is empty", out_host_file.display()),
            );
        }
        let specs = load_host_config_file(out_host_config_file)?;
        let table = Arc::new(HostTable::new(endpoints, &specs)?);
        let ctx = Self::new(mount_root, table, 0, replica_count);

        // Both sides must agree on the chunk geometry before any placement
        // decision is trusted.
        let fs_config = crate::forward_metadata::forward_get_fs_config(&ctx).await?;
        if fs_config.chunk_size != scratchfs_types::config::CHUNK_SIZE {
            return make_error_msg(
                errno::EINVAL,
                format!(
                    "daemon chunk size {} does not match client chunk size {}",
                    fs_config.chunk_size,
                    scratchfs_types::config::CHUNK_SIZE
                ),
            );
        }
        Ok(ctx)
    }

    pub fn mount_root(&self) -> &str {
        &self.mount_root
    }

    /// Translate a user-visible path under the mount root into an internal
    /// absolute path. `None` when the path lies outside the mount.
    pub fn relativize(&self, user_path: &str) -> Option<String> {
        if self.mount_root == "/" {
            return user_path.starts_with('/').then(|| user_path.to_string());
        }
        let rest = user_path.strip_prefix(&self.mount_root)?;
        if rest.is_empty() {
            return Some("/".to_string());
        }
        rest.starts_with('/').then(|| rest.to_string())
    }

    pub fn hosts(&self) -> &HostTable {
        &self.table
    }

    pub fn distributor(&self) -> &HashDistributor {
        &self.distributor
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Number of extra copies per chunk.
    pub fn replica_count(&self) -> u32 {
        self.replica_count
    }

    /// `<host>:<port>` of the daemon at `global_idx`, ready to dial.
    pub fn daemon_addr(&self, global_idx: usize) -> String {
        self.table.endpoint(global_idx).uri.authority().to_string()
    }

    /// A uniformly random replica index in `[0, replica_count]`.
    pub fn random_replica(&self) -> u32 {
        self.retry_rng.lock().gen_range(0..=self.replica_count)
    }
}
