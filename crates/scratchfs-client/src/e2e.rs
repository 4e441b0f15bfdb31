//! End-to-end scenarios over loopback TCP daemons.
//!
//! Each test spawns real daemon processes-in-miniature (mem metadata
//! backend, tempdir chunk storage, the full RPC stack) and drives them
//! through the public forwarders.

use std::collections::HashSet;
use std::sync::Arc;

use tempfile::TempDir;

use scratchfs_daemon::{DaemonContext, DataService, MetadataService};
use scratchfs_net::{RpcServer, ServerHandle, ServiceRegistry};
use scratchfs_placement::hosts::{Endpoint, HostTable, InstanceSpec};
use scratchfs_types::TransportUri;
use scratchfs_types::config::CHUNK_SIZE;
use scratchfs_types::errno;
use scratchfs_types::metadata::{S_IFDIR, S_IFREG};
use scratchfs_types::uri::Protocol;

use crate::context::ClientContext;
use crate::forward_data::{
    forward_get_chunk_stat, forward_write, read_file, truncate_file, write_file,
};
use crate::forward_metadata::{
    forward_create, forward_get_dirents, forward_get_dirents_extended, forward_get_metadentry_size,
    forward_mk_symlink, forward_remove, forward_rename, forward_stat,
};

struct TestDaemon {
    _dir: TempDir,
    handle: Option<ServerHandle>,
}

impl TestDaemon {
    async fn spawn() -> Self {
        let dir = TempDir::new().unwrap();
        let ctx = DaemonContext::open(dir.path(), "mem").unwrap();
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(Box::new(MetadataService::new(Arc::clone(&ctx))));
        registry.register(Box::new(DataService::new(ctx)));
        let handle = RpcServer::new(registry).start("127.0.0.1:0").await.unwrap();
        Self {
            _dir: dir,
            handle: Some(handle),
        }
    }

    fn endpoint(&self, idx: usize) -> Endpoint {
        Endpoint {
            hostname: format!("node{idx:02}"),
            uri: TransportUri::new(
                Protocol::OfiSockets,
                self.handle.as_ref().unwrap().local_addr().to_string(),
            ),
        }
    }

    fn kill(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

async fn cluster(n: usize, replicas: u32) -> (Vec<TestDaemon>, Arc<ClientContext>) {
    let mut daemons = Vec::with_capacity(n);
    for _ in 0..n {
        daemons.push(TestDaemon::spawn().await);
    }
    let endpoints = daemons
        .iter()
        .enumerate()
        .map(|(i, d)| d.endpoint(i))
        .collect();
    let table = Arc::new(HostTable::single_instance(endpoints));
    let ctx = ClientContext::with_seed("/", table, 0, replicas, 7);
    (daemons, ctx)
}

// -- scenario 1: single-node create-write-read -----------------------------

#[tokio::test]
async fn test_single_node_create_write_read() {
    let (_daemons, ctx) = cluster(1, 0).await;

    forward_create(&ctx, "/a", S_IFREG | 0o644).await.unwrap();
    let written = write_file(&ctx, "/a", b"HELLO", 0, false).await.unwrap();
    assert_eq!(written, 5);

    let md = forward_stat(&ctx, "/a").await.unwrap();
    assert_eq!(md.size(), 5);
    assert_eq!(md.mode(), S_IFREG | 0o644);

    let mut out = vec![0u8; 5];
    let read = read_file(&ctx, "/a", &mut out, 0).await.unwrap();
    assert_eq!(read, 5);
    assert_eq!(out, b"HELLO");
}

// -- scenario 2: parallel append -------------------------------------------

#[tokio::test]
async fn test_parallel_append() {
    let (_daemons, ctx) = cluster(2, 0).await;
    forward_create(&ctx, "/log", S_IFREG | 0o644).await.unwrap();

    let buf_a = vec![b'A'; 4096];
    let buf_b = vec![b'B'; 4096];
    let (ra, rb) = tokio::join!(
        write_file(&ctx, "/log", &buf_a, 0, true),
        write_file(&ctx, "/log", &buf_b, 0, true),
    );
    assert_eq!(ra.unwrap(), 4096);
    assert_eq!(rb.unwrap(), 4096);

    let md = forward_stat(&ctx, "/log").await.unwrap();
    assert_eq!(md.size(), 8192);

    let mut out = vec![0u8; 8192];
    assert_eq!(read_file(&ctx, "/log", &mut out, 0).await.unwrap(), 8192);
    // The reservations are disjoint: one full run of A's and one of B's,
    // in either order.
    let first = out[0];
    let second = if first == b'A' { b'B' } else { b'A' };
    assert!(out[..4096].iter().all(|&b| b == first));
    assert!(out[4096..].iter().all(|&b| b == second));
}

// -- scenario 3: truncate downward ------------------------------------------

#[tokio::test]
async fn test_truncate_downward() {
    let (_daemons, ctx) = cluster(2, 0).await;
    forward_create(&ctx, "/f", S_IFREG | 0o644).await.unwrap();

    let data = vec![0x5A; (3 * CHUNK_SIZE) as usize];
    write_file(&ctx, "/f", &data, 0, false).await.unwrap();
    assert_eq!(
        forward_get_metadentry_size(&ctx, "/f").await.unwrap(),
        3 * CHUNK_SIZE
    );

    let new_size = CHUNK_SIZE / 2;
    truncate_file(&ctx, "/f", new_size).await.unwrap();

    let md = forward_stat(&ctx, "/f").await.unwrap();
    assert_eq!(md.size(), new_size);

    // Reads at or past the new size observe nothing.
    let mut out = vec![0u8; 4096];
    assert_eq!(read_file(&ctx, "/f", &mut out, new_size).await.unwrap(), 0);
    assert_eq!(
        read_file(&ctx, "/f", &mut out, 2 * CHUNK_SIZE).await.unwrap(),
        0
    );

    // Data below the cut survives.
    let mut head = vec![0u8; new_size as usize];
    assert_eq!(
        read_file(&ctx, "/f", &mut head, 0).await.unwrap(),
        new_size
    );
    assert!(head.iter().all(|&b| b == 0x5A));
}

// -- scenario 4: dirents across shards --------------------------------------

#[tokio::test]
async fn test_dirents_across_shards() {
    let (_daemons, ctx) = cluster(3, 0).await;
    forward_create(&ctx, "/d", S_IFDIR | 0o755).await.unwrap();
    for path in ["/d/a", "/d/b", "/d/c"] {
        forward_create(&ctx, path, S_IFREG | 0o644).await.unwrap();
    }

    let mut entries = forward_get_dirents(&ctx, "/d").await.unwrap();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let view: Vec<(&str, bool)> = entries
        .iter()
        .map(|e| (e.name.as_str(), e.is_dir))
        .collect();
    assert_eq!(view, vec![("a", false), ("b", false), ("c", false)]);
}

// -- scenario 5: federated stat ---------------------------------------------

#[tokio::test]
async fn test_federated_stat_prefers_lower_priority() {
    // Two single-daemon instances, I0 with priority 1 and I1 with
    // priority 2, both holding /p with different modes.
    let d0 = TestDaemon::spawn().await;
    let d1 = TestDaemon::spawn().await;
    let endpoints = vec![d0.endpoint(0), d1.endpoint(1)];
    let specs = [
        InstanceSpec {
            host_count: 1,
            priority: 1,
        },
        InstanceSpec {
            host_count: 1,
            priority: 2,
        },
    ];
    let table = Arc::new(HostTable::new(endpoints, &specs).unwrap());

    // Seed /p into each instance through a client local to it.
    let ctx0 = ClientContext::with_seed("/", Arc::clone(&table), 0, 0, 1);
    let ctx1 = ClientContext::with_seed("/", Arc::clone(&table), 1, 0, 1);
    forward_create(&ctx0, "/p", S_IFREG | 0o644).await.unwrap();
    forward_create(&ctx1, "/p", S_IFREG | 0o600).await.unwrap();

    // A fresh client stats across the federation: the priority-1 record
    // wins and the binding sticks.
    let ctx = ClientContext::with_seed("/", Arc::clone(&table), 1, 0, 2);
    let md = forward_stat(&ctx, "/p").await.unwrap();
    assert_eq!(md.mode(), S_IFREG | 0o644);
    assert_eq!(ctx.distributor().path_cache().get("/p"), Some(0));
    assert_eq!(ctx.distributor().locate_metadata("/p", 0), 0);
}

#[tokio::test]
async fn test_federated_stat_not_found_everywhere() {
    let d0 = TestDaemon::spawn().await;
    let d1 = TestDaemon::spawn().await;
    let endpoints = vec![d0.endpoint(0), d1.endpoint(1)];
    let specs = [
        InstanceSpec {
            host_count: 1,
            priority: 1,
        },
        InstanceSpec {
            host_count: 1,
            priority: 2,
        },
    ];
    let table = Arc::new(HostTable::new(endpoints, &specs).unwrap());
    let ctx = ClientContext::with_seed("/", table, 0, 0, 3);

    let err = forward_stat(&ctx, "/nowhere").await.unwrap_err();
    assert_eq!(err.code(), errno::ENOENT);
}

#[tokio::test]
async fn test_root_dirents_deduplicate_across_instances() {
    // Both instances hold a root-level entry named "x"; the root listing
    // reports it once. The entry unique to one instance survives too.
    let d0 = TestDaemon::spawn().await;
    let d1 = TestDaemon::spawn().await;
    let endpoints = vec![d0.endpoint(0), d1.endpoint(1)];
    let specs = [
        InstanceSpec {
            host_count: 1,
            priority: 1,
        },
        InstanceSpec {
            host_count: 1,
            priority: 2,
        },
    ];
    let table = Arc::new(HostTable::new(endpoints, &specs).unwrap());
    let ctx0 = ClientContext::with_seed("/", Arc::clone(&table), 0, 0, 1);
    let ctx1 = ClientContext::with_seed("/", Arc::clone(&table), 1, 0, 1);

    forward_create(&ctx0, "/x", S_IFREG | 0o644).await.unwrap();
    forward_create(&ctx1, "/x", S_IFREG | 0o644).await.unwrap();
    forward_create(&ctx1, "/only-here", S_IFREG | 0o644)
        .await
        .unwrap();

    let mut entries = forward_get_dirents(&ctx0, "/").await.unwrap();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["only-here", "x"]);
}

// -- scenario 6: registry-driven startup ------------------------------------

#[tokio::test]
async fn test_registry_startup_and_io() {
    use crate::forward_registry::forward_register_registry;
    use scratchfs_net::RpcClient;
    use scratchfs_placement::hosts::{write_host_config_file, write_host_file};
    use scratchfs_registry::{RegistryService, RegistryState};

    let workdir = TempDir::new().unwrap();

    // One real daemon, manifested as workflow W1.
    let daemon = TestDaemon::spawn().await;
    let host_file = workdir.path().join("w1.hosts");
    let host_config_file = workdir.path().join("w1.cfg");
    write_host_file(&host_file, &[daemon.endpoint(0)]).unwrap();
    write_host_config_file(
        &host_config_file,
        &[InstanceSpec {
            host_count: 1,
            priority: 1,
        }],
    )
    .unwrap();

    // The registry daemon, publishing its URI through the registry file.
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Box::new(RegistryService::new(Arc::new(
        RegistryState::new(),
    ))));
    let registry_handle = RpcServer::new(registry).start("127.0.0.1:0").await.unwrap();
    let registry_file = workdir.path().join("registry");
    std::fs::write(
        &registry_file,
        format!("ofi+sockets://{}\n", registry_handle.local_addr()),
    )
    .unwrap();

    let rpc = RpcClient::new();
    forward_register_registry(
        &rpc,
        &registry_handle.local_addr().to_string(),
        "W1",
        &host_config_file,
        &host_file,
    )
    .await
    .unwrap();

    let ctx = ClientContext::init_from_registry(
        "/",
        &registry_file,
        "W1",
        &workdir.path().join("fed.cfg"),
        &workdir.path().join("fed.hosts"),
        0,
    )
    .await
    .unwrap();

    forward_create(&ctx, "/via-registry", S_IFREG | 0o644)
        .await
        .unwrap();
    write_file(&ctx, "/via-registry", b"payload", 0, false)
        .await
        .unwrap();
    let md = forward_stat(&ctx, "/via-registry").await.unwrap();
    assert_eq!(md.size(), 7);
}

// -- boundaries -------------------------------------------------------------

#[tokio::test]
async fn test_zero_length_write() {
    let (_daemons, ctx) = cluster(1, 0).await;
    forward_create(&ctx, "/z", S_IFREG | 0o644).await.unwrap();
    write_file(&ctx, "/z", b"abc", 0, false).await.unwrap();

    assert_eq!(write_file(&ctx, "/z", b"", 3, false).await.unwrap(), 0);
    assert_eq!(forward_get_metadentry_size(&ctx, "/z").await.unwrap(), 3);
}

#[tokio::test]
async fn test_write_straddling_chunks_across_daemons() {
    let (_daemons, ctx) = cluster(3, 0).await;
    forward_create(&ctx, "/big", S_IFREG | 0o644).await.unwrap();

    // Five chunks, starting mid-chunk, spread over three daemons.
    let offset = CHUNK_SIZE / 2 + 3;
    let len = (4 * CHUNK_SIZE + 17) as usize;
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let written = write_file(&ctx, "/big", &data, offset, false).await.unwrap();
    assert_eq!(written as usize, len);

    assert_eq!(
        forward_get_metadentry_size(&ctx, "/big").await.unwrap(),
        offset + len as u64
    );

    let mut out = vec![0u8; len];
    assert_eq!(
        read_file(&ctx, "/big", &mut out, offset).await.unwrap() as usize,
        len
    );
    assert_eq!(out, data);
}

#[tokio::test]
async fn test_symlink_roundtrip() {
    let (_daemons, ctx) = cluster(2, 0).await;
    forward_mk_symlink(&ctx, "/link", "/the/target").await.unwrap();
    let md = forward_stat(&ctx, "/link").await.unwrap();
    assert!(md.is_symlink());
    assert_eq!(md.target_path(), "/the/target");
}

#[tokio::test]
async fn test_remove_drops_metadata_and_data() {
    let (_daemons, ctx) = cluster(2, 0).await;
    forward_create(&ctx, "/gone", S_IFREG | 0o644).await.unwrap();
    let data = vec![1u8; (2 * CHUNK_SIZE) as usize];
    write_file(&ctx, "/gone", &data, 0, false).await.unwrap();

    forward_remove(&ctx, "/gone").await.unwrap();
    let err = forward_stat(&ctx, "/gone").await.unwrap_err();
    assert_eq!(err.code(), errno::ENOENT);

    // Recreating starts from scratch: no stale bytes.
    forward_create(&ctx, "/gone", S_IFREG | 0o644).await.unwrap();
    let mut out = vec![0u8; 64];
    assert_eq!(read_file(&ctx, "/gone", &mut out, 0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_rename_tombstones_old_path() {
    let (_daemons, ctx) = cluster(2, 0).await;
    forward_create(&ctx, "/d", S_IFDIR | 0o755).await.unwrap();
    forward_create(&ctx, "/d/old", S_IFREG | 0o644).await.unwrap();
    write_file(&ctx, "/d/old", b"kept", 0, false).await.unwrap();

    let md = forward_stat(&ctx, "/d/old").await.unwrap();
    forward_rename(&ctx, "/d/old", "/d/new", &md).await.unwrap();

    // The tombstone hides the old name from listings; the new name
    // resolves back to it.
    let entries = forward_get_dirents(&ctx, "/d").await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["new"]);

    let md = forward_stat(&ctx, "/d/new").await.unwrap();
    assert!(md.is_symlink());
    assert_eq!(md.target_path(), "/d/old");
}

#[tokio::test]
async fn test_dirents_extended_single_server() {
    let (_daemons, ctx) = cluster(1, 0).await;
    forward_create(&ctx, "/d", S_IFDIR | 0o755).await.unwrap();
    forward_create(&ctx, "/d/f", S_IFREG | 0o644).await.unwrap();
    write_file(&ctx, "/d/f", b"123456", 0, false).await.unwrap();

    let entries = forward_get_dirents_extended(&ctx, "/d", 0).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "f");
    assert_eq!(entries[0].size, 6);
    assert!(!entries[0].is_dir);
}

#[tokio::test]
async fn test_fs_config_reports_geometry() {
    use crate::forward_metadata::forward_get_fs_config;

    let (_daemons, ctx) = cluster(2, 0).await;
    let cfg = forward_get_fs_config(&ctx).await.unwrap();
    assert_eq!(cfg.chunk_size, CHUNK_SIZE);
    assert_eq!(cfg.backend, "mem");
}

#[tokio::test]
async fn test_chunk_stat_aggregates() {
    let (_daemons, ctx) = cluster(3, 0).await;
    let stat = forward_get_chunk_stat(&ctx).await.unwrap();
    assert_eq!(stat.chunk_size, CHUNK_SIZE);
    assert!(stat.chunk_total > 0);
}

// -- replication ------------------------------------------------------------

#[tokio::test]
async fn test_replicated_write_survives_daemon_loss_on_read() {
    let (mut daemons, ctx) = cluster(3, 1).await;
    forward_create(&ctx, "/r", S_IFREG | 0o644).await.unwrap();
    write_file(&ctx, "/r", b"replicated payload", 0, false)
        .await
        .unwrap();

    // Take down the primary copy's daemon; the read retries onto the
    // second replica.
    let primary = ctx.distributor().locate_chunk("/r", 0, 0);
    daemons[primary].kill();

    let mut out = vec![0u8; 18];
    let read = read_file(&ctx, "/r", &mut out, 0).await.unwrap();
    assert_eq!(read, 18);
    assert_eq!(&out, b"replicated payload");
}

#[tokio::test]
async fn test_replicated_write_reports_nominal_size() {
    let (_daemons, ctx) = cluster(3, 2).await;
    forward_create(&ctx, "/r", S_IFREG | 0o644).await.unwrap();
    let data = vec![9u8; (CHUNK_SIZE + 10) as usize];
    let written = forward_write(&ctx, "/r", &data, 0).await.unwrap();
    assert_eq!(written as usize, data.len());
}

#[tokio::test]
async fn test_unreplicated_read_from_dead_daemon_fails_fast() {
    let (mut daemons, ctx) = cluster(1, 0).await;
    forward_create(&ctx, "/f", S_IFREG | 0o644).await.unwrap();
    write_file(&ctx, "/f", b"bytes", 0, false).await.unwrap();
    daemons[0].kill();

    let mut out = vec![0u8; 5];
    let err = read_file(&ctx, "/f", &mut out, 0).await.unwrap_err();
    // Without replicas there is nowhere to retry; the transport failure
    // surfaces as an I/O error.
    assert_eq!(err.code(), errno::EIO);
}

#[tokio::test]
async fn test_read_with_all_replicas_down_fails() {
    let (mut daemons, ctx) = cluster(2, 1).await;
    forward_create(&ctx, "/r", S_IFREG | 0o644).await.unwrap();
    write_file(&ctx, "/r", b"doomed", 0, false).await.unwrap();

    for daemon in daemons.iter_mut() {
        daemon.kill();
    }
    let mut out = vec![0u8; 6];
    let mut failed = HashSet::new();
    let err = crate::forward_data::forward_read(&ctx, "/r", &mut out, 0, &mut failed)
        .await
        .unwrap_err();
    assert_eq!(err.code(), errno::EIO);
    assert!(!failed.is_empty());
}
