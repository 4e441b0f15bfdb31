use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use scratchfs_net::{RpcServer, ServiceRegistry};
use scratchfs_placement::hosts::write_registry_file;
use scratchfs_registry::{RegistryService, RegistryState};
use scratchfs_types::TransportUri;
use scratchfs_types::uri::Protocol;

/// ScratchFS registry: federates per-workflow instances on request.
#[derive(Parser, Debug)]
#[command(name = "scratchfs-registry", version, about)]
struct Args {
    /// Address to listen on, `<host>:<port>` (port 0 picks one).
    #[arg(short, long, default_value = "0.0.0.0:52100")]
    listen: String,

    /// File to publish this registry's URI into; clients read it at
    /// startup.
    #[arg(short, long)]
    registry_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Box::new(RegistryService::new(Arc::new(
        RegistryState::new(),
    ))));

    let handle = RpcServer::new(registry)
        .start(&args.listen)
        .await
        .map_err(|e| anyhow::anyhow!("failed to start rpc server: {e}"))?;

    let uri = TransportUri::new(Protocol::OfiSockets, handle.local_addr().to_string());
    write_registry_file(&args.registry_file, &uri)?;
    tracing::info!(%uri, registry_file = %args.registry_file.display(), "registry ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown();
    Ok(())
}
