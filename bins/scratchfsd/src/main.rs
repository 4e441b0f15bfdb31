use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use scratchfs_daemon::{DaemonContext, DataService, MetadataService};
use scratchfs_net::{RpcServer, ServiceRegistry};

/// ScratchFS daemon: owns one shard of metadata and one shard of chunks.
#[derive(Parser, Debug)]
#[command(name = "scratchfsd", version, about)]
struct Args {
    /// Directory for this daemon's metadata store and chunk space.
    #[arg(short, long)]
    root_dir: PathBuf,

    /// Address to listen on, `<host>:<port>` (port 0 picks one).
    #[arg(short, long, default_value = "0.0.0.0:52000")]
    listen: String,

    /// Hostname to publish in the hosts file.
    #[arg(long, default_value_t = default_hostname())]
    hostname: String,

    /// Hosts file this daemon appends its line to.
    #[arg(long)]
    hosts_file: Option<PathBuf>,

    /// Metadata backend: `mem` or `rocksdb`.
    #[arg(long, default_value = "mem")]
    metadata_backend: String,

    /// Directory for daily-rotated log files; logs go to stderr when
    /// unset.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log operation statistics every this many seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    stats_interval: u64,
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Returns the guard keeping the non-blocking file writer alive for the
/// process lifetime.
fn init_logging(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter =
        EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "scratchfsd.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_dir.as_ref());
    tracing::info!(
        root = %args.root_dir.display(),
        listen = %args.listen,
        backend = %args.metadata_backend,
        "starting scratchfs daemon"
    );

    let ctx = DaemonContext::open(&args.root_dir, &args.metadata_backend)
        .map_err(|e| anyhow::anyhow!("failed to open engines: {e}"))?;

    if args.stats_interval > 0 {
        let stats_ctx = Arc::clone(&ctx);
        let interval = std::time::Duration::from_secs(args.stats_interval);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                tracing::info!(stats = %stats_ctx.stats(), "operation statistics");
            }
        });
    }

    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Box::new(MetadataService::new(Arc::clone(&ctx))));
    registry.register(Box::new(DataService::new(ctx)));

    let handle = RpcServer::new(registry)
        .start(&args.listen)
        .await
        .map_err(|e| anyhow::anyhow!("failed to start rpc server: {e}"))?;
    tracing::info!(addr = %handle.local_addr(), "accepting rpcs");

    // Publish our line so clients can find us.
    if let Some(hosts_file) = &args.hosts_file {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(hosts_file)?;
        writeln!(
            file,
            "{} ofi+sockets://{}",
            args.hostname,
            handle.local_addr()
        )?;
        tracing::info!(hosts_file = %hosts_file.display(), "published endpoint");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown();
    Ok(())
}
