//! `lobbyd`: the lobby bucket server.
//!
//! Usage:
//!   lobbyd run -c <config-name-or-path> [overrides]
//!   lobbyd plugin --backend <memory|redb> (--listen <addr> | --socket <path>)
//!
//! `run` serves the registry over HTTP and gRPC. `plugin` serves a single
//! backend over gRPC, for a `run` instance to use as a remote backend.

mod bootstrap;
mod config;
mod error;
mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use lobby_bucket::{Backend, MemoryBackend, RedbBackend, Registry};
use lobby_rpc::BucketServer;
use tokio::sync::watch;
use tracing::{info, warn};

use config::{Config, RegistryKind};
use routes::AppState;

/// Lobby bucket server.
#[derive(Parser, Debug)]
#[command(name = "lobbyd", version, about = "Lobby bucket server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the registry over HTTP and gRPC.
    Run(RunArgs),
    /// Serve one backend over gRPC as a plugin.
    Plugin(PluginArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Config name or path to a TOML file.
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    #[arg(long)]
    http_port: Option<u16>,

    #[arg(long)]
    grpc_port: Option<u16>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Where bucket bindings are kept.
    #[arg(long, value_enum)]
    registry: Option<RegistryKind>,
}

impl RunArgs {
    /// Command-line values win over the config file.
    fn apply(&self, config: &mut Config) {
        if self.debug {
            config.debug = true;
        }
        if let Some(port) = self.http_port {
            config.http.port = port;
        }
        if let Some(port) = self.grpc_port {
            config.grpc.port = port;
        }
        if let Some(dir) = &self.data_dir {
            config.paths.data_dir = dir.clone();
        }
        if let Some(dir) = &self.plugin_dir {
            config.paths.plugin_dir = dir.clone();
        }
        if let Some(dir) = &self.socket_dir {
            config.paths.socket_dir = dir.clone();
        }
        if let Some(kind) = self.registry {
            config.registry = kind;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PluginBackend {
    Memory,
    Redb,
}

#[derive(Args, Debug)]
struct PluginArgs {
    #[arg(long, value_enum, default_value = "redb")]
    backend: PluginBackend,

    /// TCP address to listen on.
    #[arg(long, conflicts_with = "socket", required_unless_present = "socket")]
    listen: Option<SocketAddr>,

    /// Unix socket to listen on.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Directory for the redb file.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
        Command::Plugin(args) => plugin(args),
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lobbyd")
        .build()
        .context("failed to start tokio runtime")
}

/// Resolves once ctrl-c is received.
fn shutdown_signal() -> (watch::Receiver<bool>, impl Future<Output = ()> + Send + 'static) {
    let (tx, rx) = watch::channel(false);
    let listen = async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down"),
            Err(e) => {
                warn!("failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        }
        let _ = tx.send(true);
    };
    (rx, listen)
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(name) => {
            let path = Config::resolve_path(name);
            Config::load(&path)?
        }
        None => Config::default(),
    };
    args.apply(&mut config);
    init_logging(config.debug);

    bootstrap::verify_config(&config)?;
    config.paths.create()?;
    info!(
        data_dir = %config.paths.data_dir.display(),
        plugin_dir = %config.paths.plugin_dir.display(),
        socket_dir = %config.paths.socket_dir().display(),
        "paths ready"
    );

    // Built outside the server runtime: remote backends block on their own.
    let registry = Arc::new(bootstrap::build_registry(&config)?);
    info!(backends = ?registry.backends(), buckets = registry.buckets().len(), "registry ready");

    let runtime = runtime()?;
    let served = runtime.block_on(serve(&config, Arc::clone(&registry)));
    drop(runtime);

    let closed = registry.close();
    served?;
    closed.context("failed to close backends")?;
    Ok(())
}

async fn serve(config: &Config, registry: Arc<Registry>) -> anyhow::Result<()> {
    let (stop, signal) = shutdown_signal();
    tokio::spawn(signal);

    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.grpc.port));
    let grpc = BucketServer::new(registry.clone()).serve_tcp(grpc_addr, stopped(stop.clone()));

    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind {}", http_addr))?;
    info!("HTTP server listening on {}", http_addr);
    let app = routes::build_router(AppState { registry });
    let http = axum::serve(listener, app).with_graceful_shutdown(stopped(stop));

    tokio::try_join!(
        async { grpc.await.context("gRPC server failed") },
        async { http.await.context("HTTP server failed") },
    )?;
    Ok(())
}

enum Listen {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

fn plugin(args: PluginArgs) -> anyhow::Result<()> {
    init_logging(args.debug);

    let backend: Arc<dyn Backend> = match args.backend {
        PluginBackend::Memory => Arc::new(MemoryBackend::new()),
        PluginBackend::Redb => {
            std::fs::create_dir_all(&args.data_dir)
                .with_context(|| format!("can't create directory {}", args.data_dir.display()))?;
            let path = args.data_dir.join("buckets.redb");
            Arc::new(
                RedbBackend::open(&path)
                    .with_context(|| format!("failed to open {}", path.display()))?,
            )
        }
    };
    info!(backend = ?args.backend, "plugin starting");

    let listen = match (args.listen, args.socket) {
        (Some(addr), _) => Listen::Tcp(addr),
        (None, Some(path)) => Listen::Unix(path),
        (None, None) => anyhow::bail!("--listen or --socket is required"),
    };

    let runtime = runtime()?;
    let served = runtime.block_on(async {
        let (stop, signal) = shutdown_signal();
        tokio::spawn(signal);

        let server = BucketServer::new(Arc::clone(&backend));
        match listen {
            Listen::Tcp(addr) => server.serve_tcp(addr, stopped(stop)).await,
            Listen::Unix(path) => server.serve_unix(&path, stopped(stop)).await,
        }
    });
    drop(runtime);

    let closed = backend.close();
    served.context("plugin server failed")?;
    closed.context("failed to close backend")?;
    Ok(())
}
