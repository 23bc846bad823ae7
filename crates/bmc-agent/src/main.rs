//! BMC Agent
//!
//! Serves BMC entities assembled from the object bus over HTTP, with a
//! broker keeping cached entities fresh in the background.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bmc_agent::config::{AgentConfig, LogConfig};
use bmc_agent::entities::register_all;
use bmc_agent::server::{AppState, create_router};
use bmc_agent::snapshot::{BusSnapshot, SnapshotWatcher};
use entity_runtime::bus::MemoryBus;
use entity_runtime::broker::BrokerManager;
use entity_runtime::{ConnectionPool, EntityManager};

/// BMC entity agent
#[derive(Parser, Debug)]
#[command(name = "bmc-agent")]
#[command(about = "BMC entity agent", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bus snapshot to serve (JSON)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Server host address
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Broker worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Don't reload the snapshot when it changes
    #[arg(long)]
    no_watch: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(snapshot) = &self.snapshot {
            config.bus.snapshot = Some(snapshot.clone());
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(workers) = self.workers {
            config.broker.workers = workers;
        }
        if self.no_watch {
            config.bus.watch = false;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = AgentConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing(&config.log);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn async_main(config: AgentConfig) -> Result<()> {
    info!("Starting BMC agent v{}", env!("CARGO_PKG_VERSION"));

    // Bus
    let bus = Arc::new(MemoryBus::new());
    if let Some(path) = &config.bus.snapshot {
        let snapshot = BusSnapshot::load(path)?;
        let summary = snapshot.apply(&bus);
        info!(
            path = %path.display(),
            services = summary.changed.len(),
            objects = snapshot.object_count(),
            "Bus snapshot loaded"
        );
    } else {
        warn!("No bus snapshot configured, serving an empty bus");
    }

    let pool = ConnectionPool::shared(bus.clone(), config.bus.pool_size)?
        .with_checkout_timeout(config.bus.checkout_timeout());
    let pool = Arc::new(pool);

    // Entities
    let mut manager = EntityManager::new(pool.clone());
    register_all(&mut manager)?;
    manager.configure()?;
    manager.update();
    let manager = Arc::new(manager);

    // Broker
    let mut broker = BrokerManager::new(pool, config.broker.clone());
    let bound = broker.bind_cached(&manager)?;
    broker.start()?;
    info!(bindings = bound, workers = config.broker.workers, "Broker started");

    // Snapshot watcher
    if config.bus.watch {
        if let Some(path) = &config.bus.snapshot {
            match SnapshotWatcher::new(path, bus.clone()) {
                Ok(watcher) => {
                    tokio::spawn(watcher.run());
                    info!("Snapshot watcher started");
                }
                Err(e) => {
                    error!("Failed to start snapshot watcher: {}", e);
                }
            }
        }
    }

    let app = create_router(AppState::new(manager));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping broker...");
    tokio::task::spawn_blocking(move || broker.terminate()).await?;

    info!("Agent shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
