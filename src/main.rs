use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fleetwatch::config::{StoreKind, TransportKind};
use fleetwatch::engine::StdoutPresenter;
use fleetwatch::lifecycle::LivenessAgent;
use fleetwatch::routing::Collection;
use fleetwatch::runtime;
use fleetwatch::storage::{DocumentStore, ElasticsearchStore, InMemoryDocumentStore};
use fleetwatch::transport::{InMemoryBus, RestProxyTransport, TransportSink, TransportSource};
use fleetwatch::Config;

#[derive(Parser)]
#[command(name = "fleetwatch")]
#[command(about = "Node liveness agents and a multiplexed event aggregator", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Path to a .toml or .yaml config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the liveness agent for one service profile
    Agent {
        #[arg(long, help = "Service name or node prefix, e.g. PaymentGatewayService")]
        service: String,
    },
    /// Consume every channel, index into the store and render in time order
    Aggregate,
    /// Run all service agents and the aggregator in one process, in memory
    Demo {
        #[arg(long, help = "Stop after this many seconds instead of waiting for Ctrl-C")]
        duration_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Agent { service } => run_agent(&config, &service).await?,
        Commands::Aggregate => run_aggregator(&config).await?,
        Commands::Demo { duration_secs } => run_demo(&config, duration_secs).await?,
    }

    Ok(())
}

fn trigger_on_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });
}

fn rest_proxy(config: &Config) -> Result<RestProxyTransport> {
    match config.transport.kind {
        TransportKind::RestProxy => Ok(RestProxyTransport::new(
            config.transport.endpoint.clone(),
            config.transport.request_timeout(),
        )?),
        TransportKind::Memory => bail!("The in-memory transport only works inside `fleetwatch demo`"),
    }
}

async fn run_agent(config: &Config, service: &str) -> Result<()> {
    let profile = config.profile(service).ok_or_else(|| {
        let known: Vec<String> = config.profiles().into_iter().map(|p| p.name).collect();
        anyhow!("Unknown service '{}'; configured: {}", service, known.join(", "))
    })?;
    let sink: Arc<dyn TransportSink> = Arc::new(rest_proxy(config)?);

    let shutdown = CancellationToken::new();
    trigger_on_ctrl_c(shutdown.clone());

    let agent = LivenessAgent::new(profile, config.agent_timing(), sink)
        .with_recovery_policy(config.agent.recovery_policy);
    // No external fault source outside tests; the sender is dropped.
    let (_, faults) = mpsc::channel(1);
    let state = agent.run(shutdown, faults).await?;

    log::info!("Agent exited in state {}", state.as_str());
    Ok(())
}

async fn run_aggregator(config: &Config) -> Result<()> {
    let source = rest_proxy(config)?;
    let store: Arc<dyn DocumentStore> = match config.store.kind {
        StoreKind::Elasticsearch => Arc::new(ElasticsearchStore::new(
            config.store.endpoint.clone(),
            config.store.request_timeout(),
        )?),
        StoreKind::Memory => Arc::new(InMemoryDocumentStore::new()),
    };

    source.verify().await?;
    log::info!("Connected to transport at {}", source.endpoint());
    store
        .ping()
        .await
        .with_context(|| format!("Unable to connect to store at {}", store.endpoint()))?;
    log::info!("Connected to store at {}", store.endpoint());

    let shutdown = CancellationToken::new();
    trigger_on_ctrl_c(shutdown.clone());

    runtime::aggregate(config, &source, store, Arc::new(StdoutPresenter::new()), shutdown).await?;
    Ok(())
}

async fn run_demo(config: &Config, duration_secs: Option<u64>) -> Result<()> {
    let bus = InMemoryBus::new();
    let store = Arc::new(InMemoryDocumentStore::new());
    let shutdown = CancellationToken::new();
    trigger_on_ctrl_c(shutdown.clone());

    if let Some(secs) = duration_secs {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            shutdown.cancel();
        });
    }

    let states = runtime::run_fleet(
        config,
        &bus,
        store.clone(),
        Arc::new(StdoutPresenter::new()),
        shutdown,
    )
    .await?;

    log::info!("{} nodes stopped", states.len());
    for collection in Collection::ALL {
        log::info!("{}: {} documents", collection, store.count(collection.as_str()));
    }
    Ok(())
}
