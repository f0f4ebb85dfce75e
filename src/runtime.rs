//! Process wiring for the aggregator and for the single-process fleet.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};
use crate::config::Config;
use crate::engine::{AggregatorPipeline, DisplayBuffer, LivenessMonitor, LivenessRegistry, Presenter};
use crate::error::{BackplaneError, BackplaneResult};
use crate::lifecycle::{LivenessAgent, NodeState};
use crate::storage::DocumentStore;
use crate::transport::{InMemoryBus, Multiplexer, TransportSource};

/// Consume every configured channel until `shutdown` is cancelled or the
/// transport ends.
///
/// The liveness monitor and the optional API run only as long as the
/// pipeline does. Consumers held by `source` are released before returning.
pub async fn aggregate(
    config: &Config,
    source: &dyn TransportSource,
    store: Arc<dyn DocumentStore>,
    presenter: Arc<dyn Presenter>,
    shutdown: CancellationToken,
) -> BackplaneResult<()> {
    let settings = &config.aggregator;
    let registry = LivenessRegistry::new();
    let display = DisplayBuffer::new(settings.display_capacity, settings.display_window()).shared();

    let multiplexer = Multiplexer::subscribe(
        source,
        &config.transport.channels,
        &config.transport.consumer_group,
    )
    .await?;

    let background = shutdown.child_token();
    let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

    let (alerts_tx, alerts_rx) = mpsc::channel(64);
    let monitor = LivenessMonitor::new(
        registry.clone(),
        settings.staleness_threshold(),
        settings.poll_interval(),
    );
    log::info!("Liveness alerts published as {}", monitor.node_id());
    tasks.push(("liveness monitor", tokio::spawn(monitor.run(alerts_tx, background.clone()))));

    if let Some(port) = settings.api_port {
        let state = AppState {
            registry: registry.clone(),
            display: display.clone(),
            zone: settings.display_timezone,
            staleness_threshold: settings.staleness_threshold(),
        };
        let token = background.clone();
        tasks.push((
            "api server",
            tokio::spawn(async move {
                if let Err(e) = api::serve(state, port, token).await {
                    log::error!("API server failed: {}", e);
                }
            }),
        ));
    }

    let pipeline = AggregatorPipeline::new(store, registry, display, presenter)
        .with_policy(config.store.routing)
        .with_zone(settings.display_timezone);
    let result = pipeline.run(multiplexer, alerts_rx, shutdown).await;

    background.cancel();
    for (name, task) in tasks {
        if let Err(e) = task.await {
            log::error!("{} task failed: {}", name, e);
        }
    }
    if let Err(e) = source.release().await {
        log::warn!("Failed to release consumers at {}: {}", source.endpoint(), e);
    }
    result
}

/// Run one agent per configured profile and an aggregator over a shared
/// in-memory bus.
///
/// Cancelling `shutdown` stops the agents only. Their final registrations
/// are still consumed: the bus is closed once every agent has returned and
/// the aggregator drains it before stopping.
pub async fn run_fleet(
    config: &Config,
    bus: &InMemoryBus,
    store: Arc<dyn DocumentStore>,
    presenter: Arc<dyn Presenter>,
    shutdown: CancellationToken,
) -> BackplaneResult<Vec<NodeState>> {
    let mut agents = Vec::new();
    for profile in config.profiles() {
        let agent = LivenessAgent::new(profile, config.agent_timing(), Arc::new(bus.clone()))
            .with_recovery_policy(config.agent.recovery_policy);
        log::info!("Starting node {}", agent.identity().node_id);
        // No external fault source; the sender is dropped.
        let (_, faults) = mpsc::channel(1);
        agents.push(tokio::spawn(agent.run(shutdown.clone(), faults)));
    }

    let fleet = async {
        let mut states = Vec::with_capacity(agents.len());
        let mut failure = None;
        for agent in agents {
            match agent.await {
                Ok(Ok(state)) => states.push(state),
                Ok(Err(e)) => {
                    log::error!("Agent failed: {}", e);
                    failure = failure.or(Some(e));
                }
                Err(e) => {
                    log::error!("Agent task failed: {}", e);
                    failure = failure.or(Some(BackplaneError::Transport(e.to_string())));
                }
            }
        }
        bus.close();
        failure.map_or(Ok(states), Err)
    };

    let aggregator = async {
        let result = aggregate(config, bus, store, presenter, CancellationToken::new()).await;
        if result.is_err() {
            shutdown.cancel();
        }
        result
    };

    let (aggregated, states) = tokio::join!(aggregator, fleet);
    aggregated?;
    states
}
