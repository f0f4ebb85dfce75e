//! End-to-end runs of the aggregator and the in-process fleet on tokio's
//! paused clock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use fleetwatch::engine::Presenter;
use fleetwatch::lifecycle::NodeState;
use fleetwatch::runtime::{aggregate, run_fleet};
use fleetwatch::storage::InMemoryDocumentStore;
use fleetwatch::transport::{DeliveryStream, InMemoryBus, TransportSink, TransportSource};
use fleetwatch::{BackplaneError, Config, DisplayZone, Envelope, EnvelopeFactory, NodeIdentity, NodeStatus};

struct Silent;

impl Presenter for Silent {
    fn present(&self, _view: &[Envelope], _zone: &DisplayZone) {}
}

fn quiet_config() -> Config {
    let mut config = Config::default();
    config.agent.fault_probability = Some(0.0);
    config.aggregator.api_port = None;
    config
}

#[tokio::test(start_paused = true)]
async fn test_final_registrations_reach_the_store() {
    let config = quiet_config();
    let bus = InMemoryBus::new();
    let store = Arc::new(InMemoryDocumentStore::new());
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let states = run_fleet(&config, &bus, store.clone(), Arc::new(Silent), shutdown)
        .await
        .unwrap();
    assert_eq!(states, vec![NodeState::Down; 3]);

    let health = store.documents("health_logs");
    let registrations = |status: &str| {
        health
            .iter()
            .filter(|d| d["message_type"] == "REGISTRATION" && d["status"] == status)
            .count()
    };
    assert_eq!(registrations("UP"), 3);
    assert_eq!(registrations("DOWN"), 3);
    // Every published health envelope was consumed before the aggregator stopped.
    assert_eq!(health.len(), bus.published("health_logs").len());
}

/// In-memory source that counts consumer releases.
#[derive(Default)]
struct CountingSource {
    bus: InMemoryBus,
    releases: AtomicUsize,
}

#[async_trait]
impl TransportSource for CountingSource {
    fn endpoint(&self) -> String {
        self.bus.endpoint()
    }

    async fn verify(&self) -> Result<(), BackplaneError> {
        Ok(())
    }

    async fn subscribe(&self, channel: &str, group: &str) -> Result<DeliveryStream, BackplaneError> {
        self.bus.subscribe(channel, group).await
    }

    async fn release(&self) -> Result<(), BackplaneError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_aggregate_releases_consumers_on_shutdown() {
    let config = quiet_config();
    let source = CountingSource::default();
    let store = Arc::new(InMemoryDocumentStore::new());
    let shutdown = CancellationToken::new();

    let node = EnvelopeFactory::new(NodeIdentity::fixed("N1", "PaymentGatewayService"));
    source
        .bus
        .publish("health_logs", node.registration(NodeStatus::Up).encode().unwrap())
        .await
        .unwrap();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    aggregate(&config, &source, store.clone(), Arc::new(Silent), shutdown)
        .await
        .unwrap();

    assert_eq!(source.releases.load(Ordering::SeqCst), 1);
    assert_eq!(store.count("health_logs"), 1);
}
