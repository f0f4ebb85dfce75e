//! Integration tests for the aggregator pipeline: routing into the store,
//! ordered presentation and failure handling.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fleetwatch::engine::{
    render_line, AggregatorPipeline, DisplayBuffer, Ingested, LivenessRegistry, Presenter,
    SharedDisplay,
};
use fleetwatch::routing::{Collection, RoutingPolicy};
use fleetwatch::storage::InMemoryDocumentStore;
use fleetwatch::transport::{
    Delivery, DeliveryStream, InMemoryBus, Multiplexer, TransportSink, TransportSource,
};
use fleetwatch::{BackplaneError, DisplayZone, Envelope, EnvelopeFactory, NodeIdentity, NodeStatus, Severity};

/// Keeps the lines of the most recent render pass.
#[derive(Default)]
struct CapturePresenter {
    last_render: Mutex<Vec<String>>,
    renders: Mutex<usize>,
}

impl CapturePresenter {
    fn lines(&self) -> Vec<String> {
        self.last_render.lock().unwrap().clone()
    }

    fn renders(&self) -> usize {
        *self.renders.lock().unwrap()
    }
}

impl Presenter for CapturePresenter {
    fn present(&self, view: &[Envelope], zone: &DisplayZone) {
        *self.last_render.lock().unwrap() = view.iter().map(|e| render_line(e, zone)).collect();
        *self.renders.lock().unwrap() += 1;
    }
}

struct Harness {
    store: Arc<InMemoryDocumentStore>,
    registry: LivenessRegistry,
    display: SharedDisplay,
    presenter: Arc<CapturePresenter>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryDocumentStore::new()),
            registry: LivenessRegistry::new(),
            display: DisplayBuffer::new(100, None).shared(),
            presenter: Arc::new(CapturePresenter::default()),
        }
    }

    fn pipeline(&self) -> AggregatorPipeline {
        AggregatorPipeline::new(
            self.store.clone(),
            self.registry.clone(),
            self.display.clone(),
            self.presenter.clone(),
        )
    }
}

fn raw(json: &str) -> Envelope {
    Envelope::decode(json.as_bytes()).unwrap()
}

fn channels() -> Vec<String> {
    Collection::ALL.iter().map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn test_fatal_log_is_stored_in_alert_logs() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();

    let ingested = pipeline
        .handle(raw(
            r#"{"node_id":"N2","message_type":"LOG","log_level":"FATAL","message":"core down"}"#,
        ))
        .await;

    assert_eq!(
        ingested,
        Ingested {
            collection: Collection::AlertLogs,
            stored: true
        }
    );
    let docs = harness.store.documents("alert_logs");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["node_id"], "N2");
    assert_eq!(docs[0]["log_level"], "FATAL");
    assert!(docs[0]["timestamp"].is_string());
    assert_eq!(harness.store.count("service_logs"), 0);
}

#[tokio::test]
async fn test_envelopes_without_event_id_are_kept_apart() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();

    for payload in [
        r#"{"log_id":"a1","node_id":"PaymentService_ab","message_type":"LOG","log_level":"INFO","message":"charged"}"#,
        r#"{"log_id":"a2","node_id":"PaymentService_ab","message_type":"LOG","log_level":"INFO","message":"refunded"}"#,
        r#"{"node_id":"PaymentService_ab","message_type":"LOG","log_level":"INFO","message":"settled"}"#,
        r#"{"node_id":"PaymentService_ab","message_type":"LOG","log_level":"INFO","message":"settled again"}"#,
    ] {
        assert!(pipeline.handle(raw(payload)).await.stored);
    }

    let docs = harness.store.documents("service_logs");
    assert_eq!(docs.len(), 4);
    let mut messages: Vec<_> = docs.iter().map(|d| d["message"].as_str().unwrap().to_string()).collect();
    messages.sort();
    assert_eq!(messages, vec!["charged", "refunded", "settled", "settled again"]);
}

#[tokio::test]
async fn test_render_order_follows_timestamps_not_arrival() {
    let harness = Harness::new();
    let pipeline = harness.pipeline().with_zone("+05:30".parse().unwrap());

    pipeline
        .handle(raw(
            r#"{"event_id":2,"node_id":"N1","message_type":"LOG","log_level":"INFO","message":"second","timestamp":"2024-01-01T00:00:02"}"#,
        ))
        .await;
    pipeline
        .handle(raw(
            r#"{"event_id":1,"node_id":"N3","message_type":"LOG","log_level":"WARN","message":"first","timestamp":"2024-01-01T00:00:01+00:00"}"#,
        ))
        .await;

    assert_eq!(harness.presenter.renders(), 2);
    assert_eq!(
        harness.presenter.lines(),
        vec![
            "[WARN] 2024-01-01T05:30:01.000000+05:30 - N3 - first".to_string(),
            "[INFO] 2024-01-01T05:30:02.000000+05:30 - N1 - second".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_store_rejection_drops_without_stopping() {
    let harness = Harness::new();
    harness.store.reject_collection("alert_logs");
    let pipeline = harness.pipeline();

    let rejected = pipeline
        .handle(raw(r#"{"node_id":"N2","message_type":"LOG","log_level":"ALERT","message":"stale"}"#))
        .await;
    let accepted = pipeline
        .handle(raw(r#"{"node_id":"N2","message_type":"HEARTBEAT","status":"UP"}"#))
        .await;

    assert!(!rejected.stored);
    assert!(accepted.stored);
    assert_eq!(harness.store.count("alert_logs"), 0);
    assert_eq!(harness.store.count("health_logs"), 1);
    // Rejected envelopes are still shown.
    assert_eq!(harness.display.read().await.len(), 2);
}

#[tokio::test]
async fn test_log_type_policy_for_indexing() {
    let harness = Harness::new();
    let pipeline = harness.pipeline().with_policy(RoutingPolicy::LogType);

    let untagged = pipeline
        .handle(raw(r#"{"node_id":"N2","message_type":"LOG","log_level":"FATAL","message":"x"}"#))
        .await;
    let tagged = pipeline
        .handle(raw(
            r#"{"node_id":"N2","message_type":"LOG","log_level":"FATAL","message":"y","log_type":"alert"}"#,
        ))
        .await;

    assert_eq!(untagged.collection, Collection::ServiceLogs);
    assert_eq!(tagged.collection, Collection::AlertLogs);
}

#[tokio::test]
async fn test_liveness_registry_updated_on_arrival() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let node = EnvelopeFactory::new(NodeIdentity::fixed("StockService_00ff00ff", "StockTradingService"));

    pipeline.handle(node.registration(NodeStatus::Up)).await;
    pipeline.handle(node.heartbeat(NodeStatus::Up)).await;

    let record = harness.registry.get("StockService_00ff00ff").await.unwrap();
    assert_eq!(record.declared_status, Some(NodeStatus::Up));
    assert!(record.last_heartbeat_at.is_some());
    assert_eq!(record.service_name, "StockTradingService");
}

#[tokio::test]
async fn test_run_consumes_all_channels_and_alerts() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let bus = InMemoryBus::new();
    let node = EnvelopeFactory::new(NodeIdentity::fixed("UserService_12345678", "UserProfileService"));

    let publish = |collection: Collection, envelope: Envelope| {
        let bus = bus.clone();
        async move {
            bus.publish(collection.as_str(), envelope.encode().unwrap())
                .await
                .unwrap()
        }
    };
    publish(Collection::HealthLogs, node.registration(NodeStatus::Up)).await;
    publish(Collection::ServiceLogs, node.log(Severity::Info, "Profile updated", Default::default())).await;
    publish(Collection::AlertLogs, node.log(Severity::Fatal, "Database cluster failure", Default::default())).await;
    bus.publish("service_logs", b"{broken".to_vec()).await.unwrap();

    let (alerts_tx, alerts_rx) = mpsc::channel(4);
    alerts_tx
        .send(node.log(Severity::Alert, "Missing heartbeat", Default::default()))
        .await
        .unwrap();
    drop(alerts_tx);
    bus.close();

    let shutdown = CancellationToken::new();
    let multiplexer = Multiplexer::subscribe(&bus, &channels(), "log_consumer_group")
        .await
        .unwrap();
    pipeline
        .run(multiplexer, alerts_rx, shutdown.clone())
        .await
        .unwrap();

    assert_eq!(harness.store.count("health_logs"), 1);
    assert_eq!(harness.store.count("service_logs"), 1);
    assert_eq!(harness.store.count("alert_logs"), 2);
    assert_eq!(harness.presenter.lines().len(), 4);
}

struct BrokenSource;

#[async_trait]
impl TransportSource for BrokenSource {
    fn endpoint(&self) -> String {
        "broken://".to_string()
    }

    async fn verify(&self) -> Result<(), BackplaneError> {
        Ok(())
    }

    async fn subscribe(&self, channel: &str, _group: &str) -> Result<DeliveryStream, BackplaneError> {
        let items: Vec<Result<Delivery, BackplaneError>> = vec![
            Ok(Delivery {
                channel: channel.to_string(),
                partition: 0,
                offset: 0,
                payload: br#"{"node_id":"N1","message_type":"HEARTBEAT","status":"UP"}"#.to_vec(),
            }),
            Err(BackplaneError::Transport("broker went away".to_string())),
        ];
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[tokio::test]
async fn test_transport_failure_is_fatal() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let (_alerts_tx, alerts_rx) = mpsc::channel(1);
    let shutdown = CancellationToken::new();

    let multiplexer = Multiplexer::subscribe(&BrokenSource, &["health_logs".to_string()], "g")
        .await
        .unwrap();
    let err = pipeline
        .run(multiplexer, alerts_rx, shutdown.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, BackplaneError::Transport(_)));
    assert_eq!(harness.store.count("health_logs"), 1);
}

#[tokio::test]
async fn test_shutdown_stops_an_idle_pipeline() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let bus = InMemoryBus::new();
    let (_alerts_tx, alerts_rx) = mpsc::channel(1);
    let shutdown = CancellationToken::new();

    let multiplexer = Multiplexer::subscribe(&bus, &channels(), "g").await.unwrap();
    shutdown.cancel();
    pipeline
        .run(multiplexer, alerts_rx, shutdown.clone())
        .await
        .unwrap();
    assert_eq!(harness.presenter.renders(), 0);
}
