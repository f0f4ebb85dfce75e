//! Aggregator-side view of node liveness.
//!
//! The registry is written only by the pipeline's arrival handler and read by
//! the monitor and the API. Staleness is judged on aggregator arrival time,
//! so it can disagree with a node's own self-check; that disagreement is kept.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::types::{Envelope, EnvelopeFactory, EnvelopeKind, NodeId, NodeIdentity, NodeStatus, Severity};

pub const AGGREGATOR_NODE_ID: &str = "fleetwatch-aggregator";
pub const AGGREGATOR_SERVICE: &str = "FleetwatchAggregator";

#[derive(Debug, Clone, Serialize)]
pub struct LivenessRecord {
    pub node_id: NodeId,
    pub service_name: String,
    /// Wall-clock arrival of the latest `HEARTBEAT{UP}`.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Status from the latest heartbeat or registration, by arrival order.
    pub declared_status: Option<NodeStatus>,
    /// Latest status-bearing envelope was `REGISTRATION{DOWN}`.
    pub deregistered: bool,
    pub last_seen_at: DateTime<Utc>,
    #[serde(skip)]
    last_heartbeat: Option<Instant>,
}

impl LivenessRecord {
    fn new(envelope: &Envelope, now: DateTime<Utc>) -> Self {
        Self {
            node_id: envelope.node_id.clone(),
            service_name: envelope.service_name.clone(),
            last_heartbeat_at: None,
            declared_status: None,
            deregistered: false,
            last_seen_at: now,
            last_heartbeat: None,
        }
    }

    /// Time since the latest `HEARTBEAT{UP}`, if one has arrived.
    pub fn silent_for(&self, now: Instant) -> Option<Duration> {
        self.last_heartbeat.map(|at| now.saturating_duration_since(at))
    }

    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        !self.deregistered && self.silent_for(now).is_some_and(|silent| silent > threshold)
    }
}

#[derive(Clone, Default)]
pub struct LivenessRegistry {
    records: Arc<RwLock<HashMap<NodeId, LivenessRecord>>>,
}

impl LivenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one arrived envelope into its node's record.
    pub async fn observe(&self, envelope: &Envelope) {
        let arrived = Instant::now();
        let now = Utc::now();
        let mut records = self.records.write().await;
        let record = records
            .entry(envelope.node_id.clone())
            .or_insert_with(|| LivenessRecord::new(envelope, now));
        record.last_seen_at = now;

        let Some(status) = envelope.status.filter(|_| envelope.kind.carries_status()) else {
            return;
        };
        record.declared_status = Some(status);
        if envelope.is_heartbeat_up() {
            record.last_heartbeat = Some(arrived);
            record.last_heartbeat_at = Some(now);
            record.deregistered = false;
            return;
        }
        match (envelope.kind, status) {
            (EnvelopeKind::Registration, NodeStatus::Up) => record.deregistered = false,
            (EnvelopeKind::Registration, NodeStatus::Down) => record.deregistered = true,
            _ => {}
        }
    }

    pub async fn get(&self, node_id: &str) -> Option<LivenessRecord> {
        self.records.read().await.get(node_id).cloned()
    }

    /// All records ordered by node id.
    pub async fn snapshot(&self) -> Vec<LivenessRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        records
    }
}

/// One node found stale by a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleNode {
    pub node_id: NodeId,
    pub silent_for: Duration,
}

pub struct LivenessMonitor {
    registry: LivenessRegistry,
    threshold: Duration,
    poll_interval: Duration,
    factory: EnvelopeFactory,
}

impl LivenessMonitor {
    pub fn new(registry: LivenessRegistry, threshold: Duration, poll_interval: Duration) -> Self {
        Self {
            registry,
            threshold,
            poll_interval,
            // Each aggregator run numbers its alerts from 1, so it needs its
            // own node id or a restart would overwrite earlier alerts.
            factory: EnvelopeFactory::new(NodeIdentity::new(AGGREGATOR_SERVICE, AGGREGATOR_NODE_ID)),
        }
    }

    /// Node id this monitor's alerts are published under.
    pub fn node_id(&self) -> &str {
        &self.factory.identity().node_id
    }

    /// Nodes whose last `HEARTBEAT{UP}` arrived more than the threshold
    /// before `now`. Deregistered nodes are skipped.
    pub async fn check(&self, now: Instant) -> Vec<StaleNode> {
        let records = self.registry.records.read().await;
        let mut stale: Vec<StaleNode> = records
            .values()
            .filter(|record| record.is_stale(now, self.threshold))
            .filter_map(|record| {
                Some(StaleNode {
                    node_id: record.node_id.clone(),
                    silent_for: record.silent_for(now)?,
                })
            })
            .collect();
        stale.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        stale
    }

    pub fn alert_for(&self, stale: &StaleNode) -> Envelope {
        let mut attributes = Map::new();
        attributes.insert("stale_node_id".to_string(), Value::from(stale.node_id.clone()));
        attributes.insert("silent_secs".to_string(), Value::from(stale.silent_for.as_secs()));
        attributes.insert("log_type".to_string(), Value::from("alert"));
        attributes.insert("reporter".to_string(), Value::from(AGGREGATOR_NODE_ID));
        self.factory.log(
            Severity::Alert,
            format!(
                "Node {} missed heartbeats: last heartbeat received {} seconds ago",
                stale.node_id,
                stale.silent_for.as_secs()
            ),
            attributes,
        )
    }

    /// Poll until shutdown, sending one alert per stale node per poll.
    pub async fn run(self, alerts: mpsc::Sender<Envelope>, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    for stale in self.check(Instant::now()).await {
                        let alert = self.alert_for(&stale);
                        log::error!("{}", alert.message.as_deref().unwrap_or_default());
                        if alerts.send(alert).await.is_err() {
                            log::warn!("Alert channel closed, liveness monitor stopping");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(node: &str) -> EnvelopeFactory {
        EnvelopeFactory::new(NodeIdentity::fixed(node, "StockTradingService"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_strictly_greater_than_threshold() {
        let registry = LivenessRegistry::new();
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(10), Duration::from_secs(1));
        let start = Instant::now();
        registry.observe(&identity("N1").heartbeat(NodeStatus::Up)).await;

        assert!(monitor.check(start + Duration::from_secs(10)).await.is_empty());
        let stale = monitor.check(start + Duration::from_secs(11)).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].node_id, "N1");
        assert_eq!(stale[0].silent_for, Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregistered_nodes_are_not_stale() {
        let registry = LivenessRegistry::new();
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(10), Duration::from_secs(1));
        let node = identity("N1");
        let start = Instant::now();
        registry.observe(&node.heartbeat(NodeStatus::Up)).await;
        registry.observe(&node.registration(NodeStatus::Down)).await;

        assert!(monitor.check(start + Duration::from_secs(60)).await.is_empty());

        registry.observe(&node.registration(NodeStatus::Up)).await;
        assert_eq!(monitor.check(start + Duration::from_secs(60)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_declared_status_follows_arrival_order() {
        let registry = LivenessRegistry::new();
        let node = identity("N3");
        registry.observe(&node.heartbeat(NodeStatus::Up)).await;
        registry.observe(&node.heartbeat(NodeStatus::Down)).await;
        registry.observe(&node.log(Severity::Info, "still here", Map::new())).await;

        let record = registry.get("N3").await.unwrap();
        assert_eq!(record.declared_status, Some(NodeStatus::Down));
        assert!(record.last_heartbeat_at.is_some());
        assert!(!record.deregistered);
    }

    #[test]
    fn test_alert_envelope_shape() {
        let monitor = LivenessMonitor::new(LivenessRegistry::new(), Duration::from_secs(10), Duration::from_secs(1));
        let alert = monitor.alert_for(&StaleNode {
            node_id: "N1".to_string(),
            silent_for: Duration::from_secs(15),
        });
        assert!(alert.node_id.starts_with(&format!("{}_", AGGREGATOR_NODE_ID)));
        assert_eq!(alert.node_id, monitor.node_id());
        assert_eq!(alert.attribute("reporter"), Some(&Value::from(AGGREGATOR_NODE_ID)));
        assert_eq!(alert.severity, Some(Severity::Alert));
        assert_eq!(alert.log_type(), Some("alert"));
        assert_eq!(alert.attribute("stale_node_id"), Some(&Value::from("N1")));
    }

    #[test]
    fn test_restarted_monitor_does_not_reuse_alert_ids() {
        let stale = StaleNode {
            node_id: "N1".to_string(),
            silent_for: Duration::from_secs(15),
        };
        let first = LivenessMonitor::new(LivenessRegistry::new(), Duration::from_secs(10), Duration::from_secs(1));
        let restarted = LivenessMonitor::new(LivenessRegistry::new(), Duration::from_secs(10), Duration::from_secs(1));

        let a = first.alert_for(&stale);
        let b = restarted.alert_for(&stale);
        assert_eq!(a.event_id, b.event_id);
        assert_ne!(a.document_id(), b.document_id());
    }
}
