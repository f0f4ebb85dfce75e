use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::liveness_monitor::LivenessRegistry;
use super::presentation::{Presenter, SharedDisplay};
use crate::error::BackplaneError;
use crate::routing::{classify, Collection, RoutingPolicy};
use crate::storage::{DocumentStore, UpsertOutcome};
use crate::transport::Multiplexer;
use crate::types::{DisplayZone, Envelope};

/// What happened to one envelope on its way through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub collection: Collection,
    pub stored: bool,
}

/// Multiplexer → classifier → store → ordered presentation, one envelope at
/// a time.
pub struct AggregatorPipeline {
    store: Arc<dyn DocumentStore>,
    policy: RoutingPolicy,
    registry: LivenessRegistry,
    display: SharedDisplay,
    presenter: Arc<dyn Presenter>,
    zone: DisplayZone,
}

impl AggregatorPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: LivenessRegistry,
        display: SharedDisplay,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            store,
            policy: RoutingPolicy::default(),
            registry,
            display,
            presenter,
            zone: DisplayZone::utc(),
        }
    }

    pub fn with_policy(mut self, policy: RoutingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_zone(mut self, zone: DisplayZone) -> Self {
        self.zone = zone;
        self
    }

    /// Process one envelope. Store failures are logged and the envelope is
    /// not stored, but it is still recorded and displayed.
    pub async fn handle(&self, envelope: Envelope) -> Ingested {
        let received_at = Utc::now();
        let envelope = envelope.stamped(received_at);

        self.registry.observe(&envelope).await;

        let collection = classify(&envelope, self.policy);
        let stored = self.store_envelope(&envelope, collection).await;

        let mut display = self.display.write().await;
        display.push(envelope, received_at);
        self.presenter.present(display.view(), &self.zone);

        Ingested { collection, stored }
    }

    async fn store_envelope(&self, envelope: &Envelope, collection: Collection) -> bool {
        let failure = |reason: String| BackplaneError::StoreWrite {
            collection: collection.to_string(),
            reason,
        };

        let document = match serde_json::to_value(envelope) {
            Ok(document) => document,
            Err(e) => {
                log::error!("{}", failure(e.to_string()));
                return false;
            }
        };
        // Payloads without any id of their own get a fresh one so they never
        // replace each other.
        let id = envelope
            .document_id()
            .unwrap_or_else(|| format!("{}-{}", envelope.node_id, uuid::Uuid::new_v4().simple()));

        let outcome = match self.store.upsert(collection.as_str(), &id, &document).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Dropping {}: {}", id, failure(e.to_string()));
                return false;
            }
        };
        if let UpsertOutcome::Rejected { reason } = &outcome {
            log::error!("Dropping {}: {}", id, failure(reason.clone()));
        }
        outcome.is_accepted()
    }

    /// Consume until shutdown or until every channel ends. Aggregator alerts
    /// arriving on `alerts` are processed like any other envelope. Undecodable
    /// payloads are logged and skipped; a transport failure ends the loop
    /// with an error.
    pub async fn run(
        &self,
        mut multiplexer: Multiplexer,
        mut alerts: mpsc::Receiver<Envelope>,
        shutdown: CancellationToken,
    ) -> Result<(), BackplaneError> {
        let mut alerts_open = true;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::info!("Aggregator pipeline stopping");
                    return Ok(());
                }
                alert = alerts.recv(), if alerts_open => match alert {
                    Some(envelope) => {
                        self.handle(envelope).await;
                    }
                    None => alerts_open = false,
                },
                next = multiplexer.next_envelope() => match next {
                    Some(Ok(envelope)) => {
                        self.handle(envelope).await;
                    }
                    Some(Err(e)) if e.is_per_envelope() => {
                        log::warn!("Dropping envelope: {}", e);
                    }
                    Some(Err(e)) => {
                        log::error!("Error while consuming: {}", e);
                        return Err(e);
                    }
                    None => {
                        log::info!("All channels of {} closed", multiplexer.channels().join(", "));
                        return Ok(());
                    }
                },
            }
        }
    }
}
