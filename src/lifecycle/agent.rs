//! Per-node liveness agent.
//!
//! One [`LivenessAgent`] runs inside each emitting process and drives four
//! concurrent activities: heartbeat emission, the self heartbeat monitor,
//! ordinary log emission and fault injection with recovery. Only the fault
//! activity writes the node state; the others read it through a
//! [`StatusReader`].

use serde_json::Map;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use super::entropy::{Entropy, OsEntropy};
use super::recovery::{RecoveryAction, RecoveryOutcome, RecoveryPolicy, SimulatedRecovery};
use super::state_machine::{LifecycleEvent, NodeState};
use super::status::{status_cell, StatusReader, StatusWriter};
use crate::error::BackplaneError;
use crate::profiles::{ContentGenerator, LogContent, ServiceProfile, TemplateContent};
use crate::routing::classify_by_severity;
use crate::transport::TransportSink;
use crate::types::{Envelope, EnvelopeFactory, NodeIdentity, NodeStatus, Severity};

/// Cadences shared by every agent regardless of service profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentTiming {
    pub heartbeat_interval: Duration,
    pub self_check_interval: Duration,
    pub heartbeat_threshold: Duration,
    pub fault_check_interval: Duration,
    pub recovery_step_delay: Duration,
    /// Upper bound on a single publish, including the final deregistration.
    pub publish_timeout: Duration,
}

impl Default for AgentTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            self_check_interval: Duration::from_secs(1),
            heartbeat_threshold: Duration::from_secs(10),
            fault_check_interval: Duration::from_secs(10),
            recovery_step_delay: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

pub struct LivenessAgent {
    factory: EnvelopeFactory,
    profile: ServiceProfile,
    timing: AgentTiming,
    policy: RecoveryPolicy,
    sink: Arc<dyn TransportSink>,
    content: Option<Arc<dyn ContentGenerator>>,
    entropy: Arc<dyn Entropy>,
    recovery_action: Arc<dyn RecoveryAction>,
    last_heartbeat: Mutex<Option<Instant>>,
}

impl LivenessAgent {
    pub fn new(profile: ServiceProfile, timing: AgentTiming, sink: Arc<dyn TransportSink>) -> Self {
        let identity = NodeIdentity::new(profile.name.clone(), &profile.node_prefix);
        Self {
            factory: EnvelopeFactory::new(identity),
            profile,
            timing,
            policy: RecoveryPolicy::default(),
            sink,
            content: None,
            entropy: Arc::new(OsEntropy),
            recovery_action: Arc::new(SimulatedRecovery),
            last_heartbeat: Mutex::new(None),
        }
    }

    pub fn with_identity(mut self, identity: NodeIdentity) -> Self {
        self.factory = EnvelopeFactory::new(identity);
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn Entropy>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Replace the profile's template-driven content.
    pub fn with_content(mut self, content: Arc<dyn ContentGenerator>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_recovery_action(mut self, action: Arc<dyn RecoveryAction>) -> Self {
        self.recovery_action = action;
        self
    }

    pub fn with_recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.factory.identity()
    }

    /// Run until `shutdown` is cancelled or a fatal error occurs.
    ///
    /// Every unit sent on `faults` requests one fault injection; faults that
    /// arrive while the node is not `UP` are ignored. The final
    /// `REGISTRATION{DOWN}` is attempted before this returns, on both the
    /// graceful and the failing path, within one publish timeout.
    pub async fn run(
        self,
        shutdown: CancellationToken,
        faults: mpsc::Receiver<()>,
    ) -> Result<NodeState, BackplaneError> {
        let (writer, reader) = status_cell(NodeState::Up);
        let content: Arc<dyn ContentGenerator> = match &self.content {
            Some(content) => content.clone(),
            None => Arc::new(TemplateContent::new(
                self.profile.name.clone(),
                self.profile.templates.clone(),
                self.entropy.clone(),
            )),
        };
        let node_id = self.identity().node_id.clone();

        log::info!("{} registering node {}", self.profile.name, node_id);
        self.publish(&self.factory.registration(NodeStatus::Up)).await?;

        let activities = async {
            tokio::try_join!(
                self.heartbeat_loop(reader.clone(), &shutdown),
                self.self_monitor_loop(&shutdown),
                self.log_loop(reader.clone(), content.as_ref(), &shutdown),
                self.fault_loop(&writer, content.as_ref(), faults, &shutdown),
            )
        };
        let result = activities.await;

        let state = writer.apply(LifecycleEvent::ShutdownRequested)?;
        if let Err(e) = self.publish(&self.factory.registration(NodeStatus::Down)).await {
            log::error!("Node {} could not publish final deregistration: {}", node_id, e);
        }
        log::info!("Node {} stopped", node_id);

        result.map(|_| state)
    }

    async fn heartbeat_loop(
        &self,
        reader: StatusReader,
        shutdown: &CancellationToken,
    ) -> Result<(), BackplaneError> {
        let mut ticker = interval(self.timing.heartbeat_interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let status = reader.current().reported_status();
                    match self.emit_until(self.factory.heartbeat(status), shutdown).await {
                        Some(true) => {
                            *self.last_heartbeat.lock().unwrap_or_else(PoisonError::into_inner) =
                                Some(Instant::now());
                        }
                        Some(false) => {}
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn self_monitor_loop(&self, shutdown: &CancellationToken) -> Result<(), BackplaneError> {
        let period = self.timing.self_check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let Some(silent) = self.silent_for() else { continue };
                    if silent > self.timing.heartbeat_threshold {
                        let message = format!(
                            "Missing heartbeat detected! Last heartbeat was {} seconds ago",
                            silent.as_secs()
                        );
                        log::error!("{}: {}", self.identity().node_id, message);
                        let alert = self.factory.log(Severity::Alert, message, Map::new());
                        if self.emit_until(alert, shutdown).await.is_none() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn log_loop(
        &self,
        reader: StatusReader,
        content: &dyn ContentGenerator,
        shutdown: &CancellationToken,
    ) -> Result<(), BackplaneError> {
        let bounds = self.profile.log_interval;
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            if reader.current() == NodeState::Up {
                let severity = self.profile.severity_weights.pick(self.entropy.draw());
                let LogContent { message, attributes } = content.generate(severity);
                let log = self.factory.log(severity, message, attributes);
                if self.emit_until(log, shutdown).await.is_none() {
                    return Ok(());
                }
            }

            let pause = Duration::from_secs(self.entropy.between(bounds.min_secs, bounds.max_secs));
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(pause) => {}
            }
        }
    }

    async fn fault_loop(
        &self,
        writer: &StatusWriter,
        content: &dyn ContentGenerator,
        mut faults: mpsc::Receiver<()>,
        shutdown: &CancellationToken,
    ) -> Result<(), BackplaneError> {
        let mut ticker = interval(self.timing.fault_check_interval);
        let mut faults_open = true;
        loop {
            let injected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                signal = faults.recv(), if faults_open => match signal {
                    Some(()) => true,
                    None => {
                        faults_open = false;
                        continue;
                    }
                },
                _ = ticker.tick() => self.entropy.draw() < self.profile.fault_probability,
            };
            if !injected || writer.current() != NodeState::Up {
                continue;
            }

            let outcome = self.recover(writer, content, shutdown).await?;
            // Faults raised while recovering are not queued for later.
            while faults.try_recv().is_ok() {}

            if let RecoveryOutcome::Aborted { completed_steps } = outcome {
                log::warn!(
                    "Node {} aborted recovery after {} of {} steps on shutdown",
                    self.identity().node_id,
                    completed_steps,
                    self.profile.recovery_steps.len()
                );
                return Ok(());
            }
            if shutdown.is_cancelled() {
                return Ok(());
            }
        }
    }

    async fn recover(
        &self,
        writer: &StatusWriter,
        content: &dyn ContentGenerator,
        shutdown: &CancellationToken,
    ) -> Result<RecoveryOutcome, BackplaneError> {
        let node_id = &self.identity().node_id;
        let fatal = content.generate(Severity::Fatal);
        log::warn!("Node {} fault: {}", node_id, fatal.message);
        self.emit(self.factory.log(Severity::Fatal, fatal.message, fatal.attributes))
            .await;

        writer.apply(LifecycleEvent::FaultDetected)?;
        self.publish(&self.factory.registration(NodeStatus::Down))
            .await
            .map_err(|e| recovery_failure("deregistration", e))?;

        for (done, step) in self.profile.recovery_steps.iter().enumerate() {
            self.recovery_action
                .perform(step)
                .await
                .map_err(|e| BackplaneError::RecoveryStep {
                    step: step.clone(),
                    reason: e.to_string(),
                })?;
            let envelope = self
                .factory
                .log(Severity::Info, format!("Recovery: {}", step), Map::new());
            self.publish(&envelope)
                .await
                .map_err(|e| recovery_failure(step, e))?;

            match self.policy {
                RecoveryPolicy::AbortOnShutdown => {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            return Ok(RecoveryOutcome::Aborted { completed_steps: done + 1 });
                        }
                        _ = sleep(self.timing.recovery_step_delay) => {}
                    }
                }
                RecoveryPolicy::CompleteThenShutdown => {
                    sleep(self.timing.recovery_step_delay).await;
                }
            }
        }

        writer.apply(LifecycleEvent::RecoveryCompleted)?;
        self.publish(&self.factory.registration(NodeStatus::Up))
            .await
            .map_err(|e| recovery_failure("re-registration", e))?;
        self.emit(self.factory.log(
            Severity::Info,
            self.profile.recovery_complete_message.clone(),
            Map::new(),
        ))
        .await;
        log::info!("Node {} recovered", node_id);

        Ok(RecoveryOutcome::Completed)
    }

    fn silent_for(&self) -> Option<Duration> {
        let last = *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last.map(|at| at.elapsed())
    }

    /// Best-effort publish; failures are logged and reported as `false`.
    async fn emit(&self, envelope: Envelope) -> bool {
        match self.publish(&envelope).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "Node {} dropped {} event {}: {}",
                    envelope.node_id,
                    envelope.kind.as_str(),
                    envelope.event_id.unwrap_or_default(),
                    e
                );
                false
            }
        }
    }

    /// [`Self::emit`] abandoned as soon as `shutdown` is cancelled, which
    /// yields `None`.
    async fn emit_until(&self, envelope: Envelope, shutdown: &CancellationToken) -> Option<bool> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            sent = self.emit(envelope) => Some(sent),
        }
    }

    async fn publish(&self, envelope: &Envelope) -> Result<(), BackplaneError> {
        let collection = classify_by_severity(envelope);
        let tagged = envelope
            .clone()
            .with_attribute("log_type", collection.log_type().into());
        let payload = tagged
            .encode()
            .map_err(|e| BackplaneError::Transport(format!("cannot encode envelope: {}", e)))?;
        timeout(
            self.timing.publish_timeout,
            self.sink.publish(collection.as_str(), payload),
        )
        .await
        .map_err(|_| {
            BackplaneError::Transport(format!(
                "publish to {} timed out after {:?}",
                collection, self.timing.publish_timeout
            ))
        })?
    }
}

fn recovery_failure(step: &str, error: BackplaneError) -> BackplaneError {
    BackplaneError::RecoveryStep {
        step: step.to_string(),
        reason: error.to_string(),
    }
}
