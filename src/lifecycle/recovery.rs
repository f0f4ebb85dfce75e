use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What an in-flight recovery does when shutdown is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryPolicy {
    /// Stop between steps and go straight to the final deregistration.
    #[default]
    AbortOnShutdown,
    /// Run the remaining steps, re-register, then deregister.
    CompleteThenShutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Completed,
    Aborted { completed_steps: usize },
}

/// Side effect executed for each recovery step, before the step is logged.
/// Any error is fatal to the node.
#[async_trait]
pub trait RecoveryAction: Send + Sync {
    async fn perform(&self, step: &str) -> Result<()>;
}

/// Simulated recovery: every step succeeds immediately.
pub struct SimulatedRecovery;

#[async_trait]
impl RecoveryAction for SimulatedRecovery {
    async fn perform(&self, _step: &str) -> Result<()> {
        Ok(())
    }
}
