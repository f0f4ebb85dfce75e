pub mod agent;
pub mod entropy;
pub mod recovery;
pub mod state_machine;
pub mod status;

pub use agent::{AgentTiming, LivenessAgent};
pub use entropy::{Entropy, OsEntropy, ScriptedEntropy};
pub use recovery::{RecoveryAction, RecoveryOutcome, RecoveryPolicy, SimulatedRecovery};
pub use state_machine::{LifecycleEvent, NodeState, NodeStateMachine};
pub use status::{status_cell, StatusReader, StatusWriter};
