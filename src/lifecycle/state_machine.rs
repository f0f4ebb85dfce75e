use serde::{Deserialize, Serialize};

use crate::error::BackplaneError;
use crate::types::NodeStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Up,         // Serving, emitting logs
    Recovering, // Running the recovery sequence
    Down,       // Shut down, terminal
}

impl NodeState {
    pub fn as_str(&self) -> &str {
        match self {
            NodeState::Up => "UP",
            NodeState::Recovering => "RECOVERING",
            NodeState::Down => "DOWN",
        }
    }

    /// Status reported in heartbeats and registrations.
    pub fn reported_status(&self) -> NodeStatus {
        match self {
            NodeState::Up => NodeStatus::Up,
            NodeState::Recovering | NodeState::Down => NodeStatus::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    FaultDetected,
    RecoveryCompleted,
    ShutdownRequested,
}

pub struct NodeStateMachine;

impl NodeStateMachine {
    pub fn transition(
        state: NodeState,
        event: LifecycleEvent,
    ) -> Result<NodeState, BackplaneError> {
        let next = match (state, event) {
            (NodeState::Up, LifecycleEvent::FaultDetected) => NodeState::Recovering,
            (NodeState::Recovering, LifecycleEvent::RecoveryCompleted) => NodeState::Up,
            (NodeState::Up | NodeState::Recovering, LifecycleEvent::ShutdownRequested) => {
                NodeState::Down
            }
            (from, event) => {
                return Err(BackplaneError::InvalidTransition { from, event });
            }
        };
        Ok(next)
    }
}
