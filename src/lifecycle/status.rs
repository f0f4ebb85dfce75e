//! Single-writer cell holding a node's current [`NodeState`].
//!
//! Only the fault/recovery activity owns a [`StatusWriter`]; every other
//! activity reads through a [`StatusReader`] and must tolerate the value
//! changing between read and use.

use tokio::sync::watch;

use super::state_machine::{LifecycleEvent, NodeState, NodeStateMachine};
use crate::error::BackplaneError;

pub struct StatusWriter {
    tx: watch::Sender<NodeState>,
}

#[derive(Debug, Clone)]
pub struct StatusReader {
    rx: watch::Receiver<NodeState>,
}

pub fn status_cell(initial: NodeState) -> (StatusWriter, StatusReader) {
    let (tx, rx) = watch::channel(initial);
    (StatusWriter { tx }, StatusReader { rx })
}

impl StatusWriter {
    pub fn current(&self) -> NodeState {
        *self.tx.borrow()
    }

    /// Apply `event` through the state machine and publish the new state.
    pub fn apply(&self, event: LifecycleEvent) -> Result<NodeState, BackplaneError> {
        let next = NodeStateMachine::transition(self.current(), event)?;
        self.tx.send_replace(next);
        Ok(next)
    }

    pub fn reader(&self) -> StatusReader {
        StatusReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl StatusReader {
    pub fn current(&self) -> NodeState {
        *self.rx.borrow()
    }
}
