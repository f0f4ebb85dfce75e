use thiserror::Error;

use crate::lifecycle::{LifecycleEvent, NodeState};

/// Failure taxonomy shared by agents and the aggregator.
///
/// `StoreWrite` and `Decode` are per-envelope and recoverable: callers log
/// them and drop the envelope. Everything else ends the process.
#[derive(Debug, Error)]
pub enum BackplaneError {
    #[error("cannot connect to transport at {endpoint}: {reason}")]
    TransportConnect { endpoint: String, reason: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("store write to {collection} failed: {reason}")]
    StoreWrite { collection: String, reason: String },

    #[error("cannot decode envelope from channel {channel}: {reason}")]
    Decode { channel: String, reason: String },

    #[error("recovery step '{step}' failed: {reason}")]
    RecoveryStep { step: String, reason: String },

    #[error("invalid lifecycle transition from {from:?} on {event:?}")]
    InvalidTransition {
        from: NodeState,
        event: LifecycleEvent,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BackplaneError {
    /// Errors the aggregator survives by dropping a single envelope.
    pub fn is_per_envelope(&self) -> bool {
        matches!(
            self,
            BackplaneError::StoreWrite { .. } | BackplaneError::Decode { .. }
        )
    }
}

pub type BackplaneResult<T> = std::result::Result<T, BackplaneError>;
