pub mod envelope;
pub mod timestamp;

pub use envelope::{Envelope, EnvelopeFactory, NodeIdentity, RESERVED_FIELDS};
pub use timestamp::DisplayZone;

use serde::{Deserialize, Serialize};

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    Log,          // Application log line, carries severity + message
    Heartbeat,    // Periodic liveness beacon, carries status
    Registration, // Node (de)registration notice, carries status
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Log => "LOG",
            EnvelopeKind::Heartbeat => "HEARTBEAT",
            EnvelopeKind::Registration => "REGISTRATION",
        }
    }

    pub fn carries_status(&self) -> bool {
        matches!(self, EnvelopeKind::Heartbeat | EnvelopeKind::Registration)
    }
}

/// Log severity, declared in ascending order of urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Fatal,
    Alert,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Alert => "ALERT",
        }
    }

    pub fn is_alerting(&self) -> bool {
        *self >= Severity::Fatal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Up,
    Down,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Up => "UP",
            NodeStatus::Down => "DOWN",
        }
    }
}
