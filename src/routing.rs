//! Envelope → collection routing.
//!
//! Two policies exist because the display consumer and the store-indexing
//! consumer key on different fields. Anything neither policy recognizes lands
//! in `service_logs`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{Envelope, EnvelopeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    ServiceLogs,
    AlertLogs,
    HealthLogs,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::ServiceLogs,
        Collection::AlertLogs,
        Collection::HealthLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::ServiceLogs => "service_logs",
            Collection::AlertLogs => "alert_logs",
            Collection::HealthLogs => "health_logs",
        }
    }

    /// Value of the `log_type` attribute that routes to this collection.
    pub fn log_type(&self) -> &'static str {
        match self {
            Collection::ServiceLogs => "service",
            Collection::AlertLogs => "alert",
            Collection::HealthLogs => "health",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown collection '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Route on `message_type` and `log_level`.
    #[default]
    Severity,
    /// Route on the `log_type` attribute.
    LogType,
}

pub fn classify(envelope: &Envelope, policy: RoutingPolicy) -> Collection {
    match policy {
        RoutingPolicy::Severity => classify_by_severity(envelope),
        RoutingPolicy::LogType => classify_by_log_type(envelope),
    }
}

pub fn classify_by_severity(envelope: &Envelope) -> Collection {
    match (envelope.kind, envelope.severity) {
        (EnvelopeKind::Heartbeat | EnvelopeKind::Registration, _) => Collection::HealthLogs,
        (EnvelopeKind::Log, Some(severity)) if severity.is_alerting() => Collection::AlertLogs,
        (EnvelopeKind::Log, _) => Collection::ServiceLogs,
    }
}

pub fn classify_by_log_type(envelope: &Envelope) -> Collection {
    match envelope.log_type() {
        Some("alert") => Collection::AlertLogs,
        Some("health") => Collection::HealthLogs,
        _ => Collection::ServiceLogs,
    }
}
