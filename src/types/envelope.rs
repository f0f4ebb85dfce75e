use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Mutex, PoisonError};

use super::timestamp;
use super::{EnvelopeKind, NodeId, NodeStatus, Severity};

/// Wire keys owned by the envelope itself. Attributes can never shadow them.
pub const RESERVED_FIELDS: &[&str] = &[
    "event_id",
    "node_id",
    "service_name",
    "message_type",
    "log_level",
    "status",
    "message",
    "timestamp",
];

/// One observable event emitted by a node.
///
/// Envelopes are built by an [`EnvelopeFactory`] and never mutated after
/// emission; the aggregator derives new values (e.g. [`Envelope::stamped`])
/// instead of editing in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Node-scoped sequence number. Emitters that predate it leave it out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u64>,
    pub node_id: NodeId,
    #[serde(default)]
    pub service_name: String,
    #[serde(rename = "message_type")]
    pub kind: EnvelopeKind,
    #[serde(rename = "log_level", default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::lenient"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Envelope {
    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Store key built from the node id and the envelope's own id: the
    /// `event_id` if present, else an emitter-supplied `log_id`. `None` when
    /// the payload carries neither.
    pub fn document_id(&self) -> Option<String> {
        let key = match (self.event_id, self.attribute("log_id")) {
            (Some(id), _) => id.to_string(),
            (None, Some(Value::String(id))) if !id.is_empty() => id.clone(),
            (None, Some(Value::Number(id))) => id.to_string(),
            _ => return None,
        };
        Some(format!("{}-{}", self.node_id, key))
    }

    /// Returns this envelope with `fallback` as its timestamp if it had none.
    pub fn stamped(self, fallback: DateTime<Utc>) -> Self {
        if self.timestamp.is_some() {
            return self;
        }
        Self {
            timestamp: Some(fallback),
            ..self
        }
    }

    /// Returns this envelope with an extra attribute. Reserved keys and keys
    /// already present are left untouched.
    pub fn with_attribute(self, key: &str, value: Value) -> Self {
        if RESERVED_FIELDS.contains(&key) || self.attributes.contains_key(key) {
            return self;
        }
        let mut attributes = self.attributes;
        attributes.insert(key.to_string(), value);
        Self { attributes, ..self }
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn log_type(&self) -> Option<&str> {
        self.attribute("log_type").and_then(Value::as_str)
    }

    pub fn is_heartbeat_up(&self) -> bool {
        self.kind == EnvelopeKind::Heartbeat && self.status == Some(NodeStatus::Up)
    }
}

/// Stable identity of one running node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_id: NodeId,
    pub service_name: String,
}

impl NodeIdentity {
    /// Derive a fresh node id from the service's node prefix and a random
    /// runtime suffix, e.g. `PaymentService_1a2b3c4d`.
    pub fn new(service_name: impl Into<String>, node_prefix: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            node_id: format!("{}_{}", node_prefix, &suffix[..8]),
            service_name: service_name.into(),
        }
    }

    pub fn fixed(node_id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            service_name: service_name.into(),
        }
    }
}

struct Sequence {
    next_event_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Builds envelopes for one node, assigning node-scoped event ids and
/// timestamps that never go backwards even if the wall clock does.
pub struct EnvelopeFactory {
    identity: NodeIdentity,
    sequence: Mutex<Sequence>,
}

impl EnvelopeFactory {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            sequence: Mutex::new(Sequence {
                next_event_id: 1,
                last_timestamp: None,
            }),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn log(
        &self,
        severity: Severity,
        message: impl Into<String>,
        attributes: Map<String, Value>,
    ) -> Envelope {
        self.build(
            EnvelopeKind::Log,
            Some(severity),
            None,
            Some(message.into()),
            attributes,
        )
    }

    pub fn heartbeat(&self, status: NodeStatus) -> Envelope {
        self.build(EnvelopeKind::Heartbeat, None, Some(status), None, Map::new())
    }

    pub fn registration(&self, status: NodeStatus) -> Envelope {
        self.build(
            EnvelopeKind::Registration,
            None,
            Some(status),
            None,
            Map::new(),
        )
    }

    fn build(
        &self,
        kind: EnvelopeKind,
        severity: Option<Severity>,
        status: Option<NodeStatus>,
        message: Option<String>,
        mut attributes: Map<String, Value>,
    ) -> Envelope {
        attributes.retain(|key, _| !RESERVED_FIELDS.contains(&key.as_str()));

        let (event_id, timestamp) = {
            let mut seq = self
                .sequence
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Utc::now();
            let timestamp = match seq.last_timestamp {
                Some(last) if last > now => last,
                _ => now,
            };
            let event_id = seq.next_event_id;
            seq.next_event_id += 1;
            seq.last_timestamp = Some(timestamp);
            (event_id, timestamp)
        };

        Envelope {
            event_id: Some(event_id),
            node_id: self.identity.node_id.clone(),
            service_name: self.identity.service_name.clone(),
            kind,
            severity,
            status,
            message,
            timestamp: Some(timestamp),
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factory() -> EnvelopeFactory {
        EnvelopeFactory::new(NodeIdentity::fixed("PaymentService_abcd1234", "PaymentGatewayService"))
    }

    #[test]
    fn test_node_identity_derivation() {
        let identity = NodeIdentity::new("StockTradingService", "StockService");
        assert!(identity.node_id.starts_with("StockService_"));
        assert_eq!(identity.node_id.len(), "StockService_".len() + 8);
        assert_eq!(identity.service_name, "StockTradingService");
    }

    #[test]
    fn test_event_ids_and_timestamps_are_monotonic() {
        let factory = factory();
        let first = factory.heartbeat(NodeStatus::Up);
        let second = factory.log(Severity::Info, "ok", Map::new());
        let third = factory.registration(NodeStatus::Down);

        assert_eq!(first.event_id, Some(1));
        assert_eq!(second.event_id, Some(2));
        assert_eq!(third.event_id, Some(3));
        assert_eq!(third.document_id().as_deref(), Some("PaymentService_abcd1234-3"));
        assert!(first.timestamp <= second.timestamp);
        assert!(second.timestamp <= third.timestamp);
    }

    #[test]
    fn test_kind_specific_fields() {
        let factory = factory();
        let log = factory.log(Severity::Warn, "slow", Map::new());
        assert_eq!(log.severity, Some(Severity::Warn));
        assert_eq!(log.status, None);
        assert_eq!(log.message.as_deref(), Some("slow"));

        let hb = factory.heartbeat(NodeStatus::Down);
        assert_eq!(hb.severity, None);
        assert_eq!(hb.status, Some(NodeStatus::Down));
        assert!(hb.message.is_none());
    }

    #[test]
    fn test_reserved_attributes_are_dropped() {
        let factory = factory();
        let mut attributes = Map::new();
        attributes.insert("node_id".to_string(), json!("spoofed"));
        attributes.insert("response_time_ms".to_string(), json!(4200));

        let log = factory.log(Severity::Warn, "latency", attributes);
        assert_eq!(log.node_id, "PaymentService_abcd1234");
        assert!(log.attribute("node_id").is_none());
        assert_eq!(log.attribute("response_time_ms"), Some(&json!(4200)));

        let tagged = log.with_attribute("status", json!("UP"));
        assert!(tagged.attribute("status").is_none());
    }

    #[test]
    fn test_decode_emitter_wire_format() {
        let payload = br#"{
            "log_id": "5f1c",
            "node_id": "UserService_9f8e7d6c",
            "log_level": "ERROR",
            "message_type": "LOG",
            "message": "Profile update failed",
            "service_name": "UserProfileService",
            "timestamp": "2024-03-01T10:15:30.123456",
            "error_details": {"error_code": "USER_002", "error_message": "Database write timeout"}
        }"#;

        let envelope = Envelope::decode(payload).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Log);
        assert_eq!(envelope.severity, Some(Severity::Error));
        assert_eq!(envelope.event_id, None);
        assert!(envelope.timestamp.is_some());
        assert_eq!(envelope.attribute("error_details").unwrap()["error_code"], "USER_002");
        assert_eq!(envelope.attribute("log_id"), Some(&json!("5f1c")));
        assert_eq!(envelope.document_id().as_deref(), Some("UserService_9f8e7d6c-5f1c"));

        let encoded: Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert!(encoded.get("event_id").is_none());
    }

    #[test]
    fn test_document_id_needs_some_envelope_id() {
        let bare = Envelope::decode(br#"{"node_id": "n1", "message_type": "LOG"}"#).unwrap();
        assert_eq!(bare.document_id(), None);

        let numeric =
            Envelope::decode(br#"{"node_id": "n1", "message_type": "LOG", "log_id": 42}"#).unwrap();
        assert_eq!(numeric.document_id().as_deref(), Some("n1-42"));

        let both = Envelope::decode(
            br#"{"node_id": "n1", "message_type": "LOG", "event_id": 7, "log_id": "abc"}"#,
        )
        .unwrap();
        assert_eq!(both.document_id().as_deref(), Some("n1-7"));
    }

    #[test]
    fn test_stamped_only_fills_missing_timestamp() {
        let payload = br#"{"node_id": "n1", "message_type": "HEARTBEAT", "status": "UP"}"#;
        let envelope = Envelope::decode(payload).unwrap();
        assert!(envelope.timestamp.is_none());
        assert!(envelope.is_heartbeat_up());

        let now = Utc::now();
        let stamped = envelope.stamped(now);
        assert_eq!(stamped.timestamp, Some(now));

        let later = now + chrono::Duration::seconds(5);
        assert_eq!(stamped.clone().stamped(later).timestamp, Some(now));
    }

    #[test]
    fn test_encoded_form_flattens_attributes() {
        let factory = factory();
        let log = factory
            .log(Severity::Fatal, "core down", Map::new())
            .with_attribute("log_type", json!("alert"));
        let value: Value = serde_json::from_slice(&log.encode().unwrap()).unwrap();

        assert_eq!(value["message_type"], "LOG");
        assert_eq!(value["log_level"], "FATAL");
        assert_eq!(value["log_type"], "alert");
        assert!(value.get("status").is_none());

        let decoded = Envelope::decode(&log.encode().unwrap()).unwrap();
        assert_eq!(decoded.event_id, log.event_id);
        assert_eq!(decoded.log_type(), Some("alert"));
    }
}
