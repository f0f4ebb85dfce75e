use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::BackplaneError;
use crate::types::Severity;

/// Everything that differs between emitting services. One generic agent is
/// instantiated per profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub name: String,
    pub node_prefix: String,

    // Fault injection
    #[serde(default = "default_fault_probability")]
    pub fault_probability: f64,
    #[serde(default)]
    pub recovery_steps: Vec<String>,
    #[serde(default = "default_recovery_complete_message")]
    pub recovery_complete_message: String,

    // Ordinary log emission
    #[serde(default)]
    pub log_interval: CadenceBounds,
    #[serde(default)]
    pub severity_weights: SeverityWeights,
    #[serde(default)]
    pub templates: ContentTemplates,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CadenceBounds {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Default for CadenceBounds {
    fn default() -> Self {
        Self {
            min_secs: 1,
            max_secs: 2,
        }
    }
}

/// Relative weights for ordinary log severities. FATAL is reserved for
/// fault injection and ALERT for staleness detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub info: f64,
    pub warn: f64,
    pub error: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            info: 0.85,
            warn: 0.10,
            error: 0.05,
        }
    }
}

impl SeverityWeights {
    pub fn total(&self) -> f64 {
        self.info + self.warn + self.error
    }

    /// Map a uniform draw in `[0, 1)` onto a severity.
    pub fn pick(&self, draw: f64) -> Severity {
        let point = draw * self.total();
        if point < self.info {
            Severity::Info
        } else if point < self.info + self.warn {
            Severity::Warn
        } else {
            Severity::Error
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// Message text; `{id}` and `{n}` are substituted per use.
    pub message: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Integer attributes drawn uniformly from `[low, high]` per use.
    #[serde(default)]
    pub ranges: BTreeMap<String, [u64; 2]>,
}

impl MessageTemplate {
    pub fn text(message: &str) -> Self {
        Self {
            message: message.to_string(),
            ..Default::default()
        }
    }

    pub fn with_error(message: &str, code: &str, detail: &str) -> Self {
        let mut attributes = Map::new();
        attributes.insert(
            "error_details".to_string(),
            serde_json::json!({ "error_code": code, "error_message": detail }),
        );
        Self {
            message: message.to_string(),
            attributes,
            ranges: BTreeMap::new(),
        }
    }

    pub fn with_latency(message: &str, low: u64, high: u64, threshold: u64) -> Self {
        let mut attributes = Map::new();
        attributes.insert("threshold_limit_ms".to_string(), Value::from(threshold));
        let mut ranges = BTreeMap::new();
        ranges.insert("response_time_ms".to_string(), [low, high]);
        Self {
            message: message.to_string(),
            attributes,
            ranges,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentTemplates {
    #[serde(default)]
    pub info: Vec<MessageTemplate>,
    #[serde(default)]
    pub warn: Vec<MessageTemplate>,
    #[serde(default)]
    pub error: Vec<MessageTemplate>,
    #[serde(default)]
    pub fatal: Vec<MessageTemplate>,
}

impl ContentTemplates {
    pub fn for_severity(&self, severity: Severity) -> &[MessageTemplate] {
        match severity {
            Severity::Info => &self.info,
            Severity::Warn => &self.warn,
            Severity::Error => &self.error,
            Severity::Fatal | Severity::Alert => &self.fatal,
        }
    }
}

impl ServiceProfile {
    pub fn validate(&self) -> Result<(), BackplaneError> {
        if self.name.trim().is_empty() || self.node_prefix.trim().is_empty() {
            return Err(BackplaneError::Config(
                "service profile needs a name and a node_prefix".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fault_probability) {
            return Err(BackplaneError::Config(format!(
                "{}: fault_probability {} outside [0, 1]",
                self.name, self.fault_probability
            )));
        }
        let w = &self.severity_weights;
        if w.info < 0.0 || w.warn < 0.0 || w.error < 0.0 || w.total() <= 0.0 {
            return Err(BackplaneError::Config(format!(
                "{}: severity weights must be non-negative with a positive sum",
                self.name
            )));
        }
        if self.log_interval.max_secs == 0 {
            return Err(BackplaneError::Config(format!(
                "{}: log_interval max_secs must be at least 1",
                self.name
            )));
        }
        if self.log_interval.min_secs > self.log_interval.max_secs {
            return Err(BackplaneError::Config(format!(
                "{}: log_interval min_secs {} exceeds max_secs {}",
                self.name, self.log_interval.min_secs, self.log_interval.max_secs
            )));
        }
        Ok(())
    }
}

fn default_fault_probability() -> f64 {
    0.03
}

fn default_recovery_complete_message() -> String {
    "Recovery complete: Service restored".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ServiceProfile {
        ServiceProfile {
            name: "InventoryService".to_string(),
            node_prefix: "Inventory".to_string(),
            fault_probability: 0.05,
            recovery_steps: vec!["Flushing caches".to_string()],
            recovery_complete_message: default_recovery_complete_message(),
            log_interval: CadenceBounds::default(),
            severity_weights: SeverityWeights::default(),
            templates: ContentTemplates::default(),
        }
    }

    #[test]
    fn test_weight_pick_boundaries() {
        let weights = SeverityWeights {
            info: 0.7,
            warn: 0.2,
            error: 0.1,
        };
        assert_eq!(weights.pick(0.0), Severity::Info);
        assert_eq!(weights.pick(0.69), Severity::Info);
        assert_eq!(weights.pick(0.75), Severity::Warn);
        assert_eq!(weights.pick(0.95), Severity::Error);
    }

    #[test]
    fn test_unnormalized_weights() {
        let weights = SeverityWeights {
            info: 6.0,
            warn: 3.0,
            error: 1.0,
        };
        assert_eq!(weights.pick(0.5), Severity::Info);
        assert_eq!(weights.pick(0.85), Severity::Warn);
        assert_eq!(weights.pick(0.99), Severity::Error);
    }

    #[test]
    fn test_validation() {
        assert!(profile().validate().is_ok());

        let mut bad = profile();
        bad.fault_probability = 1.5;
        assert!(bad.validate().is_err());

        let mut bad = profile();
        bad.severity_weights = SeverityWeights {
            info: 0.0,
            warn: 0.0,
            error: 0.0,
        };
        assert!(bad.validate().is_err());

        let mut bad = profile();
        bad.log_interval = CadenceBounds {
            min_secs: 5,
            max_secs: 1,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_profile_yaml_defaults() {
        let yaml = r#"
name: InventoryService
node_prefix: Inventory
templates:
  info:
    - message: "Restocked {n} items"
  warn:
    - message: "Slow warehouse sync"
      ranges:
        response_time_ms: [300, 900]
      attributes:
        threshold_limit_ms: 300
"#;
        let profile: ServiceProfile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.fault_probability, 0.03);
        assert_eq!(profile.severity_weights, SeverityWeights::default());
        assert_eq!(profile.templates.info.len(), 1);
        assert_eq!(profile.templates.warn[0].ranges["response_time_ms"], [300, 900]);
        assert!(profile.templates.fatal.is_empty());
    }
}
