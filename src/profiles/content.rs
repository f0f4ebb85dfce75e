use serde_json::{Map, Value};
use std::sync::Arc;

use super::schema::{ContentTemplates, MessageTemplate};
use crate::lifecycle::Entropy;
use crate::types::Severity;

/// Message body and attribute payload for one log envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct LogContent {
    pub message: String,
    pub attributes: Map<String, Value>,
}

impl LogContent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attributes: Map::new(),
        }
    }
}

/// Service-specific producer of log content, injected into the agent.
pub trait ContentGenerator: Send + Sync {
    fn generate(&self, severity: Severity) -> LogContent;
}

impl<F> ContentGenerator for F
where
    F: Fn(Severity) -> LogContent + Send + Sync,
{
    fn generate(&self, severity: Severity) -> LogContent {
        self(severity)
    }
}

/// Picks a random template per severity and fills its placeholders.
pub struct TemplateContent {
    service_name: String,
    templates: ContentTemplates,
    entropy: Arc<dyn Entropy>,
}

impl TemplateContent {
    pub fn new(
        service_name: impl Into<String>,
        templates: ContentTemplates,
        entropy: Arc<dyn Entropy>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            templates,
            entropy,
        }
    }

    fn render(&self, template: &MessageTemplate) -> LogContent {
        let mut attributes = template.attributes.clone();
        for (key, [low, high]) in &template.ranges {
            attributes.insert(key.clone(), Value::from(self.entropy.between(*low, *high)));
        }
        LogContent {
            message: self.fill(&template.message),
            attributes,
        }
    }

    fn fill(&self, text: &str) -> String {
        let mut out = text.to_string();
        while out.contains("{id}") {
            let id = uuid::Uuid::new_v4().simple().to_string();
            out = out.replacen("{id}", &id[..8], 1);
        }
        while out.contains("{n}") {
            let n = self.entropy.between(100, 10_000);
            out = out.replacen("{n}", &n.to_string(), 1);
        }
        out
    }
}

impl ContentGenerator for TemplateContent {
    fn generate(&self, severity: Severity) -> LogContent {
        let choices = self.templates.for_severity(severity);
        if choices.is_empty() {
            return LogContent::new(format!(
                "{} reported {}",
                self.service_name,
                severity.as_str()
            ));
        }
        self.render(&choices[self.entropy.pick(choices.len())])
    }
}
