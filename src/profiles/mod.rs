pub mod builtin;
pub mod content;
pub mod schema;

pub use builtin::builtin_profiles;
pub use content::{ContentGenerator, LogContent, TemplateContent};
pub use schema::{CadenceBounds, ContentTemplates, MessageTemplate, ServiceProfile, SeverityWeights};
