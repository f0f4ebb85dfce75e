use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Store verdict on a single upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Accepted,
    Rejected { reason: String },
}

impl UpsertOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpsertOutcome::Accepted)
    }
}

/// Document store keyed by collection and document id. Writing the same id
/// twice replaces the document. An `Err` means the store could not be
/// reached at all; a refusal is reported as [`UpsertOutcome::Rejected`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn endpoint(&self) -> String;

    async fn ping(&self) -> Result<()>;

    async fn upsert(&self, collection: &str, id: &str, document: &Value) -> Result<UpsertOutcome>;
}
