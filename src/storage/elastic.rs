use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::traits::{DocumentStore, UpsertOutcome};

/// Elasticsearch-compatible store. Collections are indices and documents are
/// written with an explicit id, so a replayed envelope overwrites itself.
pub struct ElasticsearchStore {
    base_url: String,
    client: reqwest::Client,
}

impl ElasticsearchStore {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("fleetwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

/// Maps an index response body onto an outcome.
fn outcome_from(body: &Value) -> UpsertOutcome {
    match body["result"].as_str() {
        Some("created") | Some("updated") => UpsertOutcome::Accepted,
        _ => UpsertOutcome::Rejected {
            reason: body.to_string(),
        },
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    async fn ping(&self) -> Result<()> {
        let response = self.client.get(&self.base_url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Elasticsearch at {} answered {}",
                self.base_url,
                response.status()
            ));
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, id: &str, document: &Value) -> Result<UpsertOutcome> {
        let response = self
            .client
            .put(format!("{}/{}/_doc/{}", self.base_url, collection, id))
            .json(document)
            .send()
            .await?;

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                return Ok(UpsertOutcome::Rejected {
                    reason: format!("{} with unreadable body: {}", status, e),
                })
            }
        };
        Ok(outcome_from(&body))
    }
}
