use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::traits::{Delivery, DeliveryStream, TransportSink, TransportSource};
use crate::error::BackplaneError;

const JSON_RECORDS: &str = "application/vnd.kafka.json.v2+json";
const CONSUMER_API: &str = "application/vnd.kafka.v2+json";
const IDLE_BACKOFF: Duration = Duration::from_millis(500);

/// Transport over a Kafka REST Proxy (v2 API). Channels map to topics; each
/// subscription owns one consumer instance inside the consumer group, starting
/// from the earliest uncommitted offset with proxy-side auto-commit.
/// Instances live until [`TransportSource::release`] deletes them.
pub struct RestProxyTransport {
    base_url: String,
    client: reqwest::Client,
    consumers: Mutex<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ConsumerInstance {
    base_uri: String,
}

#[derive(Debug, Deserialize)]
struct ConsumerRecord {
    topic: String,
    value: Value,
    #[serde(default)]
    partition: i32,
    #[serde(default)]
    offset: i64,
}

impl RestProxyTransport {
    /// Every proxy request, including record polls, is bounded by
    /// `request_timeout`.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, BackplaneError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("fleetwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackplaneError::TransportConnect {
                endpoint: base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base_url,
            client,
            consumers: Mutex::new(Vec::new()),
        })
    }

    fn failure(&self, error: reqwest::Error) -> BackplaneError {
        if error.is_connect() {
            BackplaneError::TransportConnect {
                endpoint: self.base_url.clone(),
                reason: error.to_string(),
            }
        } else {
            BackplaneError::Transport(error.to_string())
        }
    }

    async fn create_consumer(&self, channel: &str, group: &str) -> Result<String, BackplaneError> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let response = self
            .client
            .post(format!("{}/consumers/{}", self.base_url, group))
            .header(reqwest::header::CONTENT_TYPE, CONSUMER_API)
            .json(&json!({
                "name": format!("{}-{}-{}", group, channel, &suffix[..8]),
                "format": "json",
                "auto.offset.reset": "earliest",
            }))
            .send()
            .await
            .map_err(|e| self.failure(e))?;
        let response = ensure_success(response, "create consumer").await?;
        let instance: ConsumerInstance = response
            .json()
            .await
            .map_err(|e| BackplaneError::Transport(e.to_string()))?;
        self.consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(instance.base_uri.clone());

        let response = self
            .client
            .post(format!("{}/subscription", instance.base_uri))
            .header(reqwest::header::CONTENT_TYPE, CONSUMER_API)
            .json(&json!({ "topics": [channel] }))
            .send()
            .await
            .map_err(|e| self.failure(e))?;
        ensure_success(response, "subscribe").await?;

        log::info!("Subscribed to {} as {} in group {}", channel, instance.base_uri, group);
        Ok(instance.base_uri)
    }
}

async fn ensure_success(
    response: reqwest::Response,
    action: &str,
) -> Result<reqwest::Response, BackplaneError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(BackplaneError::Transport(format!(
        "{} failed with {}: {}",
        action, status, body
    )))
}

#[async_trait]
impl TransportSink for RestProxyTransport {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BackplaneError> {
        let value: Value = serde_json::from_slice(&payload)
            .map_err(|e| BackplaneError::Transport(format!("payload is not JSON: {}", e)))?;
        let response = self
            .client
            .post(format!("{}/topics/{}", self.base_url, channel))
            .header(reqwest::header::CONTENT_TYPE, JSON_RECORDS)
            .json(&json!({ "records": [{ "value": value }] }))
            .send()
            .await
            .map_err(|e| self.failure(e))?;
        ensure_success(response, "produce").await?;
        Ok(())
    }
}

#[async_trait]
impl TransportSource for RestProxyTransport {
    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    async fn verify(&self) -> Result<(), BackplaneError> {
        let unreachable = |reason: String| BackplaneError::TransportConnect {
            endpoint: self.base_url.clone(),
            reason,
        };
        let response = self
            .client
            .get(format!("{}/topics", self.base_url))
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(unreachable(format!("GET /topics returned {}", response.status())));
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, group: &str) -> Result<DeliveryStream, BackplaneError> {
        let base_uri = self.create_consumer(channel, group).await?;
        let client = self.client.clone();

        let stream = async_stream::stream! {
            loop {
                let polled = client
                    .get(format!("{}/records", base_uri))
                    .header(reqwest::header::ACCEPT, JSON_RECORDS)
                    .send()
                    .await;
                let response = match polled {
                    Ok(response) => response,
                    Err(e) => {
                        yield Err(BackplaneError::Transport(e.to_string()));
                        break;
                    }
                };
                let response = match ensure_success(response, "fetch records").await {
                    Ok(response) => response,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                let records: Vec<ConsumerRecord> = match response.json().await {
                    Ok(records) => records,
                    Err(e) => {
                        yield Err(BackplaneError::Transport(e.to_string()));
                        break;
                    }
                };

                if records.is_empty() {
                    tokio::time::sleep(IDLE_BACKOFF).await;
                    continue;
                }
                for record in records {
                    // Records are re-serialized so decoding stays in one place.
                    let payload = serde_json::to_vec(&record.value).unwrap_or_default();
                    yield Ok(Delivery {
                        channel: record.topic,
                        partition: record.partition,
                        offset: record.offset,
                        payload,
                    });
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn release(&self) -> Result<(), BackplaneError> {
        let consumers = std::mem::take(
            &mut *self.consumers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut first_failure = None;
        for base_uri in consumers {
            let deleted = match self
                .client
                .delete(&base_uri)
                .header(reqwest::header::CONTENT_TYPE, CONSUMER_API)
                .send()
                .await
            {
                Ok(response) => ensure_success(response, "delete consumer").await.map(|_| ()),
                Err(e) => Err(self.failure(e)),
            };
            match deleted {
                Ok(()) => log::info!("Removed consumer {}", base_uri),
                Err(e) => {
                    log::warn!("Could not remove consumer {}: {}", base_uri, e);
                    first_failure.get_or_insert(e);
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}
