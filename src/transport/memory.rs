use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Notify;

use super::traits::{Delivery, DeliveryStream, TransportSink, TransportSource};
use crate::error::BackplaneError;

#[derive(Default)]
struct BusState {
    logs: HashMap<String, Vec<Vec<u8>>>,
    committed: HashMap<(String, String), usize>,
    closed: bool,
}

enum Poll {
    Ready(Delivery),
    Empty,
    Closed,
}

/// Process-local pub/sub log with one partition per channel.
///
/// Each consumer group resumes from its committed offset; an offset is
/// committed once the delivery has been handed out. Closing the bus ends
/// every open subscription after the backlog is drained.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<RwLock<BusState>>,
    notify: Arc<Notify>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw payloads published to `channel` so far, in order.
    pub fn published(&self, channel: &str) -> Vec<Vec<u8>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.logs.get(channel).cloned().unwrap_or_default()
    }

    pub fn close(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        self.notify.notify_waiters();
    }

    /// Next undelivered payload for `group` on `channel`, committing it.
    fn take(&self, channel: &str, group: &str) -> Poll {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let key = (group.to_string(), channel.to_string());
        let offset = state.committed.get(&key).copied().unwrap_or(0);
        let payload = state
            .logs
            .get(channel)
            .and_then(|log| log.get(offset))
            .cloned();
        match payload {
            Some(payload) => {
                state.committed.insert(key, offset + 1);
                Poll::Ready(Delivery {
                    channel: channel.to_string(),
                    partition: 0,
                    offset: offset as i64,
                    payload,
                })
            }
            None if state.closed => Poll::Closed,
            None => Poll::Empty,
        }
    }
}

#[async_trait]
impl TransportSink for InMemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BackplaneError> {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return Err(BackplaneError::Transport(format!(
                    "bus closed, cannot publish to {}",
                    channel
                )));
            }
            state
                .logs
                .entry(channel.to_string())
                .or_default()
                .push(payload);
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl TransportSource for InMemoryBus {
    fn endpoint(&self) -> String {
        "memory://".to_string()
    }

    async fn verify(&self) -> Result<(), BackplaneError> {
        Ok(())
    }

    async fn subscribe(&self, channel: &str, group: &str) -> Result<DeliveryStream, BackplaneError> {
        let bus = self.clone();
        let channel = channel.to_string();
        let group = group.to_string();

        let stream = async_stream::stream! {
            loop {
                // Register interest before checking so a publish between the
                // check and the await is not missed.
                let notified = bus.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match bus.take(&channel, &group) {
                    Poll::Ready(delivery) => yield Ok(delivery),
                    Poll::Empty => notified.await,
                    Poll::Closed => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
