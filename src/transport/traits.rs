use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BackplaneError;

/// One message as handed over by a transport, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub channel: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Ordered deliveries from a single channel. Ends when the source closes;
/// an `Err` item is a transport failure and ends consumption.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BackplaneError>>;

/// Publish side used by agents. Accepted means handed to the transport.
#[async_trait]
pub trait TransportSink: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BackplaneError>;
}

/// Consume side used by the aggregator. Offsets and commits are owned by
/// the implementation.
#[async_trait]
pub trait TransportSource: Send + Sync {
    fn endpoint(&self) -> String;

    /// Check reachability before entering the main loop.
    async fn verify(&self) -> Result<(), BackplaneError>;

    async fn subscribe(&self, channel: &str, group: &str) -> Result<DeliveryStream, BackplaneError>;

    /// Give back whatever the source holds for its subscriptions once
    /// consumption is over.
    async fn release(&self) -> Result<(), BackplaneError> {
        Ok(())
    }
}
