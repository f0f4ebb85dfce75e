use futures::stream::{select_all, SelectAll};
use futures::StreamExt;

use super::traits::{DeliveryStream, TransportSource};
use crate::error::BackplaneError;
use crate::types::Envelope;

/// Merges one subscription per channel into a single sequence.
///
/// Order within a channel is the source's delivery order; nothing is
/// promised across channels. The multiplexer keeps no offsets of its own.
pub struct Multiplexer {
    merged: SelectAll<DeliveryStream>,
    channels: Vec<String>,
}

impl Multiplexer {
    pub async fn subscribe(
        source: &dyn TransportSource,
        channels: &[String],
        group: &str,
    ) -> Result<Self, BackplaneError> {
        let mut streams = Vec::with_capacity(channels.len());
        for channel in channels {
            streams.push(source.subscribe(channel, group).await?);
        }
        log::info!(
            "Consuming {} as group {} from {}",
            channels.join(", "),
            group,
            source.endpoint()
        );
        Ok(Self {
            merged: select_all(streams),
            channels: channels.to_vec(),
        })
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Next envelope from any channel.
    ///
    /// `None` means every channel has ended. A malformed payload comes back
    /// as [`BackplaneError::Decode`] and consumption can go on past it; any
    /// other error is a transport failure and is fatal to the consumer.
    pub async fn next_envelope(&mut self) -> Option<Result<Envelope, BackplaneError>> {
        let delivery = match self.merged.next().await? {
            Ok(delivery) => delivery,
            Err(e) => return Some(Err(e)),
        };
        Some(
            Envelope::decode(&delivery.payload).map_err(|e| BackplaneError::Decode {
                channel: delivery.channel,
                reason: format!("offset {}: {}", delivery.offset, e),
            }),
        )
    }
}
