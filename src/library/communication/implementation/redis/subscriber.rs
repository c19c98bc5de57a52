use crate::library::communication::{PubSubMessage, PubSubResourceError, PubSubSubscriber};
use crate::library::EmptyResult;
use async_trait::async_trait;
use futures::stream::{once, BoxStream};
use futures::StreamExt;
use redis::aio::{Connection, PubSub};
use tracing::debug;

/// Redis PubSub connection reporting its closure as a stream element
pub struct RedisSubscriber {
    pubsub: PubSub,
}

impl RedisSubscriber {
    pub(super) fn new(con: Connection) -> Self {
        Self {
            pubsub: con.into_pubsub(),
        }
    }
}

#[async_trait]
impl PubSubSubscriber for RedisSubscriber {
    async fn subscribe(&mut self, channel: &str) -> EmptyResult {
        self.pubsub.subscribe(channel).await?;
        Ok(())
    }

    fn into_on_message<'a>(self) -> BoxStream<'a, Result<PubSubMessage, PubSubResourceError>> {
        let message_stream = self.pubsub.into_on_message().map(|msg| {
            Ok(PubSubMessage {
                channel: msg.get_channel_name().to_string(),
                payload: msg.get_payload_bytes().to_vec(),
            })
        });

        let error_stream = once(async move {
            debug!("Redis subscriber connection closed");
            Err(PubSubResourceError::StreamClosed)
        });

        message_stream.chain(error_stream).boxed()
    }
}
