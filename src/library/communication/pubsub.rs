use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Message received on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Name of the channel the message has been published on
    pub channel: String,
    /// Raw payload as published
    pub payload: Vec<u8>,
}

/// Errors that may occur while listening on a [`PubSubSubscriber`]
#[derive(Error, Debug)]
pub enum PubSubResourceError {
    /// Underlying stream has been closed
    #[error("pubsub stream has been closed")]
    StreamClosed,
}

/// Connection which receives messages published on a set of channels
#[async_trait]
pub trait PubSubSubscriber {
    /// Subscribe to a channel by name
    ///
    /// Returns once the broker acknowledged the subscription.
    async fn subscribe(&mut self, channel: &str) -> EmptyResult;

    /// Listen to the subscribed channels for incoming messages
    ///
    /// The stream yields a [`StreamClosed`](PubSubResourceError::StreamClosed) error as its
    /// last element when the underlying connection goes away.
    fn into_on_message<'a>(self) -> BoxStream<'a, Result<PubSubMessage, PubSubResourceError>>;
}

/// Factory for connections to a publish/subscribe medium
#[async_trait]
pub trait PubSubConnector {
    /// Type returned when creating a subscriber connection
    type Subscriber: PubSubSubscriber + Send;

    /// Creates a new subscriber connection
    async fn subscriber(&self) -> Result<Self::Subscriber, BoxedError>;

    /// Publishes a payload on the given channel
    ///
    /// Calls are serialized on one shared publisher connection.
    async fn publish(&self, channel: &str, payload: &[u8]) -> EmptyResult;

    /// Releases the publisher connection, if any
    async fn disconnect(&self) {}
}
