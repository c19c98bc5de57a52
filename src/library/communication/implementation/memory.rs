//! Process-local publish/subscribe medium
//!
//! Behaves like a broker with fire-and-forget semantics: messages published on a channel
//! without subscribers are dropped. Brokers obtained through [`InMemoryBroker::named`] with the same
//! name are connected, which allows multiple participants within one process to talk to each other.

use crate::library::communication::{
    PubSubConnector, PubSubMessage, PubSubResourceError, PubSubSubscriber,
};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::trace;

type Routes = Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<PubSubMessage>>>>>;

lazy_static! {
    static ref NAMED_BROKERS: Mutex<HashMap<String, InMemoryBroker>> = Mutex::new(HashMap::new());
}

/// [`PubSubConnector`] delivering messages within the current process
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    routes: Routes,
}

impl InMemoryBroker {
    /// Creates a new, isolated broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches to the process-wide broker with the given name, creating it if it does not exist yet
    pub fn named(name: &str) -> Self {
        NAMED_BROKERS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(Self::new)
            .clone()
    }

    /// Number of live subscriptions on the given channel
    pub fn subscription_count(&self, channel: &str) -> usize {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PubSubConnector for InMemoryBroker {
    type Subscriber = InMemorySubscriber;

    async fn subscriber(&self) -> Result<Self::Subscriber, BoxedError> {
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(InMemorySubscriber {
            routes: self.routes.clone(),
            tx,
            rx,
        })
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> EmptyResult {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(senders) = routes.get_mut(channel) {
            let message = PubSubMessage {
                channel: channel.to_string(),
                payload: payload.to_vec(),
            };

            senders.retain(|sender| sender.send(message.clone()).is_ok());
            trace!(channel, receivers = senders.len(), "Published message");
        }

        Ok(())
    }
}

/// Subscriber connection of an [`InMemoryBroker`]
pub struct InMemorySubscriber {
    routes: Routes,
    tx: mpsc::UnboundedSender<PubSubMessage>,
    rx: mpsc::UnboundedReceiver<PubSubMessage>,
}

#[async_trait]
impl PubSubSubscriber for InMemorySubscriber {
    async fn subscribe(&mut self, channel: &str) -> EmptyResult {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_string())
            .or_default()
            .push(self.tx.clone());

        Ok(())
    }

    fn into_on_message<'a>(self) -> BoxStream<'a, Result<PubSubMessage, PubSubResourceError>> {
        // Dropping our own sender lets the stream end once the broker forgets about us
        let Self { rx, .. } = self;

        let message_stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (Ok(message), rx))
        });

        message_stream
            .chain(stream::once(async { Err(PubSubResourceError::StreamClosed) }))
            .boxed()
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn deliver_to_subscribers_of_the_channel() {
        let broker = InMemoryBroker::new();
        let mut subscriber = broker.subscriber().await.unwrap();
        subscriber.subscribe("a").await.unwrap();
        let mut stream = subscriber.into_on_message();

        broker.publish("a", b"payload").await.unwrap();

        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.channel, "a");
        assert_eq!(message.payload, b"payload".to_vec());
    }

    #[tokio::test]
    async fn not_deliver_other_channels() {
        let broker = InMemoryBroker::new();
        let mut subscriber = broker.subscriber().await.unwrap();
        subscriber.subscribe("a").await.unwrap();
        let mut stream = subscriber.into_on_message();

        broker.publish("b", b"payload").await.unwrap();

        assert!(timeout(Duration::from_millis(50), stream.next())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn drop_messages_without_subscribers() {
        let broker = InMemoryBroker::new();
        broker.publish("nobody", b"payload").await.unwrap();
        assert_eq!(broker.subscription_count("nobody"), 0);
    }

    #[tokio::test]
    async fn forget_dropped_subscribers() {
        let broker = InMemoryBroker::new();
        let mut subscriber = broker.subscriber().await.unwrap();
        subscriber.subscribe("a").await.unwrap();
        assert_eq!(broker.subscription_count("a"), 1);

        drop(subscriber.into_on_message());
        broker.publish("a", b"payload").await.unwrap();

        assert_eq!(broker.subscription_count("a"), 0);
    }

    #[tokio::test]
    async fn share_routes_by_name() {
        let first = InMemoryBroker::named("memory-broker-share-test");
        let second = InMemoryBroker::named("memory-broker-share-test");

        let mut subscriber = first.subscriber().await.unwrap();
        subscriber.subscribe("shared").await.unwrap();
        let mut stream = subscriber.into_on_message();

        second.publish("shared", b"x").await.unwrap();

        assert!(stream.next().await.unwrap().is_ok());
    }
}
