use super::{FrameStream, InboundFrame, SubscriptionTracker, TransportBackend, TransportError};
use crate::constants::PRESENCE_CHANNEL;
use crate::domain::{Message, Topology};
use crate::library::communication::{PubSubConnector, PubSubSubscriber};
use crate::library::helpers::{base62_identifier, Backoff};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

const CONNECTION_ID_LENGTH: usize = 22;
const PRESENCE_ONLINE: &str = "Online";
const PRESENCE_OFFLINE: &str = "Offline";

/// Transport emulating point-to-point channels on a publish/subscribe medium
///
/// Topics are derived from the [`Topology`]. Subscription requests are tracked until the
/// broker acknowledged them, after which [`ready`](TransportBackend::ready) returns.
/// On connect and on a graceful stop a presence notice is published on [`PRESENCE_CHANNEL`].
pub struct BrokerBackend<C: PubSubConnector> {
    connector: C,
    topology: Topology,
    connection_id: String,
    tracker: SubscriptionTracker,
    subscriber: Mutex<Option<C::Subscriber>>,
    connected: AtomicBool,
}

impl<C: PubSubConnector> BrokerBackend<C> {
    /// Creates a new, not yet connected backend
    pub fn new(connector: C, topology: Topology) -> Self {
        Self {
            connector,
            topology,
            connection_id: base62_identifier(CONNECTION_ID_LENGTH),
            tracker: SubscriptionTracker::new(),
            subscriber: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Random identifier of this connection as announced in presence notices
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Tracker of the pending subscriptions of this connection
    pub fn subscriptions(&self) -> &SubscriptionTracker {
        &self.tracker
    }

    async fn open_subscriber(&self) -> Result<C::Subscriber, BoxedError> {
        let mut backoff = Backoff::default();

        loop {
            match self.connector.subscriber().await {
                Ok(subscriber) => return Ok(subscriber),
                Err(e) => match backoff.next() {
                    Some(delay) => {
                        warn!(?e, ?delay, "Unable to reach broker, retrying");
                        sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    async fn announce(&self, status: &str) {
        let notice = json!({ "ID": self.connection_id, "stat": status }).to_string();

        if let Err(e) = self
            .connector
            .publish(PRESENCE_CHANNEL, notice.as_bytes())
            .await
        {
            warn!(?e, status, "Failed to publish presence notice");
        }
    }
}

#[async_trait]
impl<C> TransportBackend for BrokerBackend<C>
where
    C: PubSubConnector + Send + Sync + 'static,
    C::Subscriber: 'static,
{
    fn name(&self) -> &'static str {
        "broker"
    }

    fn rank(&self) -> usize {
        self.topology.rank()
    }

    #[instrument(skip(self), fields(connection = %self.connection_id))]
    async fn connect(&self) -> EmptyResult {
        self.tracker.reset();

        let mut subscriber = self.open_subscriber().await?;

        for topic in self.topology.subscribe_topics() {
            let token = self.tracker.issue();
            debug!(%topic, token, "Subscribing");

            subscriber.subscribe(&topic).await?;

            self.tracker.acknowledge(token);
            info!(%topic, token, "Subscribed");
        }

        self.tracker.seal();
        *self.subscriber.lock().await = Some(subscriber);
        self.connected.store(true, Ordering::SeqCst);

        self.announce(PRESENCE_ONLINE).await;

        Ok(())
    }

    async fn ready(&self) -> EmptyResult {
        self.tracker.wait().await;
        Ok(())
    }

    fn channels(&self, message: &Message) -> Result<Vec<String>, BoxedError> {
        Ok(self.topology.publish_topics(message)?)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> EmptyResult {
        self.connector.publish(channel, payload).await
    }

    async fn listen(&self) -> Result<FrameStream, BoxedError> {
        let subscriber = self.subscriber.lock().await.take().ok_or_else(|| {
            if self.connected.load(Ordering::SeqCst) {
                TransportError::AlreadyListening
            } else {
                TransportError::NotConnected
            }
        })?;

        let frames = subscriber.into_on_message().map(|message| match message {
            Ok(message) => Ok(InboundFrame {
                channel: message.channel,
                payload: message.payload,
            }),
            Err(e) => Err(e.into()),
        });

        Ok(frames.boxed())
    }

    #[instrument(skip(self), fields(connection = %self.connection_id))]
    async fn stop(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.announce(PRESENCE_OFFLINE).await;
            info!("Disconnected from broker");
        }

        self.subscriber.lock().await.take();
        self.connector.disconnect().await;
        self.tracker.reset();
    }
}
