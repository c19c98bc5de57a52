use super::RedisSubscriber;
use crate::library::communication::PubSubConnector;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

/// [`PubSubConnector`] implementation backed by a redis server
///
/// Subscribers each get a dedicated connection as redis does not permit other commands on a
/// connection in subscriber mode. Publishing is done through one lazily established multiplexed
/// connection which is guarded by a mutex so that only one writer uses it at any given time.
pub struct RedisPubSubConnector {
    client: Client,
    publisher: Mutex<Option<MultiplexedConnection>>,
}

impl RedisPubSubConnector {
    /// Creates a new connector for the given redis URL without establishing any connection yet
    pub fn new(url: &str) -> Result<Self, BoxedError> {
        Ok(Self {
            client: Client::open(url)?,
            publisher: Mutex::new(None),
        })
    }
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error() || e.is_connection_refusal() || e.is_timeout()
}

#[async_trait]
impl PubSubConnector for RedisPubSubConnector {
    type Subscriber = RedisSubscriber;

    #[instrument(skip(self))]
    async fn subscriber(&self) -> Result<Self::Subscriber, BoxedError> {
        debug!("Opening subscriber connection");
        let con = self.client.get_async_connection().await?;
        Ok(RedisSubscriber::new(con))
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> EmptyResult {
        let mut publisher = self.publisher.lock().await;

        if publisher.is_none() {
            debug!("Opening publisher connection");
            *publisher = Some(self.client.get_multiplexed_tokio_connection().await?);
        }

        if let Some(con) = publisher.as_mut() {
            let result = con.publish::<_, _, i64>(channel, payload).await;

            match result {
                Ok(receivers) => trace!(channel, receivers, "Published message"),
                Err(e) => {
                    if is_connection_error(&e) {
                        warn!(?e, "Publisher connection dropped, reconnecting on next use");
                        *publisher = None;
                    }

                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    async fn disconnect(&self) {
        if self.publisher.lock().await.take().is_some() {
            debug!("Released publisher connection");
        }
    }
}

/// Tests for the redis connector.
/// Note that these are ignored by default as they require a redis server listening on localhost.
///
/// ```bash
/// docker run --rm -p 6379:6379 redis
/// ```
#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::PubSubSubscriber;
    use futures::StreamExt;

    const REDIS_TEST_URL: &str = "redis://127.0.0.1/";

    #[ignore]
    #[tokio::test]
    async fn deliver_published_messages() {
        let connector = RedisPubSubConnector::new(REDIS_TEST_URL).unwrap();
        let mut subscriber = connector.subscriber().await.unwrap();
        subscriber.subscribe("fedlink-test").await.unwrap();
        let mut stream = subscriber.into_on_message();

        connector.publish("fedlink-test", b"hello").await.unwrap();

        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.channel, "fedlink-test");
        assert_eq!(message.payload, b"hello".to_vec());
    }

    #[test]
    fn reject_invalid_urls() {
        assert!(RedisPubSubConnector::new("not a url").is_err());
    }
}
