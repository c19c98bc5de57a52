//! Concrete transports hidden behind one capability interface
//!
//! Each transport family maps the coordinator/worker layout onto its own channels, moves
//! encoded envelopes and yields received frames as a stream. Everything above this module
//! works exclusively with [`TransportBackend`] and is unaware of the concrete variant.

use super::{Message, PayloadOffloader};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

mod broker;
mod collective;
mod rpc;
mod subscription;

pub use broker::BrokerBackend;
pub use collective::{CollectiveBackend, CollectiveError, CollectiveWorld};
pub use rpc::{RpcBackend, RpcPeer};
pub use subscription::SubscriptionTracker;

/// Errors shared by all transport families
#[derive(Error, Debug)]
pub enum TransportError {
    /// Operation requires an established connection
    #[error("transport is not connected")]
    NotConnected,
    /// Inbound frames have already been handed out for this connection
    #[error("transport is already being listened on")]
    AlreadyListening,
    /// Channel does not lead to any known peer
    #[error("unknown channel {0}")]
    UnknownChannel(String),
}

/// Encoded envelope received on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Channel the frame arrived on
    pub channel: String,
    /// Encoded envelope
    pub payload: Vec<u8>,
}

/// Stream of received frames
///
/// An `Err` element or the end of the stream signals that the connection has been lost.
pub type FrameStream = BoxStream<'static, Result<InboundFrame, BoxedError>>;

/// Uniform contract of all transport families
#[async_trait]
pub trait TransportBackend: Send + Sync {
    /// Short symbolic name used in logs and lifecycle events
    fn name(&self) -> &'static str;

    /// Rank of the local participant
    fn rank(&self) -> usize;

    /// Establishes the connection and sets up all inbound channels
    async fn connect(&self) -> EmptyResult;

    /// Waits until inbound channels are confirmed by the medium
    async fn ready(&self) -> EmptyResult {
        Ok(())
    }

    /// Channels a message has to be published on to reach its receiver
    fn channels(&self, message: &Message) -> Result<Vec<String>, BoxedError>;

    /// Transmits an encoded envelope on a channel
    ///
    /// Concurrent calls are serialized on the underlying connection.
    async fn publish(&self, channel: &str, payload: &[u8]) -> EmptyResult;

    /// Hands out the stream of received frames
    ///
    /// May only be called once per connection.
    async fn listen(&self) -> Result<FrameStream, BoxedError>;

    /// Releases the connection
    ///
    /// Always safe to call, even if the backend never connected or has been stopped before.
    async fn stop(&self);
}

/// Constructed, not yet started transport together with its payload policy
pub struct Backend {
    /// Transport moving the encoded envelopes
    pub transport: Box<dyn TransportBackend>,
    /// Offload policy, `None` sends every payload inline
    pub offloader: Option<PayloadOffloader>,
}

impl Backend {
    /// Creates a backend sending all payloads inline
    pub fn new(transport: impl TransportBackend + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            offloader: None,
        }
    }

    /// Enables offloading of payloads through the given offloader
    pub fn with_offloader(mut self, offloader: PayloadOffloader) -> Self {
        self.offloader = Some(offloader);
        self
    }
}
