use super::{FrameStream, InboundFrame, TransportBackend, TransportError};
use crate::domain::{Message, Topology, TopologyError};
use crate::library::communication::frame::{FrameSender, FrameServer};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// Network location of one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcPeer {
    /// Logical rank of the participant
    pub id: i64,
    /// Host name or address
    pub host: String,
    /// TCP port the participant listens on
    pub port: u16,
}

impl RpcPeer {
    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transport delivering envelopes directly to each peer over TCP
///
/// Every participant runs a frame server on its own port and opens one connection per peer it
/// sends to. Receiver identities are logical ranks.
pub struct RpcBackend {
    rank: i64,
    prefix: String,
    peers: Vec<RpcPeer>,
    routes: HashMap<String, String>,
    sender: FrameSender,
    max_frame_length: usize,
    server: Mutex<Option<FrameServer>>,
    connected: AtomicBool,
}

impl RpcBackend {
    /// Creates a new, not yet listening backend
    pub fn new(
        topology: &Topology,
        peers: Vec<RpcPeer>,
        max_frame_length: usize,
        connect_timeout: Duration,
    ) -> Self {
        let prefix = format!("{}rpc_", topology.prefix());
        let routes = peers
            .iter()
            .map(|peer| (format!("{}{}", prefix, peer.id), peer.address()))
            .collect();

        Self {
            rank: topology.rank() as i64,
            prefix,
            peers,
            routes,
            sender: FrameSender::new(max_frame_length, connect_timeout),
            max_frame_length,
            server: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn channel(&self, id: i64) -> String {
        format!("{}{}", self.prefix, id)
    }

    fn own_peer(&self) -> Result<&RpcPeer, TopologyError> {
        self.peers
            .iter()
            .find(|peer| peer.id == self.rank)
            .ok_or(TopologyError::UnknownReceiver(self.rank))
    }
}

#[async_trait]
impl TransportBackend for RpcBackend {
    fn name(&self) -> &'static str {
        "rpc"
    }

    fn rank(&self) -> usize {
        self.rank as usize
    }

    #[instrument(skip(self), fields(rank = self.rank))]
    async fn connect(&self) -> EmptyResult {
        let port = self.own_peer()?.port;
        let server = FrameServer::bind(&format!("0.0.0.0:{}", port), self.max_frame_length).await?;

        info!(address = %server.local_addr()?, "Listening for frames");

        *self.server.lock().await = Some(server);
        self.connected.store(true, Ordering::SeqCst);

        Ok(())
    }

    fn channels(&self, message: &Message) -> Result<Vec<String>, BoxedError> {
        if message.is_broadcast() {
            return Ok(self
                .peers
                .iter()
                .filter(|peer| peer.id != self.rank)
                .map(|peer| self.channel(peer.id))
                .collect());
        }

        let receiver = message.receiver_id();

        if receiver != self.rank && self.peers.iter().any(|peer| peer.id == receiver) {
            Ok(vec![self.channel(receiver)])
        } else {
            Err(TopologyError::UnknownReceiver(receiver).into())
        }
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> EmptyResult {
        let address = self
            .routes
            .get(channel)
            .ok_or_else(|| TransportError::UnknownChannel(channel.to_string()))?;

        self.sender.send(address, payload).await
    }

    async fn listen(&self) -> Result<FrameStream, BoxedError> {
        let server = self.server.lock().await.take().ok_or_else(|| {
            if self.connected.load(Ordering::SeqCst) {
                TransportError::AlreadyListening
            } else {
                TransportError::NotConnected
            }
        })?;

        let channel = self.channel(self.rank);
        let frames = server.into_stream().map(move |frame| {
            frame.map(|payload| InboundFrame {
                channel: channel.clone(),
                payload,
            })
        });

        Ok(frames.boxed())
    }

    async fn stop(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(rank = self.rank, "Closed peer connections");
        }

        self.server.lock().await.take();
        self.sender.close().await;
    }
}
