use super::{FrameStream, InboundFrame, TransportBackend, TransportError};
use crate::domain::{Message, TopologyError};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

const CHANNEL_PREFIX: &str = "rank_";

lazy_static! {
    static ref WORLDS: Mutex<HashMap<String, Arc<CollectiveWorld>>> = Mutex::new(HashMap::new());
}

/// Errors raised by collective worlds
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CollectiveError {
    /// A world of the same name exists with a different number of ranks
    #[error("world {name} has {actual} ranks, expected {expected}")]
    SizeMismatch {
        /// Name of the world
        name: String,
        /// Size requested by the caller
        expected: usize,
        /// Size of the existing world
        actual: usize,
    },
    /// Inbox of the rank is already in use by another participant
    #[error("rank {0} has already been claimed")]
    RankClaimed(usize),
    /// Receiving rank left the world
    #[error("rank {0} is no longer reachable")]
    RankGone(usize),
}

/// Fixed group of ranks with one mailbox each
///
/// Frames sent to a rank are buffered in its mailbox until the rank receives them, even if it
/// has not joined yet. Each mailbox can be claimed exactly once.
pub struct CollectiveWorld {
    senders: Vec<UnboundedSender<InboundFrame>>,
    inboxes: Mutex<Vec<Option<UnboundedReceiver<InboundFrame>>>>,
}

impl CollectiveWorld {
    /// Creates a new, isolated world with `size` ranks
    pub fn new(size: usize) -> Arc<Self> {
        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..size)
            .map(|_| {
                let (tx, rx) = mpsc::unbounded_channel();
                (tx, Some(rx))
            })
            .unzip();

        Arc::new(Self {
            senders,
            inboxes: Mutex::new(inboxes),
        })
    }

    /// Joins the process-wide world with the given name, creating it if it does not exist yet
    pub fn join(name: &str, size: usize) -> Result<Arc<Self>, CollectiveError> {
        let mut worlds = WORLDS.lock().unwrap_or_else(PoisonError::into_inner);
        let world = worlds
            .entry(name.to_string())
            .or_insert_with(|| Self::new(size));

        if world.size() != size {
            return Err(CollectiveError::SizeMismatch {
                name: name.to_string(),
                expected: size,
                actual: world.size(),
            });
        }

        Ok(world.clone())
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.senders.len()
    }

    fn claim(&self, rank: usize) -> Result<UnboundedReceiver<InboundFrame>, CollectiveError> {
        self.inboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(rank)
            .and_then(Option::take)
            .ok_or(CollectiveError::RankClaimed(rank))
    }

    fn deliver(&self, rank: usize, frame: InboundFrame) -> Result<(), CollectiveError> {
        self.senders
            .get(rank)
            .ok_or(CollectiveError::RankGone(rank))?
            .send(frame)
            .map_err(|_| CollectiveError::RankGone(rank))
    }
}

fn channel_name(rank: usize) -> String {
    format!("{}{}", CHANNEL_PREFIX, rank)
}

/// Transport exchanging envelopes between the ranks of a [`CollectiveWorld`]
///
/// Receiver identities are logical ranks. Broadcasts reach every other rank.
pub struct CollectiveBackend {
    rank: usize,
    world: Arc<CollectiveWorld>,
    inbox: tokio::sync::Mutex<Option<UnboundedReceiver<InboundFrame>>>,
}

impl CollectiveBackend {
    /// Creates a new backend for the given rank, which must be lower than the world size
    pub fn new(rank: usize, world: Arc<CollectiveWorld>) -> Result<Self, TopologyError> {
        if rank >= world.size() {
            return Err(TopologyError::RankOutOfRange {
                rank,
                workers: world.size().saturating_sub(1),
            });
        }

        Ok(Self {
            rank,
            world,
            inbox: tokio::sync::Mutex::new(None),
        })
    }
}

#[async_trait]
impl TransportBackend for CollectiveBackend {
    fn name(&self) -> &'static str {
        "collective"
    }

    fn rank(&self) -> usize {
        self.rank
    }

    async fn connect(&self) -> EmptyResult {
        let inbox = self.world.claim(self.rank)?;
        *self.inbox.lock().await = Some(inbox);

        info!(rank = self.rank, size = self.world.size(), "Joined collective world");
        Ok(())
    }

    fn channels(&self, message: &Message) -> Result<Vec<String>, BoxedError> {
        let rank = self.rank;

        if message.is_broadcast() {
            return Ok((0..self.world.size())
                .filter(|r| *r != rank)
                .map(channel_name)
                .collect());
        }

        match usize::try_from(message.receiver_id()) {
            Ok(receiver) if receiver != rank && receiver < self.world.size() => {
                Ok(vec![channel_name(receiver)])
            }
            _ => Err(TopologyError::UnknownReceiver(message.receiver_id()).into()),
        }
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> EmptyResult {
        let receiver = channel
            .strip_prefix(CHANNEL_PREFIX)
            .and_then(|rank| rank.parse::<usize>().ok())
            .ok_or_else(|| TransportError::UnknownChannel(channel.to_string()))?;

        debug!(channel, size = payload.len(), "Delivering frame");

        self.world.deliver(
            receiver,
            InboundFrame {
                channel: channel.to_string(),
                payload: payload.to_vec(),
            },
        )?;

        Ok(())
    }

    async fn listen(&self) -> Result<FrameStream, BoxedError> {
        let inbox = self
            .inbox
            .lock()
            .await
            .take()
            .ok_or(TransportError::NotConnected)?;

        let frames = stream::unfold(inbox, |mut inbox| async move {
            inbox.recv().await.map(|frame| (Ok(frame), inbox))
        });

        Ok(frames.boxed())
    }

    async fn stop(&self) {
        if self.inbox.lock().await.take().is_some() {
            debug!(rank = self.rank, "Released unused inbox");
        }
    }
}
