//! Out-of-band reporting of connection state and per-message failures
//!
//! Lifecycle changes and failed deliveries never travel through message type dispatch. They
//! are broadcast on dedicated channels of the [`CommunicationManager`] so that consumers can
//! tell a dropped connection apart from an application message nobody handles.

use super::{CommunicationError, CommunicationManager, MessageType, Topology};
use crate::library::communication::BlackboxError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// State change of the transport underneath a [`CommunicationManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Transport connection established
    Connected {
        /// Symbolic name of the transport
        transport: String,
    },
    /// All inbound channels have been confirmed
    SubscriptionsReady,
    /// Connection dropped while receiving
    ConnectionLost {
        /// Description of the cause
        reason: String,
    },
    /// Receive loop returned and the transport has been released
    Stopped,
}

/// Category of a failed inbound delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Frame could not be decoded into an envelope
    MalformedEnvelope,
    /// Offloaded payload could not be retrieved
    BlobStoreUnavailable,
    /// No handler is registered for the message type
    UnhandledMessageType,
    /// An observer returned an error
    ObserverFailed,
}

/// Report about one inbound message that could not be delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Category of the failure
    pub kind: FailureKind,
    /// Channel the message arrived on
    pub channel: String,
    /// Type of the message if it could be decoded
    pub msg_type: Option<MessageType>,
    /// Cause of the failure
    pub error: BlackboxError,
}

/// Publishes run status updates on the status topic of a run
pub struct StatusPublisher {
    manager: Arc<CommunicationManager>,
    topic: String,
    run_id: String,
    rank: usize,
}

impl StatusPublisher {
    /// Creates a new publisher for the local participant
    pub fn new(manager: Arc<CommunicationManager>, topology: &Topology) -> Self {
        Self {
            manager,
            topic: topology.status_topic(),
            run_id: topology.run_id().to_string(),
            rank: topology.rank(),
        }
    }

    /// Topic updates are published on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Announces a new status of the local participant
    pub async fn publish_status(&self, status: &str) -> Result<(), CommunicationError> {
        debug!(topic = %self.topic, status, "Publishing run status");

        let update = json!({
            "run_id": self.run_id,
            "rank": self.rank,
            "status": status,
        });

        self.manager.send_message_json(&self.topic, &update).await
    }
}
