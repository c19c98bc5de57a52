use super::{BlobStoreError, MessageError, MessageType};
use crate::library::BoxedError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the [`CommunicationManager`](super::CommunicationManager) and its users
#[derive(Error, Debug)]
pub enum CommunicationError {
    /// Envelope could not be encoded or decoded
    #[error("malformed envelope")]
    MalformedEnvelope(#[from] MessageError),
    /// No handler has been registered for the type of a received message
    #[error("no handler registered for message type {0}")]
    UnhandledMessageType(MessageType),
    /// Payload could not be offloaded or resolved
    #[error("blob store unavailable")]
    BlobStoreUnavailable(#[from] BlobStoreError),
    /// Transport connection dropped while receiving
    #[error("transport connection lost: {0}")]
    TransportConnectionLost(String),
    /// Observer has been registered before
    #[error("observer is already registered")]
    DuplicateObserverRegistration,
    /// Another handler is registered for the same message type
    #[error("a handler for message type {0} is already registered")]
    DuplicateHandlerRegistration(MessageType),
    /// Registered handler returned an error
    #[error("handler for message type {msg_type} failed")]
    HandlerFailed {
        /// Type of the handled message
        msg_type: MessageType,
        /// Underlying cause
        source: BoxedError,
    },
    /// Transport does not know how to reach the receiver
    #[error("no route to receiver {receiver_id}")]
    UnknownReceiver {
        /// Addressed receiver
        receiver_id: i64,
        /// Underlying cause
        source: BoxedError,
    },
    /// Inbound channels were not confirmed in time
    #[error("transport not ready after {0:?}")]
    NotReady(Duration),
    /// Manager has been stopped
    #[error("communication manager has been stopped")]
    NotConnected,
    /// Receive loop is already running
    #[error("receive loop is already running")]
    AlreadyRunning,
    /// Transport failed to connect, publish or listen
    #[error("transport failure")]
    Transport(#[source] BoxedError),
}
