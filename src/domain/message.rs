//! Envelope exchanged between bus participants

use crate::constants::{BROADCAST_RECEIVER_ID, KEY_RECEIVER_ID, KEY_SENDER_ID, KEY_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::trace;

/// Discriminator used to dispatch a message to its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(pub i32);

impl From<i32> for MessageType {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors related to building or decoding messages
#[derive(Error, Debug)]
pub enum MessageError {
    /// Inbound bytes are not a JSON object carrying all header fields
    #[error("malformed envelope")]
    Malformed(#[source] serde_json::Error),
    /// Header fields can not be overwritten through the parameter map
    #[error("parameter key {0} is reserved for the envelope header")]
    ReservedKey(String),
    /// Value could not be converted into JSON
    #[error("unable to serialize parameter {key}")]
    InvalidParam {
        /// Key of the parameter
        key: String,
        /// Underlying cause
        source: serde_json::Error,
    },
}

/// Structured unit of communication
///
/// On the wire, a message is a flat JSON object containing the three header fields
/// `sender_id`, `receiver_id` and `type` next to all parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    sender_id: i64,
    receiver_id: i64,
    #[serde(rename = "type")]
    msg_type: MessageType,
    #[serde(flatten)]
    params: Map<String, Value>,
}

impl Message {
    /// Creates a new message without any parameters
    pub fn new(sender_id: i64, receiver_id: i64, msg_type: impl Into<MessageType>) -> Self {
        Self {
            sender_id,
            receiver_id,
            msg_type: msg_type.into(),
            params: Map::new(),
        }
    }

    /// Identity of the originating participant
    pub fn sender_id(&self) -> i64 {
        self.sender_id
    }

    /// Identity of the target participant or [`BROADCAST_RECEIVER_ID`]
    pub fn receiver_id(&self) -> i64 {
        self.receiver_id
    }

    /// Discriminator of the message
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    /// Whether the message addresses every peer
    pub fn is_broadcast(&self) -> bool {
        self.receiver_id == BROADCAST_RECEIVER_ID
    }

    /// Sets a parameter, replacing any previous value stored under the same key
    pub fn set_param<V: Serialize>(&mut self, key: &str, value: V) -> Result<(), MessageError> {
        if is_header_key(key) {
            return Err(MessageError::ReservedKey(key.to_string()));
        }

        let value = serde_json::to_value(value).map_err(|source| MessageError::InvalidParam {
            key: key.to_string(),
            source,
        })?;

        self.params.insert(key.to_string(), value);
        Ok(())
    }

    /// Raw value of a parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Value of a parameter converted into `T`, or the default if it is absent or of a different type
    pub fn param_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.params.get(key) {
            Some(value) => T::deserialize(value).unwrap_or_else(|e| {
                trace!(key, ?e, "Parameter has unexpected type, using default");
                default
            }),
            None => default,
        }
    }

    /// All parameters, excluding the header fields
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.params
    }

    /// Encodes the message as a JSON object
    pub fn serialize(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(MessageError::Malformed)
    }

    /// Decodes a message, failing if the input is no JSON object or lacks a header field
    pub fn deserialize(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(MessageError::Malformed)
    }
}

fn is_header_key(key: &str) -> bool {
    key == KEY_SENDER_ID || key == KEY_RECEIVER_ID || key == KEY_TYPE
}
