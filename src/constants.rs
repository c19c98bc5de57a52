//! Values shared by every participant of a run
//!
//! All of these end up on the wire or in topic names and thus have to be identical across processes.

/// Envelope key carrying the identity of the originating process
pub const KEY_SENDER_ID: &str = "sender_id";

/// Envelope key carrying the identity of the target process
pub const KEY_RECEIVER_ID: &str = "receiver_id";

/// Envelope key carrying the message type discriminator
pub const KEY_TYPE: &str = "type";

/// Reserved parameter holding either an inline payload or the blob key of an offloaded one
pub const KEY_MODEL_PARAMS: &str = "MODEL_PARAMS";

/// Reserved parameter holding the retrieval URL of an offloaded payload
pub const KEY_MODEL_PARAMS_URL: &str = "MODEL_PARAMS_URL";

/// Receiver identity addressing every peer reachable from the sender
pub const BROADCAST_RECEIVER_ID: i64 = -1;

/// Identity of the coordinator, both as a rank and on the wire
pub const COORDINATOR_ID: i64 = 0;

/// Leading component of every topic name
pub const TOPIC_PREFIX: &str = "fedml_";

/// Channel on which broker connections announce their presence
pub const PRESENCE_CHANNEL: &str = "W/topic";

/// Base port used by the RPC backend when a peer does not specify one
pub const RPC_BASE_PORT: u16 = 50000;
