//! Structures to move raw bytes between processes
//!
//! Two modes of transport are provided:
//!
//! 1. Publish and subscribe over named channels, abstracted by the [`PubSubConnector`] and
//!    [`PubSubSubscriber`] traits with [`redis`](implementation::redis) and
//!    [`in-memory`](implementation::memory) implementations.
//! 2. Direct point-to-point delivery of length-delimited frames over TCP, see the [`frame`] module.
//!
//! Neither mode knows anything about the content of the bytes it moves. Serialization and
//! routing are the responsibility of the [`domain`](crate::domain).

mod error;
mod pubsub;

pub mod frame;
pub mod implementation;

pub use error::BlackboxError;
pub use pubsub::*;
