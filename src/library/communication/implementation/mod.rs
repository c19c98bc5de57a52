//! Implementations of the [`PubSubConnector`](super::PubSubConnector) trait

pub mod memory;
pub mod redis;
