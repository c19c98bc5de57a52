//! Trait implementations using [`redis`](::redis) PubSub channels

mod connector;
mod subscriber;

pub use connector::*;
pub use subscriber::*;
