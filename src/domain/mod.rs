//! Domain specific structures, implementations, and logic
//!
//! Everything that gives meaning to the bytes moved by the [`library`](crate::library) lives
//! here: the [`Message`] envelope, the [`Topology`] naming scheme, the offload protocol, the
//! [`transport`] families and the [`CommunicationManager`] tying them together.

mod blob;
mod config;
mod error;
mod manager;
mod message;
mod observer;
mod offload;
mod status;
mod topology;

pub mod transport;

pub use blob::*;
pub use config::*;
pub use error::*;
pub use manager::*;
pub use message::*;
pub use observer::*;
pub use offload::*;
pub use status::*;
pub use topology::*;
