//! Independent and project agnostic libraries
//!
//! Ideally, any of the library submodules in this module can be extracted into their own crate
//! at any given time. They have been developed with the bus in mind, however, they are in no way
//! bound to it and everything message specific lives in the [`domain`](super::domain) module.

pub mod communication;
pub mod helpers;
pub mod storage;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
