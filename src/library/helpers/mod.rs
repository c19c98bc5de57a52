//! Various small helpers

mod backoff;
mod identifier;

pub use backoff::Backoff;
pub use identifier::base62_identifier;
