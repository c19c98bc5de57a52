//! This library crate contains everything needed to exchange structured messages between one coordinator and a fixed
//! set of workers, independent of the transport carrying them.
//!
//! Submodules have been introduced to split responsibilities. They form a chain of dependencies from the low-level
//! [`library`], over the bus specific [`domain`] logic (envelopes, topics, payload offloading, transport backends and
//! the [`CommunicationManager`](domain::CommunicationManager) façade), up to the [`harness`] which dispatches inbound
//! messages to registered handlers.

#![deny(missing_docs)]
#![allow(clippy::nonstandard_macro_braces)]

pub mod constants;
pub mod domain;
pub mod harness;
pub mod library;
