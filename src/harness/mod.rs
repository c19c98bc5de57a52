//! Runtime harness dispatching received messages to application handlers

mod orchestrator;

pub use orchestrator::*;
