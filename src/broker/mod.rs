//! The `broker` module routes published messages to subscribed sessions
//! through the dispatch engine and keeps track of session lifecycles.

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::{Broker, PublishOutcome};

#[cfg(test)]
mod tests;
