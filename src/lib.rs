//! # msgdispatch
//!
//! `msgdispatch` is a websocket publish/subscribe broker whose outgoing
//! traffic is governed by priority and link-status driven dispatch rules.
//! Every message copy bound for a session is delivered now, held in the
//! session's backlog until the link improves, or destroyed, optionally
//! telling the publisher what happened.
//!
//! ## Core Modules
//!
//! - `dispatch`: rule parsing, link state tracking and the dispatch engine.
//! - `broker`: topics, sessions and message routing through the engine.
//! - `client`: connected sessions and the registry the engine delivers through.
//! - `config`: loading and merging server configuration.
//! - `persistence`: backlog storage, in memory or in sled.
//! - `transport`: the websocket server and its JSON frames.
//! - `utils`: error types and the logging bootstrap.

pub mod broker;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod persistence;
pub mod transport;
pub mod utils;
