//! The `client` module defines the representation of a connected session
//! and the registry the dispatch engine delivers through.
//!
//! `Client` encapsulates one socket of a session: its session name, a
//! socket identifier and the channel for sending frames to it.
//! `ClientRegistry` maps session names to their live sockets.

pub mod pubsub_client;
pub mod registry;

pub use pubsub_client::Client;
pub use registry::ClientRegistry;
