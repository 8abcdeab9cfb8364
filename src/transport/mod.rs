//! The `transport` module is responsible for network communication with
//! clients via WebSockets.
//!
//! It defines the JSON frames exchanged with clients and implements the
//! websocket server, which manages sockets, the connect handshake and
//! forwards client requests to the broker.

pub mod message;
pub mod websocket;

#[cfg(test)]
mod tests;
