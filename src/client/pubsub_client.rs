//! Client representation
//!
//! `Client` models one live socket of a session and holds the sending side
//! of the per-socket channel the transport drains into the websocket. The
//! session name (`id`) outlives the socket: a session whose socket dropped
//! keeps its subscriptions and backlog until it reconnects or disconnects.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Client {
    /// Session name, also the dispatch target name.
    pub id: String,
    /// Identifies the socket currently serving the session.
    pub connection: Uuid,
    pub sender: UnboundedSender<WsMessage>,
}

impl Client {
    /// Creates a client with a generated session name.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), sender)
    }

    pub fn with_id(id: impl Into<String>, sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: id.into(),
            connection: Uuid::new_v4(),
            sender,
        }
    }
}
