//! Registry of sessions that currently have a live socket.
//!
//! The registry is the delivery primitive of the dispatch engine: handing a
//! message to a session means pushing one JSON frame into its socket's
//! outbound channel.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::message::Message;
use crate::broker::topic::SubscriberId;
use crate::client::Client;
use crate::dispatch::Transport;
use crate::transport::message::ServerMessage;
use crate::utils::error::DeliveryError;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<SubscriberId, Client>>,
}

impl ClientRegistry {
    /// Registers `client`, replacing any earlier socket of the same session.
    pub fn register(&self, client: Client) -> Option<Client> {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client.id.clone(), client)
    }

    /// Removes the session's socket, but only if it is still `connection`.
    /// A stale socket closing after its session reconnected is ignored.
    pub fn detach(&self, id: &str, connection: Uuid) -> bool {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        match clients.get(id) {
            Some(client) if client.connection == connection => {
                clients.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<Client> {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sender(&self, id: &str) -> Option<tokio::sync::mpsc::UnboundedSender<WsMessage>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|c| c.sender.clone())
    }
}

#[async_trait]
impl Transport for ClientRegistry {
    async fn deliver_now(&self, target: &str, message: &Message) -> Result<(), DeliveryError> {
        let sender = self
            .sender(target)
            .ok_or_else(|| DeliveryError::NotConnected(target.to_string()))?;
        let frame = serde_json::to_string(&ServerMessage::Message(message.clone()))?;
        sender
            .send(WsMessage::text(frame))
            .map_err(|_| DeliveryError::ChannelClosed(target.to_string()))?;
        debug!("Delivered '{}' on {} to {target}", message.message_id, message.topic);
        Ok(())
    }
}
