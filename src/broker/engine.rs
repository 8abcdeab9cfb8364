//! Broker engine
//!
//! Routes published messages to sessions. Every copy goes through the
//! dispatch engine, which may deliver it now, hold it in the session's
//! backlog or drop it according to the active rules.
//!
//! Concurrency and usage notes:
//! - The broker is shared as `Arc<Broker>`; topics and the client registry
//!   carry their own short-lived locks, which are never held across an
//!   `.await`. Dispatch may wait on transports and backlogs, so no broker
//!   wide lock may exist around it.
//! - A session outlives its socket. `client_lost` only marks the session
//!   as polling; `disconnect` tears it down.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::message::Message;
use crate::broker::topic::{SubscriberId, Topic};
use crate::client::{Client, ClientRegistry};
use crate::dispatch::reconfig::admin_topic;
use crate::dispatch::{
    ConnectionState, DispatchEngine, DispatchOutcome, EngineSettings, StatusConfigurationTable,
};
use crate::persistence::BacklogStorage;
use crate::transport::message::ServerMessage;
use crate::utils::error::{BrokerError, DeliveryError};

/// What became of a publish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The message carried a new rule document, which is now active.
    Reconfigured,
    /// Per-recipient outcome. Recipients whose dispatch failed are missing.
    Dispatched(Vec<(SubscriberId, DispatchOutcome)>),
}

pub struct Broker {
    topics: RwLock<HashMap<String, Topic>>,
    clients: Arc<ClientRegistry>,
    engine: Arc<DispatchEngine>,
    admin_topic: String,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(
            StatusConfigurationTable::default(),
            BacklogStorage::default(),
            EngineSettings::default(),
        )
    }
}

impl Broker {
    pub fn new(table: StatusConfigurationTable, storage: BacklogStorage, settings: EngineSettings) -> Self {
        let clients = Arc::new(ClientRegistry::default());
        let admin_topic = admin_topic(&settings.config_key);
        let engine = Arc::new(DispatchEngine::new(clients.clone(), table, storage, settings));
        Self {
            topics: RwLock::new(HashMap::new()),
            clients,
            engine,
            admin_topic,
        }
    }

    pub fn engine(&self) -> &Arc<DispatchEngine> {
        &self.engine
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn admin_topic(&self) -> &str {
        &self.admin_topic
    }

    /// Attaches a socket to a session, creating the session when `session`
    /// is `None` or unknown, and greets the socket with `connected`. A known
    /// session is marked connected again, which releases its backlog.
    pub async fn connect(
        &self,
        session: Option<String>,
        sender: UnboundedSender<WsMessage>,
    ) -> Result<Client, BrokerError> {
        let client = match session {
            Some(name) => {
                if name.trim().is_empty() || name == self.engine.settings().admin_identity {
                    return Err(BrokerError::ReservedSession(name));
                }
                Client::with_id(name, sender)
            }
            None => Client::new(sender),
        };
        let id = client.id.clone();

        if self.clients.register(client.clone()).is_some() {
            info!("Session {id} moved to a new socket");
        }
        // greet before the backlog is released onto the same channel
        let greeting = serde_json::to_string(&ServerMessage::Connected { session: id.clone() })
            .map_err(DeliveryError::from)?;
        if let Err(e) = client.sender.send(WsMessage::text(greeting)) {
            debug!("Greeting for {id} not sent, socket already gone: {e}");
        }

        match self.engine.register_target(&id, ConnectionState::Connected).await {
            Ok(report) if report.delivered > 0 => {
                info!("Session {id} connected, delivered {} held back messages", report.delivered)
            }
            Ok(_) => info!("Session {id} connected"),
            Err(e) => warn!("Releasing the backlog of {id} failed: {e}"),
        }
        Ok(client)
    }

    /// The socket `connection` of session `id` went away without a
    /// disconnect. The session keeps its subscriptions and collects a
    /// backlog until it reconnects.
    pub async fn client_lost(&self, id: &str, connection: Uuid) {
        if !self.clients.detach(id, connection) {
            debug!("Stale socket of {id} closed");
            return;
        }
        if let Err(e) = self
            .engine
            .on_connection_state_change(id, ConnectionState::Polling)
            .await
        {
            warn!("Marking {id} as polling failed: {e}");
        }
    }

    /// Tears a session down: socket, subscriptions, link state and backlog.
    pub async fn disconnect(&self, id: &str) {
        self.clients.remove(id);
        {
            let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
            for topic in topics.values_mut() {
                if topic.unsubscribe(id) {
                    debug!("Unsubscribed {id} from topic {}", topic.name);
                }
            }
            topics.retain(|_, t| !t.is_empty());
        }
        match self.engine.remove_target(id).await {
            Ok(dropped) => info!("Session {id} disconnected, {dropped} held back messages discarded"),
            Err(e) => warn!("Removing the backlog of {id} failed: {e}"),
        }
    }

    /// Subscribes a session to a topic. Automatically creates the topic if it doesn't exist.
    pub fn subscribe(&self, topic: &str, subscriber: SubscriberId) -> bool {
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(subscriber)
    }

    pub fn unsubscribe(&self, topic: &str, subscriber: &str) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let Some(t) = topics.get_mut(topic) else {
            return false;
        };
        let removed = t.unsubscribe(subscriber);
        if t.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    pub fn subscribers(&self, topic: &str) -> Vec<SubscriberId> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|t| t.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Publishes a message.
    ///
    /// The admin topic carries rule documents and is never forwarded. A
    /// configured status topic updates the link state of every session
    /// before it is delivered like any other message. A message with a
    /// destination goes to that session only.
    pub async fn publish(&self, mut msg: Message) -> Result<PublishOutcome, BrokerError> {
        msg.timestamp = Utc::now().timestamp_millis();
        if msg.message_id.is_empty() {
            msg.message_id = Uuid::new_v4().to_string();
        }

        if msg.topic == self.admin_topic {
            self.engine.reconfigure(&msg.payload)?;
            info!("Dispatch rules replaced by '{}' from {}", msg.message_id, msg.sender);
            return Ok(PublishOutcome::Reconfigured);
        }

        if self.engine.table().is_status_oid(&msg.topic) {
            let reports = self.engine.on_status_update(&msg.topic, msg.payload.trim()).await;
            for (target, report) in reports {
                debug!(
                    "Status {} released backlog of {target}: delivered={} dropped={}",
                    msg.payload, report.delivered, report.dropped
                );
            }
        }

        let recipients = match &msg.destination {
            Some(destination) => {
                if self.engine.link_snapshot(destination).is_none() && !self.clients.is_connected(destination) {
                    warn!("Point to point message '{}' for unknown session {destination}", msg.message_id);
                    return Ok(PublishOutcome::Dispatched(Vec::new()));
                }
                vec![destination.clone()]
            }
            None => self.subscribers(&msg.topic),
        };
        if recipients.is_empty() {
            debug!("Topic '{}' has no subscribers", msg.topic);
        }

        let mut outcomes = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            match self.engine.dispatch(&recipient, msg.clone()).await {
                Ok(report) => outcomes.push((recipient, report.outcome)),
                Err(e) => warn!("Dispatch of '{}' to {recipient} failed: {e}", msg.message_id),
            }
        }
        Ok(PublishOutcome::Dispatched(outcomes))
    }
}
