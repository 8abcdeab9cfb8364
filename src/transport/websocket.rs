//! WebSocket transport
//!
//! This file implements the websocket server that translates protocol JSON
//! frames into broker operations. Responsibilities:
//! - Accept TCP/WebSocket connections, at most `max_connections` at a time
//! - Enforce a connect -> other-message order: a socket must name (or be
//!   given) a session before subscribing or publishing
//! - Serialize/deserialize JSON frames and forward requests to the broker
//! - Tell the broker whether a socket ended with `disconnect` (session torn
//!   down) or just went away (session kept, link polling)

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::Broker;
use crate::broker::message::Message;
use crate::config::Settings;
use crate::dispatch::Priority;
use crate::transport::message::{ClientMessage, ServerMessage};

/// Binds and serves until the listener fails.
pub async fn start_websocket_server(addr: String, broker: Arc<Broker>, settings: Settings) -> io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, broker, settings).await
}

pub async fn serve(listener: TcpListener, broker: Arc<Broker>, settings: Settings) -> io::Result<()> {
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    let open = Arc::new(AtomicUsize::new(0));

    loop {
        let (stream, peer) = listener.accept().await?;
        let slot = ConnectionSlot::acquire(open.clone(), settings.broker.max_connections);
        let broker = broker.clone();
        tokio::spawn(async move {
            debug!("Accepted socket from {peer}");
            handle_socket(stream, broker, slot).await;
        });
    }
}

/// Counts one open socket for as long as it lives.
struct ConnectionSlot {
    open: Arc<AtomicUsize>,
    admitted: bool,
}

impl ConnectionSlot {
    fn acquire(open: Arc<AtomicUsize>, limit: usize) -> Self {
        let admitted = open.fetch_add(1, Ordering::SeqCst) < limit;
        Self { open, admitted }
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

fn reply(tx: &UnboundedSender<WsMessage>, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(json) => {
            let _ = tx.send(WsMessage::text(json));
        }
        Err(e) => error!("Failed to serialize server message: {e}"),
    }
}

fn refuse(tx: &UnboundedSender<WsMessage>, message: &str) {
    reply(
        tx,
        &ServerMessage::Error {
            message: message.to_string(),
        },
    );
}

async fn handle_socket(stream: TcpStream, broker: Arc<Broker>, slot: ConnectionSlot) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = msg.is_close();
            if let Err(e) = ws_sender.send(msg).await {
                debug!("Socket send failed: {e}");
                break;
            }
            if closing {
                break;
            }
        }
    });

    if !slot.admitted {
        warn!("Refusing socket, too many connections");
        refuse(&tx, "too many connections");
        let _ = tx.send(WsMessage::Close(None));
        drop(tx);
        let _ = writer.await;
        return;
    }

    let mut session: Option<(String, Uuid)> = None;
    let mut disconnected = false;

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };

        let request = match serde_json::from_str::<ClientMessage>(text) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    "Invalid client message: {err} | {}",
                    text.chars().take(100).collect::<String>()
                );
                refuse(&tx, &format!("invalid message: {err}"));
                continue;
            }
        };

        let current = session.as_ref().map(|(id, _)| id.clone());
        let Some(id) = current else {
            if let ClientMessage::Connect { session: name } = request {
                match broker.connect(name, tx.clone()).await {
                    Ok(client) => session = Some((client.id, client.connection)),
                    Err(e) => refuse(&tx, &e.to_string()),
                }
                continue;
            }
            warn!("Socket sent a request before connect");
            refuse(&tx, "must connect first");
            let _ = tx.send(WsMessage::Close(None));
            break;
        };

        match request {
            ClientMessage::Connect { .. } => refuse(&tx, "already connected"),
            ClientMessage::Subscribe { topic } => {
                broker.subscribe(&topic, id.clone());
                info!("{id} subscribed to {topic}");
            }
            ClientMessage::Unsubscribe { topic } => {
                broker.unsubscribe(&topic, &id);
                info!("{id} unsubscribed from {topic}");
            }
            ClientMessage::Publish {
                topic,
                payload,
                priority,
                message_id,
                destination,
            } => {
                let priority = match priority.map(Priority::try_from).transpose() {
                    Ok(priority) => priority.unwrap_or_default(),
                    Err(e) => {
                        refuse(&tx, &e.to_string());
                        continue;
                    }
                };
                let mut message = Message::new(topic, payload)
                    .with_sender(id.clone())
                    .with_priority(priority);
                message.message_id = message_id.unwrap_or_default();
                message.destination = destination;

                let topic = message.topic.clone();
                match broker.publish(message).await {
                    Ok(_) => debug!("{id} published to {topic}"),
                    Err(e) => {
                        warn!("Publish from {id} to {topic} refused: {e}");
                        refuse(&tx, &e.to_string());
                    }
                }
            }
            ClientMessage::Disconnect => {
                broker.disconnect(&id).await;
                disconnected = true;
                let _ = tx.send(WsMessage::Close(None));
                break;
            }
        }
    }

    if !disconnected {
        if let Some((id, connection)) = session {
            info!("Socket of {id} closed without disconnect");
            broker.client_lost(&id, connection).await;
        }
    }
    drop(tx);
    drop(slot);
}
