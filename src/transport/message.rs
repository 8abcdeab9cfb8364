use serde::{Deserialize, Serialize};

use crate::broker::message::Message;

/// Frames a client may send. A session starts with `connect`; everything
/// else is refused until then.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "connect")]
    Connect {
        #[serde(default)]
        session: Option<String>,
    },
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
    #[serde(rename = "publish")]
    Publish {
        topic: String,
        payload: String,
        #[serde(default)]
        priority: Option<u8>,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        destination: Option<String>,
    },
    #[serde(rename = "disconnect")]
    Disconnect,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected { session: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "message")]
    Message(Message),
}
