//! Message definitions for the broker
//!
//! `Message` is the canonical wire/internal representation used by the
//! broker and the dispatch engine.
//!
//! Notes on fields:
//! - `topic`: topic name used for routing
//! - `payload`: message body as a String (the protocol is JSON)
//! - `timestamp`: milliseconds since UNIX epoch; set by the broker upon publish
//! - `message_id`: opaque unique id; the broker generates one if missing
//! - `priority`: 0 (lowest) to 9 (highest), 5 if not given
//! - `sender`: session name of the publisher, empty for anonymous messages
//! - `destination`: set for point-to-point messages
//! - `internal`: broker-internal traffic that bypasses dispatch rules
//! - `state` / `state_info` / `in_reply_to`: filled on dispatch notifications

use serde::{Deserialize, Serialize};

use crate::dispatch::priority::Priority;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub timestamp: i64,
    pub message_id: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: 0,
            message_id: String::new(),
            priority: Priority::default(),
            sender: String::new(),
            destination: None,
            internal: false,
            state: None,
            state_info: None,
            in_reply_to: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn is_ptp(&self) -> bool {
        self.destination.is_some()
    }
}
