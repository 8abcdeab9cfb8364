//! The `error` module defines the error types used across `msgdispatch`.
//!
//! Errors are grouped by where they originate: rule documents, the delivery
//! transport and backlog storage. `DispatchError` covers one dispatch, which
//! may fail in either of the latter two; `BrokerError` is what a client
//! request can be refused with.

use thiserror::Error;

/// Rejection of a dispatch rule document. A document that yields any of
/// these is never installed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("malformed rule document: {0}")]
    Xml(String),

    #[error("unexpected element <{0}>")]
    UnknownElement(String),

    #[error("unknown attribute '{attribute}' on <{element}>")]
    UnknownAttribute { element: String, attribute: String },

    #[error("missing attribute '{attribute}' on <{element}>")]
    MissingAttribute { element: String, attribute: String },

    #[error("unknown dispatch action '{0}'")]
    UnknownAction(String),

    #[error("invalid dispatch action combination '{0}'")]
    InvalidActionCombination(String),

    #[error("priority '{0}' is outside 0-9")]
    PriorityOutOfRange(String),

    #[error("malformed priority range '{0}'")]
    MalformedPriorityRange(String),

    #[error("priority {priority} is addressed twice in <onStatus content='{content}'>")]
    OverlappingPriority { content: String, priority: u8 },

    #[error("status content '{0}' is configured twice")]
    DuplicateStatus(String),

    #[error("connection state '{0}' is configured twice")]
    DuplicateConnectionState(String),

    #[error("unknown connection state '{0}'")]
    UnknownConnectionState(String),
}

/// Failure of the delivery primitive for one attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("target '{0}' is not connected")]
    NotConnected(String),

    #[error("outbound channel of '{0}' is closed")]
    ChannelClosed(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Failure of the backlog storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("backlog entry codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt backlog key of {0} bytes")]
    CorruptKey(usize),
}

/// Failure while dispatching or flushing one message.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Backlog(#[from] StoreError),
}

/// Refusal of a session or publish request by the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("session name '{0}' is reserved")]
    ReservedSession(String),

    #[error("rejected dispatch configuration: {0}")]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}
