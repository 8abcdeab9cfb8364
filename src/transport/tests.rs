use crate::broker::message::Message;
use crate::transport::message::{ClientMessage, ServerMessage};
use serde_json::json;

#[test]
fn test_parse_connect_with_and_without_session() {
    let named: ClientMessage =
        serde_json::from_value(json!({ "type": "connect", "session": "bob" })).unwrap();
    assert!(matches!(named, ClientMessage::Connect { session: Some(s) } if s == "bob"));

    let anonymous: ClientMessage = serde_json::from_value(json!({ "type": "connect" })).unwrap();
    assert!(matches!(anonymous, ClientMessage::Connect { session: None }));
}

#[test]
fn test_parse_publish_optional_fields() {
    let minimal: ClientMessage = serde_json::from_value(json!({
        "type": "publish",
        "topic": "news",
        "payload": "hello"
    }))
    .unwrap();
    match minimal {
        ClientMessage::Publish {
            priority,
            message_id,
            destination,
            ..
        } => {
            assert!(priority.is_none());
            assert!(message_id.is_none());
            assert!(destination.is_none());
        }
        other => panic!("Expected Publish, got {other:?}"),
    }

    let full: ClientMessage = serde_json::from_value(json!({
        "type": "publish",
        "topic": "news",
        "payload": "hello",
        "priority": 7,
        "message_id": "m-1",
        "destination": "carol"
    }))
    .unwrap();
    assert!(matches!(
        full,
        ClientMessage::Publish { priority: Some(7), destination: Some(ref d), .. } if d == "carol"
    ));
}

#[test]
fn test_parse_disconnect_and_reject_unknown() {
    let msg: ClientMessage = serde_json::from_value(json!({ "type": "disconnect" })).unwrap();
    assert!(matches!(msg, ClientMessage::Disconnect));
    assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "login" })).is_err());
}

#[test]
fn test_server_message_frame_is_flat() {
    let mut message = Message::new("news", "hello").with_sender("alice");
    message.message_id = "m-1".into();
    let value = serde_json::to_value(ServerMessage::Message(message)).unwrap();
    assert_eq!(value["type"], "message");
    assert_eq!(value["topic"], "news");
    assert_eq!(value["priority"], 5);
    assert_eq!(value["sender"], "alice");
    assert!(value.get("state").is_none());

    let error = serde_json::to_value(ServerMessage::Error {
        message: "must connect first".into(),
    })
    .unwrap();
    assert_eq!(error, json!({ "type": "error", "message": "must connect first" }));
}
