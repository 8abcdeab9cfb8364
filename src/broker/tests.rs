use super::topic::Topic;
use super::{Broker, PublishOutcome};
use crate::broker::message::Message;
use crate::dispatch::parser::parse;
use crate::dispatch::{ConnectionState, DispatchOutcome, EngineSettings, Priority};
use crate::persistence::BacklogStorage;
use crate::transport::message::ServerMessage;
use crate::utils::error::BrokerError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tungstenite::protocol::Message as WsMessage;

const RULES: &str = r#"
<msgDispatch defaultStatus='UP' defaultAction='send'>
  <onStatus oid='_link.status' content='UP' defaultAction='send'/>
  <onStatus oid='_link.status' content='SLOW' defaultAction='send'>
    <action do='queue|notifySender' ifPriority='0-4'/>
  </onStatus>
</msgDispatch>
"#;

fn broker() -> Broker {
    Broker::new(parse(RULES).unwrap(), BacklogStorage::Memory, EngineSettings::default())
}

async fn session(broker: &Broker, name: &str) -> (uuid::Uuid, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let client = broker.connect(Some(name.to_string()), tx).await.unwrap();
    (client.connection, rx)
}

fn drain(rx: &mut UnboundedReceiver<WsMessage>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let WsMessage::Text(text) = frame {
            if let ServerMessage::Message(m) = serde_json::from_str(&text).unwrap() {
                out.push(m);
            }
        }
    }
    out
}

fn publish(topic: &str, payload: &str, priority: u8) -> Message {
    Message::new(topic, payload)
        .with_sender("alice")
        .with_priority(Priority::new(priority).unwrap())
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new("test_topic");
    assert_eq!(topic.name, "test_topic");
    assert!(topic.subscribe("client1".to_string()));
    assert!(!topic.subscribe("client1".to_string()));
    assert!(topic.unsubscribe("client1"));
    assert!(topic.is_empty());
}

#[test]
fn test_broker_subscribe_and_unsubscribe() {
    let broker = Broker::default();
    broker.subscribe("test_topic", "bob".to_string());
    broker.subscribe("test_topic", "carol".to_string());
    assert_eq!(broker.subscribers("test_topic"), vec!["bob", "carol"]);

    assert!(broker.unsubscribe("test_topic", "bob"));
    assert!(!broker.unsubscribe("test_topic", "bob"));
    assert!(broker.unsubscribe("test_topic", "carol"));
    assert!(broker.subscribers("test_topic").is_empty());
}

#[tokio::test]
async fn test_broker_publish_reaches_subscribers() {
    let broker = broker();
    let (_, mut bob) = session(&broker, "bob").await;
    broker.subscribe("news", "bob".to_string());

    let outcome = broker.publish(publish("news", "hello", 5)).await.unwrap();
    assert_eq!(
        outcome,
        PublishOutcome::Dispatched(vec![("bob".to_string(), DispatchOutcome::Delivered)])
    );

    let got = drain(&mut bob);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].payload, "hello");
    assert!(!got[0].message_id.is_empty());
    assert!(got[0].timestamp > 0);
}

#[tokio::test]
async fn test_reserved_session_names_are_refused() {
    let broker = broker();
    let (tx, _rx) = mpsc::unbounded_channel::<WsMessage>();
    let err = broker.connect(Some("__dispatch".into()), tx.clone()).await.unwrap_err();
    assert!(matches!(err, BrokerError::ReservedSession(_)));
    assert!(broker.connect(Some("  ".into()), tx.clone()).await.is_err());

    let generated = broker.connect(None, tx).await.unwrap();
    assert!(!generated.id.is_empty());
}

#[tokio::test]
async fn test_status_topic_holds_back_and_releases() {
    let broker = broker();
    let (_, mut bob) = session(&broker, "bob").await;
    let (_, mut alice) = session(&broker, "alice").await;
    broker.subscribe("news", "bob".to_string());
    broker.subscribe("_link.status", "bob".to_string());

    broker.publish(publish("_link.status", "SLOW", 9)).await.unwrap();
    let status = drain(&mut bob);
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].payload, "SLOW");

    let outcome = broker.publish(publish("news", "low", 2)).await.unwrap();
    assert_eq!(
        outcome,
        PublishOutcome::Dispatched(vec![("bob".to_string(), DispatchOutcome::Queued)])
    );
    broker.publish(publish("news", "high", 8)).await.unwrap();
    assert_eq!(drain(&mut bob).iter().map(|m| m.payload.as_str()).collect::<Vec<_>>(), vec!["high"]);

    let notes = drain(&mut alice);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].state.as_deref(), Some("queue,notifySender"));
    assert_eq!(notes[0].destination.as_deref(), Some("alice"));

    broker.publish(publish("_link.status", "UP", 9)).await.unwrap();
    let released: Vec<String> = drain(&mut bob).into_iter().map(|m| m.payload).collect();
    assert_eq!(released, vec!["low", "UP"]);
}

#[tokio::test]
async fn test_admin_topic_reconfigures_without_forwarding() {
    let broker = broker();
    let (_, mut bob) = session(&broker, "bob").await;
    broker.subscribe("admin-config/dispatch", "bob".to_string());
    broker.subscribe("news", "bob".to_string());

    let rules = "<msgDispatch defaultAction='destroy'/>";
    let outcome = broker.publish(publish("admin-config/dispatch", rules, 5)).await.unwrap();
    assert_eq!(outcome, PublishOutcome::Reconfigured);
    assert!(drain(&mut bob).is_empty());

    let outcome = broker.publish(publish("news", "gone", 5)).await.unwrap();
    assert_eq!(
        outcome,
        PublishOutcome::Dispatched(vec![("bob".to_string(), DispatchOutcome::Dropped)])
    );

    let err = broker
        .publish(publish("admin-config/dispatch", "<msgDispatch defaultAction='bounce'/>", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Rules(_)));
    assert_eq!(broker.engine().table().default_action().to_string(), "destroy");
}

#[tokio::test]
async fn test_point_to_point_skips_subscribers() {
    let broker = broker();
    let (_, mut bob) = session(&broker, "bob").await;
    let (_, mut carol) = session(&broker, "carol").await;
    broker.subscribe("news", "bob".to_string());
    broker.subscribe("news", "carol".to_string());

    broker
        .publish(publish("news", "direct", 5).with_destination("carol"))
        .await
        .unwrap();
    assert!(drain(&mut bob).is_empty());
    assert_eq!(drain(&mut carol).len(), 1);

    let outcome = broker
        .publish(publish("news", "lost", 5).with_destination("nobody"))
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Dispatched(Vec::new()));
}

#[tokio::test]
async fn test_lost_socket_polls_until_reconnect() {
    let broker = broker();
    let (connection, rx) = session(&broker, "bob").await;
    broker.subscribe("news", "bob".to_string());
    drop(rx);

    broker.client_lost("bob", connection).await;
    assert_eq!(
        broker.engine().link_snapshot("bob").unwrap().connection,
        ConnectionState::Polling
    );

    let outcome = broker.publish(publish("news", "while away", 5)).await.unwrap();
    assert_eq!(
        outcome,
        PublishOutcome::Dispatched(vec![("bob".to_string(), DispatchOutcome::Queued)])
    );

    let (_, mut bob) = session(&broker, "bob").await;
    let got = drain(&mut bob);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].payload, "while away");
    assert_eq!(broker.subscribers("news"), vec!["bob"]);
}

#[tokio::test]
async fn test_disconnect_tears_session_down() {
    let broker = broker();
    let (connection, _rx) = session(&broker, "bob").await;
    broker.subscribe("news", "bob".to_string());
    broker.client_lost("bob", connection).await;
    broker.publish(publish("news", "held", 5)).await.unwrap();
    assert_eq!(broker.engine().backlog_len("bob").await, 1);

    broker.disconnect("bob").await;
    assert!(broker.subscribers("news").is_empty());
    assert!(broker.engine().link_snapshot("bob").is_none());
    assert!(!broker.clients().is_connected("bob"));
}

#[tokio::test]
async fn test_closed_channel_does_not_affect_other_subscribers() {
    let broker = broker();
    let (_, rx) = session(&broker, "bob").await;
    let (_, mut carol) = session(&broker, "carol").await;
    broker.subscribe("news", "bob".to_string());
    broker.subscribe("news", "carol".to_string());
    drop(rx);

    let outcome = broker.publish(publish("news", "hello", 5)).await.unwrap();
    assert_eq!(
        outcome,
        PublishOutcome::Dispatched(vec![("carol".to_string(), DispatchOutcome::Delivered)])
    );
    assert_eq!(drain(&mut carol).len(), 1);
}

#[tokio::test]
async fn test_connect_survives_socket_closed_before_greeting() {
    let broker = broker();
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    drop(rx);

    let client = broker.connect(Some("bob".into()), tx).await.unwrap();
    assert_eq!(client.id, "bob");
    assert!(broker.clients().is_connected("bob"));
    assert_eq!(
        broker.engine().link_snapshot("bob").unwrap().connection,
        ConnectionState::Connected
    );
}
