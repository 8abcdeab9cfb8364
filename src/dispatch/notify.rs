//! Point-to-point notifications back to the publisher of a message that
//! was queued or destroyed by the dispatch rules.

use chrono::Utc;
use uuid::Uuid;

use crate::broker::message::Message;
use crate::dispatch::action::ActionSet;

/// Builds the notification for `original`. The notification keeps the
/// original topic, is addressed to the original sender and is sent from
/// `admin_identity`, never from the real recipient.
pub fn notification_for(
    original: &Message,
    action: ActionSet,
    admin_identity: &str,
    config_key: &str,
    link_status: Option<&str>,
) -> Message {
    Message {
        topic: original.topic.clone(),
        payload: String::new(),
        timestamp: Utc::now().timestamp_millis(),
        message_id: Uuid::new_v4().to_string(),
        priority: original.priority,
        sender: admin_identity.to_string(),
        destination: Some(original.sender.clone()),
        internal: false,
        state: Some(action.to_string()),
        state_info: Some(format!(
            "Notification about special message treatment in dispatch plugin {config_key}, link status={}",
            link_status.unwrap_or("none")
        )),
        in_reply_to: Some(original.message_id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::priority::Priority;

    #[test]
    fn test_notification_is_addressed_back_to_sender() {
        let mut original = Message::new("news", "body")
            .with_sender("alice")
            .with_priority(Priority::new(6).unwrap());
        original.message_id = "m-1".into();

        let n = notification_for(&original, ActionSet::QUEUE.with_notify(), "__dispatch", "dispatch", Some("64k"));
        assert_eq!(n.destination.as_deref(), Some("alice"));
        assert_eq!(n.sender, "__dispatch");
        assert_eq!(n.topic, "news");
        assert!(n.payload.is_empty());
        assert_eq!(n.state.as_deref(), Some("queue,notifySender"));
        assert_eq!(n.in_reply_to.as_deref(), Some("m-1"));
        assert!(n.state_info.unwrap().contains("link status=64k"));
        assert_ne!(n.message_id, "m-1");
    }
}
