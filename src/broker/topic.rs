use std::collections::BTreeSet;

/// Session name of a subscriber; doubles as its dispatch target.
pub type SubscriberId = String;

/// A named topic and the sessions subscribed to it. Subscribers are kept
/// ordered so fan-out visits them in a stable order.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: BTreeSet<SubscriberId>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: BTreeSet::new(),
        }
    }

    /// Returns false if `id` was already subscribed.
    pub fn subscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.insert(id)
    }

    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subscribers.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
