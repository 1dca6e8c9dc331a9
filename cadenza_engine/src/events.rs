/// Minimal pub-sub used to fan beat notifications out to their consumers.
///
/// Subscribers are plain keys rather than closures: the owner of the bus resolves each
/// key to the component it names at delivery time, so a component can be stopped,
/// restarted or removed without a dangling callback left behind.
#[derive(Debug, Clone)]
pub struct EventBus<K> {
    subscribers: Vec<K>,
}

impl<K: Clone + PartialEq> EventBus<K> {
    pub fn new() -> Self {
        Self { subscribers: Vec::new() }
    }

    /// Returns false if `key` was already subscribed.
    pub fn subscribe(&mut self, key: K) -> bool {
        if self.subscribers.contains(&key) {
            return false;
        }
        self.subscribers.push(key);
        true
    }

    pub fn unsubscribe(&mut self, key: &K) -> bool {
        match self.subscribers.iter().position(|k| k == key) {
            Some(idx) => {
                self.subscribers.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, key: &K) -> bool {
        self.subscribers.contains(key)
    }

    /// Stable copy of the subscribers in subscription order. Delivery iterates this
    /// copy and skips keys that were unsubscribed in the meantime, so unsubscribing
    /// while an event is being delivered never skips or repeats a sibling.
    pub fn snapshot(&self) -> Vec<K> {
        self.subscribers.clone()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

impl<K: Clone + PartialEq> Default for EventBus<K> {
    fn default() -> Self {
        Self::new()
    }
}
