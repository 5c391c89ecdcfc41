//! Broadcast hub for build events.
//!
//! A small fan-out over std channels: subscribers get their own
//! receiver, and disconnected subscribers are dropped on the next
//! publish. Used for build-result and fatal-error notifications.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

/// Fan-out publisher for cloneable events.
pub struct EventHub<T: Clone> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Default for EventHub<T> {
    fn default() -> Self {
        Self { subscribers: Mutex::new(Vec::new()) }
    }
}

impl<T: Clone> EventHub<T> {
    /// Register a new subscriber.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(tx);
        rx
    }

    /// Send `event` to every live subscriber, pruning dead ones.
    pub fn publish(&self, event: T) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers at the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let hub = EventHub::default();
        let a = hub.subscribe();
        let b = hub.subscribe();

        hub.publish(7u32);
        assert_eq!(a.recv().unwrap(), 7);
        assert_eq!(b.recv().unwrap(), 7);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let hub = EventHub::default();
        let a = hub.subscribe();
        drop(hub.subscribe());

        hub.publish(1u32);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(a.recv().unwrap(), 1);
    }
}
