use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::mpsc;
use tracing::trace;

/// Sent to live clients after every successful rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadEvent;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    channels: HashMap<u64, mpsc::UnboundedSender<ReloadEvent>>,
}

/// Fans reload events out to every currently subscribed client.
#[derive(Clone, Default)]
pub struct ReloadBroker {
    subscribers: Arc<Mutex<Subscribers>>,
}

/// A private channel registered with a [`ReloadBroker`].
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<ReloadEvent>,
    broker: ReloadBroker,
}

impl ReloadBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut subscribers = self.lock();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.channels.insert(id, sender);
        trace!(id, total = subscribers.channels.len(), "reload subscriber added");

        Subscription {
            id,
            receiver,
            broker: self.clone(),
        }
    }

    /// Deregister subscriber `id`. Returns whether it was registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.lock();
        let removed = subscribers.channels.remove(&id).is_some();
        trace!(id, total = subscribers.channels.len(), "reload subscriber removed");
        removed
    }

    /// Send `event` to every current subscriber. Returns how many got it.
    pub fn publish(&self, event: ReloadEvent) -> usize {
        let mut subscribers = self.lock();
        subscribers
            .channels
            .retain(|_, sender| sender.send(event).is_ok());
        subscribers.channels.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().channels.len()
    }
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<ReloadEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ReloadEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_gets_each_event_once() {
        let broker = ReloadBroker::new();
        let mut subs: Vec<_> = (0..5).map(|_| broker.subscribe()).collect();

        assert_eq!(broker.publish(ReloadEvent), 5);

        for sub in &mut subs {
            assert_eq!(sub.recv().await, Some(ReloadEvent));
            assert_eq!(sub.try_recv(), None);
        }
    }

    #[tokio::test]
    async fn test_concurrent_subscribers() {
        let broker = ReloadBroker::new();
        let mut handles = Vec::new();
        let mut subs: Vec<_> = (0..8).map(|_| broker.subscribe()).collect();

        for mut sub in subs.drain(..) {
            handles.push(tokio::spawn(async move { sub.recv().await }));
        }
        broker.publish(ReloadEvent);

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(ReloadEvent));
        }
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribed_gets_nothing() {
        let broker = ReloadBroker::new();
        let mut kept = broker.subscribe();
        let mut gone = broker.subscribe();

        assert!(broker.unsubscribe(gone.id()));
        assert!(!broker.unsubscribe(gone.id()));
        assert_eq!(broker.publish(ReloadEvent), 1);

        assert_eq!(kept.try_recv(), Some(ReloadEvent));
        assert_eq!(gone.try_recv(), None);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broker = ReloadBroker::new();
        {
            let _sub = broker.subscribe();
            assert_eq!(broker.subscriber_count(), 1);
        }
        assert_eq!(broker.subscriber_count(), 0);
        assert_eq!(broker.publish(ReloadEvent), 0);
    }
}
