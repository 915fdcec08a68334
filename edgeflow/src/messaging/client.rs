//! Message client capability and the in-memory loopback bus.

use super::MessageEnvelope;
use crate::errors::{EdgeflowError, Result};
use crate::pipeline::TopicMatcher;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capability for publishing to and subscribing from a message broker.
///
/// Concrete broker bindings live outside this crate; the runtime only needs
/// these three operations.
#[async_trait]
pub trait MessageClient: Send + Sync + Debug {
    /// Publishes an envelope to `topic`.
    async fn publish(&self, envelope: MessageEnvelope, topic: &str) -> Result<()>;

    /// Subscribes to `topics`, returning the stream of received envelopes.
    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::Receiver<MessageEnvelope>>;

    /// Closes the connection. Subscriptions end.
    async fn disconnect(&self) -> Result<()>;
}

struct Subscription {
    topics: Vec<String>,
    sender: mpsc::Sender<MessageEnvelope>,
}

/// A broker-less bus delivering published envelopes to matching subscribers.
pub struct InMemoryMessageBus {
    matcher: TopicMatcher,
    capacity: usize,
    subscriptions: Mutex<Vec<Subscription>>,
    published: Mutex<Vec<(String, MessageEnvelope)>>,
    connected: Mutex<bool>,
}

impl InMemoryMessageBus {
    /// Creates a bus using MQTT topic syntax.
    #[must_use]
    pub fn new() -> Self {
        Self::with_matcher(TopicMatcher::default())
    }

    /// Creates a bus using the given topic syntax.
    #[must_use]
    pub fn with_matcher(matcher: TopicMatcher) -> Self {
        Self {
            matcher,
            capacity: 256,
            subscriptions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            connected: Mutex::new(true),
        }
    }

    /// Returns every `(topic, envelope)` published so far.
    #[must_use]
    pub fn published(&self) -> Vec<(String, MessageEnvelope)> {
        self.published.lock().clone()
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for InMemoryMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessageBus")
            .field("subscriptions", &self.subscription_count())
            .field("published", &self.published.lock().len())
            .finish()
    }
}

#[async_trait]
impl MessageClient for InMemoryMessageBus {
    async fn publish(&self, mut envelope: MessageEnvelope, topic: &str) -> Result<()> {
        if !*self.connected.lock() {
            return Err(EdgeflowError::Messaging("bus is disconnected".to_string()));
        }
        envelope.received_topic = topic.to_string();
        self.published.lock().push((topic.to_string(), envelope.clone()));

        let senders: Vec<_> = {
            let mut subs = self.subscriptions.lock();
            subs.retain(|s| !s.sender.is_closed());
            subs.iter()
                .filter(|s| s.topics.iter().any(|p| self.matcher.matches(p, topic)))
                .map(|s| s.sender.clone())
                .collect()
        };

        debug!(topic, subscribers = senders.len(), "Publishing envelope");
        for sender in senders {
            if sender.send(envelope.clone()).await.is_err() {
                warn!(topic, "Subscriber dropped before delivery");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<mpsc::Receiver<MessageEnvelope>> {
        if topics.is_empty() {
            return Err(EdgeflowError::Contract(
                "at least one subscribe topic is required".to_string(),
            ));
        }
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscriptions.lock().push(Subscription {
            topics: topics.to_vec(),
            sender,
        });
        Ok(receiver)
    }

    async fn disconnect(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.subscriptions.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber() {
        let bus = InMemoryMessageBus::new();
        let mut rx = bus.subscribe(&["events/#".to_string()]).await.unwrap();

        bus.publish(MessageEnvelope::new(b"x".to_vec(), "text/plain"), "events/d1")
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.received_topic, "events/d1");
        assert_eq!(received.payload, b"x".to_vec());
    }

    #[tokio::test]
    async fn test_publish_skips_non_matching_subscriber() {
        let bus = InMemoryMessageBus::new();
        let mut rx = bus.subscribe(&["alerts/+".to_string()]).await.unwrap();

        bus.publish(MessageEnvelope::new(Vec::new(), "text/plain"), "events/d1")
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_closes_subscriptions() {
        let bus = InMemoryMessageBus::new();
        let mut rx = bus.subscribe(&["#".to_string()]).await.unwrap();

        bus.disconnect().await.unwrap();

        assert!(rx.recv().await.is_none());
        assert!(bus
            .publish(MessageEnvelope::new(Vec::new(), "text/plain"), "a")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_subscribe_requires_topics() {
        let bus = InMemoryMessageBus::new();
        assert!(bus.subscribe(&[]).await.is_err());
    }
}
