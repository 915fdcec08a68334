//! Mock message client.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::errors::{EdgeflowError, Result};
use crate::messaging::{MessageClient, MessageEnvelope};

/// Records publishes and can be switched into a failing state to simulate
/// a broker outage.
#[derive(Debug, Default)]
pub struct MockMessageClient {
    published: Mutex<Vec<(String, MessageEnvelope)>>,
    failing: AtomicBool,
}

impl MockMessageClient {
    /// Creates a connected mock client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes publishes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns every `(topic, envelope)` published successfully.
    #[must_use]
    pub fn published(&self) -> Vec<(String, MessageEnvelope)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl MessageClient for MockMessageClient {
    async fn publish(&self, envelope: MessageEnvelope, topic: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EdgeflowError::Messaging(format!(
                "unable to publish to '{topic}': broker unreachable"
            )));
        }
        self.published.lock().push((topic.to_string(), envelope));
        Ok(())
    }

    async fn subscribe(&self, _topics: &[String]) -> Result<mpsc::Receiver<MessageEnvelope>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_records_and_fails() {
        let client = MockMessageClient::new();
        client
            .publish(MessageEnvelope::new(&b"a"[..], "text/plain"), "t")
            .await
            .unwrap();

        client.set_failing(true);
        assert!(client
            .publish(MessageEnvelope::new(&b"b"[..], "text/plain"), "t")
            .await
            .is_err());
        assert_eq!(client.published().len(), 1);
    }
}
