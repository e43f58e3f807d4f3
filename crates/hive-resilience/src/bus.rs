use hive_core::{channels, HiveResult, Task};
use hive_store::QueueStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::breaker::BreakerRegistry;
use crate::crypto::{MessageCipher, SecureEnvelope};

/// Breaker service name guarding all bus publishes.
const MESSAGING_SERVICE: &str = "messaging";

/// Typed pub/sub wrapper delivering sealed envelopes over the store.
///
/// Every publish goes through the messaging circuit breaker, so a failing
/// store trips the breaker instead of being hammered by every sender.
pub struct MessageBus {
    store: Arc<dyn QueueStore>,
    cipher: Arc<MessageCipher>,
    breakers: Arc<BreakerRegistry>,
    sender_id: String,
}

impl MessageBus {
    /// Create a bus publishing as `sender_id`.
    pub fn new(
        store: Arc<dyn QueueStore>,
        cipher: Arc<MessageCipher>,
        breakers: Arc<BreakerRegistry>,
        sender_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cipher,
            breakers,
            sender_id: sender_id.into(),
        }
    }

    /// Seal and publish a payload to a channel; returns the receiver count.
    pub async fn publish(&self, channel: &str, payload: &serde_json::Value) -> HiveResult<usize> {
        let envelope = self.cipher.seal(&self.sender_id, channel, payload)?;
        let raw = serde_json::to_string(&envelope)?;
        self.breakers
            .call(MESSAGING_SERVICE, self.store.publish(channel, raw))
            .await
    }

    /// Publish a task assignment to the agent's task channel.
    pub async fn send_task(&self, agent_id: &str, task: &Task) -> HiveResult<usize> {
        self.publish(&channels::agent_task(agent_id), &serde_json::to_value(task)?)
            .await
    }

    /// Publish a control message (e.g. a `task_timeout` abort) to the
    /// agent's control channel.
    pub async fn send_control(
        &self,
        agent_id: &str,
        control: &serde_json::Value,
    ) -> HiveResult<usize> {
        self.publish(&channels::agent_control(agent_id), control).await
    }

    /// Publish a point-to-point message to the agent's message channel.
    pub async fn send_message(
        &self,
        agent_id: &str,
        message: &serde_json::Value,
    ) -> HiveResult<usize> {
        self.publish(&channels::agent_message(agent_id), message).await
    }

    /// Publish to the broadcast channel every agent subscribes to.
    pub async fn broadcast(&self, message: &serde_json::Value) -> HiveResult<usize> {
        self.publish(channels::AGENT_BROADCAST, message).await
    }

    /// Subscribe to a channel's raw envelope stream.
    pub async fn subscribe(&self, channel: &str) -> HiveResult<broadcast::Receiver<String>> {
        self.store.subscribe(channel).await
    }

    /// Parse, authenticate, and open a received envelope.
    ///
    /// A failed signature or decryption is logged and surfaced as an error;
    /// the caller drops the message.
    pub fn open_envelope(&self, raw: &str) -> HiveResult<serde_json::Value> {
        let envelope: SecureEnvelope = serde_json::from_str(raw)?;
        match self.cipher.open(&envelope) {
            Ok(payload) => Ok(payload),
            Err(e) => {
                warn!(
                    channel = %envelope.channel,
                    sender = %envelope.sender,
                    error = %e,
                    "Dropping message that failed verification"
                );
                Err(e)
            }
        }
    }
}
