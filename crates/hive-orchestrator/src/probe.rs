use async_trait::async_trait;
use hive_core::HiveResult;
use hive_registry::{probe_prompt, CapabilityProbe};
use hive_resilience::MessageBus;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Probes agents over the message bus.
///
/// Sends the capability's canned test prompt to the agent's message channel
/// with a dedicated reply channel; the agent runs the prompt and reports a
/// confidence in [0,1]. No reply within the timeout scores 0.0, so silent
/// agents are simply never discovered — probing must not block the loop.
pub struct BusProbe {
    bus: Arc<MessageBus>,
    timeout: Duration,
}

impl BusProbe {
    /// Create a probe with the given per-probe reply timeout.
    pub fn new(bus: Arc<MessageBus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    fn reply_channel(agent_id: &str, capability_id: &str) -> String {
        format!("agent:{agent_id}:probe:{capability_id}")
    }
}

#[async_trait]
impl CapabilityProbe for BusProbe {
    async fn probe(&self, agent_id: &str, capability_id: &str) -> HiveResult<f64> {
        let reply_channel = Self::reply_channel(agent_id, capability_id);
        let mut rx = self.bus.subscribe(&reply_channel).await?;

        self.bus
            .send_message(
                agent_id,
                &serde_json::json!({
                    "type": "capability_probe",
                    "capability": capability_id,
                    "prompt": probe_prompt(capability_id),
                    "reply_channel": reply_channel,
                }),
            )
            .await?;

        match tokio::time::timeout(self.timeout, rx.recv()).await {
            Ok(Ok(raw)) => {
                let payload = self.bus.open_envelope(&raw)?;
                let confidence = payload["confidence"].as_f64().unwrap_or(0.0);
                debug!(agent_id, capability_id, confidence, "Probe reply");
                Ok(confidence.clamp(0.0, 1.0))
            }
            _ => {
                debug!(agent_id, capability_id, "Probe timed out");
                Ok(0.0)
            }
        }
    }
}
