use hive_core::HiveResult;
use hive_store::QueueStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Agent-side heartbeat loop.
///
/// Pushes a TTL'd heartbeat key on a fixed interval. The orchestrator treats
/// a missing or expired key as "unresponsive" and excludes the agent from
/// matching until the key reappears.
pub struct HeartbeatPublisher {
    store: Arc<dyn QueueStore>,
    agent_id: String,
    interval: Duration,
    ttl: Duration,
}

impl HeartbeatPublisher {
    /// Create a publisher with the given cadence. The TTL should comfortably
    /// exceed the interval so one missed beat does not flap the agent.
    pub fn new(
        store: Arc<dyn QueueStore>,
        agent_id: impl Into<String>,
        interval: Duration,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            agent_id: agent_id.into(),
            interval,
            ttl,
        }
    }

    /// Publish one heartbeat now.
    pub async fn beat(&self) -> HiveResult<()> {
        self.store.put_heartbeat(&self.agent_id, self.ttl).await
    }

    /// Start the background loop. Returns the handle so the caller can abort
    /// it on deregistration.
    pub fn run(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.beat().await {
                    Ok(()) => debug!(agent_id = %self.agent_id, "Heartbeat published"),
                    Err(e) => {
                        warn!(agent_id = %self.agent_id, error = %e, "Heartbeat failed")
                    }
                }
                tokio::time::sleep(self.interval).await;
            }
        })
    }
}

/// Whether the agent's heartbeat key is present and unexpired.
pub async fn is_alive(store: &Arc<dyn QueueStore>, agent_id: &str) -> HiveResult<bool> {
    store.heartbeat_fresh(agent_id).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hive_store::MemoryStore;

    #[tokio::test]
    async fn test_beat_freshens_heartbeat() {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
        let publisher = HeartbeatPublisher::new(
            store.clone(),
            "a-1",
            Duration::from_secs(10),
            Duration::from_secs(30),
        );

        assert!(!is_alive(&store, "a-1").await.unwrap());
        publisher.beat().await.unwrap();
        assert!(is_alive(&store, "a-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_heartbeat_is_dead() {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
        let publisher =
            HeartbeatPublisher::new(store.clone(), "a-1", Duration::from_secs(10), Duration::ZERO);

        publisher.beat().await.unwrap();
        assert!(!is_alive(&store, "a-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_background_loop_beats() {
        let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
        let publisher = HeartbeatPublisher::new(
            store.clone(),
            "a-2",
            Duration::from_millis(5),
            Duration::from_secs(30),
        );

        let handle = publisher.run();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(is_alive(&store, "a-2").await.unwrap());
        handle.abort();
    }
}
