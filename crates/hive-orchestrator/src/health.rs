use hive_core::{channels, AgentPerformance, AgentStatus, HiveResult, ModelId};
use hive_store::QueueStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::orchestrator::Orchestrator;

/// The orchestrator's own health line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorHealth {
    /// Instance id.
    pub id: String,
    /// `running` or `paused`.
    pub status: String,
    /// Seconds since the orchestrator started.
    pub uptime_secs: u64,
}

/// Health of one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    /// Pending tasks.
    pub depth: usize,
    /// In-flight tasks.
    pub processing: usize,
    /// Dead letters accumulated.
    pub failed: usize,
    /// False once the DLQ depth passes the dead-letter threshold.
    pub healthy: bool,
}

/// Health of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    /// The model the agent serves.
    pub model: ModelId,
    /// Current status.
    pub status: AgentStatus,
    /// Current load.
    pub load: u32,
    /// Rolling outcome counters.
    pub performance: AgentPerformance,
    /// Active (or merely loaded) with a fresh heartbeat.
    pub healthy: bool,
}

/// The periodically published health snapshot — the operator-visible
/// failure surface, together with the DLQ contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// The orchestrator's own line.
    pub orchestrator: OrchestratorHealth,
    /// Per-queue health keyed by queue name.
    pub queues: HashMap<String, QueueHealth>,
    /// Per-agent health keyed by agent id.
    pub agents: HashMap<String, AgentHealth>,
}

impl Orchestrator {
    /// Assemble a health snapshot from current store state.
    pub async fn health_snapshot(&self) -> HiveResult<HealthSnapshot> {
        let store = self.pool.acquire().await?;

        let mut queues = HashMap::new();
        for queue in ModelId::ALL {
            let failed = store.dead_letters(queue).await?.len();
            queues.insert(
                queue.queue_name(),
                QueueHealth {
                    depth: store.queue_depth(queue).await?,
                    processing: store.processing_len(queue).await?,
                    failed,
                    healthy: failed <= self.config.dead_letter_threshold,
                },
            );
        }

        let mut agents = HashMap::new();
        for agent in store.list_agents().await? {
            let fresh = store.heartbeat_fresh(&agent.id).await?;
            let healthy = fresh
                && matches!(agent.status, AgentStatus::Active | AgentStatus::Overloaded);
            agents.insert(
                agent.id.clone(),
                AgentHealth {
                    model: agent.model,
                    status: agent.status,
                    load: agent.current_load,
                    performance: agent.performance,
                    healthy,
                },
            );
        }

        Ok(HealthSnapshot {
            orchestrator: OrchestratorHealth {
                id: self.id.clone(),
                status: if self.is_paused() { "paused" } else { "running" }.to_string(),
                uptime_secs: self.started_at.elapsed().as_secs(),
            },
            queues,
            agents,
        })
    }

    /// Publish a snapshot on `orchestrator:health`; returns receiver count.
    pub async fn publish_health(&self) -> HiveResult<usize> {
        let snapshot = self.health_snapshot().await?;
        self.bus
            .publish(channels::ORCHESTRATOR_HEALTH, &serde_json::to_value(&snapshot)?)
            .await
    }
}
