use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ModelId;

/// Liveness/availability status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Heartbeating and accepting work.
    Active,
    /// Heartbeat older than the TTL; excluded from matching until it recovers.
    Unresponsive,
    /// At or above `max_load`; excluded from matching until load drops.
    Overloaded,
    /// Explicitly deregistered. Soft-deleted: the record is kept for audit.
    Deregistered,
}

/// Rolling outcome counters for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPerformance {
    /// Tasks this agent completed successfully.
    pub tasks_completed: u64,
    /// Tasks this agent failed.
    pub tasks_failed: u64,
    /// Incremental mean processing time in milliseconds.
    pub avg_processing_time_ms: f64,
}

impl AgentPerformance {
    /// Record one task outcome, updating the incremental mean.
    pub fn record(&mut self, success: bool, duration_ms: u64) {
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        let n = (self.tasks_completed + self.tasks_failed) as f64;
        self.avg_processing_time_ms += (duration_ms as f64 - self.avg_processing_time_ms) / n;
    }

    /// Historical success rate in [0,1]. Agents with no history score 1.0 so
    /// new workers are not starved out of the ranking.
    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / total as f64
        }
    }
}

/// A registered worker bound to one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Unique agent identifier.
    pub id: String,
    /// The model this worker serves.
    pub model: ModelId,
    /// Capability ids this agent declared at registration.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Maximum concurrent tasks this agent accepts.
    #[serde(default = "default_max_load")]
    pub max_load: u32,
    /// Tasks currently assigned.
    #[serde(default)]
    pub current_load: u32,
    /// Current availability status.
    #[serde(default = "default_status")]
    pub status: AgentStatus,
    /// Rolling outcome counters.
    #[serde(default)]
    pub performance: AgentPerformance,
    /// Timestamp of the most recent heartbeat.
    #[serde(default = "Utc::now")]
    pub last_heartbeat: DateTime<Utc>,
}

fn default_max_load() -> u32 {
    5
}

fn default_status() -> AgentStatus {
    AgentStatus::Active
}

impl AgentInfo {
    /// Create an active agent for the given model.
    pub fn new(id: impl Into<String>, model: ModelId) -> Self {
        Self {
            id: id.into(),
            model,
            capabilities: Vec::new(),
            max_load: default_max_load(),
            current_load: 0,
            status: AgentStatus::Active,
            performance: AgentPerformance::default(),
            last_heartbeat: Utc::now(),
        }
    }

    /// Set the declared capabilities.
    pub fn with_capabilities(mut self, caps: Vec<String>) -> Self {
        self.capabilities = caps;
        self
    }

    /// Set the maximum concurrent load.
    pub fn with_max_load(mut self, max_load: u32) -> Self {
        self.max_load = max_load;
        self
    }

    /// Whether this agent can take another task right now.
    pub fn available(&self) -> bool {
        self.status == AgentStatus::Active && self.current_load < self.max_load
    }

    /// Current load as a percentage of `max_load`, clamped to [0,100].
    pub fn load_percent(&self) -> f64 {
        if self.max_load == 0 {
            return 100.0;
        }
        (self.current_load as f64 / self.max_load as f64 * 100.0).min(100.0)
    }
}
