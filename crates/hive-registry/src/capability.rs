use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Smoothing factor for the exponential-moving-average capability score.
const EMA_ALPHA: f64 = 0.3;

/// A capability catalog entry.
///
/// Registered once; gains providers as agents declare or are discovered to
/// support it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDef {
    /// Stable identifier, e.g. `code.debugging`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Grouping category, e.g. `code`, `docs`, `security`.
    pub category: String,
    /// Skills an agent needs to provide this capability.
    #[serde(default)]
    pub required_skills: Vec<String>,
    /// Parameter names the capability accepts.
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Agents currently providing this capability.
    #[serde(default)]
    pub providers: HashSet<String>,
    /// Times a task exercising this capability was completed.
    #[serde(default)]
    pub usage_count: u64,
}

impl CapabilityDef {
    /// Create a definition with the given id, name, and category.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            required_skills: Vec::new(),
            parameters: Vec::new(),
            providers: HashSet::new(),
            usage_count: 0,
        }
    }

    /// Set the required skills.
    pub fn with_skills(mut self, skills: Vec<String>) -> Self {
        self.required_skills = skills;
        self
    }
}

/// Rolling performance for one (agent, capability) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityPerformance {
    /// Fraction of exercised tasks that succeeded.
    pub success_rate: f64,
    /// Incremental mean response time in milliseconds.
    pub avg_response_time_ms: f64,
    /// Tasks that exercised this binding.
    pub task_count: u64,
}

impl Default for CapabilityPerformance {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            avg_response_time_ms: 0.0,
            task_count: 0,
        }
    }
}

/// An agent's binding to one capability — the unit the matcher ranks on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapability {
    /// The capability this binding refers to.
    pub capability_id: String,
    /// How well the agent performs it, in [0,1].
    pub proficiency: f64,
    /// Rolling outcome statistics.
    #[serde(default)]
    pub performance: CapabilityPerformance,
    /// Exponential moving average of recent outcomes, biases ranking.
    #[serde(default = "default_score")]
    pub score: f64,
    /// Whether the binding came from discovery rather than declaration.
    #[serde(default)]
    pub discovered: bool,
}

fn default_score() -> f64 {
    1.0
}

impl AgentCapability {
    /// Create a binding at the given proficiency.
    pub fn new(capability_id: impl Into<String>, proficiency: f64) -> Self {
        Self {
            capability_id: capability_id.into(),
            proficiency: proficiency.clamp(0.0, 1.0),
            performance: CapabilityPerformance::default(),
            score: default_score(),
            discovered: false,
        }
    }

    /// Record one task outcome against this binding.
    pub fn record(&mut self, success: bool, response_time_ms: u64) {
        self.performance.task_count += 1;
        let n = self.performance.task_count as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        self.performance.success_rate += (outcome - self.performance.success_rate) / n;
        self.performance.avg_response_time_ms +=
            (response_time_ms as f64 - self.performance.avg_response_time_ms) / n;
        self.score = EMA_ALPHA * outcome + (1.0 - EMA_ALPHA) * self.score;
    }
}
