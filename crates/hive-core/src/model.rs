use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::HiveError;

/// Cost/quality tier of a model, used by the router and for queue balancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Highest quality, highest cost.
    Flagship,
    /// Balanced quality and cost.
    Mid,
    /// Low cost, for simple work.
    Budget,
}

/// The closed set of models Hive routes to.
///
/// Every routing table in the system is keyed by this type, so a missing
/// mapping is a compile error rather than a runtime lookup miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    /// `claude-3-opus`
    #[serde(rename = "claude-3-opus")]
    ClaudeOpus,
    /// `claude-3-sonnet`
    #[serde(rename = "claude-3-sonnet")]
    ClaudeSonnet,
    /// `claude-3-haiku`
    #[serde(rename = "claude-3-haiku")]
    ClaudeHaiku,
    /// `gpt-4o`
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    /// `gpt-4o-mini`
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    /// `deepseek-coder`
    #[serde(rename = "deepseek-coder")]
    DeepseekCoder,
    /// `gemini-1.5-pro`
    #[serde(rename = "gemini-1.5-pro")]
    Gemini15Pro,
}

impl ModelId {
    /// All known models, in declaration order.
    pub const ALL: [ModelId; 7] = [
        ModelId::ClaudeOpus,
        ModelId::ClaudeSonnet,
        ModelId::ClaudeHaiku,
        ModelId::Gpt4o,
        ModelId::Gpt4oMini,
        ModelId::DeepseekCoder,
        ModelId::Gemini15Pro,
    ];

    /// The wire name of this model.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::ClaudeOpus => "claude-3-opus",
            ModelId::ClaudeSonnet => "claude-3-sonnet",
            ModelId::ClaudeHaiku => "claude-3-haiku",
            ModelId::Gpt4o => "gpt-4o",
            ModelId::Gpt4oMini => "gpt-4o-mini",
            ModelId::DeepseekCoder => "deepseek-coder",
            ModelId::Gemini15Pro => "gemini-1.5-pro",
        }
    }

    /// The store key of this model's task queue, e.g. `queue:gpt-4o`.
    pub fn queue_name(&self) -> String {
        format!("queue:{}", self.as_str())
    }

    /// Maximum context window in tokens.
    pub fn context_window(&self) -> u32 {
        match self {
            ModelId::ClaudeOpus | ModelId::ClaudeSonnet | ModelId::ClaudeHaiku => 200_000,
            ModelId::Gpt4o | ModelId::Gpt4oMini => 128_000,
            ModelId::DeepseekCoder => 64_000,
            ModelId::Gemini15Pro => 1_000_000,
        }
    }

    /// Cost/quality tier.
    pub fn tier(&self) -> ModelTier {
        match self {
            ModelId::ClaudeOpus | ModelId::Gpt4o | ModelId::Gemini15Pro => ModelTier::Flagship,
            ModelId::ClaudeSonnet | ModelId::DeepseekCoder => ModelTier::Mid,
            ModelId::ClaudeHaiku | ModelId::Gpt4oMini => ModelTier::Budget,
        }
    }

    /// Static fallback graph: the model a failing task is retried on.
    pub fn fallback(&self) -> ModelId {
        match self {
            ModelId::ClaudeOpus => ModelId::ClaudeSonnet,
            ModelId::ClaudeSonnet => ModelId::ClaudeHaiku,
            ModelId::ClaudeHaiku => ModelId::Gpt4oMini,
            ModelId::Gpt4o => ModelId::ClaudeSonnet,
            ModelId::Gpt4oMini => ModelId::ClaudeHaiku,
            ModelId::DeepseekCoder => ModelId::ClaudeSonnet,
            ModelId::Gemini15Pro => ModelId::Gpt4o,
        }
    }

    /// Same-tier models, excluding `self`. Queue balancing only migrates
    /// tasks between equivalent queues.
    pub fn equivalents(&self) -> Vec<ModelId> {
        let tier = self.tier();
        ModelId::ALL
            .iter()
            .copied()
            .filter(|m| m != self && m.tier() == tier)
            .collect()
    }

    /// The model with the largest context window, used when a task's file
    /// is too large for the tier-preferred candidates.
    pub fn largest_context() -> ModelId {
        ModelId::ALL
            .iter()
            .copied()
            .max_by_key(ModelId::context_window)
            .unwrap_or(ModelId::Gemini15Pro)
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| HiveError::Config(format!("Unknown model id '{s}'")))
    }
}
