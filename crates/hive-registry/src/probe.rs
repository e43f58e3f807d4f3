use async_trait::async_trait;
use hive_core::HiveResult;
use std::collections::HashMap;

/// The canned test prompt used to probe an agent for one capability.
///
/// Probing sends this prompt to the agent over its message channel and
/// scores the reply; a capability is accepted as discovered when the
/// resulting confidence clears the matching threshold.
pub fn probe_prompt(capability_id: &str) -> String {
    match capability_id {
        "code.generation" => "Write a function that reverses a string.".to_string(),
        "code.debugging" => {
            "This loop never terminates: `while i < 10 { println!(\"{i}\") }`. Why?".to_string()
        }
        "code.refactoring" => {
            "Suggest a cleaner structure for three nested if-else blocks.".to_string()
        }
        "code.review" => "Point out the problems in: `let x = data.unwrap();`".to_string(),
        "docs.writing" => "Document a function that parses a URL.".to_string(),
        "test.generation" => "Write a test for a function that adds two numbers.".to_string(),
        "security.audit" => "What is wrong with string-concatenated SQL queries?".to_string(),
        "data.analysis" => "Given daily request counts, how would you find anomalies?".to_string(),
        _ => format!("Demonstrate the capability '{capability_id}' on a small example."),
    }
}

/// Probes an agent for one capability, returning a confidence in [0,1].
///
/// Implementations talk to a real worker (the production probe sends
/// [`probe_prompt`] over the agent's message channel); tests use
/// deterministic stubs.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Probe `agent_id` for `capability_id`.
    async fn probe(&self, agent_id: &str, capability_id: &str) -> HiveResult<f64>;
}

/// A deterministic probe backed by a fixed confidence table.
///
/// Unlisted (agent, capability) pairs score 0.0, so they are never
/// discovered.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    confidences: HashMap<(String, String), f64>,
}

impl StaticProbe {
    /// An empty probe that discovers nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the confidence for an (agent, capability) pair.
    pub fn with_confidence(
        mut self,
        agent_id: impl Into<String>,
        capability_id: impl Into<String>,
        confidence: f64,
    ) -> Self {
        self.confidences
            .insert((agent_id.into(), capability_id.into()), confidence);
        self
    }
}

#[async_trait]
impl CapabilityProbe for StaticProbe {
    async fn probe(&self, agent_id: &str, capability_id: &str) -> HiveResult<f64> {
        Ok(self
            .confidences
            .get(&(agent_id.to_string(), capability_id.to_string()))
            .copied()
            .unwrap_or(0.0))
    }
}
