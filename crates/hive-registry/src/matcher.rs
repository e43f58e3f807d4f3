use hive_core::{AgentInfo, HiveResult, Task, TaskType};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::capability::{AgentCapability, CapabilityDef};
use crate::probe::CapabilityProbe;

/// Weight of the required-capability term in the match score.
const REQUIRED_WEIGHT: f64 = 0.7;
/// Weight of the preferred-capability term in the match score.
const PREFERRED_WEIGHT: f64 = 0.3;

/// Matcher tuning knobs.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Minimum match score for candidacy.
    pub matching_threshold: f64,
    /// Proficiency assigned to declared-but-unprobed capabilities.
    pub default_proficiency: f64,
    /// Re-probe agents whose capability set is older than this.
    pub capability_timeout: Duration,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            matching_threshold: 0.7,
            default_proficiency: 0.8,
            capability_timeout: Duration::from_secs(300),
        }
    }
}

/// A ranked candidate produced by [`CapabilityMatcher::match_task_to_agents`].
#[derive(Debug, Clone)]
pub struct AgentMatch {
    /// The candidate agent.
    pub agent_id: String,
    /// Capability fit in [0,1].
    pub match_score: f64,
    /// Final ranking; highest wins.
    pub ranking: f64,
}

struct MatcherState {
    catalog: HashMap<String, CapabilityDef>,
    /// agent id → capability id → binding.
    bindings: HashMap<String, HashMap<String, AgentCapability>>,
    /// Registration order, for deterministic tie-breaking.
    registration_seq: HashMap<String, u64>,
    next_seq: u64,
    /// Monotonic refresh stamps for the discovery loop.
    last_refreshed: HashMap<String, std::time::Instant>,
}

/// Owns the capability catalog and all agent bindings.
///
/// All mutation goes through this coordinator's methods — single-writer
/// discipline over one `RwLock`, mockable in tests.
pub struct CapabilityMatcher {
    config: MatcherConfig,
    state: RwLock<MatcherState>,
    inference: Vec<(Regex, &'static str)>,
}

/// Static type→capability table for preferred-capability inference.
fn type_capabilities(task_type: TaskType) -> &'static [&'static str] {
    match task_type {
        TaskType::CodeGeneration => &["code.generation"],
        TaskType::BugFix => &["code.debugging"],
        TaskType::Refactor => &["code.refactoring"],
        TaskType::Review => &["code.review"],
        TaskType::Documentation => &["docs.writing"],
        TaskType::Testing => &["test.generation"],
        TaskType::Security => &["security.audit", "code.review"],
        TaskType::Analysis => &["data.analysis"],
        TaskType::General => &["general.chat"],
    }
}

/// Prompt patterns for preferred-capability inference.
fn inference_patterns() -> Vec<(Regex, &'static str)> {
    let table: &[(&str, &str)] = &[
        (r"(?i)\b(debug|fix|bug|error|crash)\b", "code.debugging"),
        (r"(?i)\b(implement|write|create|build)\b", "code.generation"),
        (r"(?i)\b(refactor|restructure|clean\s*up)\b", "code.refactoring"),
        (r"(?i)\b(review|critique)\b", "code.review"),
        (r"(?i)\b(document|docs|explain|describe)\b", "docs.writing"),
        (r"(?i)\b(test|coverage)\b", "test.generation"),
        (r"(?i)\b(secur\w*|vulnerab\w*|exploit)\b", "security.audit"),
        (r"(?i)\b(analy[sz]e|investigate|profile)\b", "data.analysis"),
    ];
    table
        .iter()
        .filter_map(|(pattern, cap)| Regex::new(pattern).ok().map(|re| (re, *cap)))
        .collect()
}

/// The standard capability catalog registered at startup.
pub fn default_catalog() -> Vec<CapabilityDef> {
    vec![
        CapabilityDef::new("code.generation", "Code generation", "code"),
        CapabilityDef::new("code.debugging", "Debugging", "code"),
        CapabilityDef::new("code.refactoring", "Refactoring", "code"),
        CapabilityDef::new("code.review", "Code review", "code"),
        CapabilityDef::new("docs.writing", "Documentation writing", "docs"),
        CapabilityDef::new("test.generation", "Test generation", "test"),
        CapabilityDef::new("security.audit", "Security auditing", "security"),
        CapabilityDef::new("data.analysis", "Data analysis", "data"),
        CapabilityDef::new("general.chat", "General assistance", "general"),
    ]
}

impl CapabilityMatcher {
    /// Create a matcher with the given config and an empty catalog.
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            state: RwLock::new(MatcherState {
                catalog: HashMap::new(),
                bindings: HashMap::new(),
                registration_seq: HashMap::new(),
                next_seq: 0,
                last_refreshed: HashMap::new(),
            }),
            inference: inference_patterns(),
        }
    }

    /// Create a matcher preloaded with the default catalog.
    pub async fn with_default_catalog(config: MatcherConfig) -> Self {
        let matcher = Self::new(config);
        for def in default_catalog() {
            matcher.register_capability(def).await;
        }
        matcher
    }

    /// Idempotent catalog insert. Re-registering an existing id keeps the
    /// accumulated providers and usage stats.
    pub async fn register_capability(&self, def: CapabilityDef) {
        let mut state = self.state.write().await;
        state.catalog.entry(def.id.clone()).or_insert(def);
    }

    /// Number of registered capabilities.
    pub async fn capability_count(&self) -> usize {
        self.state.read().await.catalog.len()
    }

    /// Agents providing the given capability.
    pub async fn providers_of(&self, capability_id: &str) -> HashSet<String> {
        self.state
            .read()
            .await
            .catalog
            .get(capability_id)
            .map(|def| def.providers.clone())
            .unwrap_or_default()
    }

    /// An agent's current bindings.
    pub async fn agent_capabilities(&self, agent_id: &str) -> Vec<AgentCapability> {
        self.state
            .read()
            .await
            .bindings
            .get(agent_id)
            .map(|caps| caps.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Bind an agent's declared capabilities, optionally probing the rest of
    /// the catalog for undeclared ones. Returns how many capabilities were
    /// newly discovered by probing.
    pub async fn register_agent_capabilities(
        &self,
        agent_id: &str,
        declared: &[String],
        auto_discover: bool,
        probe: Option<&dyn CapabilityProbe>,
    ) -> HiveResult<usize> {
        {
            let mut state = self.state.write().await;
            if !state.registration_seq.contains_key(agent_id) {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.registration_seq.insert(agent_id.to_string(), seq);
            }
            for cap_id in declared {
                if !state.catalog.contains_key(cap_id) {
                    warn!(agent_id, capability = %cap_id, "Declared capability not in catalog, skipping");
                    continue;
                }
                state
                    .bindings
                    .entry(agent_id.to_string())
                    .or_default()
                    .entry(cap_id.clone())
                    .or_insert_with(|| {
                        AgentCapability::new(cap_id.clone(), self.config.default_proficiency)
                    });
                if let Some(def) = state.catalog.get_mut(cap_id) {
                    def.providers.insert(agent_id.to_string());
                }
            }
        }

        let mut discovered = 0;
        if auto_discover {
            if let Some(probe) = probe {
                discovered = self.probe_undeclared(agent_id, probe).await?;
            }
        }

        self.state
            .write()
            .await
            .last_refreshed
            .insert(agent_id.to_string(), std::time::Instant::now());

        info!(agent_id, declared = declared.len(), discovered, "Agent capabilities registered");
        Ok(discovered)
    }

    /// Probe every catalog capability the agent is not yet bound to; accept
    /// a capability when the probe's confidence clears the matching
    /// threshold. Discovered capabilities are merged, never removed.
    async fn probe_undeclared(
        &self,
        agent_id: &str,
        probe: &dyn CapabilityProbe,
    ) -> HiveResult<usize> {
        let unbound: Vec<String> = {
            let state = self.state.read().await;
            let bound = state.bindings.get(agent_id);
            state
                .catalog
                .keys()
                .filter(|id| bound.map_or(true, |b| !b.contains_key(*id)))
                .cloned()
                .collect()
        };

        let mut discovered = 0;
        for cap_id in unbound {
            let confidence = match probe.probe(agent_id, &cap_id).await {
                Ok(confidence) => confidence,
                Err(e) => {
                    debug!(agent_id, capability = %cap_id, error = %e, "Probe failed");
                    continue;
                }
            };
            if confidence > self.config.matching_threshold {
                let mut state = self.state.write().await;
                let mut binding = AgentCapability::new(cap_id.clone(), confidence);
                binding.discovered = true;
                state
                    .bindings
                    .entry(agent_id.to_string())
                    .or_default()
                    .entry(cap_id.clone())
                    .or_insert(binding);
                if let Some(def) = state.catalog.get_mut(&cap_id) {
                    def.providers.insert(agent_id.to_string());
                }
                discovered += 1;
            }
        }
        Ok(discovered)
    }

    /// Re-probe agents whose capability set has not been refreshed within
    /// the capability timeout. Newly confirmed capabilities are merged.
    pub async fn discovery_pass(
        &self,
        agents: &[AgentInfo],
        probe: &dyn CapabilityProbe,
    ) -> HiveResult<usize> {
        let stale: Vec<String> = {
            let state = self.state.read().await;
            agents
                .iter()
                .filter(|a| {
                    state
                        .last_refreshed
                        .get(&a.id)
                        .map_or(true, |at| at.elapsed() >= self.config.capability_timeout)
                })
                .map(|a| a.id.clone())
                .collect()
        };

        let mut total = 0;
        for agent_id in stale {
            total += self.probe_undeclared(&agent_id, probe).await?;
            self.state
                .write()
                .await
                .last_refreshed
                .insert(agent_id, std::time::Instant::now());
        }
        Ok(total)
    }

    /// Extract the task's required and preferred capability sets.
    ///
    /// Required capabilities come only from the task itself. Preferred ones
    /// combine the explicit list, the static type table, and prompt pattern
    /// matches.
    pub fn extract_capabilities(&self, task: &Task) -> (Vec<String>, Vec<String>) {
        let required = task.required_capabilities.clone();

        let mut preferred: Vec<String> = Vec::new();
        let mut seen_owned: HashSet<String> = required.iter().cloned().collect();

        for cap in &task.preferred_capabilities {
            if seen_owned.insert(cap.clone()) {
                preferred.push(cap.clone());
            }
        }
        if let Some(task_type) = task.task_type {
            for cap in type_capabilities(task_type) {
                if seen_owned.insert((*cap).to_string()) {
                    preferred.push((*cap).to_string());
                }
            }
        }
        for (re, cap) in &self.inference {
            if re.is_match(&task.prompt) && seen_owned.insert((*cap).to_string()) {
                preferred.push((*cap).to_string());
            }
        }

        (required, preferred)
    }

    /// Score and rank every agent against the task.
    ///
    /// `match_score = required*0.7 + preferred*0.3`, each term the mean
    /// proficiency over that capability set. Any entirely unmet required
    /// capability blocks candidacy. Candidates below the matching threshold
    /// are excluded. Survivors are ranked by
    /// `match_score*100 * success_rate * (1 - load/100) * response_factor`,
    /// biased by the EMA capability score; ties break on lowest load, then
    /// registration order.
    pub async fn match_task_to_agents(
        &self,
        task: &Task,
        agents: &[AgentInfo],
    ) -> Vec<AgentMatch> {
        let (required, preferred) = self.extract_capabilities(task);
        let state = self.state.read().await;

        let mut candidates: Vec<(AgentMatch, u32, u64)> = Vec::new();
        for agent in agents {
            if !agent.available() {
                continue;
            }
            let bindings = state.bindings.get(&agent.id);

            let required_match = match required_term(&required, bindings) {
                Some(score) => score,
                None => continue, // a required capability is entirely unmet
            };
            let preferred_match = preferred_term(&preferred, bindings);

            let match_score =
                REQUIRED_WEIGHT * required_match + PREFERRED_WEIGHT * preferred_match;
            if match_score < self.config.matching_threshold {
                continue;
            }

            let response_factor =
                (1.0 - agent.performance.avg_processing_time_ms / 10_000.0).max(0.5);
            let bias = ema_bias(&required, &preferred, bindings);
            let ranking = match_score * 100.0
                * agent.performance.success_rate()
                * (1.0 - agent.load_percent() / 100.0)
                * response_factor
                * bias;

            let seq = state
                .registration_seq
                .get(&agent.id)
                .copied()
                .unwrap_or(u64::MAX);
            candidates.push((
                AgentMatch {
                    agent_id: agent.id.clone(),
                    match_score,
                    ranking,
                },
                agent.current_load,
                seq,
            ));
        }

        candidates.sort_by(|(a, load_a, seq_a), (b, load_b, seq_b)| {
            b.ranking
                .partial_cmp(&a.ranking)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(load_a.cmp(load_b))
                .then(seq_a.cmp(seq_b))
        });
        candidates.into_iter().map(|(m, _, _)| m).collect()
    }

    /// Update the rolling per-binding stats after a task outcome, and bump
    /// the capability's usage counter.
    pub async fn update_capability_performance(
        &self,
        agent_id: &str,
        capability_id: &str,
        success: bool,
        response_time_ms: u64,
    ) {
        let mut state = self.state.write().await;
        if let Some(binding) = state
            .bindings
            .get_mut(agent_id)
            .and_then(|caps| caps.get_mut(capability_id))
        {
            binding.record(success, response_time_ms);
        }
        if let Some(def) = state.catalog.get_mut(capability_id) {
            def.usage_count += 1;
        }
    }
}

/// Mean proficiency over the required set. `None` whenever any required
/// capability is unbound — required capabilities are mandatory, and a single
/// miss blocks candidacy entirely. An empty set scores a neutral 1.0.
fn required_term(
    caps: &[String],
    bindings: Option<&HashMap<String, AgentCapability>>,
) -> Option<f64> {
    if caps.is_empty() {
        return Some(1.0);
    }
    let mut sum = 0.0;
    for cap in caps {
        sum += bindings.and_then(|b| b.get(cap))?.proficiency;
    }
    Some(sum / caps.len() as f64)
}

/// Mean proficiency over the preferred set; unbound entries contribute zero.
/// An empty set scores a neutral 1.0.
fn preferred_term(caps: &[String], bindings: Option<&HashMap<String, AgentCapability>>) -> f64 {
    if caps.is_empty() {
        return 1.0;
    }
    let sum: f64 = caps
        .iter()
        .filter_map(|cap| bindings.and_then(|b| b.get(cap)))
        .map(|b| b.proficiency)
        .sum();
    sum / caps.len() as f64
}

/// Mean EMA score over the matched bindings; neutral 1.0 with no history.
fn ema_bias(
    required: &[String],
    preferred: &[String],
    bindings: Option<&HashMap<String, AgentCapability>>,
) -> f64 {
    let Some(bindings) = bindings else {
        return 1.0;
    };
    let scores: Vec<f64> = required
        .iter()
        .chain(preferred.iter())
        .filter_map(|cap| bindings.get(cap))
        .map(|b| b.score)
        .collect();
    if scores.is_empty() {
        1.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hive_core::ModelId;

    async fn matcher() -> CapabilityMatcher {
        CapabilityMatcher::with_default_catalog(MatcherConfig::default()).await
    }

    fn agent(id: &str) -> AgentInfo {
        AgentInfo::new(id, ModelId::Gpt4o)
    }

    #[tokio::test]
    async fn test_register_capability_idempotent() {
        let m = matcher().await;
        let count = m.capability_count().await;

        m.register_agent_capabilities("a-1", &["code.debugging".into()], false, None)
            .await
            .unwrap();
        // Re-registering the definition keeps the provider.
        m.register_capability(CapabilityDef::new("code.debugging", "Debugging", "code"))
            .await;
        assert_eq!(m.capability_count().await, count);
        assert!(m.providers_of("code.debugging").await.contains("a-1"));
    }

    #[tokio::test]
    async fn test_required_gate_blocks_unprovided_capability() {
        let m = matcher().await;
        m.register_agent_capabilities("a-1", &["code.generation".into()], false, None)
            .await
            .unwrap();

        let task = Task::new("t-1", "Fix it")
            .with_type(TaskType::BugFix)
            .with_required_capabilities(vec!["code.debugging".into()]);

        // a-1 does not provide code.debugging; candidate set must be empty
        // no matter how well the preferred capabilities score.
        let matches = m.match_task_to_agents(&task, &[agent("a-1")]).await;
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_matching_scenario_single_candidate() {
        let m = matcher().await;
        m.register_agent_capabilities("a-1", &["code.debugging".into()], false, None)
            .await
            .unwrap();

        let task = Task::new("t-1", "Fix the login bug")
            .with_type(TaskType::BugFix)
            .with_required_capabilities(vec!["code.debugging".into()]);

        let matches = m.match_task_to_agents(&task, &[agent("a-1")]).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].agent_id, "a-1");
        assert!(matches[0].ranking > 0.0);
    }

    #[tokio::test]
    async fn test_below_threshold_excluded() {
        let config = MatcherConfig {
            default_proficiency: 0.5, // 0.7*0.5 + 0.3*preferred stays below 0.7
            ..MatcherConfig::default()
        };
        let m = CapabilityMatcher::with_default_catalog(config).await;
        m.register_agent_capabilities("a-1", &["code.debugging".into()], false, None)
            .await
            .unwrap();

        let task = Task::new("t-1", "Fix the login bug")
            .with_required_capabilities(vec!["code.debugging".into()])
            .with_type(TaskType::BugFix);

        assert!(m.match_task_to_agents(&task, &[agent("a-1")]).await.is_empty());
    }

    #[tokio::test]
    async fn test_ranking_prefers_lower_load() {
        let m = matcher().await;
        for id in ["a-1", "a-2"] {
            m.register_agent_capabilities(id, &["code.debugging".into()], false, None)
                .await
                .unwrap();
        }
        let mut busy = agent("a-1");
        busy.current_load = 4;
        let idle = agent("a-2");

        let task = Task::new("t-1", "Fix the login bug")
            .with_required_capabilities(vec!["code.debugging".into()])
            .with_type(TaskType::BugFix);

        let matches = m.match_task_to_agents(&task, &[busy, idle]).await;
        assert_eq!(matches[0].agent_id, "a-2");
    }

    #[tokio::test]
    async fn test_tie_breaks_on_registration_order() {
        let m = matcher().await;
        for id in ["a-2", "a-1"] {
            m.register_agent_capabilities(id, &["code.debugging".into()], false, None)
                .await
                .unwrap();
        }
        let task = Task::new("t-1", "Fix the login bug")
            .with_required_capabilities(vec!["code.debugging".into()])
            .with_type(TaskType::BugFix);

        // Identical agents: a-2 registered first, so it wins the tie.
        let matches = m
            .match_task_to_agents(&task, &[agent("a-1"), agent("a-2")])
            .await;
        assert_eq!(matches[0].agent_id, "a-2");
    }

    #[tokio::test]
    async fn test_unavailable_agents_skipped() {
        let m = matcher().await;
        m.register_agent_capabilities("a-1", &["code.debugging".into()], false, None)
            .await
            .unwrap();
        let mut full = agent("a-1");
        full.current_load = full.max_load;

        let task = Task::new("t-1", "Fix the login bug")
            .with_required_capabilities(vec!["code.debugging".into()])
            .with_type(TaskType::BugFix);

        assert!(m.match_task_to_agents(&task, &[full]).await.is_empty());
    }

    #[tokio::test]
    async fn test_extraction_combines_type_and_patterns() {
        let m = matcher().await;
        let task = Task::new("t-1", "Please debug and document the auth module")
            .with_type(TaskType::BugFix)
            .with_required_capabilities(vec!["code.review".into()]);

        let (required, preferred) = m.extract_capabilities(&task);
        assert_eq!(required, vec!["code.review".to_string()]);
        assert!(preferred.contains(&"code.debugging".to_string()));
        assert!(preferred.contains(&"docs.writing".to_string()));
        // Required capabilities are not repeated in preferred.
        assert!(!preferred.contains(&"code.review".to_string()));
    }

    #[tokio::test]
    async fn test_performance_update_bumps_usage() {
        let m = matcher().await;
        m.register_agent_capabilities("a-1", &["code.debugging".into()], false, None)
            .await
            .unwrap();

        m.update_capability_performance("a-1", "code.debugging", true, 1200)
            .await;
        m.update_capability_performance("a-1", "code.debugging", false, 800)
            .await;

        let caps = m.agent_capabilities("a-1").await;
        let binding = caps.iter().find(|c| c.capability_id == "code.debugging").unwrap();
        assert_eq!(binding.performance.task_count, 2);
        assert!((binding.performance.success_rate - 0.5).abs() < 1e-9);
    }
}
