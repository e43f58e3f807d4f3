use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{ModelId, ModelTier};
use crate::{HiveError, HiveResult};

/// The enumerated configuration surface.
///
/// Every knob has a serde default so a partial TOML file (or none at all) is
/// valid; `apply_env` layers `HIVE_*` environment overrides on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveConfig {
    /// Store connection URL. `memory://local` selects the in-process store.
    #[serde(default = "default_store_url")]
    pub store_url: String,
    /// Maximum pooled store connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Assignment tick interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Health snapshot publishing interval in seconds.
    #[serde(default = "default_health_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Age after which an in-flight task counts as stuck, in seconds.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Interval between stuck-task scans, in seconds.
    #[serde(default = "default_stuck_scan_interval_secs")]
    pub stuck_scan_interval_secs: u64,
    /// Interval between due-retry promotion passes, in milliseconds.
    #[serde(default = "default_retry_promotion_interval_ms")]
    pub retry_promotion_interval_ms: u64,
    /// Interval between queue-balancing passes, in seconds.
    #[serde(default = "default_balance_interval_secs")]
    pub balance_interval_secs: u64,
    /// Maximum re-enqueues before a task dead-letters.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// DLQ depth above which a queue's health flag flips to false.
    #[serde(default = "default_dead_letter_threshold")]
    pub dead_letter_threshold: usize,
    /// Agent heartbeat publish interval in seconds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Heartbeat freshness TTL in seconds.
    #[serde(default = "default_heartbeat_ttl_secs")]
    pub heartbeat_ttl_secs: u64,
    /// Minimum capability match score for candidacy.
    #[serde(default = "default_matching_threshold")]
    pub matching_threshold: f64,
    /// Proficiency assigned to declared-but-unprobed capabilities.
    #[serde(default = "default_proficiency")]
    pub default_proficiency: f64,
    /// Capability discovery loop interval in seconds.
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
    /// Re-probe agents whose capability set is older than this, in seconds.
    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,
    /// Circuit breaker failure threshold.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// Circuit breaker open→half-open reset timeout in seconds.
    #[serde(default = "default_breaker_timeout_secs")]
    pub breaker_timeout_secs: u64,
    /// Per-queue scheduling weight; higher drains first.
    #[serde(default = "default_queue_weights")]
    pub queue_weights: HashMap<ModelId, u32>,
    /// Hex-encoded 32-byte AEAD key for inter-agent messaging. Messages are
    /// sent as logged plaintext when unset.
    #[serde(default)]
    pub message_key: Option<String>,
    /// Hex-encoded HMAC signing key. Falls back to `message_key` when unset.
    #[serde(default)]
    pub signing_key: Option<String>,
}

fn default_store_url() -> String {
    "memory://local".to_string()
}
fn default_pool_size() -> usize {
    10
}
fn default_tick_interval_ms() -> u64 {
    100
}
fn default_health_interval_secs() -> u64 {
    30
}
fn default_task_timeout_secs() -> u64 {
    1800
}
fn default_stuck_scan_interval_secs() -> u64 {
    60
}
fn default_retry_promotion_interval_ms() -> u64 {
    500
}
fn default_balance_interval_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}
fn default_dead_letter_threshold() -> usize {
    50
}
fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_heartbeat_ttl_secs() -> u64 {
    30
}
fn default_matching_threshold() -> f64 {
    0.7
}
fn default_proficiency() -> f64 {
    0.8
}
fn default_discovery_interval_secs() -> u64 {
    30
}
fn default_capability_timeout_secs() -> u64 {
    300
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_timeout_secs() -> u64 {
    60
}

/// Flagship queues drain before mid-tier, mid-tier before budget.
fn default_queue_weights() -> HashMap<ModelId, u32> {
    ModelId::ALL
        .iter()
        .map(|m| {
            let weight = match m.tier() {
                ModelTier::Flagship => 30,
                ModelTier::Mid => 20,
                ModelTier::Budget => 10,
            };
            (*m, weight)
        })
        .collect()
}

impl Default for HiveConfig {
    // Deserializing an empty document picks up every serde default.
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config is valid")
    }
}

impl HiveConfig {
    /// Parse a TOML configuration document.
    pub fn from_toml(text: &str) -> HiveResult<Self> {
        toml::from_str(text).map_err(|e| HiveError::Config(format!("Invalid config: {e}")))
    }

    /// Layer `HIVE_*` environment variables over this configuration.
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var("HIVE_STORE_URL") {
            self.store_url = url;
        }
        if let Some(v) = env_parse("HIVE_POOL_SIZE") {
            self.pool_size = v;
        }
        if let Some(v) = env_parse("HIVE_TICK_INTERVAL_MS") {
            self.tick_interval_ms = v;
        }
        if let Some(v) = env_parse("HIVE_TASK_TIMEOUT_SECS") {
            self.task_timeout_secs = v;
        }
        if let Some(v) = env_parse("HIVE_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_parse("HIVE_HEARTBEAT_TTL_SECS") {
            self.heartbeat_ttl_secs = v;
        }
        if let Some(v) = env_parse("HIVE_MATCHING_THRESHOLD") {
            self.matching_threshold = v;
        }
        if let Ok(key) = std::env::var("HIVE_MESSAGE_KEY") {
            self.message_key = Some(key);
        }
        if let Ok(key) = std::env::var("HIVE_SIGNING_KEY") {
            self.signing_key = Some(key);
        }
        self
    }

    /// Queues in scheduling order: highest weight first, declaration order
    /// breaking ties so scans are deterministic.
    pub fn queues_by_priority(&self) -> Vec<ModelId> {
        let mut queues: Vec<ModelId> = ModelId::ALL.to_vec();
        queues.sort_by_key(|m| std::cmp::Reverse(self.queue_weights.get(m).copied().unwrap_or(0)));
        queues
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = HiveConfig::default();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.task_timeout_secs, 1800);
        assert_eq!(cfg.pool_size, 10);
        assert_eq!(cfg.heartbeat_ttl_secs, 30);
        assert!((cfg.matching_threshold - 0.7).abs() < f64::EPSILON);
        assert!(cfg.message_key.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let cfg = HiveConfig::from_toml("max_retries = 3\ntask_timeout_secs = 60\n").unwrap();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.task_timeout_secs, 60);
        // Untouched knobs keep their defaults.
        assert_eq!(cfg.pool_size, 10);
    }

    #[test]
    fn test_queue_weights_override() {
        let cfg = HiveConfig::from_toml("[queue_weights]\n\"gpt-4o-mini\" = 99\n").unwrap();
        assert_eq!(cfg.queues_by_priority()[0], ModelId::Gpt4oMini);
    }

    #[test]
    fn test_default_priority_order_puts_flagship_first() {
        let cfg = HiveConfig::default();
        let order = cfg.queues_by_priority();
        assert_eq!(order[0].tier(), ModelTier::Flagship);
        assert_eq!(order[order.len() - 1].tier(), ModelTier::Budget);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(HiveConfig::from_toml("max_retries = \"many\"").is_err());
    }
}
