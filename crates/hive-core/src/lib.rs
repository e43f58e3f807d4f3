//! Core types and error definitions for the Hive orchestrator.
//!
//! This crate provides the foundational types shared across all Hive crates:
//! the error taxonomy, task and agent representations, the closed model-id
//! type with its routing tables, pub/sub channel names, and configuration.
//!
//! # Main types
//!
//! - [`HiveError`] — Unified error enum for all Hive subsystems.
//! - [`HiveResult`] — Convenience alias for `Result<T, HiveError>`.
//! - [`Task`] — A unit of work flowing through the per-model queues.
//! - [`AgentInfo`] — A registered worker bound to one model.
//! - [`ModelId`] — Closed set of known models with typed lookup tables.
//! - [`OrchestratorCommand`] — Operator commands delivered over pub/sub.
//! - [`HiveConfig`] — The enumerated configuration surface.

/// Agent registration, status, and performance types.
pub mod agent;
/// Pub/sub channel names used across the system.
pub mod channels;
/// Configuration surface with serde defaults and environment overrides.
pub mod config;
/// Closed model-id type and its routing tables.
pub mod model;
/// Task, task type, and lifecycle types.
pub mod task;

pub use agent::{AgentInfo, AgentPerformance, AgentStatus};
pub use config::HiveConfig;
pub use model::{ModelId, ModelTier};
pub use task::{Task, TaskType};

use serde::{Deserialize, Serialize};

/// Top-level error type for the Hive orchestrator.
///
/// Variants follow the failure taxonomy: task-level errors carry the
/// retry/dead-letter policy, infrastructure errors surface as alerts, and
/// `CircuitOpen` fails fast without touching the guarded operation.
#[derive(Debug, thiserror::Error)]
pub enum HiveError {
    /// Malformed task input. Never retried; goes straight to the DLQ.
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// No eligible agent for the task right now. Soft; the task stays queued.
    #[error("No available agent: {0}")]
    NoAvailableAgent(String),

    /// A worker failure matching a known transient pattern. Retryable.
    #[error("Transient worker error: {0}")]
    TransientWorker(String),

    /// A worker failure that will not succeed on retry. Immediate DLQ.
    #[error("Permanent worker error: {0}")]
    PermanentWorker(String),

    /// The circuit protecting a service is open; the call was not attempted.
    #[error("Circuit open for service '{0}'")]
    CircuitOpen(String),

    /// The backing store could not be reached or an operation failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Signature verification, decryption, or key-material failure.
    #[error("Security error: {0}")]
    Security(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error internal to the orchestrator itself.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`HiveError`].
pub type HiveResult<T> = Result<T, HiveError>;

/// Operator commands delivered over the `orchestrator:command` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OrchestratorCommand {
    /// Stop assigning tasks from all queues (in-flight work continues).
    Pause,
    /// Resume assignment after a pause.
    Resume,
    /// Run a queue-balancing pass now.
    Rebalance,
    /// Publish a health snapshot now.
    HealthCheck,
    /// Purge the dead-letter queue for one model, or all when unset.
    ClearDlq {
        /// The queue to purge; all DLQs when `None`.
        #[serde(default)]
        queue: Option<ModelId>,
    },
}
