use chrono::{DateTime, Utc};
use hive_core::{ModelId, Task};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An in-flight assignment record, keyed by task id in `processing:<model>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEntry {
    /// The task, with `assigned_agent` and `transaction_id` filled in.
    pub task: Task,
    /// The agent working the task.
    pub agent_id: String,
    /// When the assignment was made.
    pub started_at: DateTime<Utc>,
    /// Transaction id of this assignment.
    pub transaction_id: Uuid,
}

/// A terminally failed task in `dlq:<model>`.
///
/// Retains the original task, the failure reason, and the failing queue so
/// operators can replay it forensically. Never auto-drained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The queue the task died on.
    pub queue: ModelId,
    /// The task as it was when it exhausted its options.
    pub task: Task,
    /// Why it was dead-lettered.
    pub reason: String,
    /// When it was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

/// An agent-reported failure awaiting analysis, in `queue:failures`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The queue the task was assigned from.
    pub queue: ModelId,
    /// The failed task.
    pub task: Task,
    /// The agent that reported the failure.
    pub agent_id: String,
    /// The worker's error string, matched against the transient patterns.
    pub error: String,
    /// When the failure was reported.
    pub reported_at: DateTime<Utc>,
}

/// Lifecycle events recorded in the per-queue transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxEvent {
    /// Orchestrator started serving this queue.
    Initialized,
    /// A task entered the queue.
    Enqueued,
    /// A task moved from the queue into processing.
    Assigned,
    /// A task completed and left processing.
    Completed,
    /// A failure was reported for a task.
    Failed,
    /// A retry was scheduled with a backoff delay.
    RetryScheduled,
    /// A task was moved to the dead-letter queue.
    DeadLettered,
    /// An operator requeued a dead letter.
    Requeued,
    /// A task migrated to another queue during balancing.
    Migrated,
    /// An operator purged the dead-letter queue.
    Purged,
}

/// Append-only audit record in `txlog:<queue>`, capped and time-ordered.
///
/// Used for audit and debugging, not for recovery correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    /// What happened.
    pub event: TxEvent,
    /// The queue it happened on.
    pub queue: ModelId,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Freeform event detail (task id, agent id, reason, …).
    pub data: serde_json::Value,
}

impl TransactionLogEntry {
    /// Create an entry stamped now.
    pub fn new(event: TxEvent, queue: ModelId, data: serde_json::Value) -> Self {
        Self {
            event,
            queue,
            timestamp: Utc::now(),
            data,
        }
    }
}
