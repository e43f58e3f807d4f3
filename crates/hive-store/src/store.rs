use async_trait::async_trait;
use hive_core::{AgentInfo, HiveResult, ModelId, Task};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::types::{DeadLetter, FailureRecord, ProcessingEntry, TransactionLogEntry};

/// The logical store schema every backing store must satisfy.
///
/// A task is present in exactly one of {queue, processing map, dead-letter
/// queue, failures queue} at any instant. Implementations must make the
/// multi-step transitions atomic — in particular [`QueueStore::claim_next`],
/// which is the sole serialization point on the hot assignment path. A crash
/// between the pop and the insert must never lose or duplicate a task.
#[async_trait]
pub trait QueueStore: Send + Sync {
    // --- Queues ---

    /// Append a task to the tail of the named queue.
    async fn enqueue(&self, queue: ModelId, task: Task) -> HiveResult<()>;

    /// Push a task to the head of the named queue. Retries re-enter here so
    /// aged tasks are not starved behind fresh arrivals.
    async fn enqueue_front(&self, queue: ModelId, task: Task) -> HiveResult<()>;

    /// Number of pending tasks in the queue.
    async fn queue_depth(&self, queue: ModelId) -> HiveResult<usize>;

    /// The head task, without removing it.
    async fn peek(&self, queue: ModelId) -> HiveResult<Option<Task>>;

    /// Remove up to `max` tasks from the tail, for migration to another
    /// queue. Only pending, unassigned tasks live in queues, so anything
    /// returned here is safe to move.
    async fn take_pending(&self, queue: ModelId, max: usize) -> HiveResult<Vec<Task>>;

    /// Atomically pop the head task and insert it into the processing map
    /// with a fresh transaction id. Returns `None` on an empty queue.
    async fn claim_next(
        &self,
        queue: ModelId,
        agent_id: &str,
    ) -> HiveResult<Option<ProcessingEntry>>;

    // --- Processing map ---

    /// All in-flight entries for the queue.
    async fn processing_entries(&self, queue: ModelId) -> HiveResult<Vec<ProcessingEntry>>;

    /// Atomically remove and return one in-flight entry.
    async fn remove_processing(
        &self,
        queue: ModelId,
        task_id: &str,
    ) -> HiveResult<Option<ProcessingEntry>>;

    /// Number of in-flight entries for the queue.
    async fn processing_len(&self, queue: ModelId) -> HiveResult<usize>;

    // --- Dead letters ---

    /// Append to the per-model dead-letter queue.
    async fn push_dead_letter(&self, dead_letter: DeadLetter) -> HiveResult<()>;

    /// All dead letters for the queue.
    async fn dead_letters(&self, queue: ModelId) -> HiveResult<Vec<DeadLetter>>;

    /// Remove and return one dead letter by task id (operator requeue).
    async fn take_dead_letter(
        &self,
        queue: ModelId,
        task_id: &str,
    ) -> HiveResult<Option<DeadLetter>>;

    /// Drop all dead letters for the queue; returns how many were purged.
    async fn purge_dead_letters(&self, queue: ModelId) -> HiveResult<usize>;

    // --- Failures queue ---

    /// Append an agent-reported failure for later analysis.
    async fn push_failure(&self, record: FailureRecord) -> HiveResult<()>;

    /// Remove up to `max` failure records from the head.
    async fn take_failures(&self, max: usize) -> HiveResult<Vec<FailureRecord>>;

    // --- Delayed retries ---

    /// Schedule a task to re-enter `queue` after `delay`. The entry lives in
    /// the store so backoff state survives an orchestrator restart.
    async fn schedule_retry(&self, queue: ModelId, task: Task, delay: Duration) -> HiveResult<()>;

    /// Remove and return every retry whose delay has elapsed.
    async fn due_retries(&self) -> HiveResult<Vec<(ModelId, Task)>>;

    /// Number of scheduled retries not yet due.
    async fn retry_backlog(&self) -> HiveResult<usize>;

    // --- Agent registry ---

    /// Insert or update an agent record.
    async fn put_agent(&self, agent: AgentInfo) -> HiveResult<()>;

    /// Fetch one agent record.
    async fn get_agent(&self, agent_id: &str) -> HiveResult<Option<AgentInfo>>;

    /// All agent records, including soft-deleted ones.
    async fn list_agents(&self) -> HiveResult<Vec<AgentInfo>>;

    // --- Heartbeats ---

    /// Write the agent's heartbeat key with the given TTL.
    async fn put_heartbeat(&self, agent_id: &str, ttl: Duration) -> HiveResult<()>;

    /// Whether the agent's heartbeat key exists and has not expired.
    async fn heartbeat_fresh(&self, agent_id: &str) -> HiveResult<bool>;

    // --- Transaction log ---

    /// Append to the capped per-queue transaction log.
    async fn append_tx(&self, entry: TransactionLogEntry) -> HiveResult<()>;

    /// The queue's transaction log, oldest first.
    async fn tx_log(&self, queue: ModelId) -> HiveResult<Vec<TransactionLogEntry>>;

    // --- Pub/sub ---

    /// Publish a payload to a broadcast channel; returns the receiver count.
    async fn publish(&self, channel: &str, payload: String) -> HiveResult<usize>;

    /// Subscribe to a broadcast channel.
    async fn subscribe(&self, channel: &str) -> HiveResult<broadcast::Receiver<String>>;
}
