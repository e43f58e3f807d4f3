//! End-to-end orchestration tests over the in-memory store.
//!
//! Exercises the lifecycle guarantees: assignment moves a task
//! atomically from queue to processing, completion feeds agent scores,
//! stuck tasks retry with backoff and dead-letter at the ceiling, failed
//! tasks follow the transient/permanent policy, and a task is always in
//! exactly one place.

use hive_core::{
    channels, AgentInfo, AgentStatus, HiveConfig, HiveError, ModelId, OrchestratorCommand, Task,
    TaskType,
};
use hive_orchestrator::Orchestrator;
use hive_registry::{CapabilityMatcher, MatcherConfig};
use hive_resilience::{BreakerPolicy, BreakerRegistry, MessageBus, MessageCipher};
use hive_router::TaskRouter;
use hive_store::{MemoryConnector, MemoryStore, QueueStore, StorePool, TxEvent};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    store: Arc<MemoryStore>,
    cipher_key: String,
}

impl Harness {
    async fn new(config: HiveConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(StorePool::new(
            Arc::new(MemoryConnector::new(store.clone())),
            config.pool_size,
        ));
        let matcher = Arc::new(
            CapabilityMatcher::with_default_catalog(MatcherConfig {
                matching_threshold: config.matching_threshold,
                default_proficiency: config.default_proficiency,
                capability_timeout: Duration::from_secs(config.capability_timeout_secs),
            })
            .await,
        );
        let breakers = Arc::new(BreakerRegistry::new(BreakerPolicy {
            threshold: config.breaker_threshold,
            reset_timeout: Duration::from_secs(config.breaker_timeout_secs),
        }));
        let cipher_key = hex::encode([42u8; 32]);
        let cipher = Arc::new(MessageCipher::new(Some(&cipher_key), None).unwrap());
        let bus = Arc::new(MessageBus::new(
            store.clone(),
            cipher,
            breakers.clone(),
            "orchestrator",
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            pool,
            matcher,
            Arc::new(TaskRouter::new()),
            breakers,
            bus,
        ));
        Self {
            orchestrator,
            store,
            cipher_key,
        }
    }

    /// A second bus sharing the harness key, for playing the agent side.
    fn agent_bus(&self, agent_id: &str) -> MessageBus {
        MessageBus::new(
            self.store.clone(),
            Arc::new(MessageCipher::new(Some(&self.cipher_key), None).unwrap()),
            Arc::new(BreakerRegistry::default()),
            agent_id,
        )
    }

    async fn register_debugging_agent(&self, id: &str, model: ModelId) {
        self.orchestrator
            .register_agent(
                AgentInfo::new(id, model).with_capabilities(vec!["code.debugging".into()]),
            )
            .await
            .unwrap();
    }

    /// How many of {queue, processing, DLQ, failures-queue} hold the task.
    async fn placement_count(&self, queue: ModelId, task_id: &str) -> usize {
        let store: &MemoryStore = &self.store;
        let mut count = 0;
        // take_pending drains from the tail, so pushing each task back onto
        // the head restores the original order.
        let scan = store.take_pending(queue, usize::MAX).await.unwrap();
        if scan.iter().any(|t| t.id == task_id) {
            count += 1;
        }
        for task in scan {
            store.enqueue_front(queue, task).await.unwrap();
        }
        if store
            .processing_entries(queue)
            .await
            .unwrap()
            .iter()
            .any(|e| e.task.id == task_id)
        {
            count += 1;
        }
        if store
            .dead_letters(queue)
            .await
            .unwrap()
            .iter()
            .any(|dl| dl.task.id == task_id)
        {
            count += 1;
        }
        let failures = store.take_failures(usize::MAX).await.unwrap();
        if failures.iter().any(|f| f.task.id == task_id) {
            count += 1;
        }
        for record in failures {
            store.push_failure(record).await.unwrap();
        }
        count
    }
}

fn debugging_task(id: &str) -> Task {
    Task::new(id, "Fix the null pointer bug in the session handler")
        .with_type(TaskType::BugFix)
        .with_required_capabilities(vec!["code.debugging".into()])
}

fn base_config() -> HiveConfig {
    let mut config = HiveConfig::default();
    config.default_proficiency = 0.9;
    config
}

// ---------------------------------------------------------------------------
// Assignment and completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assignment_moves_task_into_processing_and_completion_scores_agent() {
    let h = Harness::new(base_config()).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;

    h.orchestrator
        .enqueue(ModelId::Gpt4o, debugging_task("T1"))
        .await
        .unwrap();

    let assigned = h.orchestrator.tick().await.unwrap();
    assert_eq!(assigned, 1);

    // T1 moved out of the queue and into processing, owned by A1.
    assert_eq!(h.store.queue_depth(ModelId::Gpt4o).await.unwrap(), 0);
    let entries = h.store.processing_entries(ModelId::Gpt4o).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].task.id, "T1");
    assert_eq!(entries[0].agent_id, "A1");
    assert_eq!(entries[0].task.assigned_agent.as_deref(), Some("A1"));
    assert_eq!(h.placement_count(ModelId::Gpt4o, "T1").await, 1);

    // Agent load went up with the assignment.
    let agent = h.store.get_agent("A1").await.unwrap().unwrap();
    assert_eq!(agent.current_load, 1);

    // A completion report clears processing and scores the agent.
    h.orchestrator
        .handle_completion(ModelId::Gpt4o, "T1", "A1", 1200)
        .await
        .unwrap();

    assert_eq!(h.store.processing_len(ModelId::Gpt4o).await.unwrap(), 0);
    let agent = h.store.get_agent("A1").await.unwrap().unwrap();
    assert_eq!(agent.performance.tasks_completed, 1);
    assert_eq!(agent.current_load, 0);

    // The transaction log saw the whole lifecycle.
    let log = h.store.tx_log(ModelId::Gpt4o).await.unwrap();
    let events: Vec<TxEvent> = log.iter().map(|e| e.event).collect();
    assert!(events.contains(&TxEvent::Enqueued));
    assert!(events.contains(&TxEvent::Assigned));
    assert!(events.contains(&TxEvent::Completed));
}

#[tokio::test]
async fn no_eligible_agent_leaves_task_queued() {
    let h = Harness::new(base_config()).await;
    // Agent on the right model but without the required capability.
    h.orchestrator
        .register_agent(
            AgentInfo::new("A1", ModelId::Gpt4o).with_capabilities(vec!["docs.writing".into()]),
        )
        .await
        .unwrap();

    h.orchestrator
        .enqueue(ModelId::Gpt4o, debugging_task("T1"))
        .await
        .unwrap();

    assert_eq!(h.orchestrator.tick().await.unwrap(), 0);
    assert_eq!(h.store.queue_depth(ModelId::Gpt4o).await.unwrap(), 1);
    assert_eq!(h.placement_count(ModelId::Gpt4o, "T1").await, 1);
}

#[tokio::test]
async fn stale_heartbeat_excludes_agent_from_assignment() {
    let mut config = base_config();
    config.heartbeat_ttl_secs = 0; // every heartbeat is instantly stale
    let h = Harness::new(config).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;

    h.orchestrator
        .enqueue(ModelId::Gpt4o, debugging_task("T1"))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.tick().await.unwrap(), 0);
    assert_eq!(h.store.queue_depth(ModelId::Gpt4o).await.unwrap(), 1);
}

#[tokio::test]
async fn invalid_task_dead_letters_immediately() {
    let h = Harness::new(base_config()).await;
    // No file, no action, no type: malformed.
    let task = Task::new("T-bad", "do something");

    let err = h.orchestrator.enqueue(ModelId::Gpt4o, task).await.unwrap_err();
    assert!(matches!(err, HiveError::InvalidTask(_)));

    let dead = h.store.dead_letters(ModelId::Gpt4o).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].task.id, "T-bad");
    assert_eq!(h.store.queue_depth(ModelId::Gpt4o).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Stuck-task detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stuck_task_under_ceiling_is_rescheduled_with_backoff() {
    let mut config = base_config();
    config.task_timeout_secs = 0; // everything in processing is stuck
    let h = Harness::new(config).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;

    let mut task = debugging_task("T1");
    task.retries = 4;
    h.orchestrator.enqueue(ModelId::Gpt4o, task).await.unwrap();
    h.orchestrator.tick().await.unwrap();
    assert_eq!(h.store.processing_len(ModelId::Gpt4o).await.unwrap(), 1);

    let handled = h.orchestrator.scan_stuck_tasks().await.unwrap();
    assert_eq!(handled, 1);

    // Re-enqueued (delayed) with retries bumped to 5 and a 2^5 s backoff.
    assert_eq!(h.store.processing_len(ModelId::Gpt4o).await.unwrap(), 0);
    assert_eq!(h.store.retry_backlog().await.unwrap(), 1);
    assert!(h.store.dead_letters(ModelId::Gpt4o).await.unwrap().is_empty());

    let log = h.store.tx_log(ModelId::Gpt4o).await.unwrap();
    let scheduled = log
        .iter()
        .find(|e| e.event == TxEvent::RetryScheduled)
        .expect("retry was logged");
    assert_eq!(scheduled.data["retries"], 5);
    assert_eq!(scheduled.data["delay_ms"], 32_000);
}

#[tokio::test]
async fn stuck_task_at_ceiling_dead_letters_with_reason() {
    let mut config = base_config();
    config.task_timeout_secs = 0;
    let h = Harness::new(config).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;

    let mut task = debugging_task("T1");
    task.retries = 5; // already at max_retries
    h.orchestrator.enqueue(ModelId::Gpt4o, task).await.unwrap();
    h.orchestrator.tick().await.unwrap();

    h.orchestrator.scan_stuck_tasks().await.unwrap();

    let dead = h.store.dead_letters(ModelId::Gpt4o).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, "Max retries exceeded");
    // Retry monotonicity: the counter never moved past the ceiling.
    assert_eq!(dead[0].task.retries, 5);
    assert_eq!(h.store.retry_backlog().await.unwrap(), 0);
    assert_eq!(h.placement_count(ModelId::Gpt4o, "T1").await, 1);
}

#[tokio::test]
async fn stuck_scan_sends_advisory_abort_to_owner() {
    let mut config = base_config();
    config.task_timeout_secs = 0;
    let h = Harness::new(config).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;

    let mut rx = h
        .store
        .subscribe(&channels::agent_control("A1"))
        .await
        .unwrap();

    h.orchestrator
        .enqueue(ModelId::Gpt4o, debugging_task("T1"))
        .await
        .unwrap();
    h.orchestrator.tick().await.unwrap();
    h.orchestrator.scan_stuck_tasks().await.unwrap();

    let raw = rx.recv().await.unwrap();
    let payload = h.agent_bus("A1").open_envelope(&raw).unwrap();
    assert_eq!(payload["type"], "task_timeout");
    assert_eq!(payload["task_id"], "T1");
}

// ---------------------------------------------------------------------------
// Failure analysis
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failure_retries_on_fallback_queue() {
    let h = Harness::new(base_config()).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;

    h.orchestrator
        .enqueue(ModelId::Gpt4o, debugging_task("T1"))
        .await
        .unwrap();
    h.orchestrator.tick().await.unwrap();

    h.orchestrator
        .handle_failure(ModelId::Gpt4o, "T1", "A1", "connection reset by peer")
        .await
        .unwrap();

    // The task sits in the failures queue until analysis runs.
    assert_eq!(h.placement_count(ModelId::Gpt4o, "T1").await, 1);
    let agent = h.store.get_agent("A1").await.unwrap().unwrap();
    assert_eq!(agent.performance.tasks_failed, 1);

    let processed = h.orchestrator.process_failures().await.unwrap();
    assert_eq!(processed, 1);

    // Retry scheduled on the fallback queue for gpt-4o.
    assert_eq!(h.store.retry_backlog().await.unwrap(), 1);
    let fallback = ModelId::Gpt4o.fallback();
    let log = h.store.tx_log(fallback).await.unwrap();
    assert!(log.iter().any(|e| e.event == TxEvent::RetryScheduled));
}

#[tokio::test]
async fn permanent_failure_dead_letters_with_error_tag() {
    let h = Harness::new(base_config()).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;

    h.orchestrator
        .enqueue(ModelId::Gpt4o, debugging_task("T1"))
        .await
        .unwrap();
    h.orchestrator.tick().await.unwrap();
    h.orchestrator
        .handle_failure(ModelId::Gpt4o, "T1", "A1", "invalid model parameters")
        .await
        .unwrap();
    h.orchestrator.process_failures().await.unwrap();

    let dead = h.store.dead_letters(ModelId::Gpt4o).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.contains("invalid"));
    assert_eq!(h.store.retry_backlog().await.unwrap(), 0);
}

#[tokio::test]
async fn due_retry_promotes_to_queue_head() {
    let h = Harness::new(base_config()).await;
    let mut task = debugging_task("T1");
    task.retries = 2;
    h.store
        .schedule_retry(ModelId::Gpt4o, task, Duration::ZERO)
        .await
        .unwrap();

    let promoted = h.orchestrator.process_due_retries().await.unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(h.store.queue_depth(ModelId::Gpt4o).await.unwrap(), 1);
    let head = h.store.peek(ModelId::Gpt4o).await.unwrap().unwrap();
    assert_eq!(head.id, "T1");
    assert_eq!(head.retries, 2);
}

// ---------------------------------------------------------------------------
// Operator surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pause_and_resume_gate_the_tick() {
    let h = Harness::new(base_config()).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;
    h.orchestrator
        .enqueue(ModelId::Gpt4o, debugging_task("T1"))
        .await
        .unwrap();

    h.orchestrator
        .handle_command(OrchestratorCommand::Pause)
        .await
        .unwrap();
    assert_eq!(h.orchestrator.tick().await.unwrap(), 0);
    assert_eq!(h.store.queue_depth(ModelId::Gpt4o).await.unwrap(), 1);

    h.orchestrator
        .handle_command(OrchestratorCommand::Resume)
        .await
        .unwrap();
    assert_eq!(h.orchestrator.tick().await.unwrap(), 1);
}

#[tokio::test]
async fn dlq_requeue_preserves_retry_count() {
    let mut config = base_config();
    config.task_timeout_secs = 0;
    let h = Harness::new(config).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;

    let mut task = debugging_task("T1");
    task.retries = 5;
    h.orchestrator.enqueue(ModelId::Gpt4o, task).await.unwrap();
    h.orchestrator.tick().await.unwrap();
    h.orchestrator.scan_stuck_tasks().await.unwrap();
    assert_eq!(h.store.dead_letters(ModelId::Gpt4o).await.unwrap().len(), 1);

    // The DLQ is never auto-drained; requeue is an explicit operator act.
    h.orchestrator
        .requeue_dead_letter(ModelId::Gpt4o, "T1")
        .await
        .unwrap();
    assert!(h.store.dead_letters(ModelId::Gpt4o).await.unwrap().is_empty());
    let head = h.store.peek(ModelId::Gpt4o).await.unwrap().unwrap();
    assert_eq!(head.id, "T1");
    assert_eq!(head.retries, 5);
}

#[tokio::test]
async fn clear_dlq_command_purges() {
    let mut config = base_config();
    config.task_timeout_secs = 0;
    let h = Harness::new(config).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;

    let mut task = debugging_task("T1");
    task.retries = 5;
    h.orchestrator.enqueue(ModelId::Gpt4o, task).await.unwrap();
    h.orchestrator.tick().await.unwrap();
    h.orchestrator.scan_stuck_tasks().await.unwrap();

    h.orchestrator
        .handle_command(OrchestratorCommand::ClearDlq { queue: None })
        .await
        .unwrap();
    assert!(h.store.dead_letters(ModelId::Gpt4o).await.unwrap().is_empty());
}

#[tokio::test]
async fn health_snapshot_reflects_queue_and_agent_state() {
    let h = Harness::new(base_config()).await;
    h.register_debugging_agent("A1", ModelId::Gpt4o).await;
    h.orchestrator
        .enqueue(ModelId::Gpt4o, debugging_task("T1"))
        .await
        .unwrap();

    let snapshot = h.orchestrator.health_snapshot().await.unwrap();
    assert_eq!(snapshot.orchestrator.status, "running");
    let queue = &snapshot.queues["queue:gpt-4o"];
    assert_eq!(queue.depth, 1);
    assert!(queue.healthy);
    assert!(snapshot.agents["A1"].healthy);

    // An unresponsive agent shows up unhealthy.
    h.orchestrator.deregister_agent("A1").await.unwrap();
    let snapshot = h.orchestrator.health_snapshot().await.unwrap();
    assert!(!snapshot.agents["A1"].healthy);
    assert_eq!(snapshot.agents["A1"].status, AgentStatus::Deregistered);
}

// ---------------------------------------------------------------------------
// Queue balancing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rebalance_migrates_pending_tasks_to_equivalent_queue() {
    let h = Harness::new(base_config()).await;

    // claude-3-sonnet: 51 pending tasks, no agents → overloaded.
    for i in 0..51 {
        h.orchestrator
            .enqueue(ModelId::ClaudeSonnet, debugging_task(&format!("T{i}")))
            .await
            .unwrap();
    }
    // deepseek-coder (same tier): empty queue, 4 idle agents → underutilized.
    for i in 0..4 {
        h.register_debugging_agent(&format!("D{i}"), ModelId::DeepseekCoder)
            .await;
    }

    let moved = h.orchestrator.rebalance().await.unwrap();
    assert_eq!(moved, 1); // depth 51 exceeds the threshold by one
    assert_eq!(h.store.queue_depth(ModelId::ClaudeSonnet).await.unwrap(), 50);
    assert_eq!(h.store.queue_depth(ModelId::DeepseekCoder).await.unwrap(), 1);

    let log = h.store.tx_log(ModelId::ClaudeSonnet).await.unwrap();
    assert!(log.iter().any(|e| e.event == TxEvent::Migrated));
}

#[tokio::test]
async fn rebalance_ignores_balanced_queues() {
    let h = Harness::new(base_config()).await;
    for i in 0..10 {
        h.orchestrator
            .enqueue(ModelId::ClaudeSonnet, debugging_task(&format!("T{i}")))
            .await
            .unwrap();
    }
    assert_eq!(h.orchestrator.rebalance().await.unwrap(), 0);
    assert_eq!(h.store.queue_depth(ModelId::ClaudeSonnet).await.unwrap(), 10);
}

// ---------------------------------------------------------------------------
// Full event-loop round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn event_loop_round_trip_from_registration_to_completion() {
    let h = Harness::new(base_config()).await;
    let handles = h.orchestrator.run(None).await.unwrap();
    // Let the listeners subscribe before anything is published.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // An agent announces itself over the bus.
    let agent_bus = h.agent_bus("A1");
    let agent = AgentInfo::new("A1", ModelId::ClaudeHaiku)
        .with_capabilities(vec!["code.debugging".into()]);
    agent_bus
        .publish(channels::AGENT_REGISTER, &serde_json::to_value(&agent).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.store.get_agent("A1").await.unwrap().is_some());

    // The agent listens for assignments.
    let mut task_rx = h
        .store
        .subscribe(&channels::agent_task("A1"))
        .await
        .unwrap();

    // A producer submits a task; the router sends this prompt to the
    // claude-3-haiku queue, where A1 lives.
    let decision = h
        .orchestrator
        .submit(Task::new("T1", "Fix the null pointer bug in auth.js"))
        .await
        .unwrap();
    assert_eq!(decision.model, ModelId::ClaudeHaiku);
    assert_eq!(decision.budget.input, 500);

    // The tick loop assigns it and the agent receives the envelope.
    let raw = tokio::time::timeout(Duration::from_secs(2), task_rx.recv())
        .await
        .expect("assignment published")
        .unwrap();
    let payload = agent_bus.open_envelope(&raw).unwrap();
    assert_eq!(payload["id"], "T1");

    // The agent reports completion; the orchestrator clears the slot.
    agent_bus
        .publish(
            channels::TASK_COMPLETE,
            &serde_json::json!({
                "queue": "queue:claude-3-haiku",
                "task_id": "T1",
                "agent_id": "A1",
                "duration_ms": 800,
            }),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.store.processing_len(ModelId::ClaudeHaiku).await.unwrap(), 0);
    let agent = h.store.get_agent("A1").await.unwrap().unwrap();
    assert_eq!(agent.performance.tasks_completed, 1);

    for handle in handles {
        handle.abort();
    }
}
