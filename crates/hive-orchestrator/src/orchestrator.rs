use chrono::Utc;
use hive_core::{
    AgentInfo, AgentStatus, HiveConfig, HiveError, HiveResult, ModelId, OrchestratorCommand, Task,
};
use hive_registry::CapabilityMatcher;
use hive_resilience::{BreakerRegistry, MessageBus};
use hive_router::{RouteDecision, TaskRouter};
use hive_store::{
    DeadLetter, FailureRecord, PooledStore, QueueStore, StorePool, TransactionLogEntry, TxEvent,
};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::failure::{analyze_failure, backoff_delay, FailureDisposition};

/// Breaker service name guarding the claim/dispatch path.
const EXECUTION_SERVICE: &str = "task-execution";

/// How many failure records one analysis pass drains.
const FAILURE_BATCH: usize = 32;

/// The queue orchestrator: owns the task lifecycle across all per-model
/// queues — enqueue, assign, track in-flight, retry with backoff,
/// dead-letter, rebalance.
///
/// One orchestrator process runs a single logical scheduling loop, but
/// several replicas may share one store; every cross-cutting transition goes
/// through the store's atomic primitives, and every read-then-act sequence
/// re-checks before acting.
pub struct Orchestrator {
    pub(crate) id: String,
    pub(crate) config: HiveConfig,
    pub(crate) pool: Arc<StorePool>,
    pub(crate) matcher: Arc<CapabilityMatcher>,
    pub(crate) router: Arc<TaskRouter>,
    pub(crate) breakers: Arc<BreakerRegistry>,
    pub(crate) bus: Arc<MessageBus>,
    pub(crate) paused: AtomicBool,
    pub(crate) started_at: Instant,
}

impl Orchestrator {
    /// Assemble an orchestrator from its collaborators.
    pub fn new(
        config: HiveConfig,
        pool: Arc<StorePool>,
        matcher: Arc<CapabilityMatcher>,
        router: Arc<TaskRouter>,
        breakers: Arc<BreakerRegistry>,
        bus: Arc<MessageBus>,
    ) -> Self {
        Self {
            id: format!("orchestrator-{}", Uuid::new_v4()),
            config,
            pool,
            matcher,
            router,
            breakers,
            bus,
            paused: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// This orchestrator instance's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The secure message bus this orchestrator publishes on.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Whether assignment is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Route a task and enqueue it on the chosen queue. The router's
    /// priority wins over whatever the producer set, and a task submitted
    /// without a type carries the inferred one from here on.
    pub async fn submit(&self, mut task: Task) -> HiveResult<RouteDecision> {
        let decision = self.router.route(&task);
        task.priority = decision.priority;
        if task.task_type.is_none() {
            task.task_type = Some(decision.task_type);
        }
        self.enqueue(decision.model, task).await?;
        Ok(decision)
    }

    /// Append a task to the named queue.
    ///
    /// Malformed tasks are never retried: they go straight to the queue's
    /// DLQ and the error propagates to the producer.
    pub async fn enqueue(&self, queue: ModelId, task: Task) -> HiveResult<()> {
        let store = self.pool.acquire().await?;
        if let Err(e) = task.validate() {
            store
                .push_dead_letter(DeadLetter {
                    queue,
                    task,
                    reason: e.to_string(),
                    failed_at: Utc::now(),
                })
                .await?;
            store
                .append_tx(TransactionLogEntry::new(
                    TxEvent::DeadLettered,
                    queue,
                    serde_json::json!({"reason": e.to_string()}),
                ))
                .await?;
            return Err(e);
        }

        let task_id = task.id.clone();
        store.enqueue(queue, task).await?;
        store
            .append_tx(TransactionLogEntry::new(
                TxEvent::Enqueued,
                queue,
                serde_json::json!({"task_id": task_id}),
            ))
            .await?;
        Ok(())
    }

    /// One assignment pass: scan queues in priority order, match the head
    /// task to the best live agent, atomically claim it, and publish the
    /// assignment. Returns the number of tasks assigned.
    ///
    /// Store failures propagate so the caller can log and retry next tick;
    /// nothing is dropped — unassigned tasks simply stay queued.
    pub async fn tick(&self) -> HiveResult<usize> {
        if self.is_paused() {
            return Ok(0);
        }
        let store = self.pool.acquire().await?;
        let agents = store.list_agents().await?;
        let mut assigned = 0;

        for queue in self.config.queues_by_priority() {
            if store.queue_depth(queue).await? == 0 {
                continue;
            }
            let Some(head) = store.peek(queue).await? else {
                continue;
            };

            let mut live: Vec<AgentInfo> = Vec::new();
            for agent in agents.iter().filter(|a| a.model == queue) {
                if store.heartbeat_fresh(&agent.id).await? {
                    live.push(agent.clone());
                }
            }
            if live.is_empty() {
                continue;
            }

            let matches = self.matcher.match_task_to_agents(&head, &live).await;
            let Some(best) = matches.first() else {
                // NoAvailableAgent is soft: leave the task and move on.
                continue;
            };

            let claimed = self
                .breakers
                .call(EXECUTION_SERVICE, store.claim_next(queue, &best.agent_id))
                .await?;
            let Some(entry) = claimed else {
                continue;
            };

            // Another scheduler may have claimed the peeked head between our
            // read and our claim; if the task we actually got does not match
            // the chosen agent, put it back and re-match next tick.
            if entry.task.id != head.id {
                let still_matches = self
                    .matcher
                    .match_task_to_agents(&entry.task, &live)
                    .await
                    .iter()
                    .any(|m| m.agent_id == best.agent_id);
                if !still_matches {
                    store.remove_processing(queue, &entry.task.id).await?;
                    let mut task = entry.task;
                    task.assigned_agent = None;
                    task.transaction_id = None;
                    store.enqueue_front(queue, task).await?;
                    continue;
                }
            }

            self.update_agent(&store, &best.agent_id, |agent| {
                agent.current_load += 1;
                if agent.current_load >= agent.max_load {
                    agent.status = AgentStatus::Overloaded;
                }
            })
            .await?;

            store
                .append_tx(TransactionLogEntry::new(
                    TxEvent::Assigned,
                    queue,
                    serde_json::json!({
                        "task_id": entry.task.id,
                        "agent_id": entry.agent_id,
                        "transaction_id": entry.transaction_id,
                    }),
                ))
                .await?;

            if let Err(e) = self.bus.send_task(&best.agent_id, &entry.task).await {
                // The claim stands; if the agent never saw the assignment,
                // the stuck-task scan recovers it after the task timeout.
                warn!(
                    task_id = %entry.task.id,
                    agent_id = %best.agent_id,
                    error = %e,
                    "Assignment publish failed"
                );
            }

            info!(task_id = %entry.task.id, agent_id = %best.agent_id, queue = %queue, "Task assigned");
            assigned += 1;
        }
        Ok(assigned)
    }

    /// Handle a `task:complete` report from an agent.
    pub async fn handle_completion(
        &self,
        queue: ModelId,
        task_id: &str,
        agent_id: &str,
        duration_ms: u64,
    ) -> HiveResult<()> {
        let store = self.pool.acquire().await?;
        let Some(entry) = store.remove_processing(queue, task_id).await? else {
            // Already timed out and reassigned, or a duplicate report.
            warn!(task_id, agent_id, "Completion for unknown in-flight task, ignoring");
            return Ok(());
        };

        // Trust the processing entry over the report for ownership.
        let owner = entry.agent_id.clone();
        self.update_agent(&store, &owner, |agent| {
            agent.current_load = agent.current_load.saturating_sub(1);
            if agent.status == AgentStatus::Overloaded && agent.current_load < agent.max_load {
                agent.status = AgentStatus::Active;
            }
            agent.performance.record(true, duration_ms);
        })
        .await?;

        let (required, preferred) = self.matcher.extract_capabilities(&entry.task);
        for cap in required.iter().chain(preferred.iter()) {
            self.matcher
                .update_capability_performance(&owner, cap, true, duration_ms)
                .await;
        }

        store
            .append_tx(TransactionLogEntry::new(
                TxEvent::Completed,
                queue,
                serde_json::json!({"task_id": task_id, "agent_id": agent_id, "duration_ms": duration_ms}),
            ))
            .await?;
        info!(task_id, agent_id, duration_ms, "Task completed");
        Ok(())
    }

    /// Handle a `task:failed` report: the task leaves the processing map and
    /// enters the failures queue for analysis.
    pub async fn handle_failure(
        &self,
        queue: ModelId,
        task_id: &str,
        agent_id: &str,
        error_text: &str,
    ) -> HiveResult<()> {
        let store = self.pool.acquire().await?;
        let Some(entry) = store.remove_processing(queue, task_id).await? else {
            warn!(task_id, agent_id, "Failure report for unknown in-flight task, ignoring");
            return Ok(());
        };

        let owner = entry.agent_id.clone();
        self.update_agent(&store, &owner, |agent| {
            agent.current_load = agent.current_load.saturating_sub(1);
            if agent.status == AgentStatus::Overloaded && agent.current_load < agent.max_load {
                agent.status = AgentStatus::Active;
            }
            agent.performance.record(false, 0);
        })
        .await?;

        let (required, preferred) = self.matcher.extract_capabilities(&entry.task);
        for cap in required.iter().chain(preferred.iter()) {
            self.matcher
                .update_capability_performance(&owner, cap, false, 0)
                .await;
        }

        store
            .push_failure(FailureRecord {
                queue,
                task: entry.task,
                agent_id: owner,
                error: error_text.to_string(),
                reported_at: Utc::now(),
            })
            .await?;
        store
            .append_tx(TransactionLogEntry::new(
                TxEvent::Failed,
                queue,
                serde_json::json!({"task_id": task_id, "agent_id": agent_id, "error": error_text}),
            ))
            .await?;
        warn!(task_id, agent_id, error = error_text, "Task failed");
        Ok(())
    }

    /// Drain a batch from the failures queue and apply the retry/dead-letter
    /// policy to each record. Returns how many records were processed.
    pub async fn process_failures(&self) -> HiveResult<usize> {
        let store = self.pool.acquire().await?;
        let records = store.take_failures(FAILURE_BATCH).await?;
        let count = records.len();

        for record in records {
            match analyze_failure(&record, self.config.max_retries) {
                FailureDisposition::Retry { queue, delay } => {
                    let mut task = record.task;
                    task.retries += 1;
                    task.assigned_agent = None;
                    task.transaction_id = None;
                    let task_id = task.id.clone();
                    store.schedule_retry(queue, task, delay).await?;
                    store
                        .append_tx(TransactionLogEntry::new(
                            TxEvent::RetryScheduled,
                            queue,
                            serde_json::json!({
                                "task_id": task_id,
                                "delay_ms": delay.as_millis() as u64,
                                "error": record.error,
                            }),
                        ))
                        .await?;
                }
                FailureDisposition::DeadLetter { reason } => {
                    self.dead_letter(&store, record.queue, record.task, reason).await?;
                }
            }
        }
        Ok(count)
    }

    /// Scan every queue's processing map for entries older than the task
    /// timeout. Stuck tasks are re-enqueued with backoff while under the
    /// retry ceiling, dead-lettered otherwise; the owning agent gets an
    /// advisory abort either way. Returns how many entries were handled.
    pub async fn scan_stuck_tasks(&self) -> HiveResult<usize> {
        let store = self.pool.acquire().await?;
        let timeout = chrono::Duration::seconds(self.config.task_timeout_secs as i64);
        let now = Utc::now();
        let mut handled = 0;

        for queue in ModelId::ALL {
            for candidate in store.processing_entries(queue).await? {
                if now - candidate.started_at < timeout {
                    continue;
                }
                // Re-check: the agent may have reported in since we listed.
                let Some(entry) = store.remove_processing(queue, &candidate.task.id).await? else {
                    continue;
                };

                let _ = self
                    .bus
                    .send_control(
                        &entry.agent_id,
                        &serde_json::json!({
                            "type": "task_timeout",
                            "task_id": entry.task.id,
                            "transaction_id": entry.transaction_id,
                        }),
                    )
                    .await;
                self.update_agent(&store, &entry.agent_id, |agent| {
                    agent.current_load = agent.current_load.saturating_sub(1);
                })
                .await?;

                let mut task = entry.task;
                task.assigned_agent = None;
                task.transaction_id = None;

                if task.retries < self.config.max_retries {
                    task.retries += 1;
                    let delay = backoff_delay(task.retries);
                    let task_id = task.id.clone();
                    let retries = task.retries;
                    store.schedule_retry(queue, task, delay).await?;
                    store
                        .append_tx(TransactionLogEntry::new(
                            TxEvent::RetryScheduled,
                            queue,
                            serde_json::json!({
                                "task_id": task_id,
                                "retries": retries,
                                "delay_ms": delay.as_millis() as u64,
                                "stuck": true,
                            }),
                        ))
                        .await?;
                } else {
                    self.dead_letter(&store, queue, task, "Max retries exceeded".to_string())
                        .await?;
                }
                handled += 1;
            }
        }
        Ok(handled)
    }

    /// Promote every due retry back onto the head of its queue.
    pub async fn process_due_retries(&self) -> HiveResult<usize> {
        let store = self.pool.acquire().await?;
        let due = store.due_retries().await?;
        let count = due.len();
        for (queue, task) in due {
            let task_id = task.id.clone();
            let retries = task.retries;
            store.enqueue_front(queue, task).await?;
            store
                .append_tx(TransactionLogEntry::new(
                    TxEvent::Enqueued,
                    queue,
                    serde_json::json!({"task_id": task_id, "retries": retries, "retry": true}),
                ))
                .await?;
        }
        Ok(count)
    }

    /// Register (or re-register) an agent: store the record, seed its
    /// heartbeat, and bind its declared capabilities.
    pub async fn register_agent(&self, agent: AgentInfo) -> HiveResult<()> {
        let store = self.pool.acquire().await?;
        let capabilities = agent.capabilities.clone();
        let agent_id = agent.id.clone();
        store.put_agent(agent).await?;
        store
            .put_heartbeat(
                &agent_id,
                std::time::Duration::from_secs(self.config.heartbeat_ttl_secs),
            )
            .await?;
        self.matcher
            .register_agent_capabilities(&agent_id, &capabilities, false, None)
            .await?;
        info!(agent_id = %agent_id, "Agent registered");
        Ok(())
    }

    /// Soft-delete an agent: the record stays for audit, but the agent no
    /// longer matches.
    pub async fn deregister_agent(&self, agent_id: &str) -> HiveResult<()> {
        let store = self.pool.acquire().await?;
        self.update_agent(&store, agent_id, |agent| {
            agent.status = AgentStatus::Deregistered;
        })
        .await?;
        info!(agent_id, "Agent deregistered");
        Ok(())
    }

    /// Mark agents with expired heartbeats unresponsive, and recover ones
    /// whose heartbeats came back. Returns how many flipped state.
    pub async fn sweep_heartbeats(&self) -> HiveResult<usize> {
        let store = self.pool.acquire().await?;
        let mut flipped = 0;
        for agent in store.list_agents().await? {
            if agent.status == AgentStatus::Deregistered {
                continue;
            }
            let fresh = store.heartbeat_fresh(&agent.id).await?;
            let next = match (fresh, agent.status) {
                (false, AgentStatus::Active | AgentStatus::Overloaded) => {
                    Some(AgentStatus::Unresponsive)
                }
                (true, AgentStatus::Unresponsive) => Some(AgentStatus::Active),
                _ => None,
            };
            if let Some(status) = next {
                warn!(agent_id = %agent.id, ?status, "Agent liveness changed");
                self.update_agent(&store, &agent.id, |a| a.status = status).await?;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    /// Apply an operator command.
    pub async fn handle_command(&self, command: OrchestratorCommand) -> HiveResult<()> {
        info!(?command, "Orchestrator command");
        match command {
            OrchestratorCommand::Pause => {
                self.paused.store(true, Ordering::Relaxed);
                Ok(())
            }
            OrchestratorCommand::Resume => {
                self.paused.store(false, Ordering::Relaxed);
                Ok(())
            }
            OrchestratorCommand::Rebalance => self.rebalance().await.map(|_| ()),
            OrchestratorCommand::HealthCheck => self.publish_health().await.map(|_| ()),
            OrchestratorCommand::ClearDlq { queue } => {
                let queues = match queue {
                    Some(q) => vec![q],
                    None => ModelId::ALL.to_vec(),
                };
                for q in queues {
                    self.purge_dead_letters(q).await?;
                }
                Ok(())
            }
        }
    }

    /// Explicitly requeue one dead letter. Retry counts are preserved —
    /// operators replay the task as it died.
    pub async fn requeue_dead_letter(&self, queue: ModelId, task_id: &str) -> HiveResult<()> {
        let store = self.pool.acquire().await?;
        let dead = store.take_dead_letter(queue, task_id).await?.ok_or_else(|| {
            HiveError::Orchestrator(format!("no dead letter '{task_id}' on {queue}"))
        })?;
        let mut task = dead.task;
        task.assigned_agent = None;
        task.transaction_id = None;
        store.enqueue(queue, task).await?;
        store
            .append_tx(TransactionLogEntry::new(
                TxEvent::Requeued,
                queue,
                serde_json::json!({"task_id": task_id}),
            ))
            .await?;
        Ok(())
    }

    /// The queue's dead letters, for operator inspection.
    pub async fn dead_letters(&self, queue: ModelId) -> HiveResult<Vec<DeadLetter>> {
        let store = self.pool.acquire().await?;
        store.dead_letters(queue).await
    }

    /// Explicitly purge a queue's DLQ. Returns how many letters were dropped.
    pub async fn purge_dead_letters(&self, queue: ModelId) -> HiveResult<usize> {
        let store = self.pool.acquire().await?;
        let purged = store.purge_dead_letters(queue).await?;
        if purged > 0 {
            store
                .append_tx(TransactionLogEntry::new(
                    TxEvent::Purged,
                    queue,
                    serde_json::json!({"count": purged}),
                ))
                .await?;
        }
        Ok(purged)
    }

    /// Parse a queue name like `queue:gpt-4o` into its model.
    pub fn parse_queue_name(name: &str) -> HiveResult<ModelId> {
        let model = name
            .strip_prefix("queue:")
            .ok_or_else(|| HiveError::Config(format!("not a queue name: '{name}'")))?;
        ModelId::from_str(model)
    }

    pub(crate) async fn dead_letter(
        &self,
        store: &PooledStore,
        queue: ModelId,
        task: Task,
        reason: String,
    ) -> HiveResult<()> {
        let task_id = task.id.clone();
        store
            .push_dead_letter(DeadLetter {
                queue,
                task,
                reason: reason.clone(),
                failed_at: Utc::now(),
            })
            .await?;
        store
            .append_tx(TransactionLogEntry::new(
                TxEvent::DeadLettered,
                queue,
                serde_json::json!({"task_id": task_id, "reason": reason}),
            ))
            .await?;
        error!(task_id = %task_id, queue = %queue, reason = %reason, "Task dead-lettered");
        Ok(())
    }

    pub(crate) async fn update_agent<F>(
        &self,
        store: &PooledStore,
        agent_id: &str,
        mutate: F,
    ) -> HiveResult<()>
    where
        F: FnOnce(&mut AgentInfo),
    {
        let Some(mut agent) = store.get_agent(agent_id).await? else {
            warn!(agent_id, "Update for unknown agent, ignoring");
            return Ok(());
        };
        mutate(&mut agent);
        store.put_agent(agent).await
    }
}
