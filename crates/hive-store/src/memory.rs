use async_trait::async_trait;
use chrono::Utc;
use hive_core::{AgentInfo, HiveResult, ModelId, Task};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::QueueStore;
use crate::types::{DeadLetter, FailureRecord, ProcessingEntry, TransactionLogEntry};

/// Transaction log retention per queue.
const TX_LOG_CAP: usize = 10_000;

/// Broadcast channel capacity. Slow subscribers that lag past this see a
/// `Lagged` error rather than blocking publishers.
const CHANNEL_CAPACITY: usize = 256;

struct RetryEntry {
    due: Instant,
    queue: ModelId,
    task: Task,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<ModelId, VecDeque<Task>>,
    processing: HashMap<ModelId, HashMap<String, ProcessingEntry>>,
    dead_letters: HashMap<ModelId, Vec<DeadLetter>>,
    failures: VecDeque<FailureRecord>,
    retries: Vec<RetryEntry>,
    agents: HashMap<String, AgentInfo>,
    heartbeats: HashMap<String, Instant>,
    tx_logs: HashMap<ModelId, VecDeque<TransactionLogEntry>>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

/// In-process store implementing the full [`QueueStore`] schema.
///
/// All state sits behind one `parking_lot::Mutex`, so every multi-step
/// transition (notably the pop+insert inside `claim_next`) is atomic with
/// respect to every other store operation. Critical sections never await.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(inner: &mut Inner, channel: &str) -> broadcast::Sender<String> {
        inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, queue: ModelId, task: Task) -> HiveResult<()> {
        self.inner
            .lock()
            .queues
            .entry(queue)
            .or_default()
            .push_back(task);
        Ok(())
    }

    async fn enqueue_front(&self, queue: ModelId, task: Task) -> HiveResult<()> {
        self.inner
            .lock()
            .queues
            .entry(queue)
            .or_default()
            .push_front(task);
        Ok(())
    }

    async fn queue_depth(&self, queue: ModelId) -> HiveResult<usize> {
        Ok(self
            .inner
            .lock()
            .queues
            .get(&queue)
            .map_or(0, VecDeque::len))
    }

    async fn peek(&self, queue: ModelId) -> HiveResult<Option<Task>> {
        Ok(self
            .inner
            .lock()
            .queues
            .get(&queue)
            .and_then(|q| q.front().cloned()))
    }

    async fn take_pending(&self, queue: ModelId, max: usize) -> HiveResult<Vec<Task>> {
        let mut inner = self.inner.lock();
        let Some(q) = inner.queues.get_mut(&queue) else {
            return Ok(Vec::new());
        };
        let take = max.min(q.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(task) = q.pop_back() {
                out.push(task);
            }
        }
        Ok(out)
    }

    async fn claim_next(
        &self,
        queue: ModelId,
        agent_id: &str,
    ) -> HiveResult<Option<ProcessingEntry>> {
        let mut inner = self.inner.lock();
        // Pop and insert under the same lock acquisition; no observer can
        // see the task in neither (or both) places.
        let Some(mut task) = inner.queues.get_mut(&queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        let transaction_id = Uuid::new_v4();
        task.assigned_agent = Some(agent_id.to_string());
        task.transaction_id = Some(transaction_id);
        let entry = ProcessingEntry {
            task,
            agent_id: agent_id.to_string(),
            started_at: Utc::now(),
            transaction_id,
        };
        inner
            .processing
            .entry(queue)
            .or_default()
            .insert(entry.task.id.clone(), entry.clone());
        Ok(Some(entry))
    }

    async fn processing_entries(&self, queue: ModelId) -> HiveResult<Vec<ProcessingEntry>> {
        Ok(self
            .inner
            .lock()
            .processing
            .get(&queue)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_processing(
        &self,
        queue: ModelId,
        task_id: &str,
    ) -> HiveResult<Option<ProcessingEntry>> {
        Ok(self
            .inner
            .lock()
            .processing
            .get_mut(&queue)
            .and_then(|m| m.remove(task_id)))
    }

    async fn processing_len(&self, queue: ModelId) -> HiveResult<usize> {
        Ok(self
            .inner
            .lock()
            .processing
            .get(&queue)
            .map_or(0, HashMap::len))
    }

    async fn push_dead_letter(&self, dead_letter: DeadLetter) -> HiveResult<()> {
        self.inner
            .lock()
            .dead_letters
            .entry(dead_letter.queue)
            .or_default()
            .push(dead_letter);
        Ok(())
    }

    async fn dead_letters(&self, queue: ModelId) -> HiveResult<Vec<DeadLetter>> {
        Ok(self
            .inner
            .lock()
            .dead_letters
            .get(&queue)
            .cloned()
            .unwrap_or_default())
    }

    async fn take_dead_letter(
        &self,
        queue: ModelId,
        task_id: &str,
    ) -> HiveResult<Option<DeadLetter>> {
        let mut inner = self.inner.lock();
        let Some(list) = inner.dead_letters.get_mut(&queue) else {
            return Ok(None);
        };
        let pos = list.iter().position(|dl| dl.task.id == task_id);
        Ok(pos.map(|i| list.remove(i)))
    }

    async fn purge_dead_letters(&self, queue: ModelId) -> HiveResult<usize> {
        let mut inner = self.inner.lock();
        Ok(inner
            .dead_letters
            .remove(&queue)
            .map_or(0, |list| list.len()))
    }

    async fn push_failure(&self, record: FailureRecord) -> HiveResult<()> {
        self.inner.lock().failures.push_back(record);
        Ok(())
    }

    async fn take_failures(&self, max: usize) -> HiveResult<Vec<FailureRecord>> {
        let mut inner = self.inner.lock();
        let take = max.min(inner.failures.len());
        Ok(inner.failures.drain(..take).collect())
    }

    async fn schedule_retry(&self, queue: ModelId, task: Task, delay: Duration) -> HiveResult<()> {
        self.inner.lock().retries.push(RetryEntry {
            due: Instant::now() + delay,
            queue,
            task,
        });
        Ok(())
    }

    async fn due_retries(&self) -> HiveResult<Vec<(ModelId, Task)>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut due = Vec::new();
        let mut remaining = Vec::with_capacity(inner.retries.len());
        for entry in inner.retries.drain(..) {
            if entry.due <= now {
                due.push((entry.queue, entry.task));
            } else {
                remaining.push(entry);
            }
        }
        inner.retries = remaining;
        Ok(due)
    }

    async fn retry_backlog(&self) -> HiveResult<usize> {
        Ok(self.inner.lock().retries.len())
    }

    async fn put_agent(&self, agent: AgentInfo) -> HiveResult<()> {
        self.inner.lock().agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> HiveResult<Option<AgentInfo>> {
        Ok(self.inner.lock().agents.get(agent_id).cloned())
    }

    async fn list_agents(&self) -> HiveResult<Vec<AgentInfo>> {
        Ok(self.inner.lock().agents.values().cloned().collect())
    }

    async fn put_heartbeat(&self, agent_id: &str, ttl: Duration) -> HiveResult<()> {
        self.inner
            .lock()
            .heartbeats
            .insert(agent_id.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn heartbeat_fresh(&self, agent_id: &str) -> HiveResult<bool> {
        Ok(self
            .inner
            .lock()
            .heartbeats
            .get(agent_id)
            .is_some_and(|expiry| *expiry > Instant::now()))
    }

    async fn append_tx(&self, entry: TransactionLogEntry) -> HiveResult<()> {
        let mut inner = self.inner.lock();
        let log = inner.tx_logs.entry(entry.queue).or_default();
        log.push_back(entry);
        while log.len() > TX_LOG_CAP {
            log.pop_front();
        }
        Ok(())
    }

    async fn tx_log(&self, queue: ModelId) -> HiveResult<Vec<TransactionLogEntry>> {
        Ok(self
            .inner
            .lock()
            .tx_logs
            .get(&queue)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: String) -> HiveResult<usize> {
        let sender = {
            let mut inner = self.inner.lock();
            Self::sender_for(&mut inner, channel)
        };
        // A send with no receivers is not an error; the message just has
        // nowhere to go yet.
        Ok(sender.send(payload).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> HiveResult<broadcast::Receiver<String>> {
        let mut inner = self.inner.lock();
        Ok(Self::sender_for(&mut inner, channel).subscribe())
    }
}
