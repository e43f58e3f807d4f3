use hive_core::{HiveResult, ModelId};
use hive_store::{QueueStore, TransactionLogEntry, TxEvent};
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::orchestrator::Orchestrator;

/// Depth above which a queue with too few agents counts as overloaded.
const OVERLOADED_DEPTH: usize = 50;
/// An overloaded queue has fewer available agents than this.
const OVERLOADED_AGENTS: usize = 2;
/// Depth below which a queue with spare agents counts as underutilized.
const UNDERUTILIZED_DEPTH: usize = 5;
/// An underutilized queue has more available agents than this.
const UNDERUTILIZED_AGENTS: usize = 3;
/// Upper bound on tasks moved per queue per balancing pass.
const MIGRATION_CAP: usize = 20;

/// Pressure classification for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePressure {
    /// Deep queue, starved of agents.
    Overloaded,
    /// Shallow queue with spare agents.
    Underutilized,
    /// Neither.
    Balanced,
}

/// Classify a queue from its depth and available-agent count.
pub fn classify(depth: usize, available_agents: usize) -> QueuePressure {
    if depth > OVERLOADED_DEPTH && available_agents < OVERLOADED_AGENTS {
        QueuePressure::Overloaded
    } else if depth < UNDERUTILIZED_DEPTH && available_agents > UNDERUTILIZED_AGENTS {
        QueuePressure::Underutilized
    } else {
        QueuePressure::Balanced
    }
}

impl Orchestrator {
    /// One balancing pass: migrate pending, unassigned tasks from overloaded
    /// queues toward underutilized queues of the same tier. Tasks already
    /// assigned are never touched. Returns how many tasks moved.
    pub async fn rebalance(&self) -> HiveResult<usize> {
        let store = self.pool.acquire().await?;
        let agents = store.list_agents().await?;

        let mut depths: HashMap<ModelId, usize> = HashMap::new();
        let mut pressures: HashMap<ModelId, QueuePressure> = HashMap::new();
        for queue in ModelId::ALL {
            let depth = store.queue_depth(queue).await?;
            let mut available = 0;
            for agent in agents.iter().filter(|a| a.model == queue && a.available()) {
                if store.heartbeat_fresh(&agent.id).await? {
                    available += 1;
                }
            }
            depths.insert(queue, depth);
            pressures.insert(queue, classify(depth, available));
        }

        let underutilized: HashSet<ModelId> = pressures
            .iter()
            .filter(|(_, p)| **p == QueuePressure::Underutilized)
            .map(|(q, _)| *q)
            .collect();

        let mut migrated = 0;
        for (source, pressure) in &pressures {
            if *pressure != QueuePressure::Overloaded {
                continue;
            }
            // Only same-tier queues are capability-equivalent targets.
            let Some(target) = source
                .equivalents()
                .into_iter()
                .find(|m| underutilized.contains(m))
            else {
                continue;
            };

            let depth = depths.get(source).copied().unwrap_or(0);
            let batch = depth.saturating_sub(OVERLOADED_DEPTH).clamp(1, MIGRATION_CAP);
            let tasks = store.take_pending(*source, batch).await?;
            let moved = tasks.len();
            for task in tasks {
                let task_id = task.id.clone();
                store.enqueue(target, task).await?;
                store
                    .append_tx(TransactionLogEntry::new(
                        TxEvent::Migrated,
                        *source,
                        serde_json::json!({"task_id": task_id, "target": target.as_str()}),
                    ))
                    .await?;
            }
            if moved > 0 {
                info!(source = %source, target = %target, moved, "Queue rebalanced");
            }
            migrated += moved;
        }
        Ok(migrated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(classify(51, 1), QueuePressure::Overloaded);
        assert_eq!(classify(51, 2), QueuePressure::Balanced);
        assert_eq!(classify(50, 0), QueuePressure::Balanced);
        assert_eq!(classify(4, 4), QueuePressure::Underutilized);
        assert_eq!(classify(4, 3), QueuePressure::Balanced);
        assert_eq!(classify(5, 10), QueuePressure::Balanced);
        assert_eq!(classify(0, 0), QueuePressure::Balanced);
    }
}
