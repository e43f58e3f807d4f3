use async_trait::async_trait;
use hive_core::{HiveError, HiveResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::memory::MemoryStore;
use crate::store::QueueStore;

/// Opens store connections for a [`StorePool`].
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Open one connection.
    async fn connect(&self) -> HiveResult<Arc<dyn QueueStore>>;
}

/// Connector for the in-process [`MemoryStore`]: every "connection" is a
/// handle to the same store.
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    /// Wrap an existing store.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self) -> HiveResult<Arc<dyn QueueStore>> {
        Ok(self.store.clone())
    }
}

/// A bounded pool of store connections.
///
/// At most `max_connections` are open at once. When the pool is exhausted,
/// `acquire` waits on the semaphore for a slot instead of opening more —
/// unbounded connection growth is exactly what the pool exists to prevent.
pub struct StorePool {
    connector: Arc<dyn StoreConnector>,
    semaphore: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Arc<dyn QueueStore>>>>,
}

impl StorePool {
    /// Create a pool that opens connections lazily through `connector`.
    pub fn new(connector: Arc<dyn StoreConnector>, max_connections: usize) -> Self {
        Self {
            connector,
            semaphore: Arc::new(Semaphore::new(max_connections.max(1))),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Check out a connection, waiting for a free slot when all are in use.
    pub async fn acquire(&self) -> HiveResult<PooledStore> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HiveError::StoreUnavailable("connection pool closed".into()))?;

        let existing = self.idle.lock().pop();
        let store = match existing {
            Some(store) => store,
            None => {
                debug!("Store pool: opening new connection");
                self.connector.connect().await?
            }
        };

        Ok(PooledStore {
            store: Some(store),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A checked-out connection. Returns itself to the pool on drop.
pub struct PooledStore {
    store: Option<Arc<dyn QueueStore>>,
    idle: Arc<Mutex<Vec<Arc<dyn QueueStore>>>>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledStore {
    type Target = Arc<dyn QueueStore>;

    // The connection is Some until drop by construction.
    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.store.as_ref().expect("connection present until drop")
    }
}

impl Drop for PooledStore {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            self.idle.lock().push(store);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hive_core::{ModelId, Task, TaskType};
    use std::time::Duration;

    fn pool_of(max: usize) -> StorePool {
        StorePool::new(Arc::new(MemoryConnector::default()), max)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = pool_of(2);
        assert_eq!(pool.available(), 2);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 1);
        drop(conn);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_pool_blocks_until_release() {
        let pool = Arc::new(pool_of(1));
        let held = pool.acquire().await.unwrap();

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.acquire().await.map(|_| ()) });

        // The waiter cannot get a slot while we hold the only one.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_connections_share_memory_store() {
        let pool = pool_of(2);
        let a = pool.acquire().await.unwrap();
        a.enqueue(
            ModelId::Gpt4o,
            Task::new("t-1", "p").with_type(TaskType::General),
        )
        .await
        .unwrap();
        drop(a);

        let b = pool.acquire().await.unwrap();
        assert_eq!(b.queue_depth(ModelId::Gpt4o).await.unwrap(), 1);
    }
}
