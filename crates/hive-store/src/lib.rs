//! The Shared Durable Store contract and its reference implementation.
//!
//! The orchestrator treats the store as the single source of truth for queue
//! state. This crate defines the logical schema as the [`QueueStore`] trait
//! — ordered per-model queues, processing maps, dead-letter and failures
//! queues, a delayed-retry queue, the agent registry hash, TTL'd heartbeat
//! keys, capped per-queue transaction logs, and pub/sub channels — plus:
//!
//! - [`MemoryStore`] — in-process reference implementation whose
//!   `claim_next` performs the pop-from-queue + insert-into-processing pair
//!   under a single lock acquisition, the atomicity the orchestrator relies
//!   on.
//! - [`StorePool`] — a bounded connection pool; callers wait for a free
//!   slot instead of opening unbounded connections.

/// In-process reference store.
pub mod memory;
/// Bounded connection pooling.
pub mod pool;
/// The `QueueStore` trait.
pub mod store;
/// Records stored alongside tasks: processing entries, dead letters,
/// failures, transaction log entries.
pub mod types;

pub use memory::MemoryStore;
pub use pool::{MemoryConnector, PooledStore, StoreConnector, StorePool};
pub use store::QueueStore;
pub use types::{DeadLetter, FailureRecord, ProcessingEntry, TransactionLogEntry, TxEvent};
