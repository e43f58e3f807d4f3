//! The queue orchestrator: task lifecycle ownership across all per-model
//! queues.
//!
//! A task enters a queue chosen by the router. The assignment tick scans
//! queues in priority order, asks the capability matcher for the best live
//! agent, atomically moves the task into the processing map, and publishes
//! the assignment over the secure bus. Agents report completion and failure
//! over the same bus; the orchestrator feeds outcomes back into agent and
//! capability scores and either completes, retries with exponential backoff,
//! or dead-letters the task. Stuck work is detected by scanning processing
//! entries against the task timeout.
//!
//! # Main types
//!
//! - [`Orchestrator`] — The engine; one instance per process.
//! - [`FailureDisposition`] — Retry-or-dead-letter analysis outcome.
//! - [`HealthSnapshot`] — The operator-visible health surface.
//! - [`QueuePressure`] — Queue balancing classification.

/// Queue balancing.
pub mod balance;
/// Event loop and pub/sub dispatch.
pub mod events;
/// Failure analysis and retry policy.
pub mod failure;
/// Health snapshot assembly and publishing.
pub mod health;
/// The engine.
pub mod orchestrator;
/// Bus-backed capability probing.
pub mod probe;

pub use balance::{classify, QueuePressure};
pub use failure::{analyze_failure, backoff_delay, determine_retry_queue, FailureDisposition};
pub use health::{AgentHealth, HealthSnapshot, OrchestratorHealth, QueueHealth};
pub use orchestrator::Orchestrator;
pub use probe::BusProbe;
