//! The resilience layer: circuit breakers, signed/encrypted messaging, and
//! heartbeats.
//!
//! Everything here exists to keep the orchestrator alive under partial
//! failure — a failing dependency trips its breaker instead of being
//! hammered, messages between agents are authenticated and encrypted, and
//! agents that stop heartbeating drop out of matching until they recover.
//!
//! # Main types
//!
//! - [`CircuitBreaker`] / [`BreakerRegistry`] — Per-service failure
//!   isolation state machines.
//! - [`MessageCipher`] / [`SecureEnvelope`] — AEAD payload encryption plus a
//!   keyed-hash signature.
//! - [`MessageBus`] — Typed pub/sub wrapper delivering sealed envelopes.
//! - [`HeartbeatPublisher`] — Agent-side heartbeat loop.

/// Circuit breaker state machines.
pub mod breaker;
/// Pub/sub messaging over sealed envelopes.
pub mod bus;
/// Payload encryption and signing.
pub mod crypto;
/// Heartbeat publishing and liveness checks.
pub mod heartbeat;

pub use breaker::{BreakerPolicy, BreakerRegistry, BreakerState, CircuitBreaker};
pub use bus::MessageBus;
pub use crypto::{MessageCipher, SecureEnvelope};
pub use heartbeat::HeartbeatPublisher;
