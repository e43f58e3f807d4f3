//! Capability registry and task↔agent matching.
//!
//! Capabilities form a fixed catalog; agents bind to them with a proficiency
//! score and rolling per-capability performance. The matcher extracts a
//! task's required and preferred capabilities, scores every agent against
//! them, and ranks the survivors. Required capabilities are mandatory — an
//! agent missing any of them is not a candidate at all.
//!
//! # Main types
//!
//! - [`CapabilityDef`] — A catalog entry (name, category, skills, providers).
//! - [`AgentCapability`] — A per-(agent, capability) proficiency binding.
//! - [`CapabilityMatcher`] — The coordinator owning catalog and bindings.
//! - [`CapabilityProbe`] — The seam used for capability auto-discovery.

/// Capability definitions and bindings.
pub mod capability;
/// Scoring, ranking, and extraction.
pub mod matcher;
/// Discovery probing.
pub mod probe;

pub use capability::{AgentCapability, CapabilityDef, CapabilityPerformance};
pub use matcher::{AgentMatch, CapabilityMatcher, MatcherConfig};
pub use probe::{probe_prompt, CapabilityProbe, StaticProbe};
