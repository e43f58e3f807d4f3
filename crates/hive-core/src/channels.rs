//! Pub/sub channel names.
//!
//! Agents and the orchestrator communicate only over these channels; keeping
//! the names here prevents drift between publishers and subscribers.

/// Agents announce themselves here with an [`crate::AgentInfo`] payload.
pub const AGENT_REGISTER: &str = "agent:register";
/// Agents publish load/status updates here.
pub const AGENT_STATUS: &str = "agent:status";
/// Agents publish out-of-band errors here.
pub const AGENT_ERROR: &str = "agent:error";
/// Agents report successful task completion here.
pub const TASK_COMPLETE: &str = "task:complete";
/// Agents report task failure here.
pub const TASK_FAILED: &str = "task:failed";
/// Operator commands for the orchestrator.
pub const ORCHESTRATOR_COMMAND: &str = "orchestrator:command";
/// Periodic health snapshots.
pub const ORCHESTRATOR_HEALTH: &str = "orchestrator:health";
/// Broadcast channel every agent subscribes to.
pub const AGENT_BROADCAST: &str = "agent:broadcast";

/// Per-agent task-assignment channel.
pub fn agent_task(agent_id: &str) -> String {
    format!("agent:{agent_id}:task")
}

/// Per-agent control channel (e.g. `task_timeout` aborts).
pub fn agent_control(agent_id: &str) -> String {
    format!("agent:{agent_id}:control")
}

/// Per-agent point-to-point message channel.
pub fn agent_message(agent_id: &str) -> String {
    format!("agent:{agent_id}:message")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_agent_channels() {
        assert_eq!(agent_task("a-1"), "agent:a-1:task");
        assert_eq!(agent_control("a-1"), "agent:a-1:control");
        assert_eq!(agent_message("a-1"), "agent:a-1:message");
    }
}
