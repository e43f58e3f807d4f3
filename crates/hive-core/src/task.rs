use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{HiveError, HiveResult};

/// Broad category of work a task represents.
///
/// Drives both the router's candidate-model tables and the registry's
/// type→capability inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Writing new code.
    CodeGeneration,
    /// Diagnosing and fixing defects.
    BugFix,
    /// Restructuring existing code.
    Refactor,
    /// Reviewing code or documents.
    Review,
    /// Writing documentation.
    Documentation,
    /// Writing or extending tests.
    Testing,
    /// Security-sensitive analysis; always routed to the highest-quality model.
    Security,
    /// Open-ended analysis over data or code.
    Analysis,
    /// Anything else.
    General,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::CodeGeneration => "code_generation",
            TaskType::BugFix => "bug_fix",
            TaskType::Refactor => "refactor",
            TaskType::Review => "review",
            TaskType::Documentation => "documentation",
            TaskType::Testing => "testing",
            TaskType::Security => "security",
            TaskType::Analysis => "analysis",
            TaskType::General => "general",
        };
        f.write_str(s)
    }
}

/// A unit of work flowing through the per-model queues.
///
/// Core fields are immutable once created; `retries`, `assigned_agent`, and
/// `transaction_id` mutate as the task moves through its lifecycle. A task id
/// is unique for the task's lifetime — re-queued copies keep the id and
/// increment `retries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Caller-assigned unique identifier.
    pub id: String,
    /// The instruction for the worker.
    pub prompt: String,
    /// Optional path of a file the task operates on.
    #[serde(default)]
    pub file: Option<String>,
    /// Optional named action for workers with action dispatch.
    #[serde(default)]
    pub action: Option<String>,
    /// Task category; inferred by the router when unset.
    #[serde(default, rename = "type")]
    pub task_type: Option<TaskType>,
    /// Capabilities the assigned agent must provide.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Capabilities that improve the match but are not mandatory.
    #[serde(default)]
    pub preferred_capabilities: Vec<String>,
    /// Scheduling priority, 0 (lowest) to 10.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Times this task has been re-enqueued after a failure or timeout.
    #[serde(default)]
    pub retries: u32,
    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// The agent currently (or last) assigned, if any.
    #[serde(default)]
    pub assigned_agent: Option<String>,
    /// Transaction id of the current assignment, if any.
    #[serde(default)]
    pub transaction_id: Option<Uuid>,
}

fn default_priority() -> u8 {
    5
}

impl Task {
    /// Create a task with the given id and prompt.
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            file: None,
            action: None,
            task_type: None,
            required_capabilities: Vec::new(),
            preferred_capabilities: Vec::new(),
            priority: default_priority(),
            retries: 0,
            created_at: Utc::now(),
            assigned_agent: None,
            transaction_id: None,
        }
    }

    /// Set the task type.
    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    /// Set the file this task operates on.
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Set the named action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Set the required capabilities.
    pub fn with_required_capabilities(mut self, caps: Vec<String>) -> Self {
        self.required_capabilities = caps;
        self
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Validate the task for enqueueing.
    ///
    /// A task must carry an id, a prompt, and at least one of
    /// {file, action, type}; anything else is `InvalidTask` and is never
    /// retried.
    pub fn validate(&self) -> HiveResult<()> {
        if self.id.trim().is_empty() {
            return Err(HiveError::InvalidTask("task has no id".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(HiveError::InvalidTask(format!(
                "task '{}' has no prompt",
                self.id
            )));
        }
        if self.file.is_none() && self.action.is_none() && self.task_type.is_none() {
            return Err(HiveError::InvalidTask(format!(
                "task '{}' has none of file, action, or type",
                self.id
            )));
        }
        Ok(())
    }
}
