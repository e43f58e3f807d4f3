use hive_core::{ModelId, ModelTier, Task, TaskType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::complexity::{ComplexityAnalyzer, ComplexityScore, ComplexityTier};

/// A file-size factor above this forces the largest-context model.
const LARGE_FILE_FACTOR: f64 = 0.8;

/// Input/output token budget for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Input token allowance.
    pub input: u32,
    /// Output token allowance.
    pub output: u32,
}

impl TokenBudget {
    /// The static per-tier budget table.
    pub fn for_tier(tier: ComplexityTier) -> Self {
        match tier {
            ComplexityTier::Simple => Self {
                input: 500,
                output: 300,
            },
            ComplexityTier::Moderate => Self {
                input: 1500,
                output: 1000,
            },
            ComplexityTier::Complex => Self {
                input: 3000,
                output: 2000,
            },
        }
    }
}

/// The routing output: execution target, budget, and the trace of which
/// rules fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    /// The selected model.
    pub model: ModelId,
    /// The task type the router resolved (explicit or inferred).
    pub task_type: TaskType,
    /// The store queue the task should enter.
    pub queue_name: String,
    /// Token allowance for the run.
    pub budget: TokenBudget,
    /// Scheduling priority, 0–10.
    pub priority: u8,
    /// Where a failed run is retried.
    pub fallback_model: ModelId,
    /// The complexity classification.
    pub complexity: ComplexityTier,
    /// Human-readable trace of which rule fired at each step.
    pub reasoning: Vec<String>,
}

/// Ordered candidate models per task type. The list order is the preference
/// order within a tier subset and for fallbacks.
fn candidate_models(task_type: TaskType) -> &'static [ModelId] {
    match task_type {
        TaskType::CodeGeneration => &[
            ModelId::DeepseekCoder,
            ModelId::ClaudeSonnet,
            ModelId::Gpt4o,
            ModelId::ClaudeOpus,
        ],
        TaskType::BugFix => &[
            ModelId::DeepseekCoder,
            ModelId::ClaudeHaiku,
            ModelId::ClaudeSonnet,
            ModelId::Gpt4o,
        ],
        TaskType::Refactor => &[
            ModelId::ClaudeSonnet,
            ModelId::DeepseekCoder,
            ModelId::ClaudeOpus,
        ],
        TaskType::Review => &[ModelId::ClaudeSonnet, ModelId::Gpt4o, ModelId::ClaudeOpus],
        TaskType::Documentation => &[
            ModelId::ClaudeHaiku,
            ModelId::Gpt4oMini,
            ModelId::ClaudeSonnet,
        ],
        TaskType::Testing => &[
            ModelId::DeepseekCoder,
            ModelId::ClaudeHaiku,
            ModelId::ClaudeSonnet,
        ],
        TaskType::Security => &[ModelId::ClaudeOpus],
        TaskType::Analysis => &[ModelId::Gpt4o, ModelId::ClaudeSonnet, ModelId::Gemini15Pro],
        TaskType::General => &[
            ModelId::Gpt4oMini,
            ModelId::ClaudeHaiku,
            ModelId::ClaudeSonnet,
            ModelId::Gpt4o,
        ],
    }
}

/// The model tier a complexity tier narrows the candidates to.
fn preferred_model_tier(tier: ComplexityTier) -> ModelTier {
    match tier {
        ComplexityTier::Complex => ModelTier::Flagship,
        ComplexityTier::Moderate => ModelTier::Mid,
        ComplexityTier::Simple => ModelTier::Budget,
    }
}

/// Classifies tasks and picks a cost/quality-appropriate execution target.
pub struct TaskRouter {
    analyzer: ComplexityAnalyzer,
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRouter {
    /// Create a router.
    pub fn new() -> Self {
        Self {
            analyzer: ComplexityAnalyzer::new(),
        }
    }

    /// Route a task, reading the referenced file from disk when present.
    /// An unreadable file is scored as if absent (and noted in the trace).
    pub fn route(&self, task: &Task) -> RouteDecision {
        let source = task.file.as_ref().and_then(|path| {
            match std::fs::read_to_string(path) {
                Ok(contents) => Some(contents),
                Err(_) => None,
            }
        });
        self.route_with_source(task, source.as_deref())
    }

    /// Route a task with the referenced file's contents supplied by the
    /// caller. Pure: same inputs, same decision.
    pub fn route_with_source(&self, task: &Task, source: Option<&str>) -> RouteDecision {
        let mut reasoning = Vec::new();

        let task_type = match task.task_type {
            Some(t) => t,
            None => {
                let inferred = self.analyzer.infer_task_type(&task.prompt);
                reasoning.push(format!("no task type set; inferred '{inferred}' from prompt"));
                inferred
            }
        };
        if task.file.is_some() && source.is_none() {
            reasoning.push("referenced file unavailable; scored without it".to_string());
        }

        let score = self.analyzer.score(task, source);
        reasoning.push(format!(
            "complexity {:.2} (file {:.2}, keywords {:.2}, type {:.2}, structure {:.2}) → {}",
            score.total, score.file_factor, score.keyword_factor, score.type_factor,
            score.structure_factor, score.tier
        ));

        let candidates = candidate_models(task_type);
        let model = self.select_model(task_type, candidates, &score, &mut reasoning);
        let fallback_model = fallback_for(model, candidates);
        let budget = TokenBudget::for_tier(score.tier);
        let priority = priority_for(score.tier, task_type);

        reasoning.push(format!(
            "budget {{in:{}, out:{}}}, priority {priority}, fallback {fallback_model}",
            budget.input, budget.output
        ));
        debug!(task_id = %task.id, model = %model, tier = %score.tier, "Task routed");

        RouteDecision {
            model,
            task_type,
            queue_name: model.queue_name(),
            budget,
            priority,
            fallback_model,
            complexity: score.tier,
            reasoning,
        }
    }

    fn select_model(
        &self,
        task_type: TaskType,
        candidates: &[ModelId],
        score: &ComplexityScore,
        reasoning: &mut Vec<String>,
    ) -> ModelId {
        // Security work always gets the highest-quality model.
        if task_type == TaskType::Security {
            reasoning.push("security task: forcing highest-quality model".to_string());
            return ModelId::ClaudeOpus;
        }

        // Very large files need the largest context window, tier be damned.
        if score.file_factor > LARGE_FILE_FACTOR {
            let model = ModelId::largest_context();
            reasoning.push(format!(
                "file factor {:.2} > {LARGE_FILE_FACTOR}: forcing large-context model {model}",
                score.file_factor
            ));
            return model;
        }

        // Narrow the candidate list to the tier the complexity calls for.
        let wanted = preferred_model_tier(score.tier);
        if let Some(model) = candidates.iter().copied().find(|m| m.tier() == wanted) {
            reasoning.push(format!(
                "picked {model} from the {task_type} candidates ({wanted:?} tier)"
            ));
            return model;
        }

        // No candidate in the preferred tier; fall back to list order.
        let model = candidates.first().copied().unwrap_or(ModelId::Gpt4oMini);
        reasoning.push(format!(
            "no {wanted:?}-tier candidate for {task_type}; using first candidate {model}"
        ));
        model
    }
}

/// The next candidate after the chosen model, or the static fallback graph
/// when the chosen model ends the list.
fn fallback_for(model: ModelId, candidates: &[ModelId]) -> ModelId {
    candidates
        .iter()
        .position(|m| *m == model)
        .and_then(|i| candidates.get(i + 1))
        .copied()
        .unwrap_or_else(|| model.fallback())
}

fn priority_for(tier: ComplexityTier, task_type: TaskType) -> u8 {
    let base = match tier {
        ComplexityTier::Complex => 8,
        ComplexityTier::Moderate => 5,
        ComplexityTier::Simple => 3,
    };
    if task_type == TaskType::Security {
        (base + 2).min(10)
    } else {
        base
    }
}
