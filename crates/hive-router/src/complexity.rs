use hive_core::{Task, TaskType};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Weight of the (capped) file size factor.
const FILE_WEIGHT: f64 = 0.2;
/// Weight of the prompt keyword factor.
const KEYWORD_WEIGHT: f64 = 0.4;
/// Weight of the task-type factor.
const TYPE_WEIGHT: f64 = 0.3;
/// Weight of the code-structure factor.
const STRUCTURE_WEIGHT: f64 = 0.1;

/// Classification thresholds on the total score.
const COMPLEX_THRESHOLD: f64 = 0.7;
const MODERATE_THRESHOLD: f64 = 0.4;

/// Difficulty classification driving model and budget choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    /// Routine work; low-cost models.
    Simple,
    /// Substantial work; mid-tier models.
    Moderate,
    /// Hard work; flagship models.
    Complex,
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComplexityTier::Simple => "simple",
            ComplexityTier::Moderate => "moderate",
            ComplexityTier::Complex => "complex",
        };
        f.write_str(s)
    }
}

/// The factor breakdown behind a classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityScore {
    /// Weighted total in [0,1].
    pub total: f64,
    /// Capped file-size factor in [0,1].
    pub file_factor: f64,
    /// Prompt keyword factor in [0,1].
    pub keyword_factor: f64,
    /// Task-type factor in [0,1].
    pub type_factor: f64,
    /// Code-structure factor in [0,1].
    pub structure_factor: f64,
    /// The resulting tier.
    pub tier: ComplexityTier,
}

struct KeywordBucket {
    patterns: Vec<Regex>,
    score: f64,
}

/// Scores tasks on a weighted sum of file, keyword, type, and structure
/// signals.
pub struct ComplexityAnalyzer {
    buckets: Vec<KeywordBucket>,
    inference: Vec<(Regex, TaskType)>,
    fn_pattern: Regex,
    class_pattern: Regex,
    branch_pattern: Regex,
    loop_pattern: Regex,
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityAnalyzer {
    /// Build the analyzer, compiling all pattern tables once.
    // The structure-count patterns are literals; compiling them cannot fail.
    #[allow(clippy::unwrap_used)]
    pub fn new() -> Self {
        let bucket = |patterns: &[&str], score: f64| KeywordBucket {
            patterns: patterns.iter().filter_map(|p| Regex::new(p).ok()).collect(),
            score,
        };
        Self {
            buckets: vec![
                bucket(
                    &[
                        r"(?i)\barchitect\w*\b",
                        r"(?i)\bdesign\s+(a\s+)?system\b",
                        r"(?i)\bdistributed\b",
                        r"(?i)\bconcurren\w*\b",
                        r"(?i)\bmicroservice",
                        r"(?i)\bmigrat\w*\b",
                        r"(?i)\boverhaul\b",
                        r"(?i)\bentire\b",
                        r"(?i)\boptimi[sz]e\s+performance\b",
                    ],
                    1.0,
                ),
                bucket(
                    &[
                        r"(?i)\bimplement\b",
                        r"(?i)\bintegrat\w*\b",
                        r"(?i)\brefactor\w*\b",
                        r"(?i)\bapi\b",
                        r"(?i)\bdatabase\b",
                        r"(?i)\basync\b",
                    ],
                    0.5,
                ),
                bucket(
                    &[
                        r"(?i)\bfix\b",
                        r"(?i)\bbug\b",
                        r"(?i)\btypo\b",
                        r"(?i)\brename\b",
                        r"(?i)\bformat\b",
                        r"(?i)\bcomment\b",
                        r"(?i)\btweak\b",
                    ],
                    0.2,
                ),
            ],
            inference: Self::inference_patterns(),
            fn_pattern: Regex::new(r"(?m)\b(fn|function|def|func)\b").unwrap(),
            class_pattern: Regex::new(r"(?m)\b(class|struct|interface|trait)\b").unwrap(),
            branch_pattern: Regex::new(r"(?m)\b(if|else|match|switch|case)\b").unwrap(),
            loop_pattern: Regex::new(r"(?m)\b(for|while|loop)\b").unwrap(),
        }
    }

    fn inference_patterns() -> Vec<(Regex, TaskType)> {
        let table: &[(&str, TaskType)] = &[
            (r"(?i)\bsecur\w*|vulnerab\w*\b", TaskType::Security),
            (r"(?i)\b(fix|bug|debug|error|crash)\b", TaskType::BugFix),
            (r"(?i)\brefactor\w*\b", TaskType::Refactor),
            (r"(?i)\breview\b", TaskType::Review),
            (r"(?i)\b(document\w*|docs)\b", TaskType::Documentation),
            (r"(?i)\b(test\w*|coverage)\b", TaskType::Testing),
            (r"(?i)\banaly[sz]\w*\b", TaskType::Analysis),
            (r"(?i)\b(implement|write|create|build)\b", TaskType::CodeGeneration),
        ];
        table
            .iter()
            .filter_map(|(p, t)| Regex::new(p).ok().map(|re| (re, *t)))
            .collect()
    }

    /// Infer a task type from the prompt. First matching pattern wins;
    /// anything unmatched is `General`.
    pub fn infer_task_type(&self, prompt: &str) -> TaskType {
        self.inference
            .iter()
            .find(|(re, _)| re.is_match(prompt))
            .map_or(TaskType::General, |(_, t)| *t)
    }

    /// Score a task. `source` is the referenced file's contents when the
    /// caller has them; the structure factor is zero without it.
    pub fn score(&self, task: &Task, source: Option<&str>) -> ComplexityScore {
        let file_factor = source.map_or(0.0, |s| (s.len() as f64 / 100_000.0).min(1.0));
        let keyword_factor = self.keyword_factor(&task.prompt);
        let task_type = task
            .task_type
            .unwrap_or_else(|| self.infer_task_type(&task.prompt));
        let type_factor = type_complexity(task_type);
        let structure_factor = source.map_or(0.0, |s| self.structure_factor(s));

        let total = FILE_WEIGHT * file_factor
            + KEYWORD_WEIGHT * keyword_factor
            + TYPE_WEIGHT * type_factor
            + STRUCTURE_WEIGHT * structure_factor;

        let tier = if total >= COMPLEX_THRESHOLD {
            ComplexityTier::Complex
        } else if total >= MODERATE_THRESHOLD {
            ComplexityTier::Moderate
        } else {
            ComplexityTier::Simple
        };

        ComplexityScore {
            total,
            file_factor,
            keyword_factor,
            type_factor,
            structure_factor,
            tier,
        }
    }

    /// The highest-scoring keyword bucket matching the prompt; a mild 0.3
    /// default when nothing matches.
    fn keyword_factor(&self, prompt: &str) -> f64 {
        let mut best: Option<f64> = None;
        for bucket in &self.buckets {
            if bucket.patterns.iter().any(|re| re.is_match(prompt)) {
                best = Some(best.map_or(bucket.score, |b| b.max(bucket.score)));
            }
        }
        best.unwrap_or(0.3)
    }

    /// Structure factor from line, function, class, branch, and loop counts.
    fn structure_factor(&self, source: &str) -> f64 {
        let lines = source.lines().count() as f64;
        let fns = self.fn_pattern.find_iter(source).count() as f64;
        let classes = self.class_pattern.find_iter(source).count() as f64;
        let branches = self.branch_pattern.find_iter(source).count() as f64;
        let loops = self.loop_pattern.find_iter(source).count() as f64;

        ((lines / 500.0).min(1.0) * 0.4
            + (fns / 20.0).min(1.0) * 0.2
            + (classes / 10.0).min(1.0) * 0.1
            + (branches / 30.0).min(1.0) * 0.2
            + (loops / 20.0).min(1.0) * 0.1)
            .min(1.0)
    }
}

/// Static task-type complexity table.
fn type_complexity(task_type: TaskType) -> f64 {
    match task_type {
        TaskType::Security => 0.9,
        TaskType::Refactor => 0.7,
        TaskType::CodeGeneration | TaskType::Analysis => 0.6,
        TaskType::Review => 0.5,
        TaskType::Testing => 0.4,
        TaskType::BugFix | TaskType::General => 0.3,
        TaskType::Documentation => 0.2,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bugfix_prompt_is_simple() {
        let analyzer = ComplexityAnalyzer::new();
        let task = Task::new("t-1", "Fix the null pointer bug in auth.js");
        let score = analyzer.score(&task, None);
        assert_eq!(score.tier, ComplexityTier::Simple);
        assert!((score.keyword_factor - 0.2).abs() < f64::EPSILON);
        assert_eq!(score.file_factor, 0.0);
    }

    #[test]
    fn test_architecture_prompt_is_complex() {
        let analyzer = ComplexityAnalyzer::new();
        let task = Task::new(
            "t-2",
            "Architect a distributed system for concurrent order processing",
        )
        .with_type(TaskType::CodeGeneration);
        let score = analyzer.score(&task, None);
        // 0.4*1.0 + 0.3*0.6 = 0.58 → moderate without a file…
        assert!(score.total >= MODERATE_THRESHOLD);
        // …and complex once a large file pushes the total over the line.
        let big = "x\n".repeat(60_000);
        let with_file = analyzer.score(&task, Some(&big));
        assert_eq!(with_file.tier, ComplexityTier::Complex);
    }

    #[test]
    fn test_file_factor_capped() {
        let analyzer = ComplexityAnalyzer::new();
        let task = Task::new("t-3", "tweak").with_type(TaskType::General);
        let huge = "a".repeat(5_000_000);
        let score = analyzer.score(&task, Some(&huge));
        assert_eq!(score.file_factor, 1.0);
    }

    #[test]
    fn test_type_inference() {
        let analyzer = ComplexityAnalyzer::new();
        assert_eq!(
            analyzer.infer_task_type("Fix the null pointer bug in auth.js"),
            TaskType::BugFix
        );
        assert_eq!(
            analyzer.infer_task_type("Review this pull request"),
            TaskType::Review
        );
        assert_eq!(
            analyzer.infer_task_type("Audit for security vulnerabilities"),
            TaskType::Security
        );
        assert_eq!(analyzer.infer_task_type("Hello there"), TaskType::General);
    }

    #[test]
    fn test_structure_factor_counts() {
        let analyzer = ComplexityAnalyzer::new();
        let flat = "let a = 1;\nlet b = 2;\n";
        let busy = "fn main() { for i in 0..10 { if i > 5 { println!() } } }\n".repeat(40);
        assert!(analyzer.structure_factor(&busy) > analyzer.structure_factor(flat));
    }

    #[test]
    fn test_no_keyword_match_uses_default() {
        let analyzer = ComplexityAnalyzer::new();
        let task = Task::new("t-4", "ponder the meaning of it all");
        let score = analyzer.score(&task, None);
        assert!((score.keyword_factor - 0.3).abs() < f64::EPSILON);
    }
}
