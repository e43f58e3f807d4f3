use hive_core::ModelId;
use hive_store::FailureRecord;
use std::time::Duration;

/// What to do with a failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-enqueue on `queue` after `delay`.
    Retry {
        /// The queue the retry enters.
        queue: ModelId,
        /// Backoff before the task becomes runnable again.
        delay: Duration,
    },
    /// Move to the dead-letter queue.
    DeadLetter {
        /// The reason recorded on the dead letter.
        reason: String,
    },
}

/// Error substrings that mark a failure as transient and worth retrying.
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "dns",
    "rate limit",
    "rate_limit",
    "temporary_failure",
    "429",
    "502",
    "503",
];

/// Error substrings that will not succeed on retry, no matter the budget.
const PERMANENT_PATTERNS: &[&str] = &["invalid", "unauthorized", "malformed", "unsupported"];

/// Whether the error matches a known transient pattern.
pub fn is_transient(error: &str) -> bool {
    let lower = error.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Whether the error matches a known permanent pattern.
pub fn is_permanent(error: &str) -> bool {
    let lower = error.to_lowercase();
    PERMANENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Exponential backoff: `2^retries * 1000ms`, capped at ~17 minutes so the
/// shift cannot overflow on a runaway retry counter.
pub fn backoff_delay(retries: u32) -> Duration {
    Duration::from_millis(1000u64.saturating_mul(1u64 << retries.min(10)))
}

/// The queue a retried task should enter: the static fallback for the
/// failing agent's model is preferred over the task's original queue, so the
/// retry does not land on the same struggling pool.
pub fn determine_retry_queue(agent_model: ModelId) -> ModelId {
    agent_model.fallback()
}

/// Decide a failed task's fate.
///
/// Permanent errors dead-letter immediately. Transient and unrecognized
/// errors retry with exponential backoff while under the retry ceiling.
/// Exhausted tasks dead-letter tagged with the triggering error.
pub fn analyze_failure(record: &FailureRecord, max_retries: u32) -> FailureDisposition {
    if is_permanent(&record.error) {
        return FailureDisposition::DeadLetter {
            reason: record.error.clone(),
        };
    }
    if record.task.retries < max_retries {
        let next_retries = record.task.retries + 1;
        FailureDisposition::Retry {
            queue: determine_retry_queue(record.queue),
            delay: backoff_delay(next_retries),
        }
    } else {
        FailureDisposition::DeadLetter {
            reason: format!("Max retries exceeded: {}", record.error),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hive_core::{Task, TaskType};

    fn record(error: &str, retries: u32) -> FailureRecord {
        let mut task = Task::new("t-1", "Fix it").with_type(TaskType::BugFix);
        task.retries = retries;
        FailureRecord {
            queue: ModelId::Gpt4o,
            task,
            agent_id: "a-1".into(),
            error: error.into(),
            reported_at: Utc::now(),
        }
    }

    #[test]
    fn test_transient_patterns() {
        for error in [
            "request timeout",
            "Connection reset by peer",
            "DNS lookup failed",
            "429 rate limit exceeded",
            "temporary_failure",
        ] {
            assert!(is_transient(error), "{error} should be transient");
        }
        assert!(!is_transient("invalid api key"));
    }

    #[test]
    fn test_backoff_is_exponential() {
        assert_eq!(backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(3), Duration::from_millis(8_000));
        assert_eq!(backoff_delay(5), Duration::from_millis(32_000));
        // Capped: no overflow on absurd counters.
        assert_eq!(backoff_delay(64), backoff_delay(10));
    }

    #[test]
    fn test_transient_under_ceiling_retries_on_fallback_queue() {
        let disposition = analyze_failure(&record("connection reset", 1), 5);
        assert_eq!(
            disposition,
            FailureDisposition::Retry {
                queue: ModelId::Gpt4o.fallback(),
                delay: Duration::from_millis(4_000),
            }
        );
    }

    #[test]
    fn test_permanent_error_dead_letters_immediately() {
        let disposition = analyze_failure(&record("invalid request payload", 0), 5);
        assert!(matches!(
            disposition,
            FailureDisposition::DeadLetter { ref reason } if reason.contains("invalid")
        ));
    }

    #[test]
    fn test_exhausted_retries_dead_letter_with_error_tag() {
        let disposition = analyze_failure(&record("timeout", 5), 5);
        match disposition {
            FailureDisposition::DeadLetter { reason } => {
                assert!(reason.contains("Max retries exceeded"));
                assert!(reason.contains("timeout"));
            }
            other => panic!("expected dead letter, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_error_retries_under_ceiling() {
        assert!(matches!(
            analyze_failure(&record("worker exploded mysteriously", 0), 5),
            FailureDisposition::Retry { .. }
        ));
    }
}
