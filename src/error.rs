use std::path::PathBuf;

use thiserror::Error;

/// How the scheduler should react to an `OrchestratorError` surfacing from a step.
///
/// Mirrors the classification table in the core design: every error kind maps
/// to exactly one class, and the scheduler's recovery logic is a single
/// `match err.classify()` rather than per-variant duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Increment the agent's retry counter and try again next tick.
    Retryable,
    /// Pause the agent; no further automatic retries.
    Pausable,
    /// Scripts are deterministic: a failure here can never self-correct, so
    /// the whole workflow terminates rather than just the agent.
    FatalToWorkflow,
    /// Not covered by a specific recovery rule: log and propagate out of the
    /// scheduler loop (spec §4.10's "Other" row).
    Propagate,
}

/// Every error kind the orchestration core can produce.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to parse a transition: {reason}")]
    TransitionParseError { reason: String },

    #[error("transition target {target:?} is unsafe (contains a path separator or `..`)")]
    TransitionTargetUnsafe { target: String },

    #[error("state {name:?} not found in scope directory")]
    ResolutionNotFound { name: String },

    #[error("state {name:?} is ambiguous: multiple candidate files match")]
    ResolutionAmbiguous { name: String, candidates: Vec<PathBuf> },

    #[error("transition violates policy for state {state:?}: {reason}")]
    PolicyViolation { state: String, reason: String },

    #[error("prompt file error for {path:?}: {reason}")]
    PromptFileError { path: PathBuf, reason: String },

    #[error("failed to spawn subprocess: {0}")]
    SubprocessError(#[source] std::io::Error),

    #[error("step timed out after {elapsed_secs}s ({kind})")]
    Timeout { kind: TimeoutKind, elapsed_secs: u64 },

    #[error("external agent reported a usage limit")]
    UsageLimit,

    #[error("script state {state:?} failed: {reason}")]
    ScriptFailed { state: String, reason: String },

    #[error("budget exceeded: accumulated {spent} over budget {budget}")]
    BudgetExceeded { spent: f64, budget: f64 },

    #[error("persistent store error for workflow {workflow_id:?}: {reason}")]
    StateFileError { workflow_id: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Wall,
    Idle,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Wall => write!(f, "wall-clock"),
            TimeoutKind::Idle => write!(f, "idle-output"),
        }
    }
}

impl OrchestratorError {
    /// Classify this error per the scheduler's recovery table (spec §4.10, §7).
    pub fn classify(&self) -> ErrorClass {
        match self {
            OrchestratorError::UsageLimit => ErrorClass::Pausable,
            OrchestratorError::Timeout { .. }
            | OrchestratorError::PolicyViolation { .. }
            | OrchestratorError::ResolutionNotFound { .. }
            | OrchestratorError::ResolutionAmbiguous { .. }
            | OrchestratorError::TransitionParseError { .. }
            | OrchestratorError::SubprocessError(_) => ErrorClass::Retryable,
            OrchestratorError::ScriptFailed { .. } => ErrorClass::FatalToWorkflow,
            OrchestratorError::StateFileError { .. } => ErrorClass::FatalToWorkflow,
            OrchestratorError::TransitionTargetUnsafe { .. }
            | OrchestratorError::PromptFileError { .. }
            | OrchestratorError::BudgetExceeded { .. } => ErrorClass::Propagate,
        }
    }

    /// Whether this error kind carries policy-driven reminder-retry semantics
    /// in an LLM step (spec §4.7 step 7), as opposed to being fatal outright.
    pub fn is_reminder_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::PolicyViolation { .. }
                | OrchestratorError::TransitionParseError { .. }
                | OrchestratorError::ResolutionNotFound { .. }
                | OrchestratorError::ResolutionAmbiguous { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_limit_is_pausable() {
        assert_eq!(OrchestratorError::UsageLimit.classify(), ErrorClass::Pausable);
    }

    #[test]
    fn timeout_is_retryable() {
        let err = OrchestratorError::Timeout {
            kind: TimeoutKind::Wall,
            elapsed_secs: 10,
        };
        assert_eq!(err.classify(), ErrorClass::Retryable);
    }

    #[test]
    fn script_failed_is_fatal_to_workflow() {
        let err = OrchestratorError::ScriptFailed {
            state: "build.sh".into(),
            reason: "exit 1".into(),
        };
        assert_eq!(err.classify(), ErrorClass::FatalToWorkflow);
    }

    #[test]
    fn state_file_error_is_fatal_to_workflow() {
        let err = OrchestratorError::StateFileError {
            workflow_id: "wf1".into(),
            reason: "corrupt".into(),
        };
        assert_eq!(err.classify(), ErrorClass::FatalToWorkflow);
    }

    #[test]
    fn budget_exceeded_propagates() {
        let err = OrchestratorError::BudgetExceeded {
            spent: 1.0,
            budget: 0.5,
        };
        assert_eq!(err.classify(), ErrorClass::Propagate);
    }

    #[test]
    fn policy_violation_is_reminder_retryable() {
        let err = OrchestratorError::PolicyViolation {
            state: "a.md".into(),
            reason: "no transitions emitted".into(),
        };
        assert!(err.is_reminder_retryable());
    }

    #[test]
    fn usage_limit_is_not_reminder_retryable() {
        assert!(!OrchestratorError::UsageLimit.is_reminder_retryable());
    }
}
