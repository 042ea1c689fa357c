//! §3 "StepResult" and "FinalOutcome".

use serde::{Deserialize, Serialize};

/// Produced by the Step Runner (and the Retrier, which wraps it) for one
/// `execute` or `validate` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub exit_code: i64,
    /// Full captured text, lines joined with `\n`.
    pub output: String,
    /// Transport-level failure, distinct from a non-zero exit. Callers treat
    /// `error.is_some()` as failure regardless of `exit_code` (§4.3).
    pub error: Option<String>,
}

impl StepResult {
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.exit_code != 0
    }
}

/// Produced exactly once per accepted run (Invariant 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalOutcome {
    pub workspace_id: String,
    /// Non-empty only when `tool_type = Terraform` and the run produced a
    /// state file (Invariant 6).
    pub new_state: Vec<u8>,
    /// Terminal error: non-zero execute exit, a lifecycle/preparation
    /// failure, or cancellation. `None` on a clean run even if validation
    /// failed (§4.6 step 9 — validation failures stay in `validation_result`).
    pub error: Option<String>,
    pub execution_result: StepResult,
    /// Zero-valued ([`StepResult::default`]) if validation was never run.
    pub validation_result: StepResult,
}

impl FinalOutcome {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            new_state: Vec::new(),
            error: None,
            execution_result: StepResult::default(),
            validation_result: StepResult::default(),
        }
    }
}
