//! §3 "ExecutionRequest" and the tool-type enum it carries.

use serde::{Deserialize, Serialize};

/// One of the six execution strategies a lab can be authored against
/// (GLOSSARY "Tool type"). Closed set — see `strategy.rs` for the
/// per-variant record (§9 "Dynamic dispatch over tool types").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Terraform,
    Ansible,
    Linux,
    Docker,
    K8s,
    GithubActions,
}

impl ToolType {
    pub const ALL: [ToolType; 6] = [
        ToolType::Terraform,
        ToolType::Ansible,
        ToolType::Linux,
        ToolType::Docker,
        ToolType::K8s,
        ToolType::GithubActions,
    ];

    /// Whether this tool type's validation phase is polled to a deadline
    /// (§4.4, K8s only) rather than run once synchronously.
    pub fn uses_retrier(self) -> bool {
        matches!(self, ToolType::K8s)
    }
}

/// §3 "ExecutionRequest" — the input to [`crate::orchestrator::Engine::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Opaque string, unique per run. At most one active run may use a given
    /// `workspace_id` at a time (Invariant 1).
    pub workspace_id: String,
    pub tool_type: ToolType,
    /// May contain `CRLF`; normalised to `LF` by the Preparer before being
    /// written (§4.1).
    pub user_code: String,
    /// Possibly empty. Only Ansible and K8s have a validation phase; for
    /// other tool types a non-empty `validation_code` is ignored (§4.3 table
    /// has no validate command for Terraform/Linux/Docker/GithubActions).
    pub validation_code: String,
    /// Bytes, possibly empty. Only meaningful for `ToolType::Terraform`: the
    /// prior run's `newState`, fed back in as this run's starting state.
    pub prior_state: Vec<u8>,
}

impl ExecutionRequest {
    pub fn new(workspace_id: impl Into<String>, tool_type: ToolType) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            tool_type,
            user_code: String::new(),
            validation_code: String::new(),
            prior_state: Vec::new(),
        }
    }

    pub fn with_user_code(mut self, code: impl Into<String>) -> Self {
        self.user_code = code.into();
        self
    }

    pub fn with_validation_code(mut self, code: impl Into<String>) -> Self {
        self.validation_code = code.into();
        self
    }

    pub fn with_prior_state(mut self, state: Vec<u8>) -> Self {
        self.prior_state = state;
        self
    }
}
