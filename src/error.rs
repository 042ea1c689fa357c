//! The error taxonomy of §7: preparation, container lifecycle, stream,
//! non-zero exit, timeout, and cancellation errors, all propagated through
//! [`stacked_errors`] so every fallible boundary keeps a location trail.

pub use stacked_errors::{Error, Result, StackableErr};

/// Leaf error kinds, wrapped by [`stacked_errors::Error`] at the point they
/// are raised. Kept as a closed `thiserror` enum rather than ad-hoc strings so
/// callers (and tests) can match on `.downcast_ref` when they need to
/// distinguish, e.g., a timeout from a transport failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineErrorKind {
    /// Workspace preparation failed: directory I/O or a missing required
    /// external artifact (e.g. kubeconfig).
    #[error("workspace preparation failed: {0}")]
    Preparation(String),
    /// Container create/start/remove failed after the retry budget was
    /// exhausted.
    #[error("container lifecycle error: {0}")]
    ContainerLifecycle(String),
    /// Reading the demultiplexed exec stream failed at the transport level.
    #[error("stream error: {0}")]
    Stream(String),
    /// The execute phase exited non-zero. Carries the exit code so the
    /// orchestrator can format `"execução falhou com código N"`.
    #[error("execução falhou com código {0}")]
    NonZeroExit(i64),
    /// The K8s validation retry loop exceeded its deadline.
    #[error("Timeout waiting for validation to succeed")]
    Timeout,
    /// The request's cancellation token fired before the run completed.
    #[error("execution cancelled")]
    Cancelled,
}

impl EngineErrorKind {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineErrorKind::Cancelled)
    }
}
