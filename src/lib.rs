//! Execution Engine: the per-run lifecycle of a DevOps lab submission —
//! preparing an isolated workspace, launching a purpose-built tool container,
//! streaming its output, running the execute→validate protocol, harvesting
//! any persistent tool state, and surfacing a structured [`outcome::FinalOutcome`].
//!
//! The crate's entry point is [`orchestrator::Engine::execute`]; everything
//! else is a leaf component it binds together (see each module's doc
//! comment). Out of scope, per the system this crate is embedded in: the
//! REST/WebSocket surface, lab/track/workspace CRUD, persistence, auth, and
//! the simulated cloud backend itself (the engine only joins its network).

/// Docker container management, using the docker API provided by [bollard] as
/// a backend.
pub mod api_docker;
/// Process-wide configuration, loaded once at startup.
pub mod config;
/// Container Controller: create/start/stop the session container.
pub mod container;
/// The seam between the engine and the container runtime (`bollard` and an
/// in-memory stub).
pub mod docker_rt;
/// The crate's error taxonomy and `Result` alias.
pub mod error;
/// State Harvester: reads back tool-managed persistent state after a run.
pub mod harvest;
mod misc;
/// Execution Orchestrator: the public entry point binding every component
/// into the execute→validate protocol.
pub mod orchestrator;
/// `FinalOutcome` and `StepResult`, the engine's two output record types.
pub mod outcome;
/// `ExecutionRequest` and `ToolType`, the engine's input.
pub mod request;
/// Validation Retrier: polls a validation step to a bounded deadline
/// (Kubernetes only).
pub mod retry;
/// Step Runner: runs one command inside a running container and streams its
/// output line-by-line.
pub mod step;
/// Per-`ToolType` strategy table: image, workspace files, commands, env,
/// harvest rule.
pub mod strategy;
/// Workspace Preparer: materialises a lab's scaffold files on disk.
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Once;

    /// Installs a `tracing-subscriber` writer scoped to the test harness, so
    /// `tracing::instrument`ed spans show up in `cargo test -- --nocapture`
    /// output instead of being silently dropped (no subscriber is installed
    /// by the library itself — that is a consumer's call).
    pub(crate) fn init() {
        static ONCE: Once = Once::new();
        ONCE.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init();
        });
    }
}

pub use config::EngineConfig;
pub use docker_rt::{BollardRuntime, ContainerRuntime, StubRuntime};
pub use error::{EngineErrorKind, Result};
pub use orchestrator::Engine;
pub use outcome::{FinalOutcome, StepResult};
pub use request::{ExecutionRequest, ToolType};
