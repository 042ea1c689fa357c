//! The seam between the engine and the container runtime. `BollardRuntime`
//! talks to a real Docker Engine API socket; `StubRuntime` is an in-memory
//! test double used to exercise §8's testable properties — in particular
//! property 8 ("stubbed runtime that fails first create with NotFound and
//! succeeds after pull") and the Controller's retry/pull-on-miss paths —
//! without a daemon.

mod bollard_impl;
pub mod stub;

pub use bollard_impl::BollardRuntime;
pub use stub::StubRuntime;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;

/// A bind mount: `host_path:container_path`.
#[derive(Debug, Clone)]
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
}

/// Arguments to create the idle session container (§4.2).
#[derive(Debug, Clone)]
pub struct CreateContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub labels: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
}

/// Raised by [`ContainerRuntime::create_container`] when the image is absent
/// from the daemon's cache, distinguished from other lifecycle failures so
/// the Controller can pull-on-miss (§4.2) rather than exhausting the create
/// retry budget on a doomed request.
#[derive(Debug, thiserror::Error)]
#[error("image not found: {0}")]
pub struct ImageNotFoundError(pub String);

/// Outcome of one `exec` invocation, as seen by the runtime layer — the
/// Step Runner (`step.rs`) turns this into a [`crate::outcome::StepResult`].
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    pub exit_code: i64,
    pub output: String,
}

/// Abstracts the subset of the Docker Engine API the engine needs. Object
/// safe so the Controller/Step Runner can hold `Arc<dyn ContainerRuntime>`
/// and be driven by either [`BollardRuntime`] or [`StubRuntime`] in tests.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates the sandbox network if it does not already exist. Tolerates
    /// "already exists" so concurrent engine instances racing to create the
    /// shared network do not fail each other (SPEC_FULL §5 "Network
    /// idempotency").
    async fn ensure_network(&self, name: &str) -> Result<()>;

    /// Returns the container id, or an error downcastable to
    /// [`ImageNotFoundError`] if the image is absent from the daemon.
    async fn create_container(&self, spec: &CreateContainerSpec) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Force-removes the container. Safe to call on an already-missing id
    /// (§4.2 "Cleanup").
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Pulls `image`, draining the pull progress stream before returning.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Runs `cmd` inside the running container with the given extra
    /// environment variables and working directory, streaming demultiplexed
    /// output lines to `log_sink` in arrival order as they are produced.
    async fn exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        env: Vec<(String, String)>,
        working_dir: &str,
        log_sink: UnboundedSender<String>,
    ) -> Result<ExecOutcome>;
}
