//! In-memory [`ContainerRuntime`] test double. Lets the Controller, Step
//! Runner, and Orchestrator be exercised in `#[tokio::test]`s without a
//! Docker daemon (§8 testable properties, in particular property 8).

use std::{
    collections::{HashSet, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{mpsc::UnboundedSender, Mutex};

use super::{ContainerRuntime, CreateContainerSpec, ExecOutcome, ImageNotFoundError};
use crate::error::{Result, StackableErr};

/// A scripted response for one `exec` call.
#[derive(Debug, Clone, Default)]
pub struct StubExecResponse {
    pub lines: Vec<String>,
    pub exit_code: i64,
    /// If set, `exec` sleeps this long after emitting `lines` before
    /// resolving — models a long-running container command so tests can
    /// land a cancellation while the step is still in flight.
    pub hang: Option<Duration>,
}

impl StubExecResponse {
    pub fn success(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit_code: 0,
            hang: None,
        }
    }

    pub fn failure(exit_code: i64, lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit_code,
            hang: None,
        }
    }

    /// Keeps `exec` pending for `duration` after its lines are sent.
    pub fn hang_for(mut self, duration: Duration) -> Self {
        self.hang = Some(duration);
        self
    }
}

#[derive(Default)]
struct StubState {
    next_id: u64,
    networks: HashSet<String>,
    live_containers: HashSet<String>,
    removed_containers: Vec<String>,
    pulled_images: HashSet<String>,
    create_failures_remaining: usize,
    start_failures_remaining: usize,
    image_requiring_pull: Option<String>,
    exec_responses: VecDeque<StubExecResponse>,
}

pub struct StubRuntime {
    state: Mutex<StubState>,
}

impl StubRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState::default()),
        }
    }

    /// The next `n` `create_container` calls fail with a generic lifecycle
    /// error (not image-not-found), exercising the Controller's linear
    /// back-off retry (§4.2).
    pub async fn fail_next_creates(&self, n: usize) {
        self.state.lock().await.create_failures_remaining = n;
    }

    /// The next `n` `start_container` calls fail, exercising the Controller's
    /// remove-then-retry path on a failed start (§4.2 "Each failed start
    /// attempt removes the created container before retrying").
    pub async fn fail_next_starts(&self, n: usize) {
        self.state.lock().await.start_failures_remaining = n;
    }

    /// `create_container` fails with [`ImageNotFoundError`] for `image`
    /// until [`ContainerRuntime::pull_image`] is called for it, exercising
    /// the pull-on-miss path (§4.2, §8 property 8).
    pub async fn require_pull_for_image(&self, image: impl Into<String>) {
        self.state.lock().await.image_requiring_pull = Some(image.into());
    }

    /// Queues the response for the next `exec` call, in order (execute, then
    /// validate).
    pub async fn push_exec_response(&self, response: StubExecResponse) {
        self.state.lock().await.exec_responses.push_back(response);
    }

    pub async fn removed_containers(&self) -> Vec<String> {
        self.state.lock().await.removed_containers.clone()
    }

    pub async fn pulled_images(&self) -> HashSet<String> {
        self.state.lock().await.pulled_images.clone()
    }

    pub async fn has_live_container(&self, id: &str) -> bool {
        self.state.lock().await.live_containers.contains(id)
    }
}

impl Default for StubRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn ensure_network(&self, name: &str) -> Result<()> {
        self.state.lock().await.networks.insert(name.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &CreateContainerSpec) -> Result<String> {
        let mut state = self.state.lock().await;

        if let Some(image) = state.image_requiring_pull.clone() {
            if image == spec.image && !state.pulled_images.contains(&image) {
                return Err(ImageNotFoundError(image)).stack();
            }
        }

        if state.create_failures_remaining > 0 {
            state.create_failures_remaining -= 1;
            return Err(crate::error::EngineErrorKind::ContainerLifecycle(
                "stubbed transient create failure".to_string(),
            ))
            .stack();
        }

        state.next_id += 1;
        let id = format!("stub-container-{}", state.next_id);
        state.live_containers.insert(id.clone());
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.live_containers.contains(container_id) {
            return Err(crate::error::EngineErrorKind::ContainerLifecycle(format!(
                "no such container: {container_id}"
            )))
            .stack();
        }
        if state.start_failures_remaining > 0 {
            state.start_failures_remaining -= 1;
            return Err(crate::error::EngineErrorKind::ContainerLifecycle(
                "stubbed transient start failure".to_string(),
            ))
            .stack();
        }
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.live_containers.remove(container_id);
        state.removed_containers.push(container_id.to_string());
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .pulled_images
            .insert(image.to_string());
        Ok(())
    }

    async fn exec(
        &self,
        _container_id: &str,
        _cmd: Vec<String>,
        _env: Vec<(String, String)>,
        _working_dir: &str,
        log_sink: UnboundedSender<String>,
    ) -> Result<ExecOutcome> {
        let response = self
            .state
            .lock()
            .await
            .exec_responses
            .pop_front()
            .unwrap_or_default();

        let mut output = String::new();
        for line in &response.lines {
            output.push_str(line);
            output.push('\n');
            let _ = log_sink.send(line.clone());
        }

        if let Some(hang) = response.hang {
            tokio::time::sleep(hang).await;
        }

        Ok(ExecOutcome {
            exit_code: response.exit_code,
            output,
        })
    }
}
