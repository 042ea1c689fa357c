//! Container Controller (§4.2).

use std::{sync::Arc, time::Duration};

use tracing::{info, instrument, warn};

use crate::{
    config::EngineConfig,
    docker_rt::{ContainerRuntime, CreateContainerSpec, ImageNotFoundError, Mount},
    error::{Result, StackableErr},
    request::ExecutionRequest,
    strategy::ToolStrategy,
};

const MAX_CREATE_ATTEMPTS: u32 = 3;
const BACKOFF_UNIT: Duration = Duration::from_millis(1500);

pub struct ContainerController {
    runtime: Arc<dyn ContainerRuntime>,
    config: EngineConfig,
}

/// Deterministic per-run container name, so a stray container from a
/// crashed prior run is discoverable by name (SPEC_FULL §5 "Container
/// naming").
pub fn container_name(workspace_id: &str) -> String {
    format!("lab-exec-{workspace_id}")
}

impl ContainerController {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: EngineConfig) -> Self {
        Self { runtime, config }
    }

    /// `start(request) -> containerID | error` (§4.2). Joins the shared
    /// sandbox network, bind-mounts the workspace, and retries transient
    /// create/start failures with linear back-off. Image-missing failures
    /// are handled separately via pull-on-miss before the retry budget is
    /// consumed.
    #[instrument(skip_all, fields(workspace_id = %request.workspace_id))]
    pub async fn start(
        &self,
        request: &ExecutionRequest,
        strategy: &ToolStrategy,
    ) -> Result<String> {
        self.runtime
            .ensure_network(&self.config.docker_network)
            .await
            .stack()?;

        let mut mounts = vec![Mount {
            host_path: self
                .config
                .host_workspace_path(&request.workspace_id)
                .to_string_lossy()
                .into_owned(),
            container_path: "/workspace".to_string(),
        }];
        mounts.extend(strategy.extra_mounts.iter().map(|m| Mount {
            host_path: m.host_path.clone(),
            container_path: m.container_path.clone(),
        }));

        let spec = CreateContainerSpec {
            name: container_name(&request.workspace_id),
            image: strategy.image.to_string(),
            network: self.config.docker_network.clone(),
            labels: vec![("workspace_id".to_string(), request.workspace_id.clone())],
            mounts,
        };

        self.create_and_start_with_retry(&spec).await.stack()
    }

    /// Creates and starts the session container, retrying the combined
    /// create+start sequence up to [`MAX_CREATE_ATTEMPTS`] times with linear
    /// back-off. An image-not-found create failure is handled separately via
    /// pull-on-miss, outside the retry budget. A start failure removes the
    /// just-created container before the next attempt (§4.2 "Each failed
    /// start attempt removes the created container before retrying").
    async fn create_and_start_with_retry(&self, spec: &CreateContainerSpec) -> Result<String> {
        let mut pulled_once = false;
        let mut last_err = None;

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let created = match self.runtime.create_container(spec).await {
                Ok(id) => Ok(id),
                Err(e) if e.downcast_ref::<ImageNotFoundError>().is_some() && !pulled_once => {
                    info!(image = %spec.image, "image absent, pulling");
                    pulled_once = true;
                    self.runtime.pull_image(&spec.image).await.stack()?;
                    self.runtime.create_container(spec).await
                }
                Err(e) => Err(e),
            };

            match created {
                Ok(id) => match self.runtime.start_container(&id).await {
                    Ok(()) => return Ok(id),
                    Err(e) => {
                        warn!(
                            container.id = %id,
                            "failed to start session container, removing before retry"
                        );
                        let _ = self.runtime.remove_container(&id).await;
                        last_err = Some(e);
                    }
                },
                Err(e) => last_err = Some(e),
            }

            if attempt < MAX_CREATE_ATTEMPTS {
                warn!(attempt, "container create/start failed, retrying after back-off");
                tokio::time::sleep(BACKOFF_UNIT * attempt).await;
            }
        }

        Err(last_err.unwrap_or_else(|| {
            crate::error::EngineErrorKind::ContainerLifecycle(
                "exhausted create/start retry budget".to_string(),
            )
            .into()
        }))
        .stack_err_locationless("creating and starting session container after retries")
    }

    /// `stop(containerID)` (§4.2). Safe to call on an already-missing id;
    /// invoked from the orchestrator on every exit path including
    /// cancellation.
    #[instrument(skip(self))]
    pub async fn stop(&self, container_id: &str) -> Result<()> {
        self.runtime.remove_container(container_id).await.stack()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        docker_rt::StubRuntime,
        request::{ExecutionRequest, ToolType},
        strategy::strategy_for,
    };

    use super::*;

    fn test_config() -> EngineConfig {
        EngineConfig {
            host_exec_root: "/host".into(),
            temp_root: "/svc".into(),
            docker_network: "sandbox".into(),
            terraform_provider_override: None,
            kubeconfig_source_path: "/no/such/kubeconfig".into(),
        }
    }

    #[tokio::test]
    async fn retries_transient_create_failures() {
        let runtime = Arc::new(StubRuntime::new());
        runtime.fail_next_creates(2).await;
        let config = test_config();
        let request = ExecutionRequest::new("ws-1", ToolType::Linux).with_user_code("echo hi");
        let strategy = strategy_for(&request, &config);
        let controller = ContainerController::new(runtime.clone(), config);

        let id = controller.start(&request, &strategy).await.unwrap();
        assert!(runtime.has_live_container(&id).await);
    }

    #[tokio::test]
    async fn pulls_image_on_miss_and_retries_create() {
        let runtime = Arc::new(StubRuntime::new());
        let config = test_config();
        let request = ExecutionRequest::new("ws-2", ToolType::Linux).with_user_code("echo hi");
        let strategy = strategy_for(&request, &config);
        runtime.require_pull_for_image(strategy.image).await;
        let controller = ContainerController::new(runtime.clone(), config);

        let id = controller.start(&request, &strategy).await.unwrap();
        assert!(runtime.pulled_images().await.contains(strategy.image));
        assert!(runtime.has_live_container(&id).await);
    }

    #[tokio::test]
    async fn failed_start_removes_container_before_retrying() {
        let runtime = Arc::new(StubRuntime::new());
        runtime.fail_next_starts(1).await;
        let config = test_config();
        let request = ExecutionRequest::new("ws-3", ToolType::Linux).with_user_code("echo hi");
        let strategy = strategy_for(&request, &config);
        let controller = ContainerController::new(runtime.clone(), config);

        let id = controller.start(&request, &strategy).await.unwrap();
        assert!(runtime.has_live_container(&id).await);
        // the first (failed) container id was removed, not the one we ended up with
        assert_eq!(runtime.removed_containers().await.len(), 1);
        assert_ne!(runtime.removed_containers().await[0], id);
    }

    #[tokio::test]
    async fn stop_is_safe_on_already_missing_id() {
        let runtime = Arc::new(StubRuntime::new());
        let controller = ContainerController::new(runtime, test_config());
        controller.stop("no-such-container").await.unwrap();
    }
}
