//! Execution Orchestrator (§4.6): binds the Preparer, Controller, Step
//! Runner, Retrier and Harvester into the Execute→Validate protocol and
//! publishes the log channel and final-state channel the Handler driver
//! consumes (§6 "Consumer interface").

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    config::EngineConfig,
    container::ContainerController,
    docker_rt::ContainerRuntime,
    error::{EngineErrorKind, Result},
    harvest,
    outcome::FinalOutcome,
    request::ExecutionRequest,
    retry,
    step::StepRunner,
    strategy::strategy_for,
    workspace,
};

const FS_SYNC_GRACE: Duration = Duration::from_secs(1);
const CONTAINER_READY_GRACE: Duration = Duration::from_millis(500);

const EXECUTE_BANNER: &str = "--- INICIANDO EXECUÇÃO ---";
const VALIDATE_BANNER: &str = "\n--- INICIANDO VALIDAÇÃO ---";

/// The public entry point (§6 "Consumer interface"): one [`Engine`] is shared
/// across every run, backed by one long-lived, thread-safe container-runtime
/// client (§5 "Shared resources").
pub struct Engine {
    runtime: Arc<dyn ContainerRuntime>,
    config: EngineConfig,
}

/// Runs `fut` to completion unless `cancel` fires first, in which case the
/// in-flight future is dropped (§5 "Cancellation semantics": "the in-flight
/// step is aborted ... via the context") and `Err(Cancelled)` is returned.
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T> {
    tokio::select! {
        result = fut => Ok(result),
        _ = cancel.cancelled() => Err(EngineErrorKind::Cancelled.into()),
    }
}

impl Engine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: EngineConfig) -> Self {
        Self { runtime, config }
    }

    /// `execute(ctx, request) -> (logChan, finalChan, error)` (§6). Returns
    /// synchronously once the request is accepted — all further work runs in
    /// a spawned task. `ToolType` is a closed Rust enum (§9 "make this a
    /// closed set of variants" / REDESIGN FLAGS), so "unknown tool type"
    /// (§8 testable property 5) can only occur before a request reaches this
    /// crate, at the Handler driver's deserialization boundary; `Result` is
    /// kept on this signature for parity with §6's contract.
    #[instrument(skip_all, fields(workspace_id = %request.workspace_id, tool_type = ?request.tool_type))]
    pub fn execute(
        &self,
        cancel: CancellationToken,
        request: ExecutionRequest,
    ) -> Result<(mpsc::UnboundedReceiver<String>, oneshot::Receiver<FinalOutcome>)> {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (final_tx, final_rx) = oneshot::channel();

        let controller = ContainerController::new(self.runtime.clone(), self.config.clone());
        let step_runner = StepRunner::new(self.runtime.clone());
        let config = self.config.clone();

        tokio::spawn(run_protocol(
            config,
            controller,
            step_runner,
            cancel,
            request,
            log_tx,
            final_tx,
        ));

        Ok((log_rx, final_rx))
    }
}

/// The 10-step protocol of §4.6, run as a detached task. Every suspension
/// point is raced against `cancel`; container teardown and workspace removal
/// always run afterward under no cancellation ("a fresh uncancellable
/// context", §5).
async fn run_protocol(
    config: EngineConfig,
    controller: ContainerController,
    step_runner: StepRunner,
    cancel: CancellationToken,
    request: ExecutionRequest,
    log_tx: mpsc::UnboundedSender<String>,
    final_tx: oneshot::Sender<FinalOutcome>,
) {
    let workspace_id = request.workspace_id.clone();
    let mut outcome = FinalOutcome::new(workspace_id.clone());
    let mut container_id: Option<String> = None;

    let result = run_execute_validate(
        &config,
        &controller,
        &step_runner,
        &cancel,
        &request,
        &log_tx,
        &mut outcome,
        &mut container_id,
    )
    .await;

    // 9. decide terminal error — non-zero execute exit or a transport error
    // promotes; validation failures stay in `validation_result` (§4.6 step 9,
    // resolving the Open Question in favor of the source's later behavior).
    outcome.error = match result {
        Err(e) => Some(format!("{e}")),
        Ok(()) if outcome.execution_result.error.is_some() => {
            outcome.execution_result.error.clone()
        }
        Ok(()) if outcome.execution_result.exit_code != 0 => Some(
            EngineErrorKind::NonZeroExit(outcome.execution_result.exit_code).to_string(),
        ),
        Ok(()) => None,
    };

    // 10. close the log channel before the final outcome is observable, then
    // stop the container and remove the workspace unconditionally (§5
    // "Cleanup ... under a detached context that ignores the original
    // cancellation").
    drop(log_tx);
    let _ = final_tx.send(outcome);

    if let Some(id) = container_id {
        if let Err(e) = controller.stop(&id).await {
            warn!(container.id = %id, "failed to remove session container during cleanup: {e}");
        }
    }
    if let Err(e) = workspace::teardown(&config, &workspace_id).await {
        warn!(workspace_id = %workspace_id, "failed to remove workspace directory during cleanup: {e}");
    }
    info!(workspace_id = %workspace_id, "run finished");
}

/// Steps 1–8 of §4.6. Returns `Err` for preparation/lifecycle/cancellation
/// failures; a non-zero execute exit or a validation failure is *not* an
/// `Err` here — those are read back out of `outcome` by the caller to decide
/// the terminal error per step 9.
#[allow(clippy::too_many_arguments)]
async fn run_execute_validate(
    config: &EngineConfig,
    controller: &ContainerController,
    step_runner: &StepRunner,
    cancel: &CancellationToken,
    request: &ExecutionRequest,
    log_tx: &mpsc::UnboundedSender<String>,
    outcome: &mut FinalOutcome,
    container_id: &mut Option<String>,
) -> Result<()> {
    // 1. prepare workspace
    let workspace_dir = cancellable(cancel, workspace::prepare(request, config)).await??;

    // 2. filesystem-sync grace (§4.2, §9)
    cancellable(cancel, tokio::time::sleep(FS_SYNC_GRACE)).await?;

    // 3. start session container
    let strategy = strategy_for(request, config);
    let id = cancellable(cancel, controller.start(request, &strategy)).await??;
    *container_id = Some(id.clone());

    // 4. execute banner
    let _ = log_tx.send(EXECUTE_BANNER.to_string());

    // 5. container readiness grace
    cancellable(cancel, tokio::time::sleep(CONTAINER_READY_GRACE)).await?;

    // 6. execute step
    let execution_result = cancellable(
        cancel,
        step_runner.run_step(&id, &strategy.execute, log_tx.clone()),
    )
    .await?;
    outcome.execution_result = execution_result.clone();

    // 7. validate, only on a clean execute and non-empty validation code
    if !execution_result.is_failure() && !request.validation_code.is_empty() {
        if let Some(validate_spec) = strategy.validate.clone() {
            let _ = log_tx.send(VALIDATE_BANNER.to_string());

            let validation_result = if request.tool_type.uses_retrier() {
                cancellable(
                    cancel,
                    retry::run_with_retry(step_runner, &id, &validate_spec, log_tx, cancel),
                )
                .await??
            } else {
                cancellable(
                    cancel,
                    step_runner.run_step(&id, &validate_spec, log_tx.clone()),
                )
                .await?
            };
            outcome.validation_result = validation_result;
        }
    }

    // 8. harvest state
    outcome.new_state = cancellable(cancel, harvest::harvest(&workspace_dir, request.tool_type))
        .await??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        docker_rt::{stub::StubExecResponse, StubRuntime},
        request::ToolType,
    };

    use super::*;

    fn test_config(root: &std::path::Path) -> EngineConfig {
        EngineConfig {
            host_exec_root: root.to_path_buf(),
            temp_root: root.to_path_buf(),
            docker_network: "sandbox".into(),
            terraform_provider_override: None,
            kubeconfig_source_path: root.join("kubeconfig-that-does-not-exist"),
        }
    }

    #[tokio::test]
    async fn shell_happy_path_emits_banner_and_final_outcome() {
        crate::test_support::init();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runtime = Arc::new(StubRuntime::new());
        runtime
            .push_exec_response(StubExecResponse::success(["hello"]))
            .await;
        let engine = Engine::new(runtime, config.clone());

        let request =
            ExecutionRequest::new("ws-shell", ToolType::Linux).with_user_code("echo hello");
        let (mut log_rx, final_rx) = engine.execute(CancellationToken::new(), request).unwrap();

        let mut lines = Vec::new();
        while let Some(line) = log_rx.recv().await {
            lines.push(line);
        }
        assert!(lines.contains(&EXECUTE_BANNER.to_string()));
        assert!(lines.contains(&"hello".to_string()));

        let outcome = final_rx.await.unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.execution_result.exit_code, 0);
        assert!(!tokio::fs::try_exists(config.workspace_path("ws-shell"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn non_zero_exit_is_promoted_to_final_outcome_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runtime = Arc::new(StubRuntime::new());
        runtime.push_exec_response(StubExecResponse::failure(7, [])).await;
        let engine = Engine::new(runtime, config);

        let request = ExecutionRequest::new("ws-fail", ToolType::Linux).with_user_code("exit 7");
        let (mut log_rx, final_rx) = engine.execute(CancellationToken::new(), request).unwrap();
        while log_rx.recv().await.is_some() {}

        let outcome = final_rx.await.unwrap();
        assert_eq!(
            outcome.error.as_deref(),
            Some("execução falhou com código 7")
        );
        assert_eq!(outcome.execution_result.exit_code, 7);
        assert_eq!(outcome.validation_result.exit_code, 0);
        assert!(outcome.validation_result.output.is_empty());
    }

    #[tokio::test]
    async fn validation_failure_does_not_promote_to_final_outcome_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runtime = Arc::new(StubRuntime::new());
        runtime
            .push_exec_response(StubExecResponse::success(["playbook ok"]))
            .await;
        runtime
            .push_exec_response(StubExecResponse::failure(2, ["assertion failed"]))
            .await;
        let engine = Engine::new(runtime, config);

        let request = ExecutionRequest::new("ws-ansible", ToolType::Ansible)
            .with_user_code("- hosts: local\n  tasks: []\n")
            .with_validation_code("- hosts: local\n  tasks: []\n");
        let (mut log_rx, final_rx) = engine.execute(CancellationToken::new(), request).unwrap();
        while log_rx.recv().await.is_some() {}

        let outcome = final_rx.await.unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.validation_result.exit_code, 2);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_closes_channels_and_removes_container() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runtime = Arc::new(StubRuntime::new());
        runtime
            .push_exec_response(
                StubExecResponse::success(["tick", "tick", "tick"])
                    .hang_for(Duration::from_secs(10)),
            )
            .await;
        let engine = Engine::new(runtime.clone(), config);

        let cancel = CancellationToken::new();
        let request = ExecutionRequest::new("ws-cancel", ToolType::Linux)
            .with_user_code("while true; do echo tick; sleep 1; done");
        let (mut log_rx, final_rx) = engine.execute(cancel.clone(), request).unwrap();

        let mut seen = 0;
        while let Some(_line) = log_rx.recv().await {
            seen += 1;
            if seen >= 3 {
                cancel.cancel();
                break;
            }
        }

        let outcome = tokio::time::timeout(Duration::from_secs(2), final_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.error.is_some());
        assert!(log_rx.recv().await.is_none());

        // cleanup runs after the final outcome is sent, in the same detached
        // task — poll briefly rather than assume it has already landed.
        for _ in 0..50 {
            if !runtime.removed_containers().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!runtime.removed_containers().await.is_empty());
    }
}
