//! Step Runner (§4.3): executes one command inside a running session
//! container, demultiplexing the exec stream line-by-line into a log sink and
//! capturing the final [`StepResult`].
//!
//! The demultiplexing itself lives in `docker_rt` (it is runtime-specific —
//! the bollard backend must undo the Engine API's framed bi-stream, the stub
//! backend needs none of that); this module is the thin `(tool_type, phase)`
//! dispatch plus transport/exit-code bookkeeping described in §4.3.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::instrument;

use crate::{docker_rt::ContainerRuntime, outcome::StepResult, strategy::ExecSpec};

pub struct StepRunner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl StepRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// `runStep(containerID, command, env, workingDir, logSink) -> StepResult`
    /// (§4.3). A transport-level failure reading the exec stream yields
    /// `exit_code = 0` with `error` set; callers must treat `error.is_some()`
    /// as failure regardless of `exit_code`.
    #[instrument(skip(self, spec, log_sink), fields(container.id = %container_id))]
    pub async fn run_step(
        &self,
        container_id: &str,
        spec: &ExecSpec,
        log_sink: UnboundedSender<String>,
    ) -> StepResult {
        match self
            .runtime
            .exec(
                container_id,
                spec.cmd.clone(),
                spec.env.clone(),
                "/workspace",
                log_sink,
            )
            .await
        {
            Ok(outcome) => StepResult {
                exit_code: outcome.exit_code,
                output: outcome.output,
                error: None,
            },
            Err(e) => StepResult {
                exit_code: 0,
                output: String::new(),
                error: Some(format!("{e}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::docker_rt::{stub::StubExecResponse, StubRuntime};

    use super::*;

    #[tokio::test]
    async fn captures_lines_in_order_and_exit_code() {
        let runtime = Arc::new(StubRuntime::new());
        runtime
            .push_exec_response(StubExecResponse::success(["one", "two", "three"]))
            .await;
        let runner = StepRunner::new(runtime);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let spec = ExecSpec {
            cmd: vec!["sh".into(), "run.sh".into()],
            env: Vec::new(),
        };
        let result = runner.run_step("stub-container-1", &spec, tx).await;

        assert_eq!(result.exit_code, 0);
        assert!(result.error.is_none());
        assert_eq!(result.output, "one\ntwo\nthree\n");

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_a_transport_error() {
        let runtime = Arc::new(StubRuntime::new());
        runtime
            .push_exec_response(StubExecResponse::failure(7, ["exiting"]))
            .await;
        let runner = StepRunner::new(runtime);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let spec = ExecSpec {
            cmd: vec!["sh".into(), "-c".into(), "exit 7".into()],
            env: Vec::new(),
        };
        let result = runner.run_step("stub-container-1", &spec, tx).await;

        assert_eq!(result.exit_code, 7);
        assert!(result.error.is_none());
        assert!(result.is_failure());
    }
}
