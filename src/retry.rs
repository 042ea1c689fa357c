//! Validation Retrier (§4.4, K8s only): Kubernetes resources reach readiness
//! asynchronously after `kubectl apply`, so a single-shot validation would
//! race. This polls [`crate::step::StepRunner::run_step`] on a fixed tick
//! until it succeeds, the request is cancelled, or a deadline elapses.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    error::{EngineErrorKind, Result},
    outcome::StepResult,
    step::StepRunner,
    strategy::ExecSpec,
};

const TICK: Duration = Duration::from_secs(2);
const DEADLINE: Duration = Duration::from_secs(30);
/// `ceil(30/2) = 15` (§8 testable property 7) — the hard cap on attempts,
/// independent of the deadline check below, so a zero-latency `run_step`
/// cannot sneak in a 16th attempt at `t=30s` before the deadline is noticed.
const MAX_ATTEMPTS: u32 = 15;
const VALIDATING_BANNER: &str = " [K8s] Validating resources...";

fn timeout_result() -> StepResult {
    StepResult {
        exit_code: 1,
        output: "Timeout waiting for validation to succeed".to_string(),
        error: Some(EngineErrorKind::Timeout.to_string()),
    }
}

/// `runWithRetry(...) -> StepResult` (§4.4). Emits [`VALIDATING_BANNER`] to
/// `log_sink` before each attempt. The deadline is checked *before* each
/// `run_step` call (not just after), and the attempt count is additionally
/// bounded by [`MAX_ATTEMPTS`], so at most `ceil(30/2) = 15` attempts ever run
/// inside the deadline (§8 testable property 7).
#[instrument(skip(runner, spec, log_sink, cancel), fields(container.id = %container_id))]
pub async fn run_with_retry(
    runner: &StepRunner,
    container_id: &str,
    spec: &ExecSpec,
    log_sink: &UnboundedSender<String>,
    cancel: &CancellationToken,
) -> Result<StepResult> {
    let deadline = tokio::time::Instant::now() + DEADLINE;

    for attempt in 1..=MAX_ATTEMPTS {
        if tokio::time::Instant::now() >= deadline {
            return Ok(timeout_result());
        }

        let _ = log_sink.send(VALIDATING_BANNER.to_string());
        let result = runner.run_step(container_id, spec, log_sink.clone()).await;
        if !result.is_failure() {
            return Ok(result);
        }

        if attempt == MAX_ATTEMPTS {
            return Ok(timeout_result());
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(timeout_result());
        }

        tokio::select! {
            _ = tokio::time::sleep(TICK.min(remaining)) => {}
            _ = cancel.cancelled() => {
                return Err(EngineErrorKind::Cancelled.into());
            }
        }
    }

    Ok(timeout_result())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::docker_rt::{stub::StubExecResponse, StubRuntime};

    use super::*;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let runtime = Arc::new(StubRuntime::new());
        runtime
            .push_exec_response(StubExecResponse::failure(1, ["pod pending"]))
            .await;
        runtime
            .push_exec_response(StubExecResponse::failure(1, ["pod pending"]))
            .await;
        runtime
            .push_exec_response(StubExecResponse::success(["Running"]))
            .await;
        let runner = StepRunner::new(runtime);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let spec = ExecSpec {
            cmd: vec!["sh".into(), "validation.sh".into()],
            env: Vec::new(),
        };
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_with_retry(&runner, "stub-container-1", &spec, &tx, &cancel),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(result.exit_code, 0);
        let mut banners = 0;
        while let Ok(line) = rx.try_recv() {
            if line == VALIDATING_BANNER {
                banners += 1;
            }
        }
        assert_eq!(banners, 3);
    }

    /// §8 testable property 7: with a perpetually-failing validation step and
    /// simulated time, the loop must make no more than `ceil(30/2) = 15`
    /// attempts before timing out — not 16, which a deadline check placed
    /// only after `run_step` would allow at the zero-latency limit.
    #[tokio::test(start_paused = true)]
    async fn retries_at_most_fifteen_times_before_timeout() {
        let runtime = Arc::new(StubRuntime::new());
        for _ in 0..20 {
            runtime
                .push_exec_response(StubExecResponse::failure(1, ["pod pending"]))
                .await;
        }
        let runner = StepRunner::new(runtime);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let spec = ExecSpec {
            cmd: vec!["sh".into(), "validation.sh".into()],
            env: Vec::new(),
        };
        let result = run_with_retry(&runner, "stub-container-1", &spec, &tx, &cancel)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(result.error.is_some());

        let mut banners = 0;
        while let Ok(line) = rx.try_recv() {
            if line == VALIDATING_BANNER {
                banners += 1;
            }
        }
        assert_eq!(banners, MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_next_tick() {
        let runtime = Arc::new(StubRuntime::new());
        for _ in 0..20 {
            runtime
                .push_exec_response(StubExecResponse::failure(1, ["pod pending"]))
                .await;
        }
        let runner = StepRunner::new(runtime);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let spec = ExecSpec {
            cmd: vec!["sh".into(), "validation.sh".into()],
            env: Vec::new(),
        };
        let result = run_with_retry(&runner, "stub-container-1", &spec, &tx, &cancel).await;
        assert!(result.is_err());
    }
}
