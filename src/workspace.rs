//! Workspace Preparer (§4.1).

use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::{
    config::EngineConfig,
    error::{Result, StackableErr},
    request::{ExecutionRequest, ToolType},
    strategy::strategy_for,
};

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = tokio::fs::metadata(path).await.stack_err_locationless(
        "reading metadata to mark workspace file executable",
    )?.permissions();
    perms.set_mode(0o755);
    tokio::fs::set_permissions(path, perms)
        .await
        .stack_err_locationless("setting workspace file executable")
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Reads the operator-provisioned kubeconfig and rewrites its server address
/// from `127.0.0.1`/`localhost` to the in-network service name `k3s` (§4.1).
/// A missing file is fatal: the sandbox cluster is down.
async fn read_and_rewrite_kubeconfig(config: &EngineConfig) -> Result<Vec<u8>> {
    let raw = tokio::fs::read_to_string(&config.kubeconfig_source_path)
        .await
        .stack_err_locationless(
            "missing kubeconfig: the sandbox Kubernetes cluster is not provisioned",
        )?;
    let rewritten = raw.replace("127.0.0.1", "k3s").replace("localhost", "k3s");
    Ok(rewritten.into_bytes())
}

/// `prepare(request) -> absolutePath | error` (§4.1). Idempotent for a given
/// `workspace_id`: the target directory is purged and recreated from
/// scratch every call.
#[instrument(skip_all, fields(workspace_id = %request.workspace_id, tool_type = ?request.tool_type))]
pub async fn prepare(request: &ExecutionRequest, config: &EngineConfig) -> Result<PathBuf> {
    let workspace_path = config.workspace_path(&request.workspace_id);

    if tokio::fs::try_exists(&workspace_path)
        .await
        .stack_err_locationless("checking for stale workspace directory")?
    {
        tokio::fs::remove_dir_all(&workspace_path)
            .await
            .stack_err_locationless("purging stale workspace directory")?;
    }
    tokio::fs::create_dir_all(&workspace_path)
        .await
        .stack_err_locationless("creating workspace directory")?;

    let mut strategy = strategy_for(request, config);

    if request.tool_type == ToolType::K8s {
        let kubeconfig = read_and_rewrite_kubeconfig(config).await.stack()?;
        for file in &mut strategy.workspace_files {
            if file.relative_path == "kubeconfig.yaml" {
                file.contents = kubeconfig.clone();
            }
        }
    }

    for file in &strategy.workspace_files {
        let dest = workspace_path.join(file.relative_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .stack_err_locationless("creating workspace scaffold subdirectory")?;
        }
        tokio::fs::write(&dest, &file.contents)
            .await
            .stack_err_locationless("writing workspace scaffold file")?;
        if file.executable {
            mark_executable(&dest).await.stack()?;
        }
    }

    Ok(workspace_path)
}

/// Deletes the workspace directory unconditionally. Called on every exit
/// path of the orchestrator (Invariant 2: the directory exists for exactly
/// `[prepare, orchestrator return]`).
#[instrument(skip_all, fields(workspace_id = %workspace_id))]
pub async fn teardown(config: &EngineConfig, workspace_id: &str) -> Result<()> {
    let workspace_path = config.workspace_path(workspace_id);
    match tokio::fs::remove_dir_all(&workspace_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).stack_err_locationless("removing workspace directory"),
    }
}
