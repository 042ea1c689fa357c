//! State Harvester (§4.5): reads back a tool-specific state artifact from the
//! workspace after a successful run. Only Terraform currently carries state
//! forward between runs of the same workspace.

use std::path::Path;

use tracing::instrument;

use crate::{
    error::{Result, StackableErr},
    request::ToolType,
};

const TERRAFORM_STATE_FILE: &str = "terraform.tfstate";

/// `harvest(workspaceDir, toolType) -> (bytes, error)` (§4.5). A missing
/// state file is not an error — `apply` may have failed before writing state
/// — and yields empty bytes. Per §9's fsync note, the directory is fsync'd
/// before the read so a virtual-filesystem bind mount cannot serve a stale
/// view of a file the execute step just wrote.
#[instrument(skip(workspace_dir))]
pub async fn harvest(workspace_dir: &Path, tool_type: ToolType) -> Result<Vec<u8>> {
    if tool_type != ToolType::Terraform {
        return Ok(Vec::new());
    }

    fsync_dir_best_effort(workspace_dir).await;

    let state_path = workspace_dir.join(TERRAFORM_STATE_FILE);
    match tokio::fs::read(&state_path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).stack_err_locationless("reading terraform.tfstate after apply"),
    }
}

/// Best-effort directory fsync so a bind-mounted virtual filesystem can't
/// serve a stale read of a file the container just wrote (§9 "Terraform runs
/// write `terraform.tfstate`... the source does not [fsync], and races are
/// possible"). Failure here is not fatal: most native filesystems never need
/// it and the subsequent read simply falls back to "missing is not an
/// error".
#[cfg(unix)]
async fn fsync_dir_best_effort(dir: &Path) {
    use tokio::io::AsyncWriteExt;
    if let Ok(file) = tokio::fs::File::open(dir).await {
        let mut file = file;
        let _ = file.sync_all().await;
    }
}

#[cfg(not(unix))]
async fn fsync_dir_best_effort(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_state_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = harvest(dir.path(), ToolType::Terraform).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn reads_back_terraform_state() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(TERRAFORM_STATE_FILE), b"{\"resources\":[]}")
            .await
            .unwrap();
        let result = harvest(dir.path(), ToolType::Terraform).await.unwrap();
        assert_eq!(result, b"{\"resources\":[]}");
    }

    #[tokio::test]
    async fn non_terraform_tool_types_never_harvest() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(TERRAFORM_STATE_FILE), b"leftover")
            .await
            .unwrap();
        let result = harvest(dir.path(), ToolType::Linux).await.unwrap();
        assert!(result.is_empty());
    }
}
