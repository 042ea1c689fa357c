//! Process-wide configuration, loaded once at startup (§6 "Environment
//! configuration", §9's resolution of the provider-override open question).

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, StackableErr};

/// Default Terraform provider stub (§6), pointing every AWS-family endpoint
/// at the simulated cloud backend. Used unless an operator override file
/// exists at `<tempRoot>/data/terraform-provider.tf`.
pub const DEFAULT_TERRAFORM_PROVIDER: &str = r#"provider "aws" {
  region                      = "us-east-1"
  access_key                  = "test"
  secret_key                  = "test"
  s3_use_path_style           = true
  skip_credentials_validation = true
  skip_metadata_api_check     = true
  skip_requesting_account_id  = true

  endpoints {
    s3         = "http://simulador-iac:4566"
    s3control  = "http://simulador-iac:4566"
    ec2        = "http://simulador-iac:4566"
    lambda     = "http://simulador-iac:4566"
    sqs        = "http://simulador-iac:4566"
    iam        = "http://simulador-iac:4566"
    sts        = "http://simulador-iac:4566"
    route53    = "http://simulador-iac:4566"
  }
}
"#;

/// Literal Ansible inventory (§6): a single `local` group pointing at
/// `localhost` with a local connection plugin, so playbooks run inside the
/// container without needing SSH.
pub const ANSIBLE_LOCAL_INVENTORY: &str = "[local]\nlocalhost ansible_connection=local";

/// Process-wide configuration, read once at [`EngineConfig::from_env`] and
/// shared (cheaply cloned — all fields are small) across every run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Absolute path on the host corresponding to `temp_root` as the
    /// container-runtime daemon sees it. Required because the service's own
    /// view of its filesystem and the daemon's view can differ (the service
    /// itself may run inside a container) — see `spec.md` §9.
    pub host_exec_root: PathBuf,
    /// Path to the same directory as the service itself sees it. Used for
    /// the service's own file I/O (the Preparer, the Harvester).
    pub temp_root: PathBuf,
    /// Name of the shared sandbox network the session container joins.
    pub docker_network: String,
    /// Terraform provider override content, if an operator placed a file at
    /// `<temp_root>/data/terraform-provider.tf`. Read once here rather than
    /// per run, per §9's open question resolution (treat it as a
    /// process-wide value, not re-read under concurrent modification).
    pub terraform_provider_override: Option<String>,
    /// Path to the operator-provisioned kubeconfig fed to K8s workspaces.
    pub kubeconfig_source_path: PathBuf,
}

impl EngineConfig {
    /// Loads configuration from the process environment. Fails closed:
    /// missing `HOST_EXEC_PATH` is a startup error, not deferred to the
    /// first run.
    pub async fn from_env() -> Result<Self> {
        let host_exec_root = std::env::var("HOST_EXEC_PATH")
            .stack_err_locationless("HOST_EXEC_PATH environment variable is required")?;
        let temp_root = std::env::var("TEMP_ROOT").unwrap_or_else(|_| host_exec_root.clone());
        let docker_network =
            std::env::var("DOCKER_NETWORK").unwrap_or_else(|_| "sandbox".to_owned());
        let kubeconfig_source_path = std::env::var("KUBECONFIG_SOURCE_PATH")
            .unwrap_or_else(|_| "/operator/kubeconfig".to_owned());

        let override_path = std::env::var("TERRAFORM_PROVIDER_OVERRIDE_PATH").unwrap_or_else(
            |_| {
                Path::new(&temp_root)
                    .join("data")
                    .join("terraform-provider.tf")
                    .to_string_lossy()
                    .into_owned()
            },
        );
        let terraform_provider_override = match tokio::fs::read_to_string(&override_path).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(
                    path = %override_path,
                    "could not read terraform provider override, falling back to default: {e}"
                );
                None
            }
        };

        Ok(Self {
            host_exec_root: PathBuf::from(host_exec_root),
            temp_root: PathBuf::from(temp_root),
            docker_network,
            terraform_provider_override,
            kubeconfig_source_path: PathBuf::from(kubeconfig_source_path),
        })
    }

    /// Service-internal path for a workspace.
    pub fn workspace_path(&self, workspace_id: &str) -> PathBuf {
        self.temp_root.join(workspace_id)
    }

    /// Daemon-visible bind-mount source for a workspace.
    pub fn host_workspace_path(&self, workspace_id: &str) -> PathBuf {
        self.host_exec_root.join(workspace_id)
    }

    pub fn terraform_provider_content(&self) -> &str {
        self.terraform_provider_override
            .as_deref()
            .unwrap_or(DEFAULT_TERRAFORM_PROVIDER)
    }
}
