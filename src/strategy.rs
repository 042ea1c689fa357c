//! Per-[`ToolType`] strategy table (§9 "Dynamic dispatch over tool types").
//!
//! A real reimplementation keeps this as one closed `match` rather than the
//! scattered per-component switches the original service has across its
//! preparer, controller, and command builder — every tool-specific fact
//! (image, mounts, commands, env, file layout, state harvest rule) lives
//! here.

use crate::{
    config::EngineConfig,
    request::{ExecutionRequest, ToolType},
};

/// A single file the Preparer writes into the workspace before the
/// container starts (§6 "Workspace file layout").
pub struct WorkspaceFile {
    /// Path relative to the workspace root.
    pub relative_path: &'static str,
    pub contents: Vec<u8>,
    /// `true` for files invoked directly as scripts (mode 0755).
    pub executable: bool,
}

/// A bind mount beyond the workspace mount every session container gets.
pub struct ExtraMount {
    pub host_path: String,
    pub container_path: String,
}

/// One `exec` invocation's command line and environment.
#[derive(Clone)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// How the State Harvester extracts persistent state after a successful run
/// (§4.5).
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum HarvestRule {
    None,
    /// Read `<workspace>/terraform.tfstate`; a missing file is not an error.
    TerraformState,
}

/// The full per-tool-type record. One instance per [`ToolType`], built by
/// [`strategy_for`].
pub struct ToolStrategy {
    pub image: &'static str,
    pub workspace_files: Vec<WorkspaceFile>,
    pub extra_mounts: Vec<ExtraMount>,
    pub execute: ExecSpec,
    pub validate: Option<ExecSpec>,
    pub harvest: HarvestRule,
}

const TF_ENV: &[(&str, &str)] = &[("TF_PLUGIN_CACHE_DIR", "/tmp/plugins")];

/// Builds the strategy for a request's tool type. Image references are an
/// implementation choice (no wire contract depends on the exact string,
/// §5 SPEC_FULL); pinned here and documented in DESIGN.md.
pub fn strategy_for(request: &ExecutionRequest, config: &EngineConfig) -> ToolStrategy {
    let user_code = crate::misc::normalize_line_endings(&request.user_code);

    match request.tool_type {
        ToolType::Terraform => {
            let provider = config.terraform_provider_content().to_owned();
            let mut workspace_files = vec![
                WorkspaceFile {
                    relative_path: "main.tf",
                    contents: user_code.into_bytes(),
                    executable: false,
                },
                WorkspaceFile {
                    relative_path: "provider.tf",
                    contents: provider.into_bytes(),
                    executable: false,
                },
            ];
            if !request.prior_state.is_empty() {
                workspace_files.push(WorkspaceFile {
                    relative_path: "terraform.tfstate",
                    contents: request.prior_state.clone(),
                    executable: false,
                });
            }
            ToolStrategy {
                image: "hashicorp/terraform:1.9",
                workspace_files,
                extra_mounts: Vec::new(),
                execute: ExecSpec {
                    cmd: vec![
                        "sh".into(),
                        "-c".into(),
                        "mkdir -p /tmp/plugins && rm -rf .terraform/ && terraform init \
                         -upgrade && terraform apply -auto-approve"
                            .into(),
                    ],
                    env: TF_ENV
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
                validate: None,
                harvest: HarvestRule::TerraformState,
            }
        }
        ToolType::Ansible => {
            let mut workspace_files = vec![
                WorkspaceFile {
                    relative_path: "playbook.yml",
                    contents: user_code.into_bytes(),
                    executable: false,
                },
                WorkspaceFile {
                    relative_path: "inventory.ini",
                    contents: crate::config::ANSIBLE_LOCAL_INVENTORY.as_bytes().to_vec(),
                    executable: false,
                },
            ];
            let validate = if request.validation_code.is_empty() {
                None
            } else {
                workspace_files.push(WorkspaceFile {
                    relative_path: "validation.yml",
                    contents: crate::misc::normalize_line_endings(&request.validation_code)
                        .into_bytes(),
                    executable: false,
                });
                Some(ExecSpec {
                    cmd: vec![
                        "ansible-playbook".into(),
                        "-i".into(),
                        "inventory.ini".into(),
                        "validation.yml".into(),
                    ],
                    env: Vec::new(),
                })
            };
            ToolStrategy {
                image: "williamyeh/ansible:alpine3",
                workspace_files,
                extra_mounts: Vec::new(),
                execute: ExecSpec {
                    cmd: vec![
                        "ansible-playbook".into(),
                        "-i".into(),
                        "inventory.ini".into(),
                        "playbook.yml".into(),
                    ],
                    env: Vec::new(),
                },
                validate,
                harvest: HarvestRule::None,
            }
        }
        ToolType::Linux => ToolStrategy {
            image: "alpine:3.20",
            workspace_files: vec![WorkspaceFile {
                relative_path: "run.sh",
                contents: user_code.into_bytes(),
                executable: true,
            }],
            extra_mounts: Vec::new(),
            execute: ExecSpec {
                cmd: vec!["sh".into(), "run.sh".into()],
                env: Vec::new(),
            },
            validate: None,
            harvest: HarvestRule::None,
        },
        ToolType::Docker => ToolStrategy {
            image: "docker:27-cli",
            workspace_files: vec![WorkspaceFile {
                relative_path: "run.sh",
                contents: user_code.into_bytes(),
                executable: true,
            }],
            extra_mounts: vec![ExtraMount {
                host_path: "/var/run/docker.sock".into(),
                container_path: "/var/run/docker.sock".into(),
            }],
            execute: ExecSpec {
                cmd: vec!["sh".into(), "run.sh".into()],
                env: Vec::new(),
            },
            validate: None,
            harvest: HarvestRule::None,
        },
        ToolType::K8s => {
            let mut workspace_files = vec![
                WorkspaceFile {
                    relative_path: "run.sh",
                    contents: user_code.into_bytes(),
                    executable: true,
                },
                WorkspaceFile {
                    relative_path: "kubeconfig.yaml",
                    // filled in by the Preparer from the operator-provisioned
                    // kubeconfig, rewritten host -> `k3s` (§4.1)
                    contents: Vec::new(),
                    executable: false,
                },
            ];
            let validate = if request.validation_code.is_empty() {
                None
            } else {
                workspace_files.push(WorkspaceFile {
                    relative_path: "validation.sh",
                    contents: crate::misc::normalize_line_endings(&request.validation_code)
                        .into_bytes(),
                    executable: true,
                });
                Some(ExecSpec {
                    cmd: vec!["sh".into(), "validation.sh".into()],
                    env: vec![(
                        "KUBECONFIG".to_string(),
                        "/workspace/kubeconfig.yaml".to_string(),
                    )],
                })
            };
            ToolStrategy {
                image: "bitnami/kubectl:1.30",
                workspace_files,
                extra_mounts: Vec::new(),
                execute: ExecSpec {
                    cmd: vec!["sh".into(), "run.sh".into()],
                    env: vec![(
                        "KUBECONFIG".to_string(),
                        "/workspace/kubeconfig.yaml".to_string(),
                    )],
                },
                validate,
                harvest: HarvestRule::None,
            }
        }
        ToolType::GithubActions => ToolStrategy {
            image: "docker:cli",
            workspace_files: vec![WorkspaceFile {
                relative_path: ".github/workflows/main.yml",
                contents: user_code.into_bytes(),
                executable: false,
            }],
            extra_mounts: vec![ExtraMount {
                host_path: "/var/run/docker.sock".into(),
                container_path: "/var/run/docker.sock".into(),
            }],
            execute: ExecSpec {
                cmd: vec![
                    "sh".into(),
                    "-c".into(),
                    "apk add --no-cache act --repository=http://dl-cdn.alpinelinux.org/alpine/edge/community \
                     && act push --bind --directory /workspace -P \
                     ubuntu-latest=node:18-buster-slim --container-architecture linux/amd64"
                        .into(),
                ],
                env: Vec::new(),
            },
            validate: None,
            harvest: HarvestRule::None,
        },
    }
}
