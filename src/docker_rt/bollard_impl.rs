//! Direct `bollard` (Docker Engine API) backed [`super::ContainerRuntime`].
//!
//! Grounded in the teacher's `api_docker` module for the process-wide
//! `bollard::Docker` singleton and its `tracing::instrument` conventions;
//! the exec-stream demultiplexing here is new authorship — neither the
//! teacher's `api_docker` (which only attaches to a container's own
//! stdout/stderr) nor its `cli_docker` (which shells out to the `docker`
//! binary) implements `docker exec` against a running container, which is
//! what the two-phase session protocol (§9 "Two-phase session") requires.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    container::{Config, CreateContainerOptions, LogOutput, RemoveContainerOptions},
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    secret::HostConfig,
};
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, instrument, warn};

use super::{ContainerRuntime, CreateContainerSpec, ExecOutcome, ImageNotFoundError};
use crate::{
    api_docker::docker_socket::get_or_init_default_docker_instance,
    error::{EngineErrorKind, Result, StackableErr},
};

pub struct BollardRuntime;

impl BollardRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BollardRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Pushes `chunk` through `buf`, emitting every complete line to `sink` and
/// appending it to `accumulated`. Any trailing partial line (no `\n` yet)
/// stays in `buf` for the next chunk — necessary because the runtime may
/// split a single line, and even a single multi-byte UTF-8 character, across
/// multiple frames. `buf` accumulates raw bytes rather than a `String` so a
/// character split across two frames decodes correctly once both halves have
/// arrived, instead of each half lossy-decoding to U+FFFD on its own.
fn demux_chunk(
    chunk: &[u8],
    buf: &mut Vec<u8>,
    accumulated: &mut String,
    sink: &UnboundedSender<String>,
) {
    buf.extend_from_slice(chunk);
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line_bytes: Vec<u8> = buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
        accumulated.push_str(&line);
        accumulated.push('\n');
        let _ = sink.send(line);
    }
}

fn flush_partial(buf: &mut Vec<u8>, accumulated: &mut String, sink: &UnboundedSender<String>) {
    if !buf.is_empty() {
        let line = String::from_utf8_lossy(buf).into_owned();
        accumulated.push_str(&line);
        accumulated.push('\n');
        let _ = sink.send(line);
        buf.clear();
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    #[instrument(skip(self))]
    async fn ensure_network(&self, name: &str) -> Result<()> {
        let docker = get_or_init_default_docker_instance().await.stack()?;
        let result = docker
            .create_network(bollard::network::CreateNetworkOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if format!("{e}").contains("already exists") => {
                debug!(network = %name, "sandbox network already exists");
                Ok(())
            }
            Err(e) => Err(e).stack_err_locationless("creating sandbox network"),
        }
    }

    #[instrument(skip(self, spec), fields(container.name = %spec.name))]
    async fn create_container(&self, spec: &CreateContainerSpec) -> Result<String> {
        let docker = get_or_init_default_docker_instance().await.stack()?;

        let binds: Vec<String> = spec
            .mounts
            .iter()
            .map(|m| format!("{}:{}", m.host_path, m.container_path))
            .collect();
        let labels: HashMap<String, String> = spec.labels.iter().cloned().collect();

        let result = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    ..Default::default()
                }),
                Config {
                    image: Some(spec.image.clone()),
                    labels: Some(labels),
                    // idle entrypoint: blocks indefinitely so the Step Runner
                    // can issue multiple `exec` calls into this same
                    // container (§4.2 "Idle entrypoint").
                    entrypoint: Some(vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()]),
                    host_config: Some(HostConfig {
                        binds: Some(binds),
                        auto_remove: Some(false),
                        network_mode: Some(spec.network.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await;

        match result {
            Ok(response) => Ok(response.id),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            }) => Err(ImageNotFoundError(spec.image.clone())).stack_err_locationless(message),
            Err(e) => Err(e).stack_err_locationless("creating session container"),
        }
    }

    #[instrument(skip(self))]
    async fn start_container(&self, container_id: &str) -> Result<()> {
        let docker = get_or_init_default_docker_instance().await.stack()?;
        docker
            .start_container::<String>(container_id, None)
            .await
            .stack_err_locationless("starting session container")
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let docker = get_or_init_default_docker_instance().await.stack()?;
        match docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if format!("{e}").contains("No such container") => Ok(()),
            Err(e) => Err(e).stack_err_locationless("removing session container"),
        }
    }

    #[instrument(skip(self))]
    async fn pull_image(&self, image: &str) -> Result<()> {
        let docker = get_or_init_default_docker_instance().await.stack()?;
        let mut stream = docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                return Err(e).stack_err_locationless("pulling image");
            }
        }
        Ok(())
    }

    #[instrument(skip(self, cmd, env, log_sink))]
    async fn exec(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        env: Vec<(String, String)>,
        working_dir: &str,
        log_sink: UnboundedSender<String>,
    ) -> Result<ExecOutcome> {
        let docker = get_or_init_default_docker_instance().await.stack()?;

        let env: Vec<String> = env.into_iter().map(|(k, v)| format!("{k}={v}")).collect();

        let created = docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    env: Some(env),
                    working_dir: Some(working_dir.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .stack_err_locationless("creating exec")?;

        let started = docker
            .start_exec(&created.id, None)
            .await
            .stack_err_locationless("starting exec")?;

        let mut accumulated = String::new();

        // The runtime's exec attach returns a multiplexed frame stream with
        // an 8-byte header per frame (§9 "Stream plumbing"); bollard already
        // decodes that into `LogOutput` variants, so only line-splitting is
        // left to us here.
        if let StartExecResults::Attached { mut output, .. } = started {
            let mut buf_out: Vec<u8> = Vec::new();
            let mut buf_err: Vec<u8> = Vec::new();
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdErr { message }) => {
                        demux_chunk(&message, &mut buf_err, &mut accumulated, &log_sink);
                    }
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        demux_chunk(&message, &mut buf_out, &mut accumulated, &log_sink);
                    }
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(e) => {
                        warn!("exec stream read failed: {e}");
                        // §4.3 "A transport error reading the exit code
                        // yields exitCode = 0 with error != nil" — a failure
                        // reading the demuxed stream is the same class of
                        // transport error, so it must surface as `Err` here
                        // rather than a silent success (§7 "Stream errors").
                        return Err(EngineErrorKind::Stream(e.to_string()).into());
                    }
                }
            }
            flush_partial(&mut buf_out, &mut accumulated, &log_sink);
            flush_partial(&mut buf_err, &mut accumulated, &log_sink);
        }

        let inspected = docker
            .inspect_exec(&created.id)
            .await
            .stack_err_locationless("inspecting completed exec")?;
        let exit_code = inspected.exit_code.unwrap_or(0);

        Ok(ExecOutcome {
            exit_code,
            output: accumulated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A multi-byte UTF-8 character ("é", `0xC3 0xA9`) split across two
    /// frames must decode correctly once both halves have arrived, rather
    /// than each half lossy-decoding to U+FFFD on its own (§8 testable
    /// property 4 / §4.3 "Captured text is accumulated").
    #[test]
    fn demux_chunk_reassembles_utf8_split_across_frames() {
        let mut buf = Vec::new();
        let mut accumulated = String::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let line = "caf\u{e9} au lait\n".as_bytes().to_vec();
        let (first, second) = line.split_at(4); // splits the 2-byte 'é' in half
        demux_chunk(first, &mut buf, &mut accumulated, &tx);
        demux_chunk(second, &mut buf, &mut accumulated, &tx);

        assert_eq!(accumulated, "café au lait\n");
        assert_eq!(rx.try_recv().unwrap(), "café au lait");
        assert!(buf.is_empty());
    }

    #[test]
    fn flush_partial_emits_trailing_line_without_newline() {
        let mut buf = b"no newline yet".to_vec();
        let mut accumulated = String::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        flush_partial(&mut buf, &mut accumulated, &tx);

        assert!(buf.is_empty());
        assert_eq!(accumulated, "no newline yet\n");
        assert_eq!(rx.try_recv().unwrap(), "no newline yet");
    }
}
