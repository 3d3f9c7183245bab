//! # Docker Runner - One Container per Run
//!
//! Executes programs in a fresh container created from the configured image
//! through the docker CLI. Input files travel into the container and output
//! files out of it as tar streams over `docker container cp`.
//!
//! ## Command Sequence
//!
//! ```text
//! docker container create --attach STDOUT --attach STDERR --interactive
//!        --workdir <wd> --restart no --security-opt seccomp=unconfined
//!        --cap-drop <cap>... <image> <command>...          → container id
//! docker container cp - <id>:<wd>                          ← tar of input files
//! docker container start --interactive --attach <id>       ← stdin bytes
//! docker container cp <id>:<path> -                        → tar of one output
//! docker container rm --force <id>                         (always)
//! ```
//!
//! When the start call times out only the attached client is killed; the
//! forced removal stops the container itself.
//!
//! ## Security Model
//!
//! - Every capability in [`DROPPED_CAPABILITIES`] is dropped.
//! - The restart policy is `no`; a crashed simulation is never retried by
//!   docker.
//! - Image references are validated before they reach the command line.
//!
//! [`DROPPED_CAPABILITIES`]: crate::constants::DROPPED_CAPABILITIES

use crate::constants::{DOCKER_COMMAND_TIMEOUT, DROPPED_CAPABILITIES, EXEC_TIMEOUT};
use crate::error::{Error, Result};
use crate::image::validate_reference;
use crate::runtime::{InputFile, ProcessRunner, RunOutput, RunRequest};
use crate::runtimes::run_command;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const RUNNER_NAME: &str = "docker";

/// Runs programs in throwaway docker containers.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    docker: String,
    timeout: Duration,
}

impl Default for DockerRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRunner {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Uses a different docker compatible binary.
    pub fn with_binary(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            timeout: EXEC_TIMEOUT,
        }
    }

    /// Bounds the time a program may run inside its container.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments of `docker container create` for a request.
    pub fn create_args(request: &RunRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "container",
            "create",
            "--attach",
            "STDOUT",
            "--attach",
            "STDERR",
            "--interactive",
            "--workdir",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(request.working_directory.clone());
        args.extend(
            ["--restart", "no", "--security-opt", "seccomp=unconfined"]
                .iter()
                .map(|s| s.to_string()),
        );
        for cap in DROPPED_CAPABILITIES {
            args.push("--cap-drop".to_string());
            args.push(cap.to_string());
        }
        args.push(request.image.clone());
        args.extend(request.command.iter().cloned());
        args
    }

    /// Arguments of the final `docker container rm`; forced, so a container
    /// left running by a timed out start is stopped too.
    pub fn remove_args(id: &str) -> Vec<String> {
        ["container", "rm", "--force", id]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn docker(
        &self,
        operation: &str,
        args: Vec<String>,
        stdin: Vec<u8>,
        timeout: Duration,
    ) -> Result<Output> {
        let mut cmd = Command::new(&self.docker);
        cmd.args(&args);
        run_command(RUNNER_NAME, operation, cmd, stdin, timeout).await
    }

    async fn create(&self, request: &RunRequest) -> Result<String> {
        let out = self
            .docker(
                "container create",
                Self::create_args(request),
                Vec::new(),
                DOCKER_COMMAND_TIMEOUT,
            )
            .await?;
        if !out.status.success() {
            return Err(Error::RunnerFailed {
                runner: RUNNER_NAME.to_string(),
                reason: format!(
                    "container create: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            });
        }
        let id = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if id.is_empty() {
            return Err(Error::RunnerFailed {
                runner: RUNNER_NAME.to_string(),
                reason: "container create returned no id".to_string(),
            });
        }
        Ok(id)
    }

    async fn copy_in(&self, id: &str, working_directory: &str, files: &[InputFile]) -> Result<()> {
        let mut relative = Vec::new();
        let mut absolute = Vec::new();
        for file in files {
            match file.path.strip_prefix('/') {
                Some(stripped) => absolute.push((stripped, file.content.as_slice())),
                None => relative.push((file.path.as_str(), file.content.as_slice())),
            }
        }

        for (destination, entries) in [(working_directory, relative), ("/", absolute)] {
            if entries.is_empty() {
                continue;
            }
            let archive = build_archive(&entries)?;
            let out = self
                .docker(
                    "container cp in",
                    vec![
                        "container".to_string(),
                        "cp".to_string(),
                        "-".to_string(),
                        format!("{}:{}", id, destination),
                    ],
                    archive,
                    DOCKER_COMMAND_TIMEOUT,
                )
                .await?;
            if !out.status.success() {
                return Err(Error::RunnerFailed {
                    runner: RUNNER_NAME.to_string(),
                    reason: format!(
                        "copy into {}:{}: {}",
                        id,
                        destination,
                        String::from_utf8_lossy(&out.stderr).trim()
                    ),
                });
            }
            debug!(container = id, count = entries.len(), "copied input files");
        }
        Ok(())
    }

    async fn copy_out(&self, id: &str, working_directory: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let source = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", working_directory.trim_end_matches('/'), path)
        };
        let out = self
            .docker(
                "container cp out",
                vec![
                    "container".to_string(),
                    "cp".to_string(),
                    format!("{}:{}", id, source),
                    "-".to_string(),
                ],
                Vec::new(),
                DOCKER_COMMAND_TIMEOUT,
            )
            .await?;
        if !out.status.success() {
            debug!(container = id, path = %source, "output file not present");
            return Ok(None);
        }
        first_file(&out.stdout)
    }

    async fn remove(&self, id: &str) {
        let result = self
            .docker(
                "container rm",
                Self::remove_args(id),
                Vec::new(),
                DOCKER_COMMAND_TIMEOUT,
            )
            .await;
        match result {
            Ok(out) if out.status.success() => debug!(container = id, "removed container"),
            Ok(out) => warn!(
                container = id,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "failed to remove container"
            ),
            Err(e) => warn!(container = id, error = %e, "failed to remove container"),
        }
    }

    async fn run_in_container(&self, id: &str, request: RunRequest) -> Result<RunOutput> {
        self.copy_in(id, &request.working_directory, &request.input_files)
            .await?;

        let out = self
            .docker(
                "container start",
                vec![
                    "container".to_string(),
                    "start".to_string(),
                    "--interactive".to_string(),
                    "--attach".to_string(),
                    id.to_string(),
                ],
                request.stdin.clone(),
                self.timeout,
            )
            .await?;
        let exit_code = out.status.code().unwrap_or(-1);
        info!(container = id, exit_code, "container finished");

        let mut files = HashMap::new();
        for path in &request.output_files {
            if let Some(content) = self
                .copy_out(id, &request.working_directory, path)
                .await?
            {
                files.insert(path.clone(), content);
            }
        }

        Ok(RunOutput {
            exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
            files,
        })
    }
}

#[async_trait]
impl ProcessRunner for DockerRunner {
    fn name(&self) -> &str {
        RUNNER_NAME
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.docker)
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn run(&self, request: RunRequest) -> Result<RunOutput> {
        validate_reference(&request.image)?;
        if request.command.is_empty() {
            return Err(Error::RunnerFailed {
                runner: RUNNER_NAME.to_string(),
                reason: "empty command".to_string(),
            });
        }

        let id = self.create(&request).await?;
        debug!(container = %id, image = %request.image, "created container");

        let result = self.run_in_container(&id, request).await;
        self.remove(&id).await;
        result
    }
}

/// Packs files into an in-memory tar archive.
fn build_archive(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder.append_data(&mut header, path, *content)?;
    }
    Ok(builder.into_inner()?)
}

/// Returns the content of the first regular file in a tar archive.
fn first_file(archive: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(archive);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(Some(content));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_args() {
        let request = RunRequest {
            image: "quakeledger:latest".to_string(),
            working_directory: "/usr/share/git/quakeledger".to_string(),
            command: vec!["python3".to_string(), "eventquery.py".to_string()],
            ..Default::default()
        };
        let args = DockerRunner::create_args(&request);
        assert_eq!(&args[..4], ["container", "create", "--attach", "STDOUT"]);
        let wd = args.iter().position(|a| a == "--workdir").unwrap();
        assert_eq!(args[wd + 1], "/usr/share/git/quakeledger");
        assert_eq!(
            args.iter().filter(|a| *a == "--cap-drop").count(),
            DROPPED_CAPABILITIES.len()
        );
        assert_eq!(
            &args[args.len() - 3..],
            ["quakeledger:latest", "python3", "eventquery.py"]
        );
    }

    #[test]
    fn test_remove_is_forced() {
        assert_eq!(
            DockerRunner::remove_args("4f1c"),
            ["container", "rm", "--force", "4f1c"]
        );
    }

    #[test]
    fn test_archive_round_trip() {
        let archive = build_archive(&[("events.xml", b"<a/>".as_slice())]).unwrap();
        assert_eq!(first_file(&archive).unwrap(), Some(b"<a/>".to_vec()));
        let empty = build_archive(&[]).unwrap();
        assert_eq!(first_file(&empty).unwrap(), None);
    }
}
