//! Local runner - host processes in a private scratch directory.
//!
//! Runs the command directly on the host with a fresh temporary directory
//! as its working directory. The configured image is ignored and the
//! configured working directory is mapped onto the scratch directory:
//! relative and absolute file paths both land inside it.
//!
//! Meant for development and tests. It offers no isolation beyond the
//! scratch directory.

use crate::constants::EXEC_TIMEOUT;
use crate::error::{Error, Result};
use crate::runtime::{ProcessRunner, RunOutput, RunRequest};
use crate::runtimes::run_command;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const RUNNER_NAME: &str = "local";

/// Runs programs as host processes.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    timeout: Duration,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRunner {
    pub fn new() -> Self {
        Self {
            timeout: EXEC_TIMEOUT,
        }
    }

    /// Sets the execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Maps a configured path into the scratch directory.
fn scratch_path(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::RunnerFailed {
            runner: RUNNER_NAME.to_string(),
            reason: format!("path '{}' escapes the working directory", path),
        });
    }
    Ok(root.join(relative))
}

#[async_trait]
impl ProcessRunner for LocalRunner {
    fn name(&self) -> &str {
        RUNNER_NAME
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, request: RunRequest) -> Result<RunOutput> {
        let Some((program, args)) = request.command.split_first() else {
            return Err(Error::RunnerFailed {
                runner: RUNNER_NAME.to_string(),
                reason: "empty command".to_string(),
            });
        };

        // Removed on drop, on every return path.
        let scratch = tempfile::TempDir::new()?;

        for file in &request.input_files {
            let target = scratch_path(scratch.path(), &file.path)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &file.content).await?;
        }
        debug!(
            dir = %scratch.path().display(),
            count = request.input_files.len(),
            "wrote input files"
        );

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(scratch.path());
        let out = run_command(RUNNER_NAME, program, cmd, request.stdin, self.timeout).await?;
        let exit_code = out.status.code().unwrap_or(-1);
        info!(program = %program, exit_code, "process finished");

        let mut files = HashMap::new();
        for path in &request.output_files {
            let source = scratch_path(scratch.path(), path)?;
            if let Ok(content) = tokio::fs::read(&source).await {
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
