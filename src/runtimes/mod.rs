//! Process runner implementations.
//!
//! Each runner executes one assembled program per call and cleans up after
//! itself. The [`RunnerRegistry`] selects a runner by name.

pub mod docker;
pub mod local;

pub use self::docker::DockerRunner;
pub use self::local::LocalRunner;

use crate::error::{Error, Result};
use crate::runtime::ProcessRunner;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Registry of process runners.
pub struct RunnerRegistry {
    runners: Vec<Arc<dyn ProcessRunner>>,
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerRegistry {
    /// Creates a registry with the docker and local runners.
    pub fn new() -> Self {
        Self {
            runners: vec![Arc::new(DockerRunner::new()), Arc::new(LocalRunner::new())],
        }
    }

    /// Adds a runner. [`get`](Self::get) returns the first match by name.
    pub fn register(&mut self, runner: Arc<dyn ProcessRunner>) {
        self.runners.push(runner);
    }

    /// Returns all registered runners.
    pub fn all(&self) -> &[Arc<dyn ProcessRunner>] {
        &self.runners
    }

    /// Returns all available runners.
    pub fn available(&self) -> Vec<Arc<dyn ProcessRunner>> {
        self.runners
            .iter()
            .filter(|r| r.is_available())
            .cloned()
            .collect()
    }

    /// Gets a runner by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProcessRunner>> {
        self.runners.iter().find(|r| r.name() == name).cloned()
    }
}

/// Spawns a command, feeds it stdin and collects its output within a timeout.
///
/// The child is killed when the timeout elapses.
pub(crate) async fn run_command(
    runner: &str,
    operation: &str,
    mut cmd: Command,
    stdin: Vec<u8>,
    timeout: Duration,
) -> Result<Output> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| Error::RunnerFailed {
        runner: runner.to_string(),
        reason: format!("{}: {}", operation, e),
    })?;

    // Written concurrently so a program that produces output before
    // draining stdin cannot deadlock against us.
    let writer = child.stdin.take().map(|mut pipe| {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&stdin).await {
                debug!(error = %e, "stdin closed early");
            }
        })
    });

    let output = tokio::time::timeout(timeout, child.wait_with_output()).await;

    if let Some(writer) = writer {
        let _ = writer.await;
    }

    match output {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err(Error::RunnerFailed {
            runner: runner.to_string(),
            reason: format!("{}: {}", operation, e),
        }),
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            duration: timeout,
        }),
    }
}
