//! Version markers folded into cache keys.
//!
//! Upgrading the runner or this service may change results, so both versions
//! take part in the key when a [`VersionHandler`] reports them.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::constants::DOCKER_COMMAND_TIMEOUT;
use crate::error::{Error, Result};
use crate::runtimes::run_command;

/// Reports versions that invalidate cached results when they change.
#[async_trait]
pub trait VersionHandler: Send + Sync {
    /// Version of the execution environment (e.g. the docker daemon).
    async fn runner_version(&self) -> Option<String>;

    /// Version of the service wrapping the programs.
    fn service_version(&self) -> Option<String>;
}

/// Reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVersionHandler;

#[async_trait]
impl VersionHandler for NoVersionHandler {
    async fn runner_version(&self) -> Option<String> {
        None
    }

    fn service_version(&self) -> Option<String> {
        None
    }
}

/// Reports fixed versions.
#[derive(Debug, Clone, Default)]
pub struct StaticVersionHandler {
    runner: Option<String>,
    service: Option<String>,
}

impl StaticVersionHandler {
    pub fn new(runner: Option<String>, service: Option<String>) -> Self {
        Self { runner, service }
    }

    /// Reports this crate's version as service version.
    pub fn crate_version() -> Self {
        Self {
            runner: None,
            service: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

#[async_trait]
impl VersionHandler for StaticVersionHandler {
    async fn runner_version(&self) -> Option<String> {
        self.runner.clone()
    }

    fn service_version(&self) -> Option<String> {
        self.service.clone()
    }
}

/// Asks the docker daemon for its version, and reports this crate's version
/// as service version.
///
/// The daemon version is remembered once a query succeeds. A failed query is
/// retried on the next call.
#[derive(Debug)]
pub struct DockerVersionHandler {
    docker: String,
    timeout: Duration,
    server_version: OnceCell<String>,
}

impl Default for DockerVersionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerVersionHandler {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Uses a different docker compatible binary.
    pub fn with_binary(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            timeout: DOCKER_COMMAND_TIMEOUT,
            server_version: OnceCell::new(),
        }
    }

    /// Bounds each version query.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query(&self) -> Result<String> {
        let mut cmd = Command::new(&self.docker);
        cmd.args(["version", "--format", "{{.Server.Version}}"]);
        let out = run_command(&self.docker, "version", cmd, Vec::new(), self.timeout).await?;
        let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if !out.status.success() || version.is_empty() {
            return Err(Error::RunnerFailed {
                runner: self.docker.clone(),
                reason: format!("version: {}", String::from_utf8_lossy(&out.stderr).trim()),
            });
        }
        debug!(docker = %self.docker, version = %version, "queried daemon version");
        Ok(version)
    }
}

#[async_trait]
impl VersionHandler for DockerVersionHandler {
    async fn runner_version(&self) -> Option<String> {
        match self.server_version.get_or_try_init(|| self.query()).await {
            Ok(version) => Some(version.clone()),
            Err(e) => {
                warn!(error = %e, "docker version query failed");
                None
            }
        }
    }

    fn service_version(&self) -> Option<String> {
        Some(env!("CARGO_PKG_VERSION").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crate_version_reported() {
        let handler = StaticVersionHandler::crate_version();
        assert_eq!(
            handler.service_version().as_deref(),
            Some(env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(handler.runner_version().await, None);
        assert_eq!(NoVersionHandler.service_version(), None);
    }

    #[tokio::test]
    async fn test_docker_version_missing_binary() {
        let handler = DockerVersionHandler::with_binary("/nonexistent/docker");
        assert_eq!(handler.runner_version().await, None);
        assert!(handler.server_version.get().is_none());
        assert_eq!(
            handler.service_version().as_deref(),
            Some(env!("CARGO_PKG_VERSION"))
        );
    }
}
