//! # Image Resolution
//!
//! Container image tags float: `quakeledger:latest` today is not the image
//! it was last month. The cache key therefore folds the *resolved* image id
//! whenever an [`ImageIdLookup`] can provide one.
//!
//! | Lookup | Resolution |
//! |---------------------|-----------------------------------------------|
//! | `NoImageIdLookup`   | none, the reference itself is folded          |
//! | `StaticImageIdLookup` | fixed table, for tests and pinned deployments |
//! | `DockerImageIdLookup` | `docker image inspect <ref> --format {{.ID}}` |
//!
//! The docker lookup runs on the request path, so it is bounded by
//! `DOCKER_COMMAND_TIMEOUT` like every other docker call.
//!
//! ## Reference Validation
//!
//! References are checked against `MAX_IMAGE_REF_LEN` and a character
//! allowlist before they are handed to docker, so a configuration cannot
//! smuggle extra arguments into the docker command line.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::constants::{DOCKER_COMMAND_TIMEOUT, MAX_IMAGE_REF_LEN};
use crate::error::{Error, Result};
use crate::runtimes::run_command;

/// Validates an image reference.
///
/// # Errors
///
/// Returns [`Error::InvalidImageReference`] for empty or overlong references,
/// references starting with `-`, and characters outside
/// `[A-Za-z0-9/:.\-_@]`.
pub fn validate_reference(image_ref: &str) -> Result<()> {
    if image_ref.is_empty() {
        return Err(Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: "empty".to_string(),
        });
    }

    if image_ref.len() > MAX_IMAGE_REF_LEN {
        return Err(Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: format!("exceeds {} bytes", MAX_IMAGE_REF_LEN),
        });
    }

    if image_ref.starts_with('-') {
        return Err(Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: "must not start with '-'".to_string(),
        });
    }

    if !image_ref.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || c == '/'
            || c == ':'
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '@'
    }) {
        return Err(Error::InvalidImageReference {
            reference: image_ref.to_string(),
            reason: "contains invalid characters".to_string(),
        });
    }

    Ok(())
}

/// Resolves an image reference to the id of the image it currently names.
#[async_trait]
pub trait ImageIdLookup: Send + Sync {
    /// Returns the image id, or `None` when resolution is not available.
    async fn lookup_image_id(&self, image_ref: &str) -> Result<Option<String>>;
}

/// Never resolves; the reference itself identifies the image.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImageIdLookup;

#[async_trait]
impl ImageIdLookup for NoImageIdLookup {
    async fn lookup_image_id(&self, _image_ref: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Resolves from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticImageIdLookup {
    ids: HashMap<String, String>,
}

impl StaticImageIdLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins a reference to an id.
    pub fn with_image(mut self, image_ref: impl Into<String>, id: impl Into<String>) -> Self {
        self.ids.insert(image_ref.into(), id.into());
        self
    }
}

#[async_trait]
impl ImageIdLookup for StaticImageIdLookup {
    async fn lookup_image_id(&self, image_ref: &str) -> Result<Option<String>> {
        Ok(self.ids.get(image_ref).cloned())
    }
}

/// Resolves through the local docker daemon.
///
/// Only local image metadata is inspected; nothing is pulled.
#[derive(Debug, Clone)]
pub struct DockerImageIdLookup {
    docker: String,
    timeout: Duration,
}

impl Default for DockerImageIdLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerImageIdLookup {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Uses a different docker compatible binary (e.g. `podman`).
    pub fn with_binary(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            timeout: DOCKER_COMMAND_TIMEOUT,
        }
    }

    /// Bounds each inspect call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ImageIdLookup for DockerImageIdLookup {
    async fn lookup_image_id(&self, image_ref: &str) -> Result<Option<String>> {
        validate_reference(image_ref)?;

        let mut cmd = Command::new(&self.docker);
        cmd.args(["image", "inspect", image_ref, "--format", "{{.ID}}"]);
        let output = run_command(&self.docker, "image inspect", cmd, Vec::new(), self.timeout)
            .await
            .map_err(|e| match e {
                Error::Timeout { .. } => e,
                other => Error::ImageLookupFailed {
                    image: image_ref.to_string(),
                    reason: other.to_string(),
                },
            })?;

        if !output.status.success() {
            return Err(Error::ImageLookupFailed {
                image: image_ref.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(image = image_ref, id = %id, "resolved image id");
        if id.is_empty() { Ok(None) } else { Ok(Some(id)) }
    }
}
