//! Container runtime abstraction.
//!
//! Everything the supervisor asks of the orchestration runtime goes through
//! the [`ContainerRuntime`] trait, so the control plane can be exercised in
//! tests with a scripted runtime. The production implementation shells out
//! to the `docker` CLI against the derived compose manifest.

#[cfg(test)]
pub mod mock;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::compose::ImageRef;
use crate::config::DERIVED_COMPOSE_FILE;
use crate::process::{run_capture, ChildProcess, ProcessError};

/// Health section of a container's inspected state.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerHealth {
    #[serde(rename = "Status")]
    pub status: String,
}

/// The slice of `docker inspect` state the health monitor cares about.
///
/// Containers without a configured healthcheck have no `Health` field and
/// are treated as healthy.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Health")]
    pub health: Option<ContainerHealth>,
}

impl ContainerState {
    /// True only when the runtime explicitly reports `unhealthy`.
    pub fn is_unhealthy(&self) -> bool {
        self.health
            .as_ref()
            .is_some_and(|h| h.status == "unhealthy")
    }
}

/// Errors from runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The referenced container no longer exists, usually because the
    /// service was restarted and the cached id went stale.
    #[error("No such container: {0}")]
    NoSuchContainer(String),

    /// The underlying CLI invocation failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// `docker inspect` returned something that is not a state document.
    #[error("Failed to parse container state: {0}")]
    InvalidState(#[from] serde_json::Error),
}

/// Operations the supervisor needs from the orchestration runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Authenticates the runtime against a registry.
    async fn login(&self, registry: &str, username: &str, password: &str)
        -> Result<(), RuntimeError>;

    /// Pulls an image so a subsequent respawn starts instantly.
    async fn pull(&self, image: &ImageRef) -> Result<(), RuntimeError>;

    /// Resolves the container id behind a compose service label.
    ///
    /// Returns `None` while the container has not been created yet.
    async fn container_id(&self, service: &str) -> Result<Option<String>, RuntimeError>;

    /// Inspects a container's state.
    async fn inspect_state(&self, container_id: &str) -> Result<ContainerState, RuntimeError>;

    /// Restarts one compose service with a stop timeout.
    async fn restart_service(&self, service: &str, timeout: Duration)
        -> Result<(), RuntimeError>;

    /// Stops all compose services. Used defensively after the compose
    /// child exits, since it tends to leave residual containers behind.
    async fn stop_all(&self, timeout: Duration) -> Result<(), RuntimeError>;

    /// Delivers a named signal to an arbitrary container.
    async fn signal_container(&self, container: &str, signal: &str) -> Result<(), RuntimeError>;

    /// Spawns the long-running compose child for the derived manifest.
    fn spawn_workload(&self) -> Result<ChildProcess, RuntimeError>;
}

/// `docker` CLI implementation of [`ContainerRuntime`].
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    dir: PathBuf,
}

const DOCKER: &str = "docker";

impl DockerRuntime {
    /// Creates a runtime operating on the given working directory.
    ///
    /// Compose commands address the derived manifest, which is the file the
    /// workload actually runs from.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn dir(&self) -> &Path {
        &self.dir
    }

    async fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        Ok(run_capture(DOCKER, args, self.dir()).await?)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn login(
        &self,
        registry: &str,
        username: &str,
        password: &str,
    ) -> Result<(), RuntimeError> {
        debug!(registry, username, "Logging into registry");
        self.run(&["login", "--username", username, "--password", password, registry])
            .await?;
        Ok(())
    }

    async fn pull(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let canonical = image.to_string();
        debug!(image = %canonical, "Pulling image");
        self.run(&["pull", &canonical]).await?;
        Ok(())
    }

    async fn container_id(&self, service: &str) -> Result<Option<String>, RuntimeError> {
        let out = self
            .run(&["compose", "-f", DERIVED_COMPOSE_FILE, "ps", "-q", service])
            .await?;
        let id = out.trim();
        Ok(if id.is_empty() {
            None
        } else {
            // Multiple replicas are not supported; take the first id.
            Some(id.lines().next().unwrap_or(id).to_string())
        })
    }

    async fn inspect_state(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        let out = self
            .run(&["inspect", "--format", "{{json .State}}", container_id])
            .await
            .map_err(|e| match e {
                RuntimeError::Process(ProcessError::CommandFailed { ref stderr, .. })
                    if stderr.to_lowercase().contains("no such container") =>
                {
                    RuntimeError::NoSuchContainer(container_id.to_string())
                }
                other => other,
            })?;
        Ok(serde_json::from_str(out.trim())?)
    }

    async fn restart_service(
        &self,
        service: &str,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let timeout = timeout.as_secs().to_string();
        self.run(&[
            "compose",
            "-f",
            DERIVED_COMPOSE_FILE,
            "restart",
            "-t",
            &timeout,
            service,
        ])
        .await?;
        Ok(())
    }

    async fn stop_all(&self, timeout: Duration) -> Result<(), RuntimeError> {
        let timeout = timeout.as_secs().to_string();
        self.run(&["compose", "-f", DERIVED_COMPOSE_FILE, "stop", "-t", &timeout])
            .await?;
        Ok(())
    }

    async fn signal_container(
        &self,
        container: &str,
        signal: &str,
    ) -> Result<(), RuntimeError> {
        self.run(&["kill", "--signal", signal, container]).await?;
        Ok(())
    }

    fn spawn_workload(&self) -> Result<ChildProcess, RuntimeError> {
        Ok(ChildProcess::spawn(
            DOCKER,
            &["compose", "-f", DERIVED_COMPOSE_FILE, "up"],
            self.dir(),
        )?)
    }
}
