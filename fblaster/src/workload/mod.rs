//! Compose workload lifecycle.
//!
//! The [`WorkloadController`] owns the long-running compose child and the
//! health monitor bound to it. Both are replaced together: a respawn first
//! cancels the health monitor, then gracefully terminates the child, then
//! defensively stops any residual containers, and only then brings up the
//! new child and a fresh monitor for the new service set.
//!
//! The child is supervised by a small actor task. An exit nobody asked for
//! is reported on the controller's event channel so the supervisor can
//! respawn the workload.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compose::{ComposeManifest, ManifestError};
use crate::config::DERIVED_COMPOSE_FILE;
use crate::health::{spawn_monitor, HealthConfig};
use crate::process::{ChildProcess, ProcessError};
use crate::runtime::{ContainerRuntime, RuntimeError};

/// Errors bringing a workload up or down.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The derived manifest could not be serialized.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The derived manifest could not be written.
    #[error("Failed to write derived manifest '{path}': {source}")]
    Write { path: String, source: io::Error },

    /// A runtime operation failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Spawning or reaping the compose child failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A respawn was requested before any workload was started.
    #[error("No workload has been started")]
    NotStarted,
}

/// Notifications from the workload to the supervisor.
#[derive(Debug)]
pub enum WorkloadEvent {
    /// The compose child exited without being asked to.
    ChildExited(Result<(), ProcessError>),
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Working directory the derived manifest is written into.
    pub dir: PathBuf,

    /// Stop timeout for the defensive `stop` after child termination.
    pub shutdown_timeout: Duration,

    /// Health monitor settings for each bound workload.
    pub health: HealthConfig,
}

struct RunningWorkload {
    child_stop: CancellationToken,
    child_task: JoinHandle<()>,
    health_stop: CancellationToken,
    health_task: JoinHandle<()>,
}

/// Owns the compose child process and its health monitor.
pub struct WorkloadController<R: ContainerRuntime> {
    runtime: Arc<R>,
    config: WorkloadConfig,
    events_tx: mpsc::UnboundedSender<WorkloadEvent>,
    inner: Mutex<Option<RunningWorkload>>,
    /// Manifest of the most recently started workload, for respawns that
    /// are not driven by a new manifest (child died unexpectedly).
    current: std::sync::Mutex<Option<ComposeManifest>>,
}

impl<R: ContainerRuntime + 'static> WorkloadController<R> {
    /// Creates a controller and the event stream it reports on.
    pub fn new(
        runtime: Arc<R>,
        config: WorkloadConfig,
    ) -> (Self, mpsc::UnboundedReceiver<WorkloadEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                runtime,
                config,
                events_tx,
                inner: Mutex::new(None),
                current: std::sync::Mutex::new(None),
            },
            events_rx,
        )
    }

    /// Writes the derived manifest and brings the workload up.
    pub async fn start(&self, manifest: &ComposeManifest) -> Result<(), WorkloadError> {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            // start() is only called at boot; a live workload means the
            // caller wanted respawn().
            self.stop_locked(&mut inner).await;
        }
        *inner = Some(self.start_locked(manifest)?);
        Ok(())
    }

    /// Replaces the running workload with one for the given manifest.
    ///
    /// Tear-down order matters: the health monitor goes first so it never
    /// observes the intentionally-stopped containers, then the child is
    /// terminated and residuals are stopped.
    pub async fn respawn(&self, manifest: &ComposeManifest) -> Result<(), WorkloadError> {
        info!("Respawning compose workload");
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;

        if let Err(e) = self
            .runtime
            .stop_all(self.config.shutdown_timeout)
            .await
        {
            // The stop is defensive; failure must not block the respawn.
            warn!(error = %e, "Defensive stop after child termination failed");
        }

        *inner = Some(self.start_locked(manifest)?);
        Ok(())
    }

    /// Respawns with the manifest of the last started workload.
    pub async fn respawn_current(&self) -> Result<(), WorkloadError> {
        let manifest = self
            .current
            .lock()
            .unwrap()
            .clone()
            .ok_or(WorkloadError::NotStarted)?;
        self.respawn(&manifest).await
    }

    /// Takes the workload down for good. Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if inner.is_none() {
            return;
        }
        info!("Shutting down compose workload");
        self.stop_locked(&mut inner).await;
        if let Err(e) = self.runtime.stop_all(self.config.shutdown_timeout).await {
            warn!(error = %e, "Defensive stop during shutdown failed");
        }
    }

    /// True while a workload is bound.
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    fn start_locked(&self, manifest: &ComposeManifest) -> Result<RunningWorkload, WorkloadError> {
        let path = self.config.dir.join(DERIVED_COMPOSE_FILE);
        let yaml = manifest.to_yaml()?;
        fs::write(&path, yaml).map_err(|source| WorkloadError::Write {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Wrote derived manifest");

        let child = self.runtime.spawn_workload()?;
        info!(command = child.command(), "Compose child started");

        let child_stop = CancellationToken::new();
        let child_task = tokio::spawn(supervise_child(
            child,
            child_stop.clone(),
            self.events_tx.clone(),
        ));

        let health_stop = CancellationToken::new();
        let health_task = spawn_monitor(
            Arc::clone(&self.runtime),
            manifest.service_names(),
            self.config.health.clone(),
            health_stop.clone(),
        );

        *self.current.lock().unwrap() = Some(manifest.clone());

        Ok(RunningWorkload {
            child_stop,
            child_task,
            health_stop,
            health_task,
        })
    }

    /// Stops the monitor and the child of the current workload, if any.
    async fn stop_locked(&self, inner: &mut Option<RunningWorkload>) {
        let Some(running) = inner.take() else {
            return;
        };

        running.health_stop.cancel();
        if let Err(e) = running.health_task.await {
            warn!(error = %e, "Health monitor task panicked");
        }

        running.child_stop.cancel();
        if let Err(e) = running.child_task.await {
            warn!(error = %e, "Child supervision task panicked");
        }
    }
}

/// Waits on the compose child and reports exits nobody requested.
async fn supervise_child(
    mut child: ChildProcess,
    stop: CancellationToken,
    events: mpsc::UnboundedSender<WorkloadEvent>,
) {
    let outcome = tokio::select! {
        biased;
        _ = stop.cancelled() => None,
        result = child.wait() => Some(result),
    };

    match outcome {
        Some(result) => {
            warn!("Compose child exited unexpectedly");
            let _ = events.send(WorkloadEvent::ChildExited(result));
        }
        None => {
            if let Err(e) = child.shutdown().await {
                warn!(error = %e, "Compose child shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackedImages;
    use crate::runtime::mock::MockRuntime;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const MANIFEST: &str = "\
services:
  cat:
    image: reg:7420/cat-image:10.0.0
";

    fn config(dir: &TempDir) -> WorkloadConfig {
        WorkloadConfig {
            dir: dir.path().to_path_buf(),
            shutdown_timeout: Duration::from_secs(1),
            health: HealthConfig {
                // Long enough that health never interferes with these tests.
                check_interval: Duration::from_secs(3600),
                tolerance: Duration::from_secs(3600),
                restart_timeout: Duration::from_secs(1),
            },
        }
    }

    fn manifest() -> ComposeManifest {
        ComposeManifest::parse(MANIFEST).unwrap()
    }

    #[tokio::test]
    async fn test_start_writes_derived_manifest_and_spawns_child() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let (controller, _events) = WorkloadController::new(Arc::clone(&runtime), config(&dir));

        controller.start(&manifest()).await.unwrap();

        let derived = dir.path().join(DERIVED_COMPOSE_FILE);
        let written = std::fs::read_to_string(derived).unwrap();
        assert!(written.contains("reg:7420/cat-image:10.0.0"));
        assert_eq!(runtime.workloads_spawned.load(Ordering::SeqCst), 1);
        assert!(controller.is_running().await);

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_respawn_replaces_child_and_stops_residuals() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let (controller, _events) = WorkloadController::new(Arc::clone(&runtime), config(&dir));

        controller.start(&manifest()).await.unwrap();
        let updated = manifest().merge(&[crate::compose::ImageRef::new(
            "reg:7420",
            "cat-image",
            "10.0.1",
        )]);
        controller.respawn(&updated).await.unwrap();

        assert_eq!(runtime.workloads_spawned.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.stop_all_calls.load(Ordering::SeqCst), 1);

        let derived = dir.path().join(DERIVED_COMPOSE_FILE);
        let written = std::fs::read_to_string(derived).unwrap();
        assert!(written.contains("cat-image:10.0.1"));
        let tracked = TrackedImages::new(["cat-image"]);
        assert_eq!(
            ComposeManifest::parse(&written)
                .unwrap()
                .tracked_images(&tracked)[0]
                .tag,
            "10.0.1"
        );

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let (controller, _events) = WorkloadController::new(Arc::clone(&runtime), config(&dir));

        controller.start(&manifest()).await.unwrap();
        controller.shutdown().await;
        controller.shutdown().await;

        assert_eq!(runtime.stop_all_calls.load(Ordering::SeqCst), 1);
        assert!(!controller.is_running().await);
    }

    #[tokio::test]
    async fn test_unexpected_child_exit_reports_event() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        *runtime.workload_script.lock().unwrap() = "echo gone >&2; exit 9".to_string();
        let (controller, mut events) = WorkloadController::new(Arc::clone(&runtime), config(&dir));

        controller.start(&manifest()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("child exit should be reported")
            .unwrap();
        match event {
            WorkloadEvent::ChildExited(Err(ProcessError::CommandFailed { stderr, .. })) => {
                assert_eq!(stderr, "gone");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_clean_child_exit_still_reported() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        *runtime.workload_script.lock().unwrap() = "true".to_string();
        let (controller, mut events) = WorkloadController::new(Arc::clone(&runtime), config(&dir));

        controller.start(&manifest()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("child exit should be reported")
            .unwrap();
        assert!(matches!(event, WorkloadEvent::ChildExited(Ok(()))));

        controller.shutdown().await;
    }
}
