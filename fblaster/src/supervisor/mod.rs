//! Top-level supervision.
//!
//! Wires the whole control plane together: configuration, manifest, version
//! store, workload, registry poller, debounce, update pipeline and signal
//! handling. One call to [`Supervisor::run`] owns a working directory until
//! the process is told to stop.

use std::fs;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::compose::{ComposeManifest, ManifestError};
use crate::config::{Settings, COMPOSE_FILE};
use crate::health::HealthConfig;
use crate::pipeline::{debounce, UpdatePipeline};
use crate::registry::{spawn_poller, HttpTagClient, RegistryError, TagClient};
use crate::runtime::{ContainerRuntime, DockerRuntime, RuntimeError};
use crate::signals::spawn_poke_listener;
use crate::store::{self, StoreError};
use crate::workload::{WorkloadConfig, WorkloadController, WorkloadError, WorkloadEvent};

/// Fatal supervisor errors.
///
/// Everything here aborts startup; once running, the pipeline and monitor
/// absorb their own failures.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The operator's manifest could not be read.
    #[error("Failed to read manifest '{path}': {source}")]
    ManifestRead { path: String, source: io::Error },

    /// The operator's manifest is invalid.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The version store is present but unreadable.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The workload could not be brought up.
    #[error(transparent)]
    Workload(#[from] WorkloadError),

    /// A startup runtime operation (registry login) failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The registry HTTP client could not be constructed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Process signal handlers could not be installed.
    #[error("Failed to install signal handlers: {0}")]
    Signals(io::Error),
}

/// The supervisor facade.
///
/// Binds the production runtime (the `docker` CLI) and registry client to
/// the generic control plane in [`run_with`].
pub struct Supervisor {
    settings: Settings,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Runs until SIGINT or SIGTERM. Returns once shutdown completed.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let runtime = Arc::new(DockerRuntime::new(self.settings.directory.clone()));
        let tags = Arc::new(HttpTagClient::new(
            self.settings.credentials.clone(),
            self.settings.insecure,
        )?);
        run_with(self.settings, runtime, tags, CancellationToken::new()).await
    }
}

/// The generic control plane.
///
/// `shutdown` is an additional stop condition next to SIGINT/SIGTERM; the
/// production entry point passes a token nobody cancels.
pub async fn run_with<R, C>(
    settings: Settings,
    runtime: Arc<R>,
    tags: Arc<C>,
    shutdown: CancellationToken,
) -> Result<(), SupervisorError>
where
    R: ContainerRuntime + 'static,
    C: TagClient + 'static,
{
    info!(directory = %settings.directory.display(), "Supervisor starting");

    // Registries must be logged in before the first pull can work.
    for (registry, credential) in settings.credentials.iter() {
        runtime
            .login(registry, &credential.username, &credential.password)
            .await?;
        info!(registry, "Registry login succeeded");
    }

    // Base manifest and the effective starting tags.
    let manifest_path = settings.directory.join(COMPOSE_FILE);
    let text =
        fs::read_to_string(&manifest_path).map_err(|source| SupervisorError::ManifestRead {
            path: manifest_path.display().to_string(),
            source,
        })?;
    let base = ComposeManifest::parse(&text)?;

    let initial = base.tracked_images(&settings.tracked);
    let effective = match store::load(&settings.directory)? {
        Some(loaded) => {
            info!(entries = loaded.len(), "Resuming from version store");
            store::reconcile(&initial, &loaded)
        }
        None => initial,
    };
    info!(
        tracked = %effective
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        "Effective tracked set"
    );

    // Workload first, so health and polling observe a running system.
    let (controller, mut workload_events) = WorkloadController::new(
        Arc::clone(&runtime),
        WorkloadConfig {
            dir: settings.directory.clone(),
            shutdown_timeout: settings.shutdown_timeout,
            health: HealthConfig {
                check_interval: settings.health_check_interval,
                tolerance: settings.ill_health_tolerance,
                restart_timeout: settings.shutdown_timeout,
            },
        },
    );
    let controller = Arc::new(controller);
    controller.start(&base.merge(&effective)).await?;

    // Polling, debounce and the update pipeline.
    let poke = spawn_poke_listener(shutdown.clone()).map_err(SupervisorError::Signals)?;
    let snapshots = spawn_poller(
        tags,
        effective.clone(),
        settings.poll_interval,
        &poke,
        shutdown.clone(),
    );
    let debounced = debounce(snapshots, settings.debounce, shutdown.clone());
    let pipeline = UpdatePipeline::new(
        Arc::clone(&runtime),
        Arc::clone(&controller),
        base,
        settings.directory.clone(),
        effective,
    );
    let pipeline_task = tokio::spawn(pipeline.run(debounced, shutdown.clone()));

    // Steady state: wait for termination, respawn on unexpected child exit.
    let mut sigterm = signal(SignalKind::terminate()).map_err(SupervisorError::Signals)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(SupervisorError::Signals)?;

    info!("Supervisor running");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                break;
            }
            event = workload_events.recv() => match event {
                Some(WorkloadEvent::ChildExited(result)) => {
                    match result {
                        Ok(()) => warn!("Compose child exited cleanly without being asked"),
                        Err(e) => error!(error = %e, "Compose child died"),
                    }
                    if let Err(e) = controller.respawn_current().await {
                        error!(error = %e, "Respawn after child exit failed");
                    }
                }
                None => break,
            },
        }
    }

    // Ordered teardown: stop the pipeline before touching the workload so
    // no respawn races the final child shutdown.
    info!("Supervisor shutting down");
    shutdown.cancel();
    if let Err(e) = pipeline_task.await {
        warn!(error = %e, "Update pipeline task panicked");
    }
    controller.shutdown().await;
    info!("Supervisor stopped");
    Ok(())
}
