//! Container health monitoring.
//!
//! One watch task per compose service tracks how long the service has been
//! continuously unhealthy. Container ids are resolved lazily from the
//! runtime and re-resolved when they go stale after a restart. Labels that
//! stay unhealthy beyond the operator's tolerance are restarted through the
//! runtime, with at most one restart in flight per label.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::runtime::{ContainerRuntime, RuntimeError};

/// Retry cadence while a service's container id is still unknown.
const ID_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Backoff after an inspection error that is not a stale id.
const INSPECT_BACKOFF: Duration = Duration::from_secs(10);

/// Health monitor tuning.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Inspection period per service.
    pub check_interval: Duration,

    /// Continuous unhealthy duration that triggers a restart.
    pub tolerance: Duration,

    /// Stop timeout handed to the runtime's restart.
    pub restart_timeout: Duration,
}

/// Starts monitoring the given services until `stop` fires.
///
/// The returned handle completes once every watch task and the restart
/// worker have wound down, so a caller swapping monitors can await the old
/// one before starting the next.
pub fn spawn_monitor<R>(
    runtime: Arc<R>,
    services: Vec<String>,
    config: HealthConfig,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    R: ContainerRuntime + 'static,
{
    tokio::spawn(async move {
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();

        let mut tasks: Vec<JoinHandle<()>> = services
            .into_iter()
            .map(|service| {
                tokio::spawn(watch_service(
                    Arc::clone(&runtime),
                    service,
                    config.clone(),
                    restart_tx.clone(),
                    stop.clone(),
                ))
            })
            .collect();
        drop(restart_tx);

        tasks.push(tokio::spawn(restart_worker(
            runtime,
            restart_rx,
            config.restart_timeout,
            stop,
        )));

        join_all(tasks).await;
        debug!("Health monitor stopped");
    })
}

/// Tracks one service's health and emits its label when degraded.
async fn watch_service<R: ContainerRuntime>(
    runtime: Arc<R>,
    service: String,
    config: HealthConfig,
    restart_tx: mpsc::UnboundedSender<String>,
    stop: CancellationToken,
) {
    let mut container_id: Option<String> = None;
    let mut last_healthy = Instant::now();

    let mut interval = tokio::time::interval(config.check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; consume it so the first
    // inspection happens one period after startup.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = interval.tick() => {}
        }

        let id = match &container_id {
            Some(id) => id.clone(),
            None => {
                let resolved = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    id = resolve_container_id(runtime.as_ref(), &service) => id,
                };
                debug!(service, container = %resolved, "Resolved container id");
                container_id = Some(resolved.clone());
                resolved
            }
        };

        // At most one inspection in flight: the next tick abandons an
        // inspection that is still outstanding.
        let inspect = runtime.inspect_state(&id);
        tokio::pin!(inspect);
        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = &mut inspect => result,
            _ = interval.tick() => {
                debug!(service, "Inspection superseded by next tick");
                continue;
            }
        };

        match result {
            Ok(state) => {
                if !state.is_unhealthy() {
                    last_healthy = Instant::now();
                }
            }
            Err(RuntimeError::NoSuchContainer(_)) => {
                // The id went stale, typically after a restart.
                debug!(service, container = %id, "Container gone, re-resolving id");
                container_id = None;
                last_healthy = Instant::now();
                continue;
            }
            Err(e) => {
                warn!(service, error = %e, "Container inspection failed");
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(INSPECT_BACKOFF) => {}
                }
                continue;
            }
        }

        if last_healthy.elapsed() > config.tolerance {
            info!(
                service,
                unhealthy_secs = last_healthy.elapsed().as_secs(),
                "Service unhealthy beyond tolerance"
            );
            if restart_tx.send(service.clone()).is_err() {
                break;
            }
        }
    }
}

/// Polls the runtime until the service has a container id.
async fn resolve_container_id<R: ContainerRuntime>(runtime: &R, service: &str) -> String {
    loop {
        match runtime.container_id(service).await {
            Ok(Some(id)) => return id,
            Ok(None) => {}
            Err(e) => warn!(service, error = %e, "Container id lookup failed"),
        }
        tokio::time::sleep(ID_RETRY_INTERVAL).await;
    }
}

/// Consumes unhealthy-label emissions and issues restarts.
///
/// Emissions for a label with a restart already in flight are dropped;
/// restarts for distinct labels run concurrently.
async fn restart_worker<R: ContainerRuntime + 'static>(
    runtime: Arc<R>,
    mut restart_rx: mpsc::UnboundedReceiver<String>,
    restart_timeout: Duration,
    stop: CancellationToken,
) {
    let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    loop {
        let service = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            service = restart_rx.recv() => match service {
                Some(service) => service,
                None => break,
            },
        };

        if !in_flight.lock().unwrap().insert(service.clone()) {
            debug!(service, "Restart already in flight, dropping emission");
            continue;
        }

        let runtime = Arc::clone(&runtime);
        let in_flight = Arc::clone(&in_flight);
        let stop = stop.clone();
        tokio::spawn(async move {
            info!(service, "Restarting unhealthy service");
            tokio::select! {
                biased;
                _ = stop.cancelled() => {}
                result = runtime.restart_service(&service, restart_timeout) => {
                    match result {
                        Ok(()) => info!(service, "Service restarted"),
                        Err(e) => warn!(service, error = %e, "Service restart failed"),
                    }
                }
            }
            in_flight.lock().unwrap().remove(&service);
        });
    }
}
