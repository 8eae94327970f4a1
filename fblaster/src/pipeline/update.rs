//! The update pipeline.
//!
//! Consumes debounced tracked-set snapshots and turns each one into a
//! deployment: pull the changed images, respawn the compose workload from
//! the base manifest merged with the new tags, persist the tags. The whole
//! pull-and-respawn sequence runs at most once at a time; a newer snapshot
//! arriving mid-flight cancels the current sequence and starts over from
//! the newer pair.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::compose::{ComposeManifest, ImageRef};
use crate::runtime::ContainerRuntime;
use crate::store;
use crate::workload::WorkloadController;

/// Delay before retrying a failed pull or respawn.
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// The snapshot-to-deployment pipeline.
pub struct UpdatePipeline<R: ContainerRuntime> {
    runtime: Arc<R>,
    controller: Arc<WorkloadController<R>>,
    /// The operator's parsed manifest. Merging always starts from here so
    /// repeated rewrites cannot accumulate drift.
    base: ComposeManifest,
    dir: PathBuf,
    initial: Vec<ImageRef>,
}

impl<R: ContainerRuntime + 'static> UpdatePipeline<R> {
    pub fn new(
        runtime: Arc<R>,
        controller: Arc<WorkloadController<R>>,
        base: ComposeManifest,
        dir: PathBuf,
        initial: Vec<ImageRef>,
    ) -> Self {
        Self {
            runtime,
            controller,
            base,
            dir,
            initial,
        }
    }

    /// Runs until `shutdown` fires or the snapshot stream closes.
    ///
    /// `previous` starts at the initial tracked set and advances to every
    /// snapshot handed to the apply stage, whether or not that application
    /// completed; a superseded application's work is redone from the pair
    /// `(superseded snapshot, newer snapshot)`.
    pub async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<Vec<ImageRef>>,
        shutdown: CancellationToken,
    ) {
        let mut previous = self.initial.clone();
        let mut rx_open = true;

        'outer: while rx_open {
            let mut next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                snapshot = rx.recv() => match snapshot {
                    Some(snapshot) => snapshot,
                    None => break,
                },
            };

            loop {
                let apply = self.apply(previous.clone(), next.clone());
                tokio::pin!(apply);

                enum Step {
                    Done,
                    Superseded(Vec<ImageRef>),
                    Closed,
                }

                let step = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break 'outer,
                    _ = &mut apply => Step::Done,
                    snapshot = rx.recv(), if rx_open => match snapshot {
                        Some(snapshot) => Step::Superseded(snapshot),
                        None => Step::Closed,
                    },
                };

                match step {
                    Step::Done => {
                        previous = next;
                        break;
                    }
                    Step::Superseded(newer) => {
                        info!("Newer snapshot arrived, abandoning in-flight update");
                        previous = next;
                        next = newer;
                    }
                    Step::Closed => {
                        rx_open = false;
                        apply.await;
                        previous = next;
                        break;
                    }
                }
            }
        }

        debug!("Update pipeline stopped");
    }

    /// One complete deployment of `next`.
    ///
    /// Pull and respawn retry indefinitely; cancellation happens by
    /// dropping this future, which also aborts any in-flight pull.
    async fn apply(&self, previous: Vec<ImageRef>, next: Vec<ImageRef>) {
        let changed: Vec<ImageRef> = next
            .iter()
            .filter(|n| {
                previous
                    .iter()
                    .any(|p| p.same_image(n) && p.tag != n.tag)
            })
            .cloned()
            .collect();

        info!(
            changed = changed.len(),
            images = %changed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            "Applying tracked-set update"
        );

        loop {
            match self.pull_all(&changed).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "Image pull failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        let merged = self.base.merge(&next);
        loop {
            match self.controller.respawn(&merged).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "Workload respawn failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        // Versions are persisted only after the respawn took effect; a
        // crash in between is resolved at next startup, where the store
        // wins over the derived manifest.
        match store::save(&self.dir, &next) {
            Ok(()) => info!("Persisted selected versions"),
            Err(e) => error!(error = %e, "Failed to persist selected versions"),
        }
    }

    async fn pull_all(&self, images: &[ImageRef]) -> Result<(), crate::runtime::RuntimeError> {
        try_join_all(images.iter().map(|image| self.runtime.pull(image))).await?;
        Ok(())
    }
}
