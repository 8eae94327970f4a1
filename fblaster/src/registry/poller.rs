//! Registry poll loops and snapshot aggregation.
//!
//! One task per tracked image polls its registry on an interruptible
//! interval and advances that image's tag monotonically within the run.
//! All tasks share one snapshot vector; whenever any image advances, a
//! complete copy of the vector is published downstream. Publishing happens
//! under the snapshot lock, so consumers observe tag changes in the order
//! they were applied.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compose::ImageRef;

use super::client::TagClient;
use super::select::newest_compatible;

/// Starts the poll loops for the given tracked set.
///
/// Returns the snapshot stream. Each element is the full tracked set, same
/// length and order as `initial`, with exactly one tag newer than in the
/// previously published element.
///
/// A message on `poke` makes every image poll immediately; the regular
/// period restarts from that moment. The tasks stop when `shutdown` fires.
pub fn spawn_poller<C>(
    client: Arc<C>,
    initial: Vec<ImageRef>,
    interval: Duration,
    poke: &broadcast::Sender<()>,
    shutdown: CancellationToken,
) -> mpsc::UnboundedReceiver<Vec<ImageRef>>
where
    C: TagClient + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let snapshot = Arc::new(Mutex::new(initial.clone()));

    for (index, image) in initial.into_iter().enumerate() {
        let client = Arc::clone(&client);
        let snapshot = Arc::clone(&snapshot);
        let tx = tx.clone();
        let poke_rx = poke.subscribe();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            poll_image(client, image, index, interval, snapshot, tx, poke_rx, shutdown).await;
        });
    }

    rx
}

/// A single image's poll loop.
#[allow(clippy::too_many_arguments)]
async fn poll_image<C: TagClient>(
    client: Arc<C>,
    image: ImageRef,
    index: usize,
    interval: Duration,
    snapshot: Arc<Mutex<Vec<ImageRef>>>,
    tx: mpsc::UnboundedSender<Vec<ImageRef>>,
    mut poke_rx: broadcast::Receiver<()>,
    shutdown: CancellationToken,
) {
    let mut current = image.tag.clone();
    let mut poke_open = true;

    info!(image = %image, "Watching registry for compatible tags");

    loop {
        // Interruptible interval: a poke preempts the period and resets it.
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            poke = poke_rx.recv(), if poke_open => {
                match poke {
                    Ok(()) => debug!(image = %image.image, "Poll forced by signal"),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        poke_open = false;
                        continue;
                    }
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let tags = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = client.list_tags(&image.registry, &image.image) => match result {
                Ok(tags) => tags,
                Err(e) => {
                    // Transient by policy: log and re-poll on the next tick.
                    warn!(image = %image.image, error = %e, "Registry poll failed");
                    continue;
                }
            },
        };

        if let Some(next) = newest_compatible(&current, &tags) {
            info!(image = %image.image, from = %current, to = %next, "New compatible tag");
            current = next;

            let published = {
                let mut state = snapshot.lock().unwrap();
                state[index] = state[index].with_tag(&current);
                // Send while holding the lock so snapshot order matches
                // the order tags were applied across images.
                tx.send(state.clone()).is_ok()
            };
            if !published {
                break;
            }
        }
    }
}
