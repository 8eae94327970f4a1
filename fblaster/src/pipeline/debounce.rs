//! Trailing-edge debounce for snapshot streams.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Debounces `rx` with the given quiet window.
///
/// Every arrival replaces the pending element and restarts the timer; the
/// pending element is emitted once the window elapses without arrivals.
/// When the upstream closes, a still-pending element is flushed before the
/// output closes.
pub fn debounce<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
    window: Duration,
    shutdown: CancellationToken,
) -> mpsc::UnboundedReceiver<T> {
    let (tx, out) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut pending: Option<T> = None;
        loop {
            if pending.is_some() {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    item = rx.recv() => match item {
                        // Timer restarts on the next loop iteration.
                        Some(item) => pending = Some(item),
                        None => {
                            if let Some(item) = pending.take() {
                                let _ = tx.send(item);
                            }
                            break;
                        }
                    },
                    _ = tokio::time::sleep(window) => {
                        if let Some(item) = pending.take() {
                            if tx.send(item).is_err() {
                                break;
                            }
                        }
                    }
                }
            } else {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => pending = Some(item),
                        None => break,
                    },
                }
            }
        }
    });

    out
}
