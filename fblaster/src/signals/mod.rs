//! Signal plumbing.
//!
//! Two concerns live here. First, the poke stream: a process-wide SIGUSR2
//! subscription, installed once at startup, broadcast to every registry
//! poll loop so an operator can force an immediate poll. Second, peer
//! addressing: a second invocation with `--signal-poll` resolves the
//! running supervisor's container name from the working directory and
//! delivers the poke through the runtime's kill facility.

use std::io;
use std::path::Path;

use md5::{Digest, Md5};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::runtime::{ContainerRuntime, RuntimeError};

/// Signal that forces an immediate registry poll.
pub const POKE_SIGNAL: &str = "SIGUSR2";

/// Prefix of the supervisor's container name, set by the launcher.
const CONTAINER_PREFIX: &str = "fblaster";

/// Installs the SIGUSR2 subscription and returns its broadcast side.
///
/// Every subscriber sees every poke; the channel deliberately has a small
/// buffer, because a poke's only meaning is "poll now" and coalescing
/// bursts is fine.
pub fn spawn_poke_listener(shutdown: CancellationToken) -> io::Result<broadcast::Sender<()>> {
    let (tx, _) = broadcast::channel(4);
    let mut pokes = signal(SignalKind::user_defined2())?;

    let sender = tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = pokes.recv() => match received {
                    Some(()) => {
                        info!("Received poll signal");
                        let _ = sender.send(());
                    }
                    None => break,
                },
            }
        }
    });

    Ok(tx)
}

/// Container name a supervisor running in `dir` is addressable under.
///
/// The launcher names the supervisor container after a stable hash of the
/// absolute working directory, so any process that knows the directory can
/// find its supervisor.
pub fn peer_container_name(dir: &Path) -> String {
    let absolute = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
    let digest = Md5::digest(absolute.to_string_lossy().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{CONTAINER_PREFIX}-{hex}")
}

/// Delivers a poke to the supervisor owning `dir`.
pub async fn send_poke<R: ContainerRuntime>(runtime: &R, dir: &Path) -> Result<(), RuntimeError> {
    let peer = peer_container_name(dir);
    info!(peer = %peer, "Sending poll signal to running supervisor");
    runtime.signal_container(&peer, POKE_SIGNAL).await
}
