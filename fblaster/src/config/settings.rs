//! Resolved supervisor settings.

use std::path::PathBuf;
use std::time::Duration;

use super::{RegistryCredentials, TrackedImages};

/// Everything a supervisor instance needs, resolved and validated.
///
/// Built by the CLI from command-line flags; defaults match the flag
/// defaults so library users get the same behaviour.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Working directory containing the compose manifest.
    pub directory: PathBuf,

    /// Images whose tags the supervisor may advance.
    pub tracked: TrackedImages,

    /// Per-registry credentials for tag listing and `docker login`.
    pub credentials: RegistryCredentials,

    /// Graceful shutdown wait for the compose child and service restarts.
    pub shutdown_timeout: Duration,

    /// Registry poll period.
    pub poll_interval: Duration,

    /// Quiet window between the last tag change and acting on it.
    pub debounce: Duration,

    /// Container health poll period.
    pub health_check_interval: Duration,

    /// Continuous unhealthy duration that triggers a service restart.
    pub ill_health_tolerance: Duration,

    /// Accept self-signed registry TLS certificates.
    pub insecure: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            tracked: TrackedImages::default(),
            credentials: RegistryCredentials::default(),
            shutdown_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(60),
            debounce: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(60),
            ill_health_tolerance: Duration::from_secs(60),
            insecure: false,
        }
    }
}
