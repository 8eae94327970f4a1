//! fblaster - self-updating supervisor for docker-compose workloads
//!
//! One supervisor instance owns one working directory containing a compose
//! manifest. It runs the workload as a child process and continuously
//! upgrades a tracked subset of its images: registries are polled for newer
//! semver-compatible tags, bursts of changes are debounced, new images are
//! pulled, a derived manifest is written, the workload is respawned, and
//! the selected versions are persisted so restarts resume where they left
//! off. Unhealthy containers are restarted independently of upgrades.
//!
//! # High-Level API
//!
//! ```ignore
//! use fblaster::config::Settings;
//! use fblaster::supervisor::Supervisor;
//!
//! let settings = Settings::default();
//! Supervisor::new(settings).run().await?;
//! ```

pub mod compose;
pub mod config;
pub mod health;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod runtime;
pub mod signals;
pub mod store;
pub mod supervisor;
pub mod workload;

/// Version of the fblaster library and CLI.
///
/// Synchronized across all components in the workspace; defined in
/// `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
