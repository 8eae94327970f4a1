//! Operator configuration for a supervisor instance.
//!
//! One supervisor owns one working directory. The directory contains the
//! operator's compose manifest plus the two files this crate writes beside
//! it: the derived manifest consumed by the compose child and the version
//! store that makes upgrades survive supervisor restarts.

mod credentials;
mod settings;
mod tracked;

pub use credentials::{Credential, RegistryCredentials};
pub use settings::Settings;
pub use tracked::TrackedImages;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Operator-authored compose manifest, read only.
pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// Derived manifest written by the supervisor and consumed by the compose
/// child process.
pub const DERIVED_COMPOSE_FILE: &str = "fblaster-docker-compose.yml";

/// Persisted last-known-good image versions.
pub const VERSIONS_FILE: &str = "fblaster-versions.yml";

/// Errors detected while validating operator configuration.
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A credentials flag did not have the `registry:path` shape.
    #[error("Invalid credentials specification '{0}': expected 'registry:path'")]
    InvalidCredentialSpec(String),

    /// A credentials path escapes the working directory.
    #[error("Credentials path '{}' is outside the working directory '{}'", path.display(), directory.display())]
    CredentialOutsideDirectory { path: PathBuf, directory: PathBuf },

    /// A credentials file could not be read.
    #[error("Failed to read credentials file '{}': {source}", path.display())]
    CredentialRead { path: PathBuf, source: io::Error },

    /// A credentials file did not contain a `username:password` line.
    #[error("Credentials file '{}' must contain a single 'username:password' line", path.display())]
    CredentialFormat { path: PathBuf },

    /// The working directory does not exist or cannot be resolved.
    #[error("Invalid working directory '{}': {source}", directory.display())]
    InvalidDirectory { directory: PathBuf, source: io::Error },
}
