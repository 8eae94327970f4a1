//! Per-registry credentials.
//!
//! Credentials arrive as repeatable `registry:path` flags. Each path points
//! at a file holding a single `username:password` line and must resolve
//! inside the working directory, so a supervisor instance can only read
//! secrets it was explicitly given.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Username and password for one registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Credentials keyed by registry host.
#[derive(Debug, Clone, Default)]
pub struct RegistryCredentials {
    by_registry: HashMap<String, Credential>,
}

impl RegistryCredentials {
    /// Loads credentials from `registry:path` specifications.
    ///
    /// Each path is resolved relative to `directory` and must canonicalize
    /// to a location inside it.
    pub fn load<I, S>(directory: &Path, specs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let directory =
            directory
                .canonicalize()
                .map_err(|source| ConfigError::InvalidDirectory {
                    directory: directory.to_path_buf(),
                    source,
                })?;

        let mut by_registry = HashMap::new();
        for spec in specs {
            let spec = spec.as_ref();
            // Split at the last colon so registries with ports work
            // ("reg.example.com:7420:registry.cred").
            let (registry, path) = spec
                .rsplit_once(':')
                .filter(|(registry, path)| !registry.is_empty() && !path.is_empty())
                .ok_or_else(|| ConfigError::InvalidCredentialSpec(spec.to_string()))?;

            let path = resolve_inside(&directory, Path::new(path))?;
            let credential = read_credential_file(&path)?;
            by_registry.insert(registry.to_string(), credential);
        }
        Ok(Self { by_registry })
    }

    /// Returns the credential configured for a registry, if any.
    pub fn get(&self, registry: &str) -> Option<&Credential> {
        self.by_registry.get(registry)
    }

    /// Iterates over `(registry, credential)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Credential)> {
        self.by_registry.iter().map(|(r, c)| (r.as_str(), c))
    }

    pub fn is_empty(&self) -> bool {
        self.by_registry.is_empty()
    }
}

/// Resolves `path` against `directory` and rejects escapes.
fn resolve_inside(directory: &Path, path: &Path) -> Result<PathBuf, ConfigError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        directory.join(path)
    };
    let resolved = joined
        .canonicalize()
        .map_err(|source| ConfigError::CredentialRead {
            path: joined.clone(),
            source,
        })?;
    if !resolved.starts_with(directory) {
        return Err(ConfigError::CredentialOutsideDirectory {
            path: resolved,
            directory: directory.to_path_buf(),
        });
    }
    Ok(resolved)
}

/// Parses the single `username:password` line of a credentials file.
fn read_credential_file(path: &Path) -> Result<Credential, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::CredentialRead {
        path: path.to_path_buf(),
        source,
    })?;
    let line = contents.lines().next().unwrap_or("").trim();
    let (username, password) = line
        .split_once(':')
        .filter(|(username, _)| !username.is_empty())
        .ok_or_else(|| ConfigError::CredentialFormat {
            path: path.to_path_buf(),
        })?;
    Ok(Credential {
        username: username.to_string(),
        password: password.to_string(),
    })
}
