//! Persistent version store.
//!
//! The store remembers the last tag the supervisor selected for each
//! tracked image, so a restarted supervisor resumes from where it left off
//! instead of re-deploying whatever the operator's manifest pins.
//!
//! The file is a YAML sequence of `{registry, image, tag}` entries, written
//! beside the manifest as `fblaster-versions.yml`.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::compose::ImageRef;
use crate::config::VERSIONS_FILE;

/// Errors reading or writing the version store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file exists but does not have the expected shape.
    #[error("Invalid version file '{path}': {source}")]
    Invalid {
        path: String,
        source: serde_yaml::Error,
    },

    /// Filesystem failure reading or writing the store.
    #[error("Version store I/O on '{path}': {source}")]
    Io { path: String, source: io::Error },
}

/// Loads the persisted versions, if a store file exists.
///
/// A missing file is not an error: the caller falls back to the tags pinned
/// in the operator's manifest. A present but malformed file is fatal,
/// because silently ignoring it could roll services back.
pub fn load(dir: &Path) -> Result<Option<Vec<ImageRef>>, StoreError> {
    let path = dir.join(VERSIONS_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    let refs: Vec<ImageRef> =
        serde_yaml::from_str(&text).map_err(|source| StoreError::Invalid {
            path: path.display().to_string(),
            source,
        })?;
    Ok(Some(refs))
}

/// Overlays loaded tags onto the initial tracked set.
///
/// For each initial reference, the loaded tag wins when the `(registry,
/// image)` identity matches. Entries present only in the store are dropped;
/// the manifest decides what is tracked, the store only remembers tags.
pub fn reconcile(initial: &[ImageRef], loaded: &[ImageRef]) -> Vec<ImageRef> {
    initial
        .iter()
        .map(|image| {
            loaded
                .iter()
                .find(|l| l.same_image(image))
                .map(|l| image.with_tag(&l.tag))
                .unwrap_or_else(|| image.clone())
        })
        .collect()
}

/// Atomically writes the store file.
///
/// Writes a sibling temp file and renames it over the target, so a crash
/// mid-write never leaves a truncated store behind.
pub fn save(dir: &Path, refs: &[ImageRef]) -> Result<(), StoreError> {
    let path = dir.join(VERSIONS_FILE);
    let tmp = dir.join(format!(".{VERSIONS_FILE}.tmp"));
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    let text = serde_yaml::to_string(refs).map_err(|source| StoreError::Invalid {
        path: path.display().to_string(),
        source,
    })?;
    fs::write(&tmp, text).map_err(io_err)?;
    fs::rename(&tmp, &path).map_err(io_err)?;
    Ok(())
}
