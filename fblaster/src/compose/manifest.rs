//! Compose manifest parsing, rewriting and serialization.
//!
//! The manifest is held as a raw YAML document so that every field the
//! supervisor does not understand round-trips byte-for-byte in meaning.
//! Only the `image` string of each service is ever rewritten.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::config::TrackedImages;

use super::ImageRef;

/// Errors produced while parsing or validating a compose manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document is not valid YAML.
    #[error("Failed to parse manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The top level has no non-empty `services` mapping.
    #[error("Manifest has no services")]
    MissingServices,

    /// A service entry lacks a non-empty `image` string.
    #[error("Service '{0}' has no image")]
    MissingImage(String),
}

/// A parsed compose manifest.
///
/// Cloning is cheap enough for the sizes involved; `merge` works on a copy
/// so the base manifest handed out at startup is never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeManifest {
    doc: Value,
}

impl ComposeManifest {
    /// Parses and validates manifest text.
    ///
    /// Validation requires a non-empty `services` mapping where every
    /// service carries a non-empty `image` string. Everything else in the
    /// document is opaque.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let doc: Value = serde_yaml::from_str(text)?;
        let services = doc
            .get("services")
            .and_then(Value::as_mapping)
            .filter(|m| !m.is_empty())
            .ok_or(ManifestError::MissingServices)?;

        for (label, service) in services {
            let label = label.as_str().unwrap_or_default();
            let image = service.get("image").and_then(Value::as_str).unwrap_or("");
            if image.is_empty() {
                return Err(ManifestError::MissingImage(label.to_string()));
            }
        }

        Ok(Self { doc })
    }

    /// Serializes the manifest back to YAML.
    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        Ok(serde_yaml::to_string(&self.doc)?)
    }

    /// Returns the service labels in manifest order.
    pub fn service_names(&self) -> Vec<String> {
        self.services()
            .filter_map(|(label, _)| label.as_str())
            .map(str::to_string)
            .collect()
    }

    /// Extracts the tracked image references, in manifest order.
    ///
    /// Image strings that do not parse as `registry/image:tag` are skipped;
    /// they can never be tracked.
    pub fn tracked_images(&self, tracked: &TrackedImages) -> Vec<ImageRef> {
        self.services()
            .filter_map(|(_, service)| service.get("image").and_then(Value::as_str))
            .filter_map(ImageRef::parse)
            .filter(|image| tracked.matches(image))
            .collect()
    }

    /// Returns a copy with each service's image rewritten to the matching
    /// reference in `refs`, when one exists.
    ///
    /// Matching is by `(registry, image)`; services whose image is not in
    /// `refs` (or does not parse) are left untouched. Merging the same
    /// references twice is a no-op.
    pub fn merge(&self, refs: &[ImageRef]) -> Self {
        let mut doc = self.doc.clone();
        if let Some(services) = doc.get_mut("services").and_then(Value::as_mapping_mut) {
            for (_, service) in services.iter_mut() {
                let Some(current) = service
                    .get("image")
                    .and_then(Value::as_str)
                    .and_then(ImageRef::parse)
                else {
                    continue;
                };
                if let Some(next) = refs.iter().find(|r| r.same_image(&current)) {
                    if let Some(image) = service.get_mut("image") {
                        *image = Value::from(next.to_string());
                    }
                }
            }
        }
        Self { doc }
    }

    fn services(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.doc
            .get("services")
            .and_then(Value::as_mapping)
            .into_iter()
            .flat_map(Mapping::iter)
    }
}
