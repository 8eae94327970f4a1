//! Image reference parsing and formatting.
//!
//! An [`ImageRef`] is the `(registry, image, tag)` triple behind a compose
//! service's `image:` string. Two references denote the same tracked image
//! when their registry and repository path match; only the tag moves.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fully qualified container image reference.
///
/// The canonical string form is `registry/image:tag`, where `registry` may
/// carry a port (`reg.example.com:5000`) and `image` may be a nested
/// repository path (`team/app`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry host, optionally with a port.
    pub registry: String,
    /// Repository path within the registry.
    pub image: String,
    /// Image tag.
    pub tag: String,
}

impl ImageRef {
    /// Creates a reference from its parts.
    pub fn new(
        registry: impl Into<String>,
        image: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// Parses a canonical `registry/image:tag` string.
    ///
    /// Returns `None` for strings that do not carry an explicit registry
    /// and tag (`redis:5.0-alpine`, `nginx`). Such images are simply not
    /// candidates for tracking.
    pub fn parse(s: &str) -> Option<Self> {
        let (registry, rest) = s.split_once('/')?;
        let (image, tag) = rest.rsplit_once(':')?;
        if registry.is_empty() || image.is_empty() || tag.is_empty() {
            return None;
        }
        Some(Self::new(registry, image, tag))
    }

    /// Returns the `(registry, image)` identity shared by all tags of the
    /// same tracked image.
    pub fn coordinate(&self) -> (&str, &str) {
        (&self.registry, &self.image)
    }

    /// Returns true when `other` names the same image, regardless of tag.
    pub fn same_image(&self, other: &ImageRef) -> bool {
        self.coordinate() == other.coordinate()
    }

    /// Returns a copy of this reference with a different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            image: self.image.clone(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.image, self.tag)
    }
}
