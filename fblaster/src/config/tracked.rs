//! The operator's tracked image set.

use crate::compose::ImageRef;

/// Set of image patterns whose tags the supervisor may advance.
///
/// Each pattern is either `registry/image` (exact match on both parts) or a
/// bare repository name, which matches any registry whose repository path
/// equals the name or ends with `/name`.
#[derive(Debug, Clone, Default)]
pub struct TrackedImages {
    patterns: Vec<Pattern>,
}

#[derive(Debug, Clone)]
enum Pattern {
    Qualified { registry: String, image: String },
    Bare(String),
}

impl TrackedImages {
    /// Builds the set from operator-supplied patterns, typically the
    /// comma-separated `--images` argument.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref().trim();
                match p.split_once('/') {
                    Some((registry, image)) => Pattern::Qualified {
                        registry: registry.to_string(),
                        image: image.to_string(),
                    },
                    None => Pattern::Bare(p.to_string()),
                }
            })
            .filter(|p| match p {
                Pattern::Qualified { registry, image } => {
                    !registry.is_empty() && !image.is_empty()
                }
                Pattern::Bare(name) => !name.is_empty(),
            })
            .collect();
        Self { patterns }
    }

    /// Returns true when the given reference is tracked.
    pub fn matches(&self, image: &ImageRef) -> bool {
        self.patterns.iter().any(|p| match p {
            Pattern::Qualified {
                registry,
                image: repo,
            } => image.registry == *registry && image.image == *repo,
            Pattern::Bare(name) => {
                image.image == *name || image.image.ends_with(&format!("/{name}"))
            }
        })
    }

    /// Returns true when no patterns were configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
