//! Compatible tag selection.
//!
//! The upgrade rule is the caret range of the currently running tag:
//! `^1.2.3` accepts `[1.2.3, 2.0.0)`, `^0.2.3` accepts `[0.2.3, 0.3.0)`.
//! Anything across the next incompatible boundary requires operator action
//! on the manifest itself.

use semver::{Version, VersionReq};
use tracing::trace;

/// Picks the greatest tag compatible with, and newer than, `current`.
///
/// Tags that do not parse as semver are ignored. Returns `None` when the
/// current tag itself is not semver, when no candidate is compatible, or
/// when the best candidate is the current tag.
pub fn newest_compatible(current: &str, tags: &[String]) -> Option<String> {
    let current_version = Version::parse(current).ok()?;
    let range = VersionReq::parse(&format!("^{current}")).ok()?;

    let best = tags
        .iter()
        .filter_map(|tag| Version::parse(tag).ok().map(|version| (version, tag)))
        .filter(|(version, _)| range.matches(version) && *version > current_version)
        .max_by(|(a, _), (b, _)| a.cmp(b));

    best.map(|(version, tag)| {
        trace!(current, selected = %version, "Selected compatible upgrade");
        tag.clone()
    })
}
