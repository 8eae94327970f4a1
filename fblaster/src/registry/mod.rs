//! Registry polling.
//!
//! Watches each tracked image's registry for newer semver-compatible tags
//! and publishes full tracked-set snapshots whenever one advances.

mod client;
mod poller;
mod select;

pub use client::{HttpTagClient, RegistryError, TagClient};
pub use poller::spawn_poller;
pub use select::newest_compatible;

#[cfg(test)]
pub use client::tests::MockTagClient;
