//! Update pipeline: debounce, pairwise diffing, pull, respawn, persist.

mod debounce;
mod update;

pub use debounce::debounce;
pub use update::UpdatePipeline;
