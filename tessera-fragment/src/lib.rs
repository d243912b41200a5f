#![deny(missing_docs)]
//! Fragment manifests and tile indexes for the Tessera storage engine.
//!
//! A fragment is a write-once, timestamped batch of cells. Its manifest
//! ([`FragmentMetadata`]) records where every tile of every field lives on
//! storage, the R-tree over sparse tile bounding rectangles, and per-tile
//! summary statistics. Manifests load lazily, section by section, against a
//! [`MemoryTracker`] budget.

mod generator;
mod info;
mod memory;
mod meta;
mod overlap;
mod rtree;
mod uri;
mod wire;

pub use generator::*;
pub use info::*;
pub use memory::*;
pub use meta::*;
pub use overlap::*;
pub use rtree::*;
pub use uri::*;

#[cfg(test)]
mod tests;
