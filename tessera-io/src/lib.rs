#![deny(missing_docs)]
//! Storage I/O for the Tessera engine: the blob-store abstraction, the
//! generic-tile format used to persist metadata sections, the little-endian
//! serializer kit, and the shared context resources (compute pool, metrics,
//! configuration).

mod config;
mod encryption;
mod generic_tile;
mod resources;
mod serializer;
mod vfs;

pub use config::*;
pub use encryption::*;
pub use generic_tile::*;
pub use resources::*;
pub use serializer::*;
pub use vfs::*;
