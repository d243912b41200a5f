//! Tessera: an embedded storage engine core for tiled multi-dimensional
//! arrays. This crate re-exports the workspace members under short names.

pub use {
    tessera_dtype as dtype, tessera_error as error, tessera_fragment as fragment,
    tessera_io as io, tessera_metrics as metrics, tessera_schema as schema,
};
