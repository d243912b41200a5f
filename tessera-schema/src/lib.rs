#![deny(missing_docs)]
//! The array-schema model for Tessera: attributes, typed dimensions with tile
//! arithmetic, domains, and the immutable `ArraySchema` shared by fragments.

mod attribute;
mod dimension;
mod domain;
mod schema;

pub use attribute::*;
pub use dimension::*;
pub use domain::*;
pub use schema::*;
