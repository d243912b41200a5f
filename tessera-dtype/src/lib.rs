#![deny(missing_docs)]
//! Datatype definitions and coordinate ranges for the Tessera storage engine.

mod datatype;
mod native;
mod range;

pub use datatype::*;
pub use native::*;
pub use range::*;

/// Size in bytes of a variable-length cell offset.
pub const CELL_VAR_OFFSET_SIZE: u64 = 8;

/// Name of the special zipped-coordinates pseudo-field.
pub const COORDS_NAME: &str = "__coords";

/// Name of the cell timestamps special field.
pub const TIMESTAMPS_NAME: &str = "__timestamps";

/// Name of the delete timestamps special field.
pub const DELETE_TIMESTAMPS_NAME: &str = "__delete_timestamps";

/// Name of the delete condition index special field.
pub const DELETE_CONDITION_INDEX_NAME: &str = "__delete_condition_index";
