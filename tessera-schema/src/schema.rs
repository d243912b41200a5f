//! The immutable array schema shared by every fragment of an array.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tessera_dtype::{
    CellValNum, Datatype, COORDS_NAME, DELETE_CONDITION_INDEX_NAME, DELETE_TIMESTAMPS_NAME,
    TIMESTAMPS_NAME,
};
use tessera_error::{tessera_bail, tessera_err, TesseraResult};

use crate::{Attribute, Domain, Layout};

/// The current fragment on-disk format version written by this build.
pub const CURRENT_FORMAT_VERSION: u32 = 16;

/// The oldest fragment format version this build can load.
pub const OLDEST_SUPPORTED_FORMAT_VERSION: u32 = 3;

/// Whether the array is dense or sparse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayType {
    /// Every domain cell is logical.
    Dense,
    /// Cells exist only where written.
    Sparse,
}

/// A resolved view of one field (attribute, dimension, or special field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    /// The field datatype.
    pub datatype: Datatype,
    /// Values per cell.
    pub cell_val_num: CellValNum,
    /// Whether cells may be null.
    pub nullable: bool,
    /// Whether the field is a dimension.
    pub is_dim: bool,
}

impl FieldSchema {
    /// Whether cells are variable length.
    pub fn var_size(&self) -> bool {
        self.cell_val_num.is_var()
    }

    /// The fixed size of one cell in bytes, or `None` for variable length.
    pub fn cell_size(&self) -> Option<u64> {
        self.cell_val_num
            .fixed()
            .map(|n| n as u64 * self.datatype.byte_width())
    }
}

/// An array schema: attributes, domain, capacity, orders, and the format
/// version it writes.
#[derive(Debug, Clone, PartialEq)]
pub struct ArraySchema {
    name: String,
    version: u32,
    array_type: ArrayType,
    domain: Domain,
    attributes: Vec<Attribute>,
    capacity: u64,
}

impl ArraySchema {
    /// Build and validate a schema.
    pub fn new(
        name: impl Into<String>,
        array_type: ArrayType,
        domain: Domain,
        attributes: Vec<Attribute>,
        capacity: u64,
    ) -> TesseraResult<Self> {
        let schema = Self {
            name: name.into(),
            version: CURRENT_FORMAT_VERSION,
            array_type,
            domain,
            attributes,
            capacity,
        };
        schema.check()?;
        Ok(schema)
    }

    /// Override the write format version, for producing older layouts.
    pub fn with_version(mut self, version: u32) -> TesseraResult<Self> {
        if !(OLDEST_SUPPORTED_FORMAT_VERSION..=CURRENT_FORMAT_VERSION).contains(&version) {
            tessera_bail!(
                FormatVersionUnsupported: "cannot write format version {}, supported range is {}..={}",
                version, OLDEST_SUPPORTED_FORMAT_VERSION, CURRENT_FORMAT_VERSION
            );
        }
        self.version = version;
        Ok(self)
    }

    fn check(&self) -> TesseraResult<()> {
        if self.name.is_empty() {
            tessera_bail!(InvalidArgument: "schema names cannot be empty");
        }
        if self.attributes.is_empty() {
            tessera_bail!(InvalidArgument: "a schema needs at least one attribute");
        }
        for attr in &self.attributes {
            attr.check()?;
            if self.domain.dimension_index(attr.name()).is_ok() {
                tessera_bail!(
                    InvalidArgument: "name {:?} is used by both an attribute and a dimension",
                    attr.name()
                );
            }
        }
        if matches!(self.array_type, ArrayType::Sparse) && self.capacity == 0 {
            tessera_bail!(InvalidArgument: "sparse arrays need a non-zero tile capacity");
        }
        if matches!(self.array_type, ArrayType::Dense) {
            if !self.domain.all_dims_fixed() {
                tessera_bail!(InvalidArgument: "dense arrays cannot have var-size dimensions");
            }
            if !self.domain.all_dims_same_type() {
                tessera_bail!(InvalidArgument: "dense arrays need a homogeneous domain");
            }
            let dt = self.domain.dimension(0).datatype();
            if !dt.is_int() && !dt.is_datetime() && !dt.is_time() {
                tessera_bail!(InvalidArgument: "dense domains must be integral, got {}", dt);
            }
        }
        Ok(())
    }

    /// The schema name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fragment format version this schema writes.
    pub fn write_version(&self) -> u32 {
        self.version
    }

    /// Whether the array is dense.
    pub fn dense(&self) -> bool {
        matches!(self.array_type, ArrayType::Dense)
    }

    /// The array type.
    pub fn array_type(&self) -> ArrayType {
        self.array_type
    }

    /// The domain.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Number of dimensions.
    pub fn dim_num(&self) -> u32 {
        self.domain.dim_num()
    }

    /// Number of attributes.
    pub fn attribute_num(&self) -> u32 {
        self.attributes.len() as u32
    }

    /// All attributes in order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// The attribute at index `i`.
    pub fn attribute(&self, i: u32) -> &Attribute {
        &self.attributes[i as usize]
    }

    /// Sparse tile capacity in cells.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The cell order.
    pub fn cell_order(&self) -> Layout {
        self.domain.cell_order()
    }

    /// The tile order.
    pub fn tile_order(&self) -> Layout {
        self.domain.tile_order()
    }

    /// Whether `name` is a dimension.
    pub fn is_dim(&self, name: &str) -> bool {
        self.domain.dimension_index(name).is_ok()
    }

    /// Whether `name` is an attribute.
    pub fn is_attr(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name() == name)
    }

    /// Resolve any addressable field: attributes, dimensions, the zipped
    /// coordinates pseudo-field, and the timestamp/delete special fields.
    pub fn field_schema(&self, name: &str) -> TesseraResult<FieldSchema> {
        if let Some(attr) = self.attributes.iter().find(|a| a.name() == name) {
            return Ok(FieldSchema {
                datatype: attr.datatype(),
                cell_val_num: attr.cell_val_num(),
                nullable: attr.is_nullable(),
                is_dim: false,
            });
        }
        if let Ok(d) = self.domain.dimension_index(name) {
            let dim = self.domain.dimension(d);
            return Ok(FieldSchema {
                datatype: dim.datatype(),
                cell_val_num: dim.cell_val_num(),
                nullable: false,
                is_dim: true,
            });
        }
        match name {
            COORDS_NAME => {
                let dt = self.domain.dimension(0).datatype();
                let n = std::num::NonZeroU32::new(self.dim_num())
                    .ok_or_else(|| tessera_err!(InvalidArgument: "empty domain"))?;
                Ok(FieldSchema {
                    datatype: dt,
                    cell_val_num: CellValNum::Fixed(n),
                    nullable: false,
                    is_dim: false,
                })
            }
            TIMESTAMPS_NAME | DELETE_TIMESTAMPS_NAME | DELETE_CONDITION_INDEX_NAME => {
                Ok(FieldSchema {
                    datatype: Datatype::U64,
                    cell_val_num: CellValNum::single(),
                    nullable: false,
                    is_dim: false,
                })
            }
            _ => Err(tessera_err!(InvalidArgument: "no field named {:?}", name)),
        }
    }

    /// Whether the field's cells are variable length.
    pub fn var_size(&self, name: &str) -> TesseraResult<bool> {
        Ok(self.field_schema(name)?.var_size())
    }

    /// Whether the field's cells may be null.
    pub fn is_nullable(&self, name: &str) -> TesseraResult<bool> {
        Ok(self.field_schema(name)?.nullable)
    }

    /// The field's datatype.
    pub fn type_of(&self, name: &str) -> TesseraResult<Datatype> {
        Ok(self.field_schema(name)?.datatype)
    }

    /// The field's fixed cell size in bytes; errors for variable length.
    pub fn cell_size(&self, name: &str) -> TesseraResult<u64> {
        self.field_schema(name)?
            .cell_size()
            .ok_or_else(|| tessera_err!(InvalidArgument: "field {:?} is variable length", name))
    }
}

/// Schemas of an array keyed by schema name, shared by stable handle.
pub type SchemaMap = FxHashMap<String, Arc<ArraySchema>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dimension;
    use tessera_dtype::CellValNum;

    fn sparse_2d() -> ArraySchema {
        let domain = Domain::new(
            vec![
                Dimension::new("x", Datatype::I32, (0i32, 99i32), 10i32).unwrap(),
                Dimension::new("y", Datatype::I32, (0i32, 99i32), 10i32).unwrap(),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap();
        ArraySchema::new(
            "schema_0",
            ArrayType::Sparse,
            domain,
            vec![
                Attribute::new("a", Datatype::I32),
                Attribute::new("s", Datatype::StringAscii).with_cell_val_num(CellValNum::Var),
            ],
            2,
        )
        .unwrap()
    }

    #[test]
    fn field_resolution() {
        let schema = sparse_2d();
        assert!(schema.is_attr("a"));
        assert!(schema.is_dim("x"));
        assert!(!schema.is_dim("a"));
        assert!(schema.var_size("s").unwrap());
        assert!(!schema.var_size("x").unwrap());
        assert_eq!(schema.cell_size("a").unwrap(), 4);
        assert!(schema.cell_size("s").is_err());
        assert_eq!(schema.type_of(TIMESTAMPS_NAME).unwrap(), Datatype::U64);
        let coords = schema.field_schema(COORDS_NAME).unwrap();
        assert_eq!(coords.cell_size(), Some(8));
        assert!(schema.field_schema("nope").is_err());
    }

    #[test]
    fn validation() {
        let domain = Domain::new(
            vec![Dimension::new("x", Datatype::I32, (0i32, 9i32), 1i32).unwrap()],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap();
        // Attribute shadowing a dimension name.
        assert!(ArraySchema::new(
            "s",
            ArrayType::Sparse,
            domain.clone(),
            vec![Attribute::new("x", Datatype::I32)],
            2,
        )
        .is_err());
        // Sparse capacity of zero.
        assert!(ArraySchema::new(
            "s",
            ArrayType::Sparse,
            domain.clone(),
            vec![Attribute::new("a", Datatype::I32)],
            0,
        )
        .is_err());
        // Dense over a float domain.
        let float_domain = Domain::new(
            vec![Dimension::new("x", Datatype::F64, (0.0f64, 1.0f64), 0.5f64).unwrap()],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap();
        assert!(ArraySchema::new(
            "s",
            ArrayType::Dense,
            float_domain,
            vec![Attribute::new("a", Datatype::I32)],
            0,
        )
        .is_err());
    }

    #[test]
    fn version_bounds() {
        let schema = sparse_2d();
        assert_eq!(schema.write_version(), CURRENT_FORMAT_VERSION);
        assert!(schema.clone().with_version(7).is_ok());
        assert!(schema.clone().with_version(2).is_err());
        assert!(schema.with_version(99).is_err());
    }
}
