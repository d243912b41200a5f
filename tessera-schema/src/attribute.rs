//! Array attributes.

use tessera_dtype::{CellValNum, Datatype};
use tessera_error::{tessera_bail, TesseraResult};

/// An attribute of an array: a named, typed value stored per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
    cell_val_num: CellValNum,
    nullable: bool,
}

impl Attribute {
    /// A single-value, non-nullable attribute.
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            cell_val_num: CellValNum::single(),
            nullable: false,
        }
    }

    /// Set the number of values per cell.
    pub fn with_cell_val_num(mut self, cell_val_num: CellValNum) -> Self {
        self.cell_val_num = cell_val_num;
        self
    }

    /// Mark the attribute nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Validate internal consistency; called at schema build.
    pub fn check(&self) -> TesseraResult<()> {
        if self.name.is_empty() {
            tessera_bail!(InvalidArgument: "attribute names cannot be empty");
        }
        if self.name.starts_with("__") {
            tessera_bail!(InvalidArgument: "attribute name {:?} uses the reserved prefix", self.name);
        }
        Ok(())
    }

    /// The attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attribute datatype.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Values per cell.
    pub fn cell_val_num(&self) -> CellValNum {
        self.cell_val_num
    }

    /// Whether cells are variable length.
    pub fn var_size(&self) -> bool {
        self.cell_val_num.is_var()
    }

    /// Whether cells may be null.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// The fixed size of one cell in bytes, or `None` for variable length.
    pub fn cell_size(&self) -> Option<u64> {
        self.cell_val_num
            .fixed()
            .map(|n| n as u64 * self.datatype.byte_width())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    #[test]
    fn cell_sizes() {
        let a = Attribute::new("a", Datatype::I32);
        assert_eq!(a.cell_size(), Some(4));

        let v = Attribute::new("v", Datatype::F64)
            .with_cell_val_num(CellValNum::Fixed(NonZeroU32::new(3).unwrap()));
        assert_eq!(v.cell_size(), Some(24));

        let s = Attribute::new("s", Datatype::StringAscii).with_cell_val_num(CellValNum::Var);
        assert_eq!(s.cell_size(), None);
        assert!(s.var_size());
    }

    #[test]
    fn reserved_names_rejected() {
        assert!(Attribute::new("__timestamps", Datatype::U64).check().is_err());
        assert!(Attribute::new("", Datatype::U64).check().is_err());
        assert!(Attribute::new("ok", Datatype::U64).check().is_ok());
    }
}
