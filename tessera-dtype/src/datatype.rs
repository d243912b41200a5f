//! The closed set of cell datatypes.

use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

use tessera_error::{tessera_err, TesseraError, TesseraResult};

/// A cell datatype. Every variant has a fixed byte width; variable-length
/// cells are expressed through [`CellValNum::Var`] on the field, not the
/// datatype itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Datatype {
    /// A 32-bit signed integer.
    I32 = 0,
    /// A 64-bit signed integer.
    I64 = 1,
    /// A 32-bit floating point number.
    F32 = 2,
    /// A 64-bit floating point number.
    F64 = 3,
    /// A single ASCII character.
    Char = 4,
    /// An 8-bit signed integer.
    I8 = 5,
    /// An 8-bit unsigned integer.
    U8 = 6,
    /// A 16-bit signed integer.
    I16 = 7,
    /// A 16-bit unsigned integer.
    U16 = 8,
    /// A 32-bit unsigned integer.
    U32 = 9,
    /// A 64-bit unsigned integer.
    U64 = 10,
    /// An ASCII string.
    StringAscii = 11,
    /// A UTF-8 string.
    StringUtf8 = 12,
    /// A UTF-16 string.
    StringUtf16 = 13,
    /// A UTF-32 string.
    StringUtf32 = 14,
    /// A UCS-2 string.
    StringUcs2 = 15,
    /// A UCS-4 string.
    StringUcs4 = 16,
    /// An untyped cell.
    Any = 17,
    /// Datetime with year resolution.
    DateTimeYear = 18,
    /// Datetime with month resolution.
    DateTimeMonth = 19,
    /// Datetime with week resolution.
    DateTimeWeek = 20,
    /// Datetime with day resolution.
    DateTimeDay = 21,
    /// Datetime with hour resolution.
    DateTimeHr = 22,
    /// Datetime with minute resolution.
    DateTimeMin = 23,
    /// Datetime with second resolution.
    DateTimeSec = 24,
    /// Datetime with millisecond resolution.
    DateTimeMs = 25,
    /// Datetime with microsecond resolution.
    DateTimeUs = 26,
    /// Datetime with nanosecond resolution.
    DateTimeNs = 27,
    /// Datetime with picosecond resolution.
    DateTimePs = 28,
    /// Datetime with femtosecond resolution.
    DateTimeFs = 29,
    /// Datetime with attosecond resolution.
    DateTimeAs = 30,
    /// Time of day with hour resolution.
    TimeHr = 31,
    /// Time of day with minute resolution.
    TimeMin = 32,
    /// Time of day with second resolution.
    TimeSec = 33,
    /// Time of day with millisecond resolution.
    TimeMs = 34,
    /// Time of day with microsecond resolution.
    TimeUs = 35,
    /// Time of day with nanosecond resolution.
    TimeNs = 36,
    /// Time of day with picosecond resolution.
    TimePs = 37,
    /// Time of day with femtosecond resolution.
    TimeFs = 38,
    /// Time of day with attosecond resolution.
    TimeAs = 39,
    /// A boolean cell.
    Bool = 40,
    /// An opaque byte.
    Blob = 41,
    /// A geometry in well-known binary form.
    GeomWkb = 42,
    /// A geometry in well-known text form.
    GeomWkt = 43,
}

impl Datatype {
    /// The size in bytes of one value of this datatype.
    pub const fn byte_width(&self) -> u64 {
        match self {
            Self::I8 | Self::U8 | Self::Char | Self::Bool | Self::Blob => 1,
            Self::GeomWkb | Self::GeomWkt => 1,
            Self::StringAscii | Self::StringUtf8 | Self::Any => 1,
            Self::I16 | Self::U16 | Self::StringUtf16 | Self::StringUcs2 => 2,
            Self::I32 | Self::U32 | Self::F32 | Self::StringUtf32 | Self::StringUcs4 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            _ => 8, // datetime and time variants are 64-bit counts
        }
    }

    /// Returns `true` iff this is a signed integer type.
    pub const fn is_signed_int(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Returns `true` iff this is an unsigned integer type.
    pub const fn is_unsigned_int(&self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32 | Self::U64)
    }

    /// Returns `true` iff this is an integer type.
    pub const fn is_int(&self) -> bool {
        self.is_signed_int() || self.is_unsigned_int()
    }

    /// Returns `true` iff this is a floating point type.
    pub const fn is_real(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Returns `true` iff this is a string type.
    pub const fn is_string(&self) -> bool {
        matches!(
            self,
            Self::StringAscii
                | Self::StringUtf8
                | Self::StringUtf16
                | Self::StringUtf32
                | Self::StringUcs2
                | Self::StringUcs4
        )
    }

    /// Returns `true` iff this is a datetime type.
    pub const fn is_datetime(&self) -> bool {
        (*self as u8) >= (Self::DateTimeYear as u8) && (*self as u8) <= (Self::DateTimeAs as u8)
    }

    /// Returns `true` iff this is a time-of-day type.
    pub const fn is_time(&self) -> bool {
        (*self as u8) >= (Self::TimeHr as u8) && (*self as u8) <= (Self::TimeAs as u8)
    }

    /// Returns `true` iff this datatype may type a dimension.
    ///
    /// Strings other than ASCII, single chars, booleans, opaque bytes, and
    /// geometries cannot order a domain and are rejected at schema
    /// construction.
    pub const fn is_valid_dimension_type(&self) -> bool {
        self.is_int()
            || self.is_real()
            || self.is_datetime()
            || self.is_time()
            || matches!(self, Self::StringAscii)
    }

    /// The physical datatype that carries this logical type in memory and in
    /// per-tile metadata: datetimes and times are 64-bit signed counts,
    /// booleans are bytes.
    pub const fn physical(&self) -> Datatype {
        if self.is_datetime() || self.is_time() {
            Datatype::I64
        } else if matches!(self, Self::Bool) {
            Datatype::U8
        } else {
            *self
        }
    }

    /// Decode a datatype from its on-disk discriminant.
    pub fn from_wire(value: u8) -> TesseraResult<Self> {
        if value > Self::GeomWkt as u8 {
            return Err(tessera_err!(Corrupt: "unknown datatype discriminant {}", value));
        }
        // Discriminants are dense from 0.
        Ok(unsafe { std::mem::transmute::<u8, Datatype>(value) })
    }
}

impl Display for Datatype {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The number of values in one cell of a field: a fixed vector length or
/// variable length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellValNum {
    /// Every cell holds exactly this many values.
    Fixed(NonZeroU32),
    /// Cells hold a variable number of values, stored through an offsets
    /// buffer.
    Var,
}

/// The on-wire sentinel marking a variable-length cell.
pub const CELL_VAR_SENTINEL: u32 = u32::MAX;

impl CellValNum {
    /// A single-value cell.
    pub const fn single() -> Self {
        // SAFETY: 1 is non-zero.
        CellValNum::Fixed(unsafe { NonZeroU32::new_unchecked(1) })
    }

    /// Returns `true` iff cells are variable length.
    pub const fn is_var(&self) -> bool {
        matches!(self, CellValNum::Var)
    }

    /// The fixed vector length, or `None` for variable-length cells.
    pub fn fixed(&self) -> Option<u32> {
        match self {
            CellValNum::Fixed(n) => Some(n.get()),
            CellValNum::Var => None,
        }
    }

    /// Encode for the wire.
    pub fn to_wire(&self) -> u32 {
        match self {
            CellValNum::Fixed(n) => n.get(),
            CellValNum::Var => CELL_VAR_SENTINEL,
        }
    }

    /// Decode from the wire.
    pub fn from_wire(value: u32) -> TesseraResult<Self> {
        if value == CELL_VAR_SENTINEL {
            return Ok(CellValNum::Var);
        }
        NonZeroU32::new(value)
            .map(CellValNum::Fixed)
            .ok_or_else(|| tessera_err!(Corrupt: "cell_val_num of zero"))
    }
}

impl TryFrom<u32> for CellValNum {
    type Error = TesseraError;

    fn try_from(value: u32) -> TesseraResult<Self> {
        CellValNum::from_wire(value)
    }
}
