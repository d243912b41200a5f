//! Native Rust types backing the cell datatypes, and dispatch macros.

use std::cmp::Ordering;
use std::fmt::{Debug, Display};

use num_traits::bounds::Bounded;
use num_traits::{FromPrimitive, Num, NumCast, ToPrimitive};
use tessera_error::TesseraResult;

use crate::Datatype;

/// A trait for native Rust types that correspond 1:1 to a physical
/// [`Datatype`].
pub trait NativeCellType:
    Send
    + Sync
    + Clone
    + Copy
    + Debug
    + Display
    + PartialEq
    + PartialOrd
    + Default
    + Num
    + NumCast
    + Bounded
    + FromPrimitive
    + ToPrimitive
    + ToLeBytes
    + TryFromLeBytes
    + 'static
{
    /// The canonical physical datatype of this native type.
    const DATATYPE: Datatype;

    /// Whether this instance is NaN. Always `false` for integer types.
    fn is_nan(self) -> bool;

    /// Total ordering over instances of this type.
    fn total_compare(self, other: Self) -> Ordering;

    /// Bitwise equality.
    fn is_eq(self, other: Self) -> bool;
}

macro_rules! native_cell_type {
    ($T:ty, $dtype:tt) => {
        impl NativeCellType for $T {
            const DATATYPE: Datatype = Datatype::$dtype;

            fn is_nan(self) -> bool {
                false
            }

            fn total_compare(self, other: Self) -> Ordering {
                self.cmp(&other)
            }

            fn is_eq(self, other: Self) -> bool {
                self == other
            }
        }
    };
}

macro_rules! native_float_cell_type {
    ($T:ty, $dtype:tt) => {
        impl NativeCellType for $T {
            const DATATYPE: Datatype = Datatype::$dtype;

            fn is_nan(self) -> bool {
                <$T>::is_nan(self)
            }

            fn total_compare(self, other: Self) -> Ordering {
                self.total_cmp(&other)
            }

            fn is_eq(self, other: Self) -> bool {
                self.to_bits() == other.to_bits()
            }
        }
    };
}

native_cell_type!(u8, U8);
native_cell_type!(u16, U16);
native_cell_type!(u32, U32);
native_cell_type!(u64, U64);
native_cell_type!(i8, I8);
native_cell_type!(i16, I16);
native_cell_type!(i32, I32);
native_cell_type!(i64, I64);
native_float_cell_type!(f32, F32);
native_float_cell_type!(f64, F64);

/// Macro to match over each physical datatype, binding the corresponding
/// native type. Panics for datatypes without a numeric physical form; route
/// logical types through [`Datatype::physical`] first.
#[macro_export]
macro_rules! match_each_native_dtype {
    ($self:expr, | $_:tt $T:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $T:ident ) => ( $($body)* )}
        use $crate::Datatype;
        match $self {
            Datatype::I8 => __with__! { i8 },
            Datatype::I16 => __with__! { i16 },
            Datatype::I32 => __with__! { i32 },
            Datatype::I64 => __with__! { i64 },
            Datatype::U8 => __with__! { u8 },
            Datatype::U16 => __with__! { u16 },
            Datatype::U32 => __with__! { u32 },
            Datatype::U64 => __with__! { u64 },
            Datatype::F32 => __with__! { f32 },
            Datatype::F64 => __with__! { f64 },
            other => panic!("datatype {} has no native form", other),
        }
    })
}

/// Macro to match over each integer physical datatype, binding the
/// corresponding native type.
#[macro_export]
macro_rules! match_each_integer_dtype {
    ($self:expr, | $_:tt $T:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $T:ident ) => ( $($body)* )}
        use $crate::Datatype;
        match $self {
            Datatype::I8 => __with__! { i8 },
            Datatype::I16 => __with__! { i16 },
            Datatype::I32 => __with__! { i32 },
            Datatype::I64 => __with__! { i64 },
            Datatype::U8 => __with__! { u8 },
            Datatype::U16 => __with__! { u16 },
            Datatype::U32 => __with__! { u32 },
            Datatype::U64 => __with__! { u64 },
            other => panic!("unsupported integer datatype {}", other),
        }
    })
}

/// Macro to match over each floating point datatype, binding the
/// corresponding native type.
#[macro_export]
macro_rules! match_each_real_dtype {
    ($self:expr, | $_:tt $T:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $T:ident ) => ( $($body)* )}
        use $crate::Datatype;
        match $self {
            Datatype::F32 => __with__! { f32 },
            Datatype::F64 => __with__! { f64 },
            other => panic!("unsupported real datatype {}", other),
        }
    })
}

/// A trait for types that can be serialized to little-endian bytes by value.
pub trait ToLeBytes: Sized {
    /// The byte array form.
    type Bytes: AsRef<[u8]>;

    /// This value's bytes in little-endian order.
    fn to_le_bytes(self) -> Self::Bytes;
}

/// A trait for types that can be decoded from a little-endian byte slice.
pub trait TryFromLeBytes: Sized {
    /// Decode a value from `bytes`, which must be exactly the type's width.
    fn try_from_le_bytes(bytes: &[u8]) -> TesseraResult<Self>;
}

macro_rules! le_bytes {
    ($T:ty) => {
        impl ToLeBytes for $T {
            type Bytes = [u8; std::mem::size_of::<$T>()];

            #[inline]
            fn to_le_bytes(self) -> Self::Bytes {
                <$T>::to_le_bytes(self)
            }
        }

        impl TryFromLeBytes for $T {
            fn try_from_le_bytes(bytes: &[u8]) -> TesseraResult<Self> {
                let arr: [u8; std::mem::size_of::<$T>()] = bytes.try_into().map_err(|_| {
                    tessera_error::tessera_err!(
                        Truncated: "expected {} bytes for {}, got {}",
                        std::mem::size_of::<$T>(),
                        stringify!($T),
                        bytes.len()
                    )
                })?;
                Ok(<$T>::from_le_bytes(arr))
            }
        }
    };
}

le_bytes!(u8);
le_bytes!(u16);
le_bytes!(u32);
le_bytes!(u64);
le_bytes!(i8);
le_bytes!(i16);
le_bytes!(i32);
le_bytes!(i64);
le_bytes!(f32);
le_bytes!(f64);
