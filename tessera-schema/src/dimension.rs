//! Array dimensions: a name, a datatype, a domain, and an optional tile
//! extent, plus the tile arithmetic the rest of the engine is built on.
//!
//! All arithmetic dispatches once on the dimension's physical datatype and
//! then runs monomorphized. Integer math happens in the matching unsigned
//! width so domains straddling the signed range behave; real tile upper
//! bounds are exclusive ceilings expressed with `next_down`.

use num_traits::ToPrimitive;
use tessera_dtype::{
    match_each_native_dtype, CellValNum, Datatype, NativeCellType, Range, ToLeBytes, TryFromLeBytes,
};
use tessera_error::{tessera_bail, TesseraExpect, TesseraResult};

/// Per-native-type tile arithmetic.
pub(crate) trait TileArithmetic: NativeCellType {
    /// Index of the tile containing `v`.
    fn tile_idx(v: Self, low: Self, extent: Self) -> u64;
    /// `v` rounded down to its tile's low coordinate.
    fn round_to_tile(v: Self, low: Self, extent: Self) -> Self;
    /// Low coordinate of tile `k`.
    fn tile_coord_low(k: u64, low: Self, extent: Self) -> Self;
    /// High coordinate of tile `k`.
    fn tile_coord_high(k: u64, low: Self, extent: Self) -> Self;
    /// Number of coordinates in `[low, high]`, saturating at `u64::MAX`.
    fn domain_range(low: Self, high: Self) -> u64;
    /// Whether `[low, high]` spans the entire representable range.
    fn is_full_domain(low: Self, high: Self) -> bool;
    /// The smallest representable value greater than `v`.
    fn next_up_value(v: Self) -> Self;
    /// Midpoint used when splitting `[low, high]`, plus unsplittability.
    fn mid_split(low: Self, high: Self) -> (Self, bool);
    /// Whether the value is NaN (reals only).
    fn value_is_nan(v: Self) -> bool {
        NativeCellType::is_nan(v)
    }
    /// Whether the value is infinite (reals only).
    fn value_is_infinite(v: Self) -> bool;
}

macro_rules! integer_tile_arithmetic {
    ($T:ty, $U:ty) => {
        impl TileArithmetic for $T {
            fn tile_idx(v: Self, low: Self, extent: Self) -> u64 {
                (v.wrapping_sub(low) as $U as u64) / (extent as $U as u64)
            }

            fn round_to_tile(v: Self, low: Self, extent: Self) -> Self {
                let d = v.wrapping_sub(low) as $U;
                let e = extent as $U;
                (d / e * e).wrapping_add(low as $U) as $T
            }

            fn tile_coord_low(k: u64, low: Self, extent: Self) -> Self {
                let lo = low as $U as u64;
                let e = extent as $U as u64;
                lo.wrapping_add(k.wrapping_mul(e)) as $U as $T
            }

            fn tile_coord_high(k: u64, low: Self, extent: Self) -> Self {
                let e = extent as $U;
                if e == <$U>::MAX {
                    return if low == <$T>::MIN {
                        <$T>::MAX - 1
                    } else {
                        <$T>::MAX
                    };
                }
                let lo = low as $U as u64;
                lo.wrapping_add(k.wrapping_add(1).wrapping_mul(e as u64))
                    .wrapping_sub(1) as $U as $T
            }

            fn domain_range(low: Self, high: Self) -> u64 {
                (high.wrapping_sub(low) as $U as u64).saturating_add(1)
            }

            fn is_full_domain(low: Self, high: Self) -> bool {
                low == <$T>::MIN && high == <$T>::MAX
            }

            fn next_up_value(v: Self) -> Self {
                v.saturating_add(1)
            }

            fn mid_split(low: Self, high: Self) -> (Self, bool) {
                let d = high.wrapping_sub(low) as $U;
                let mid = (low as $U).wrapping_add(d / 2) as $T;
                (mid, mid == high)
            }

            fn value_is_infinite(_v: Self) -> bool {
                false
            }
        }
    };
}

macro_rules! real_tile_arithmetic {
    ($T:ty) => {
        impl TileArithmetic for $T {
            fn tile_idx(v: Self, low: Self, extent: Self) -> u64 {
                ((v - low) / extent) as u64
            }

            fn round_to_tile(v: Self, low: Self, extent: Self) -> Self {
                ((v - low) / extent).floor() * extent + low
            }

            fn tile_coord_low(k: u64, low: Self, extent: Self) -> Self {
                low + k as $T * extent
            }

            fn tile_coord_high(k: u64, low: Self, extent: Self) -> Self {
                (low + (k + 1) as $T * extent).next_down()
            }

            fn domain_range(_low: Self, _high: Self) -> u64 {
                u64::MAX
            }

            fn is_full_domain(_low: Self, _high: Self) -> bool {
                false
            }

            fn next_up_value(v: Self) -> Self {
                v.next_up()
            }

            fn mid_split(low: Self, high: Self) -> (Self, bool) {
                let mid = low + (high - low) / 2 as $T;
                (mid, !(low < mid && mid < high))
            }

            fn value_is_infinite(v: Self) -> bool {
                v.is_infinite()
            }
        }
    };
}

integer_tile_arithmetic!(i8, u8);
integer_tile_arithmetic!(u8, u8);
integer_tile_arithmetic!(i16, u16);
integer_tile_arithmetic!(u16, u16);
integer_tile_arithmetic!(i32, u32);
integer_tile_arithmetic!(u32, u32);
integer_tile_arithmetic!(i64, u64);
integer_tile_arithmetic!(u64, u64);
real_tile_arithmetic!(f32);
real_tile_arithmetic!(f64);

/// A dimension of an array domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    name: String,
    datatype: Datatype,
    cell_val_num: CellValNum,
    domain: Range,
    tile_extent: Option<Vec<u8>>,
}

impl Dimension {
    /// A fixed-size dimension with a typed domain and tile extent.
    pub fn new<T: NativeCellType>(
        name: impl Into<String>,
        datatype: Datatype,
        domain: (T, T),
        tile_extent: T,
    ) -> TesseraResult<Self> {
        let dim = Self {
            name: name.into(),
            datatype,
            cell_val_num: CellValNum::single(),
            domain: Range::from_typed(domain.0, domain.1),
            tile_extent: Some(tile_extent.to_le_bytes().as_ref().to_vec()),
        };
        dim.check()?;
        Ok(dim)
    }

    /// A variable-size (string) dimension with an unbounded domain.
    pub fn new_var(name: impl Into<String>, datatype: Datatype) -> TesseraResult<Self> {
        if !matches!(datatype, Datatype::StringAscii) {
            tessera_bail!(
                InvalidArgument: "variable-size dimensions must be StringAscii, got {}", datatype
            );
        }
        Ok(Self {
            name: name.into(),
            datatype,
            cell_val_num: CellValNum::Var,
            domain: Range::empty(),
            tile_extent: None,
        })
    }

    fn check(&self) -> TesseraResult<()> {
        if !self.datatype.is_valid_dimension_type() {
            tessera_bail!(InvalidArgument: "datatype {} cannot type a dimension", self.datatype);
        }
        if self.var_size() {
            return Ok(());
        }
        if matches!(self.datatype, Datatype::StringAscii) {
            tessera_bail!(InvalidArgument: "StringAscii dimensions must be variable size");
        }
        if self.domain.size() != 2 * self.coord_size() {
            tessera_bail!(
                InvalidArgument: "domain on dimension {} holds {} bytes, datatype {} needs {}",
                self.name, self.domain.size(), self.datatype, 2 * self.coord_size()
            );
        }
        if let Some(extent) = &self.tile_extent {
            if extent.len() as u64 != self.coord_size() {
                tessera_bail!(
                    InvalidArgument: "tile extent on dimension {} does not match datatype {}",
                    self.name, self.datatype
                );
            }
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let low = self.domain.start_as::<$T>();
            let high = self.domain.end_as::<$T>();
            if <$T as TileArithmetic>::value_is_nan(low) || <$T as TileArithmetic>::value_is_nan(high) {
                tessera_bail!(InvalidArgument: "domain bounds on dimension {} cannot be NaN", self.name);
            }
            if <$T as TileArithmetic>::value_is_infinite(low)
                || <$T as TileArithmetic>::value_is_infinite(high)
            {
                tessera_bail!(InvalidArgument: "domain bounds on dimension {} cannot be infinite", self.name);
            }
            if !(low <= high) {
                tessera_bail!(
                    InvalidArgument: "domain low {} exceeds high {} on dimension {}", low, high, self.name
                );
            }
            if <$T as TileArithmetic>::is_full_domain(low, high) {
                tessera_bail!(
                    InvalidArgument: "domain on dimension {} cannot span the full type range", self.name
                );
            }
            if let Some(extent) = self.tile_extent_as_opt::<$T>() {
                let zero = <$T as num_traits::Zero>::zero();
                if <$T as TileArithmetic>::value_is_nan(extent) || !(extent > zero) {
                    tessera_bail!(InvalidArgument: "tile extent on dimension {} must be positive", self.name);
                }
                let one = <$T as num_traits::One>::one();
                let extent_count = <$T as TileArithmetic>::tile_idx(extent, zero, one);
                let domain_count = <$T as TileArithmetic>::domain_range(low, high);
                if extent_count > domain_count {
                    tessera_bail!(
                        InvalidArgument: "tile extent on dimension {} exceeds its domain", self.name
                    );
                }
            }
            Ok(())
        })
    }

    /// The dimension name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dimension datatype.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Values per coordinate.
    pub fn cell_val_num(&self) -> CellValNum {
        self.cell_val_num
    }

    /// Whether coordinates are variable length.
    pub fn var_size(&self) -> bool {
        self.cell_val_num.is_var()
    }

    /// The byte size of one coordinate (fixed-size dimensions).
    pub fn coord_size(&self) -> u64 {
        self.datatype.byte_width()
    }

    /// The dimension domain.
    pub fn domain(&self) -> &Range {
        &self.domain
    }

    /// The tile extent decoded as `T`, if one is set.
    fn tile_extent_as_opt<T: NativeCellType>(&self) -> Option<T> {
        self.tile_extent.as_ref().map(|bytes| {
            T::try_from_le_bytes(bytes).tessera_expect("extent width matches datatype")
        })
    }

    /// The tile extent decoded as `T`.
    pub fn tile_extent_as<T: NativeCellType>(&self) -> T {
        self.tile_extent_as_opt()
            .tessera_expect("dimension has a tile extent")
    }

    /// The raw tile extent bytes, if set.
    pub fn tile_extent_bytes(&self) -> Option<&[u8]> {
        self.tile_extent.as_deref()
    }

    /// Validate a query range against this dimension: ordered bounds, no
    /// NaN, inside the domain.
    pub fn check_range(&self, range: &Range) -> TesseraResult<()> {
        if self.var_size() {
            if range.start_bytes() > range.end_bytes() {
                tessera_bail!(
                    InvalidArgument: "lower range bound {:?} cannot be larger than the higher bound {:?} on dimension {}",
                    String::from_utf8_lossy(range.start_bytes()),
                    String::from_utf8_lossy(range.end_bytes()),
                    self.name
                );
            }
            return Ok(());
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let (lo, hi) = (range.start_as::<$T>(), range.end_as::<$T>());
            if <$T as TileArithmetic>::value_is_nan(lo) || <$T as TileArithmetic>::value_is_nan(hi) {
                tessera_bail!(InvalidArgument: "range bounds on dimension {} cannot be NaN", self.name);
            }
            if !(lo <= hi) {
                tessera_bail!(
                    InvalidArgument: "lower range bound {} cannot be larger than the higher bound {} on dimension {}",
                    lo, hi, self.name
                );
            }
            let (dlo, dhi) = (self.domain.start_as::<$T>(), self.domain.end_as::<$T>());
            if lo < dlo || hi > dhi {
                tessera_bail!(
                    OutOfBounds: "range [{}, {}] is out of domain bounds [{}, {}] on dimension {}",
                    lo, hi, dlo, dhi, self.name
                );
            }
            Ok(())
        })
    }

    /// Validate a single coordinate against the domain.
    pub fn oob(&self, coord: &[u8]) -> TesseraResult<()> {
        if self.var_size() {
            return Ok(());
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let v = $T::try_from_le_bytes(coord)?;
            let (dlo, dhi) = (self.domain.start_as::<$T>(), self.domain.end_as::<$T>());
            if v < dlo || v > dhi {
                tessera_bail!(
                    OutOfBounds: "coordinate {} is out of domain bounds [{}, {}] on dimension {}",
                    v, dlo, dhi, self.name
                );
            }
            Ok(())
        })
    }

    /// Whether `r1` and `r2` intersect.
    pub fn overlap(&self, r1: &Range, r2: &Range) -> bool {
        if self.var_size() {
            return r1.start_bytes() <= r2.end_bytes() && r1.end_bytes() >= r2.start_bytes();
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            r1.start_as::<$T>() <= r2.end_as::<$T>() && r1.end_as::<$T>() >= r2.start_as::<$T>()
        })
    }

    /// Whether `r1` lies entirely inside `r2`.
    pub fn covered(&self, r1: &Range, r2: &Range) -> bool {
        if self.var_size() {
            return r2.start_bytes() <= r1.start_bytes() && r1.end_bytes() <= r2.end_bytes();
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            r2.start_as::<$T>() <= r1.start_as::<$T>() && r1.end_as::<$T>() <= r2.end_as::<$T>()
        })
    }

    /// The fraction of `r2` that `r1` covers, in `(0, 1]` when they overlap
    /// and `0` otherwise.
    pub fn overlap_ratio(&self, r1: &Range, r2: &Range) -> f64 {
        if !self.overlap(r1, r2) {
            return 0.0;
        }
        if self.var_size() {
            // String ranges have no metric; covered counts as full overlap.
            return if self.covered(r2, r1) { 1.0 } else { 0.5 };
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let lo = if r1.start_as::<$T>() > r2.start_as::<$T>() {
                r1.start_as::<$T>()
            } else {
                r2.start_as::<$T>()
            };
            let hi = if r1.end_as::<$T>() < r2.end_as::<$T>() {
                r1.end_as::<$T>()
            } else {
                r2.end_as::<$T>()
            };
            if r2.start_as::<$T>() == r2.end_as::<$T>() {
                return 1.0;
            }
            if dt.is_real() {
                let num = hi.to_f64().unwrap_or(0.0) - lo.to_f64().unwrap_or(0.0);
                let den = r2.end_as::<$T>().to_f64().unwrap_or(0.0)
                    - r2.start_as::<$T>().to_f64().unwrap_or(0.0);
                if den == 0.0 {
                    1.0
                } else {
                    (num / den).clamp(f64::MIN_POSITIVE, 1.0)
                }
            } else {
                let num = <$T as TileArithmetic>::domain_range(lo, hi) as f64;
                let den = <$T as TileArithmetic>::domain_range(
                    r2.start_as::<$T>(),
                    r2.end_as::<$T>(),
                ) as f64;
                (num / den).clamp(f64::MIN_POSITIVE, 1.0)
            }
        })
    }

    /// Number of tiles `range` spans, or 1 when the dimension has no extent.
    pub fn tile_num(&self, range: &Range) -> u64 {
        if self.tile_extent.is_none() {
            return 1;
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let extent = self.tile_extent_as::<$T>();
            let low = self.domain.start_as::<$T>();
            let first = <$T as TileArithmetic>::tile_idx(range.start_as::<$T>(), low, extent);
            let last = <$T as TileArithmetic>::tile_idx(range.end_as::<$T>(), low, extent);
            last - first + 1
        })
    }

    /// Index of the tile containing the range start, relative to the domain.
    pub fn tile_idx_of(&self, range: &Range) -> u64 {
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            <$T as TileArithmetic>::tile_idx(
                range.start_as::<$T>(),
                self.domain.start_as::<$T>(),
                self.tile_extent_as::<$T>(),
            )
        })
    }

    /// The coordinate at the end (ceiling) of the tile `k` tiles past the
    /// start of `r`, encoded as bytes.
    pub fn ceil_to_tile(&self, r: &Range, k: u64) -> Vec<u8> {
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let extent = self.tile_extent_as::<$T>();
            let low = self.domain.start_as::<$T>();
            let base = <$T as TileArithmetic>::round_to_tile(r.start_as::<$T>(), low, extent);
            <$T as TileArithmetic>::tile_coord_high(k, base, extent)
                .to_le_bytes()
                .as_ref()
                .to_vec()
        })
    }

    /// Snap `range` outward to tile boundaries.
    pub fn expand_to_tile(&self, range: &mut Range) {
        if self.tile_extent.is_none() {
            return;
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let extent = self.tile_extent_as::<$T>();
            let low = self.domain.start_as::<$T>();
            let start = <$T as TileArithmetic>::round_to_tile(range.start_as::<$T>(), low, extent);
            let end_idx = <$T as TileArithmetic>::tile_idx(range.end_as::<$T>(), low, extent);
            let end = <$T as TileArithmetic>::tile_coord_high(end_idx, low, extent);
            range.set_start(start);
            range.set_end(end);
        })
    }

    /// Whether `range` starts and ends exactly on tile boundaries.
    pub fn coincides_with_tiles(&self, range: &Range) -> bool {
        if self.tile_extent.is_none() {
            return false;
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let extent = self.tile_extent_as::<$T>();
            let low = self.domain.start_as::<$T>();
            let start = range.start_as::<$T>();
            let end = range.end_as::<$T>();
            let aligned_start = <$T as TileArithmetic>::round_to_tile(start, low, extent);
            let end_idx = <$T as TileArithmetic>::tile_idx(end, low, extent);
            let aligned_end = <$T as TileArithmetic>::tile_coord_high(end_idx, low, extent);
            start == aligned_start && end == aligned_end
        })
    }

    /// Split `r` at `v` into `[start, v]` and `(v, end]`.
    pub fn split_range(&self, r: &Range, v: &[u8]) -> TesseraResult<(Range, Range)> {
        if self.var_size() {
            if !(r.start_bytes() <= v && v < r.end_bytes()) {
                tessera_bail!(
                    InvalidArgument: "splitting value outside range on dimension {}", self.name
                );
            }
            // The immediate lexicographic successor of `v` is `v` plus a
            // zero byte.
            let mut next = v.to_vec();
            next.push(0);
            return Ok((
                Range::from_var(r.start_bytes(), v),
                Range::from_var(&next, r.end_bytes()),
            ));
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let split = $T::try_from_le_bytes(v)?;
            let (start, end) = (r.start_as::<$T>(), r.end_as::<$T>());
            if !(start <= split && split < end) {
                tessera_bail!(
                    InvalidArgument: "splitting value {} outside range [{}, {}) on dimension {}",
                    split, start, end, self.name
                );
            }
            let second_start = <$T as TileArithmetic>::next_up_value(split);
            Ok((
                Range::from_typed(start, split),
                Range::from_typed(second_start, end),
            ))
        })
    }

    /// A value to split `r` at, plus whether `r` is unsplittable.
    pub fn splitting_value(&self, r: &Range) -> (Vec<u8>, bool) {
        if self.var_size() {
            let start = r.start_bytes();
            let unsplittable = start == r.end_bytes();
            return (start.to_vec(), unsplittable);
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let (mid, unsplittable) =
                <$T as TileArithmetic>::mid_split(r.start_as::<$T>(), r.end_as::<$T>());
            (mid.to_le_bytes().as_ref().to_vec(), unsplittable)
        })
    }

    /// Clamp `range` to the domain.
    pub fn crop_range(&self, range: &mut Range) {
        if self.var_size() {
            return;
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let (dlo, dhi) = (self.domain.start_as::<$T>(), self.domain.end_as::<$T>());
            if range.start_as::<$T>() < dlo {
                range.set_start(dlo);
            }
            if range.end_as::<$T>() > dhi {
                range.set_end(dhi);
            }
        })
    }

    /// Expand `r2` to the union of `r1` and `r2`.
    pub fn expand_range(&self, r1: &Range, r2: &mut Range) {
        if r2.is_empty() {
            *r2 = r1.clone();
            return;
        }
        if self.var_size() {
            let start = r1.start_bytes().min(r2.start_bytes()).to_vec();
            let end = r1.end_bytes().max(r2.end_bytes()).to_vec();
            *r2 = Range::from_var(&start, &end);
            return;
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            if r1.start_as::<$T>() < r2.start_as::<$T>() {
                r2.set_start(r1.start_as::<$T>());
            }
            if r1.end_as::<$T>() > r2.end_as::<$T>() {
                r2.set_end(r1.end_as::<$T>());
            }
        })
    }

    /// Expand `range` to include the single coordinate `v`.
    pub fn expand_range_v(&self, v: &[u8], range: &mut Range) {
        if self.var_size() {
            if range.is_empty() {
                *range = Range::from_var(v, v);
            } else {
                let start = range.start_bytes().min(v).to_vec();
                let end = range.end_bytes().max(v).to_vec();
                *range = Range::from_var(&start, &end);
            }
            return;
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let v = $T::try_from_le_bytes(v).tessera_expect("coordinate width matches datatype");
            if range.is_empty() {
                *range = Range::from_typed(v, v);
                return;
            }
            if v < range.start_as::<$T>() {
                range.set_start(v);
            }
            if v > range.end_as::<$T>() {
                range.set_end(v);
            }
        })
    }

    /// Number of coordinates `range` holds, saturating at `u64::MAX`.
    pub fn domain_range(&self, range: &Range) -> u64 {
        if self.var_size() {
            return u64::MAX;
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            <$T as TileArithmetic>::domain_range(range.start_as::<$T>(), range.end_as::<$T>())
        })
    }

    /// Map a coordinate into `[0, max_bucket_val]` for space-filling-curve
    /// ordering with `bits` bits per dimension.
    pub fn map_to_uint64(&self, coord: &[u8], bits: u32, max_bucket_val: u64) -> u64 {
        if self.var_size() {
            // First eight bytes big-endian, then truncated to `bits`.
            let mut word = [0u8; 8];
            let n = coord.len().min(8);
            word[..n].copy_from_slice(&coord[..n]);
            return u64::from_be_bytes(word) >> (64 - bits);
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let v = $T::try_from_le_bytes(coord).tessera_expect("coordinate width matches datatype");
            let (dlo, dhi) = (self.domain.start_as::<$T>(), self.domain.end_as::<$T>());
            let lo = dlo.to_f64().unwrap_or(0.0);
            let hi = dhi.to_f64().unwrap_or(0.0);
            let v = v.to_f64().unwrap_or(lo);
            if hi <= lo {
                return 0;
            }
            let norm = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);
            (norm * max_bucket_val as f64) as u64
        })
    }

    /// Inverse of [`Self::map_to_uint64`], to the grid's precision.
    pub fn map_from_uint64(&self, value: u64, bits: u32, max_bucket_val: u64) -> Vec<u8> {
        if self.var_size() {
            let word = (value << (64 - bits)).to_be_bytes();
            let end = word.iter().rposition(|b| *b != 0).map_or(1, |p| p + 1);
            return word[..end].to_vec();
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let (dlo, dhi) = (self.domain.start_as::<$T>(), self.domain.end_as::<$T>());
            let lo = dlo.to_f64().unwrap_or(0.0);
            let hi = dhi.to_f64().unwrap_or(0.0);
            let norm = value as f64 / max_bucket_val as f64;
            let v = lo + norm * (hi - lo);
            let v = if dt.is_real() { v } else { v.round() };
            <$T as num_traits::NumCast>::from(v)
                .unwrap_or(dlo)
                .to_le_bytes()
                .as_ref()
                .to_vec()
        })
    }

    /// Whether `value` sorts strictly before the start of `range`.
    pub fn smaller_than(&self, value: &[u8], range: &Range) -> bool {
        if self.var_size() {
            return value < range.start_bytes();
        }
        let dt = self.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let v = $T::try_from_le_bytes(value).tessera_expect("value width matches datatype");
            v < range.start_as::<$T>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tessera_error::TesseraError;

    fn dim_i64() -> Dimension {
        Dimension::new("d", Datatype::I64, (0i64, 9i64), 5i64).unwrap()
    }

    #[test]
    fn construction_validates() {
        assert!(Dimension::new("d", Datatype::I32, (5i32, 4i32), 1i32).is_err());
        assert!(Dimension::new("d", Datatype::I32, (i32::MIN, i32::MAX), 1i32).is_err());
        assert!(Dimension::new("d", Datatype::F64, (0.0f64, f64::NAN), 1.0f64).is_err());
        assert!(Dimension::new("d", Datatype::F32, (0.0f32, f32::INFINITY), 1.0f32).is_err());
        assert!(Dimension::new("d", Datatype::I32, (0i32, 9i32), 0i32).is_err());
        assert!(Dimension::new("d", Datatype::Bool, (0u8, 1u8), 1u8).is_err());
        assert!(Dimension::new("d", Datatype::I32, (0i32, 9i32), 5i32).is_ok());
    }

    #[rstest]
    #[case(0, 0)]
    #[case(4, 0)]
    #[case(5, 1)]
    #[case(9, 1)]
    fn tile_indices(#[case] v: i64, #[case] expected: u64) {
        assert_eq!(<i64 as TileArithmetic>::tile_idx(v, 0, 5), expected);
    }

    #[test]
    fn signed_straddling_domain() {
        // Domain straddles zero; unsigned-width math keeps the division exact.
        assert_eq!(<i64 as TileArithmetic>::tile_idx(-10, -10, 5), 0);
        assert_eq!(<i64 as TileArithmetic>::tile_idx(-1, -10, 5), 1);
        assert_eq!(<i64 as TileArithmetic>::tile_idx(9, -10, 5), 3);
        assert_eq!(<i64 as TileArithmetic>::round_to_tile(-1, -10, 5), -5);
        assert_eq!(<i64 as TileArithmetic>::tile_coord_low(2, -10, 5), 0);
        assert_eq!(<i64 as TileArithmetic>::tile_coord_high(2, -10, 5), 4);
    }

    #[test]
    fn saturating_tile_coord_high() {
        // An extent spanning the whole unsigned width saturates; a domain
        // starting at the type minimum backs off one more coordinate.
        assert_eq!(<u8 as TileArithmetic>::tile_coord_high(0, 0, 255), 254);
        assert_eq!(<u8 as TileArithmetic>::tile_coord_high(0, 1, 255), 255);
        assert_eq!(
            <i8 as TileArithmetic>::tile_coord_high(0, i8::MIN, -1i8 as u8 as i8),
            i8::MAX - 1
        );
    }

    #[test]
    fn real_tile_bounds_are_exclusive() {
        let high = <f64 as TileArithmetic>::tile_coord_high(0, 0.0, 10.0);
        assert!(high < 10.0);
        assert!(high > 9.999_999);
        assert_eq!(<f64 as TileArithmetic>::round_to_tile(7.3, 0.0, 2.0), 6.0);
    }

    #[test]
    fn range_checks() {
        let d = dim_i64();
        assert!(d.check_range(&Range::from_typed(3i64, 7i64)).is_ok());
        assert!(matches!(
            d.check_range(&Range::from_typed(7i64, 3i64)),
            Err(TesseraError::InvalidArgument(_))
        ));
        assert!(matches!(
            d.check_range(&Range::from_typed(3i64, 100i64)),
            Err(TesseraError::OutOfBounds(_))
        ));
        assert!(d.oob(&5i64.to_le_bytes()).is_ok());
        assert!(d.oob(&50i64.to_le_bytes()).is_err());
    }

    #[test]
    fn overlap_and_coverage() {
        let d = dim_i64();
        let a = Range::from_typed(0i64, 4i64);
        let b = Range::from_typed(3i64, 9i64);
        assert!(d.overlap(&a, &b));
        assert!(!d.covered(&a, &b));
        assert!(d.covered(&Range::from_typed(3i64, 4i64), &a));
        // [3,7] covers 2 of tile [0,4]'s 5 coordinates.
        let ratio = d.overlap_ratio(&Range::from_typed(3i64, 7i64), &a);
        assert!((ratio - 0.4).abs() < 1e-12);
    }

    #[test]
    fn expand_and_coincide() {
        let d = dim_i64();
        let mut r = Range::from_typed(3i64, 6i64);
        assert!(!d.coincides_with_tiles(&r));
        d.expand_to_tile(&mut r);
        assert_eq!(r.start_as::<i64>(), 0);
        assert_eq!(r.end_as::<i64>(), 9);
        assert!(d.coincides_with_tiles(&r));
        assert_eq!(d.tile_num(&r), 2);
    }

    #[test]
    fn splitting() {
        let d = dim_i64();
        let r = Range::from_typed(0i64, 9i64);
        let (v, unsplittable) = d.splitting_value(&r);
        assert!(!unsplittable);
        let (left, right) = d.split_range(&r, &v).unwrap();
        assert_eq!(left.end_as::<i64>() + 1, right.start_as::<i64>());
        assert_eq!(left.start_as::<i64>(), 0);
        assert_eq!(right.end_as::<i64>(), 9);

        let point = Range::from_typed(4i64, 4i64);
        assert!(d.splitting_value(&point).1);
    }

    #[test]
    fn union_and_crop() {
        let d = dim_i64();
        let mut acc = Range::empty();
        d.expand_range(&Range::from_typed(2i64, 3i64), &mut acc);
        d.expand_range(&Range::from_typed(7i64, 8i64), &mut acc);
        assert_eq!((acc.start_as::<i64>(), acc.end_as::<i64>()), (2, 8));
        d.expand_range_v(&0i64.to_le_bytes(), &mut acc);
        assert_eq!(acc.start_as::<i64>(), 0);

        let mut wide = Range::from_typed(-5i64, 50i64);
        d.crop_range(&mut wide);
        assert_eq!((wide.start_as::<i64>(), wide.end_as::<i64>()), (0, 9));
    }

    #[test]
    fn bucket_mapping_round_trips_monotonically(){
        let d = dim_i64();
        let bits = 32;
        let max_bucket = (1u64 << bits) - 1;
        let lo = d.map_to_uint64(&0i64.to_le_bytes(), bits, max_bucket);
        let mid = d.map_to_uint64(&5i64.to_le_bytes(), bits, max_bucket);
        let hi = d.map_to_uint64(&9i64.to_le_bytes(), bits, max_bucket);
        assert!(lo < mid && mid < hi);
        assert_eq!(hi, max_bucket);
        let back = d.map_from_uint64(mid, bits, max_bucket);
        assert_eq!(i64::try_from_le_bytes(&back).unwrap(), 5);
    }

    #[test]
    fn var_dimension_basics() {
        let d = Dimension::new_var("s", Datatype::StringAscii).unwrap();
        assert!(d.var_size());
        let a = Range::from_var(b"aa", b"cc");
        let b = Range::from_var(b"b", b"d");
        assert!(d.overlap(&a, &b));
        assert!(d.check_range(&Range::from_var(b"z", b"a")).is_err());
        assert!(d.smaller_than(b"a", &b));
    }
}
