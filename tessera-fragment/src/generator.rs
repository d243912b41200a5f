//! Per-tile summary statistics computed at write time.
//!
//! Given a finalized tile's cell buffer (and offsets/validity where
//! applicable), the generator emits the min, max, sum, and null count that
//! the manifest persists. Policy functions decide which datatypes carry
//! which statistics.

use tessera_dtype::{match_each_native_dtype, CellValNum, Datatype, NativeCellType, TryFromLeBytes};
use tessera_error::TesseraExpect;
use tessera_schema::FieldSchema;

/// Whether a field of this shape carries per-tile min/max metadata.
pub fn has_min_max_metadata(
    datatype: Datatype,
    is_dim: bool,
    var_size: bool,
    cell_val_num: CellValNum,
) -> bool {
    // Var-size dimensions are summarized by their MBRs instead.
    if is_dim && var_size {
        return false;
    }
    match datatype {
        Datatype::Any
        | Datatype::Bool
        | Datatype::Blob
        | Datatype::GeomWkb
        | Datatype::GeomWkt
        | Datatype::StringUtf8
        | Datatype::StringUtf16
        | Datatype::StringUtf32
        | Datatype::StringUcs2
        | Datatype::StringUcs4 => false,
        Datatype::Char | Datatype::StringAscii => true,
        _ => !var_size && cell_val_num.fixed() == Some(1),
    }
}

/// Whether a field of this shape carries per-tile sum metadata.
pub fn has_sum_metadata(datatype: Datatype, var_size: bool, cell_val_num: CellValNum) -> bool {
    if var_size || cell_val_num.fixed() != Some(1) {
        return false;
    }
    datatype.is_int() || datatype.is_real() || datatype.is_datetime() || datatype.is_time()
}

/// Statistics of one tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileStats {
    /// Minimum cell value bytes; empty when the field carries no min/max.
    pub min: Vec<u8>,
    /// Maximum cell value bytes; empty when the field carries no min/max.
    pub max: Vec<u8>,
    /// The tile sum reinterpreted per datatype; zero when absent.
    pub sum: [u8; 8],
    /// Number of null cells.
    pub null_count: u64,
}

/// Computes per-tile statistics at write time.
pub struct TileMetadataGenerator;

impl TileMetadataGenerator {
    /// Statistics of a fixed-size tile. `cells` holds `cell_num`
    /// consecutive cells; `validity[i] == 0` marks cell `i` null.
    pub fn compute_fixed(
        field: &FieldSchema,
        cells: &[u8],
        validity: Option<&[u8]>,
    ) -> TileStats {
        let cell_size = field
            .cell_size()
            .tessera_expect("fixed-size tiles have a fixed cell size") as usize;
        let cell_num = if cell_size == 0 { 0 } else { cells.len() / cell_size };
        let null_count = count_nulls(validity, cell_num);

        let mut stats = TileStats {
            null_count,
            ..Default::default()
        };

        let wants_min_max =
            has_min_max_metadata(field.datatype, field.is_dim, false, field.cell_val_num);
        let wants_sum = has_sum_metadata(field.datatype, false, field.cell_val_num);

        if wants_min_max
            && matches!(field.datatype, Datatype::Char | Datatype::StringAscii)
        {
            let mut min: Option<&[u8]> = None;
            let mut max: Option<&[u8]> = None;
            for (i, cell) in cells.chunks_exact(cell_size).enumerate() {
                if is_null(validity, i) {
                    continue;
                }
                min = Some(min.map_or(cell, |m| if cell < m { cell } else { m }));
                max = Some(max.map_or(cell, |m| if cell > m { cell } else { m }));
            }
            stats.min = min.unwrap_or_default().to_vec();
            stats.max = max.unwrap_or_default().to_vec();
            return stats;
        }

        if !wants_min_max && !wants_sum {
            return stats;
        }

        let dt = field.datatype.physical();
        match_each_native_dtype!(dt, |$T| {
            let mut min: Option<$T> = None;
            let mut max: Option<$T> = None;
            let mut sum = SaturatingSum::new(dt);
            for (i, cell) in cells.chunks_exact(cell_size).enumerate() {
                if is_null(validity, i) {
                    continue;
                }
                let v = $T::try_from_le_bytes(cell)
                    .tessera_expect("cell buffer is a whole number of cells");
                min = Some(match min {
                    Some(m) if !(v < m) => m,
                    _ => v,
                });
                max = Some(match max {
                    Some(m) if !(v > m) => m,
                    _ => v,
                });
                sum.add(v.to_f64_lossy(), v.to_i64_lossy(), v.to_u64_lossy());
            }
            if wants_min_max {
                if let (Some(min), Some(max)) = (min, max) {
                    stats.min = min.to_le_bytes().as_ref().to_vec();
                    stats.max = max.to_le_bytes().as_ref().to_vec();
                }
            }
            if wants_sum {
                stats.sum = sum.to_le_bytes();
            }
        });
        stats
    }

    /// Statistics of a var-size tile. `offsets` holds `cell_num + 1`
    /// positions into `var_data`.
    pub fn compute_var(
        field: &FieldSchema,
        offsets: &[u64],
        var_data: &[u8],
        validity: Option<&[u8]>,
    ) -> TileStats {
        let cell_num = offsets.len().saturating_sub(1);
        let mut stats = TileStats {
            null_count: count_nulls(validity, cell_num),
            ..Default::default()
        };
        if !has_min_max_metadata(field.datatype, field.is_dim, true, field.cell_val_num) {
            return stats;
        }

        let mut min: Option<&[u8]> = None;
        let mut max: Option<&[u8]> = None;
        for i in 0..cell_num {
            if is_null(validity, i) {
                continue;
            }
            let cell = &var_data[offsets[i] as usize..offsets[i + 1] as usize];
            // Slice ordering gives the shorter-is-smaller / longer-is-greater
            // tie-break on shared prefixes.
            min = Some(min.map_or(cell, |m| if cell < m { cell } else { m }));
            max = Some(max.map_or(cell, |m| if cell > m { cell } else { m }));
        }
        stats.min = min.unwrap_or_default().to_vec();
        stats.max = max.unwrap_or_default().to_vec();
        stats
    }
}

fn is_null(validity: Option<&[u8]>, i: usize) -> bool {
    validity.is_some_and(|v| v.get(i).copied() == Some(0))
}

fn count_nulls(validity: Option<&[u8]>, cell_num: usize) -> u64 {
    validity.map_or(0, |v| {
        v.iter().take(cell_num).filter(|b| **b == 0).count() as u64
    })
}

/// Accumulates a sum in the widest sensible type per datatype family,
/// saturating at the limit instead of wrapping.
struct SaturatingSum {
    datatype: Datatype,
    signed: i64,
    unsigned: u64,
    real: f64,
}

impl SaturatingSum {
    fn new(datatype: Datatype) -> Self {
        Self {
            datatype,
            signed: 0,
            unsigned: 0,
            real: 0.0,
        }
    }

    fn add(&mut self, real: f64, signed: i64, unsigned: u64) {
        if self.datatype.is_real() {
            self.real += real;
            if self.real.is_infinite() {
                self.real = if self.real > 0.0 { f64::MAX } else { f64::MIN };
            }
        } else if self.datatype.is_unsigned_int() {
            self.unsigned = self.unsigned.saturating_add(unsigned);
        } else {
            self.signed = self.signed.saturating_add(signed);
        }
    }

    fn to_le_bytes(&self) -> [u8; 8] {
        if self.datatype.is_real() {
            self.real.to_le_bytes()
        } else if self.datatype.is_unsigned_int() {
            self.unsigned.to_le_bytes()
        } else {
            self.signed.to_le_bytes()
        }
    }
}

/// Lossy widenings used by the sum accumulator.
trait ToWide {
    fn to_f64_lossy(self) -> f64;
    fn to_i64_lossy(self) -> i64;
    fn to_u64_lossy(self) -> u64;
}

macro_rules! to_wide {
    ($T:ty) => {
        impl ToWide for $T {
            fn to_f64_lossy(self) -> f64 {
                self as f64
            }
            fn to_i64_lossy(self) -> i64 {
                self as i64
            }
            fn to_u64_lossy(self) -> u64 {
                self as u64
            }
        }
    };
}

to_wide!(i8);
to_wide!(i16);
to_wide!(i32);
to_wide!(i64);
to_wide!(u8);
to_wide!(u16);
to_wide!(u32);
to_wide!(u64);
to_wide!(f32);
to_wide!(f64);
