//! Persisting the manifest: every section as a generic tile, then the raw
//! footer and its size trailer.

use std::sync::Arc;

use itertools::izip;
use rayon::prelude::*;
use tessera_dtype::{match_each_native_dtype, Datatype, TryFromLeBytes};
use tessera_error::{tessera_bail, tessera_err, TesseraExpect, TesseraResult};
use tessera_io::{EncryptionKey, GenericTileIo, Serializer, Sink, SizeSerializer};

use super::{Footer, FragmentMetadata, FragmentStats, MinMaxBuffer};
use crate::wire::write_ndrange;
use crate::{has_min_max_metadata, has_sum_metadata};

impl FragmentMetadata {
    /// Serialize every section into the manifest file and finish with the
    /// footer. On failure the partially written manifest is removed and the
    /// error is rewrapped with the fragment URI.
    pub fn store(&mut self, key: &EncryptionKey) -> TesseraResult<()> {
        if self.format_version() < 7 {
            tessera_bail!(
                FormatVersionUnsupported: "cannot store fragment metadata at version {}",
                self.format_version()
            );
        }
        match self.store_inner(key) {
            Ok(()) => Ok(()),
            Err(e) => {
                let uri = self.metadata_uri();
                if let Err(cleanup) = self.resources().vfs().remove(&uri) {
                    log::warn!("failed to remove partial manifest {uri}: {cleanup}");
                }
                Err(e.with_context(format!("storing fragment metadata at {uri}")))
            }
        }
    }

    fn store_inner(&mut self, key: &EncryptionKey) -> TesseraResult<()> {
        let version = self.format_version();
        let meta_uri = self.metadata_uri();
        let resources = Arc::clone(&self.resources);
        let config = resources.config().clone();

        let footer = self.footer.get_mut();
        let sections = self
            .sections
            .get_mut()
            .ok_or_else(|| tessera_err!(UsageError: "store before init"))?;
        let num = footer.num_fields();
        let domain = footer.schema.domain().clone();

        let io = GenericTileIo::new(resources.vfs(), &meta_uri);
        let mut offset = 0u64;
        let mut write_section = |payload: Vec<u8>, counter: &str| -> TesseraResult<u64> {
            resources.check_cancelled()?;
            let nbytes = io.write_generic(&payload, key, &config)?;
            resources.metrics().add_counter(counter.to_string(), nbytes as i64);
            let start = offset;
            offset += nbytes;
            Ok(start)
        };

        // R-tree first, then the per-field offset families in field order.
        sections.rtree.get_mut().build_tree(&domain);
        let rtree = &*sections.rtree.get_mut();
        footer.gt_offsets.rtree = write_section(
            serialized(|s| rtree.serialize(s, &domain)),
            "fragment.write.rtree_bytes",
        )?;

        footer.gt_offsets.tile_offsets.clear();
        for i in 0..num {
            let values = &*sections.tile_offsets[i].get_mut();
            let start = write_section(
                serialized(|s| write_u64_array(s, values)),
                "fragment.write.tile_offsets_bytes",
            )?;
            footer.gt_offsets.tile_offsets.push(start);
        }

        footer.gt_offsets.tile_var_offsets.clear();
        for i in 0..num {
            let values = &*sections.tile_var_offsets[i].get_mut();
            let start = write_section(
                serialized(|s| write_u64_array(s, values)),
                "fragment.write.tile_var_offsets_bytes",
            )?;
            footer.gt_offsets.tile_var_offsets.push(start);
        }

        footer.gt_offsets.tile_var_sizes.clear();
        for i in 0..num {
            let values = &*sections.tile_var_sizes[i].get_mut();
            let start = write_section(
                serialized(|s| write_u64_array(s, values)),
                "fragment.write.tile_var_sizes_bytes",
            )?;
            footer.gt_offsets.tile_var_sizes.push(start);
        }

        footer.gt_offsets.tile_validity_offsets.clear();
        for i in 0..num {
            let values = &*sections.tile_validity_offsets[i].get_mut();
            let start = write_section(
                serialized(|s| write_u64_array(s, values)),
                "fragment.write.tile_validity_offsets_bytes",
            )?;
            footer.gt_offsets.tile_validity_offsets.push(start);
        }

        if version >= 11 {
            footer.gt_offsets.tile_min_offsets.clear();
            for i in 0..num {
                let mm = &*sections.tile_min[i].get_mut();
                let start = write_section(
                    serialized(|s| write_min_max(s, mm)),
                    "fragment.write.tile_min_bytes",
                )?;
                footer.gt_offsets.tile_min_offsets.push(start);
            }

            footer.gt_offsets.tile_max_offsets.clear();
            for i in 0..num {
                let mm = &*sections.tile_max[i].get_mut();
                let start = write_section(
                    serialized(|s| write_min_max(s, mm)),
                    "fragment.write.tile_max_bytes",
                )?;
                footer.gt_offsets.tile_max_offsets.push(start);
            }

            footer.gt_offsets.tile_sum_offsets.clear();
            for i in 0..num {
                let sums = &*sections.tile_sums[i].get_mut();
                let start = write_section(
                    serialized(|s| write_sums(s, sums)),
                    "fragment.write.tile_sum_bytes",
                )?;
                footer.gt_offsets.tile_sum_offsets.push(start);
            }

            footer.gt_offsets.tile_null_count_offsets.clear();
            for i in 0..num {
                let counts = &*sections.tile_null_counts[i].get_mut();
                let start = write_section(
                    serialized(|s| write_u64_array(s, counts)),
                    "fragment.write.tile_null_count_bytes",
                )?;
                footer.gt_offsets.tile_null_count_offsets.push(start);
            }
        }

        if version >= 12 {
            let stats = &*sections.fragment_stats.get_mut();
            footer.gt_offsets.fragment_min_max_sum_null_count = write_section(
                serialized(|s| write_fragment_stats(s, stats, num)),
                "fragment.write.fragment_stats_bytes",
            )?;
        }

        if version >= 16 {
            let pc = &*sections.processed_conditions.get_mut();
            footer.gt_offsets.processed_conditions = write_section(
                serialized(|s| write_processed_conditions(s, &pc.list)),
                "fragment.write.processed_conditions_bytes",
            )?;
        }

        // The footer goes out raw so readers and the consolidator can parse
        // it straight from a byte offset.
        let footer_bytes = {
            let f: &Footer = footer;
            serialized(|s| write_footer(s, f, version))
        };
        let footer_size = footer_bytes.len() as u64;
        resources.check_cancelled()?;
        resources.vfs().write(&meta_uri, &footer_bytes)?;
        if !domain.all_dims_fixed() || version >= 10 {
            resources
                .vfs()
                .write(&meta_uri, &footer_size.to_le_bytes())?;
        }
        resources
            .metrics()
            .add_counter("fragment.write.footer_bytes", footer_size as i64);

        footer.footer_size = footer_size;
        footer.meta_file_size = resources.vfs().size(&meta_uri)?;
        Ok(())
    }

    /// Reduce the per-tile statistics into one min/max/sum/null-count per
    /// field, in parallel over fields on the shared compute pool.
    pub fn compute_fragment_min_max_sum_null_count(&mut self) -> TesseraResult<()> {
        let tile_num = self.tile_num()?;
        let cells: Vec<u64> = (0..tile_num)
            .map(|t| self.cell_num_of_tile(t))
            .collect::<TesseraResult<_>>()?;

        let resources = Arc::clone(&self.resources);
        let footer = self.footer.get_mut();
        let dense = footer.dense;
        let schema = Arc::clone(&footer.schema);
        let field_names = footer.field_names.clone();

        let sections = self
            .sections
            .get_mut()
            .ok_or_else(|| tessera_err!(UsageError: "rollup before init"))?;

        let inputs: Vec<RollupInput<'_>> = izip!(
            &field_names,
            sections.tile_min.iter_mut(),
            sections.tile_max.iter_mut(),
            sections.tile_sums.iter_mut(),
            sections.tile_null_counts.iter_mut(),
        )
        .map(|(name, min, max, sums, null_counts)| {
            let field = schema.field_schema(name)?;
            Ok(RollupInput {
                dense_dim: dense && field.is_dim,
                field,
                min: &*min.get_mut(),
                max: &*max.get_mut(),
                sums: &*sums.get_mut(),
                null_counts: &*null_counts.get_mut(),
            })
        })
        .collect::<TesseraResult<_>>()?;

        let results: Vec<FieldRollup> = resources.compute_pool().install(|| {
            inputs
                .par_iter()
                .map(|input| rollup_field(input, &cells))
                .collect()
        });

        let stats = sections.fragment_stats.get_mut();
        *stats = FragmentStats {
            mins: results.iter().map(|r| r.min.clone()).collect(),
            maxs: results.iter().map(|r| r.max.clone()).collect(),
            sums: results.iter().map(|r| r.sum).collect(),
            null_counts: results.iter().map(|r| r.null_count).collect(),
        };
        Ok(())
    }
}

/// One field's rollup inputs, borrowed from the writer-resident sections.
struct RollupInput<'a> {
    field: tessera_schema::FieldSchema,
    dense_dim: bool,
    min: &'a MinMaxBuffer,
    max: &'a MinMaxBuffer,
    sums: &'a [u8],
    null_counts: &'a [u64],
}

#[derive(Default)]
struct FieldRollup {
    min: Vec<u8>,
    max: Vec<u8>,
    sum: u64,
    null_count: u64,
}

fn tile_is_null(input: &RollupInput<'_>, t: usize, cells: &[u64]) -> bool {
    let cell_num = cells.get(t).copied().unwrap_or(0);
    input.field.nullable && cell_num > 0 && input.null_counts.get(t).copied() == Some(cell_num)
}

fn rollup_field(input: &RollupInput<'_>, cells: &[u64]) -> FieldRollup {
    let mut rollup = FieldRollup {
        null_count: input.null_counts.iter().sum(),
        ..Default::default()
    };
    if input.dense_dim {
        return rollup;
    }
    let field = &input.field;
    let tile_num = cells.len();

    let wants_min_max = has_min_max_metadata(
        field.datatype,
        field.is_dim,
        field.var_size(),
        field.cell_val_num,
    );
    let wants_sum = has_sum_metadata(field.datatype, field.var_size(), field.cell_val_num);

    if wants_min_max {
        if field.var_size() {
            let (min, max) = rollup_min_max_var(input, cells, tile_num);
            rollup.min = min;
            rollup.max = max;
        } else if matches!(field.datatype, Datatype::Char | Datatype::StringAscii) {
            let cell_size = field
                .cell_size()
                .tessera_expect("character fields have a fixed cell size")
                as usize;
            let mut min: Option<&[u8]> = None;
            let mut max: Option<&[u8]> = None;
            for t in 0..tile_num {
                if tile_is_null(input, t, cells) {
                    continue;
                }
                let lo = &input.min.buffer[t * cell_size..(t + 1) * cell_size];
                let hi = &input.max.buffer[t * cell_size..(t + 1) * cell_size];
                min = Some(min.map_or(lo, |m| if lo < m { lo } else { m }));
                max = Some(max.map_or(hi, |m| if hi > m { hi } else { m }));
            }
            rollup.min = min.unwrap_or_default().to_vec();
            rollup.max = max.unwrap_or_default().to_vec();
        } else {
            let dt = field.datatype.physical();
            match_each_native_dtype!(dt, |$T| {
                let cell_size = std::mem::size_of::<$T>();
                let mut min: Option<$T> = None;
                let mut max: Option<$T> = None;
                for t in 0..tile_num {
                    if tile_is_null(input, t, cells) {
                        continue;
                    }
                    let lo = $T::try_from_le_bytes(
                        &input.min.buffer[t * cell_size..(t + 1) * cell_size],
                    )
                    .tessera_expect("min buffer holds one value per tile");
                    let hi = $T::try_from_le_bytes(
                        &input.max.buffer[t * cell_size..(t + 1) * cell_size],
                    )
                    .tessera_expect("max buffer holds one value per tile");
                    min = Some(match min {
                        Some(m) if !(lo < m) => m,
                        _ => lo,
                    });
                    max = Some(match max {
                        Some(m) if !(hi > m) => m,
                        _ => hi,
                    });
                }
                if let (Some(min), Some(max)) = (min, max) {
                    rollup.min = min.to_le_bytes().as_ref().to_vec();
                    rollup.max = max.to_le_bytes().as_ref().to_vec();
                }
            });
        }
    }

    if wants_sum {
        rollup.sum = rollup_sum(input, cells, tile_num);
    }
    rollup
}

fn rollup_min_max_var(
    input: &RollupInput<'_>,
    cells: &[u64],
    tile_num: usize,
) -> (Vec<u8>, Vec<u8>) {
    let mut min: Option<&[u8]> = None;
    let mut max: Option<&[u8]> = None;
    for t in 0..tile_num {
        if tile_is_null(input, t, cells) {
            continue;
        }
        let lo = var_value(input.min, t, tile_num);
        let hi = var_value(input.max, t, tile_num);
        min = Some(min.map_or(lo, |m| if lo < m { lo } else { m }));
        max = Some(max.map_or(hi, |m| if hi > m { hi } else { m }));
    }
    (
        min.unwrap_or_default().to_vec(),
        max.unwrap_or_default().to_vec(),
    )
}

fn var_value<'a>(mm: &'a MinMaxBuffer, t: usize, tile_num: usize) -> &'a [u8] {
    let start = super::read_offset_slot(&mm.buffer, t) as usize;
    let end = if t + 1 == tile_num {
        mm.var_buffer.len()
    } else {
        super::read_offset_slot(&mm.buffer, t + 1) as usize
    };
    &mm.var_buffer[start..end]
}

fn rollup_sum(input: &RollupInput<'_>, cells: &[u64], tile_num: usize) -> u64 {
    let dt = input.field.datatype;
    let tile_sum = |t: usize| -> [u8; 8] {
        input.sums[t * 8..(t + 1) * 8]
            .try_into()
            .tessera_expect("sum slots are eight bytes")
    };
    if dt.is_real() {
        let mut sum = 0.0f64;
        for t in 0..tile_num {
            if tile_is_null(input, t, cells) {
                continue;
            }
            sum += f64::from_le_bytes(tile_sum(t));
            if sum.is_infinite() {
                sum = if sum > 0.0 { f64::MAX } else { f64::MIN };
            }
        }
        u64::from_le_bytes(sum.to_le_bytes())
    } else if dt.is_unsigned_int() {
        let mut sum = 0u64;
        for t in 0..tile_num {
            if tile_is_null(input, t, cells) {
                continue;
            }
            sum = sum.saturating_add(u64::from_le_bytes(tile_sum(t)));
        }
        sum
    } else {
        let mut sum = 0i64;
        for t in 0..tile_num {
            if tile_is_null(input, t, cells) {
                continue;
            }
            sum = sum.saturating_add(i64::from_le_bytes(tile_sum(t)));
        }
        u64::from_le_bytes(sum.to_le_bytes())
    }
}

/// Run a section writer twice: once to size the payload, once to fill it.
fn serialized(write: impl Fn(&mut dyn Sink)) -> Vec<u8> {
    let mut size = SizeSerializer::new();
    write(&mut size);
    let mut ser = Serializer::with_capacity(size.size());
    write(&mut ser);
    debug_assert_eq!(ser.len(), size.size());
    ser.into_inner()
}

fn write_u64_array(sink: &mut dyn Sink, values: &[u64]) {
    sink.write_u64(values.len() as u64);
    sink.write_u64_slice(values);
}

fn write_min_max(sink: &mut dyn Sink, mm: &MinMaxBuffer) {
    sink.write_u64(mm.buffer.len() as u64);
    sink.write_u64(mm.var_buffer.len() as u64);
    sink.write_bytes(&mm.buffer);
    sink.write_bytes(&mm.var_buffer);
}

fn write_sums(sink: &mut dyn Sink, sums: &[u8]) {
    sink.write_u64((sums.len() / 8) as u64);
    sink.write_bytes(sums);
}

fn write_fragment_stats(sink: &mut dyn Sink, stats: &FragmentStats, num: usize) {
    for i in 0..num {
        let min = stats.mins.get(i).map_or(&[][..], Vec::as_slice);
        let max = stats.maxs.get(i).map_or(&[][..], Vec::as_slice);
        sink.write_u64(min.len() as u64);
        sink.write_bytes(min);
        sink.write_u64(max.len() as u64);
        sink.write_bytes(max);
        sink.write_u64(stats.sums.get(i).copied().unwrap_or(0));
        sink.write_u64(stats.null_counts.get(i).copied().unwrap_or(0));
    }
}

fn write_processed_conditions(sink: &mut dyn Sink, conditions: &[String]) {
    sink.write_u64(conditions.len() as u64);
    for condition in conditions {
        sink.write_u64(condition.len() as u64);
        sink.write_bytes(condition.as_bytes());
    }
}

pub(crate) fn write_footer(sink: &mut dyn Sink, footer: &Footer, version: u32) {
    sink.write_u32(version);
    if version >= 10 {
        let name = footer.schema_name.as_bytes();
        sink.write_u64(name.len() as u64);
        sink.write_bytes(name);
    }
    sink.write_u8(u8::from(footer.dense));

    let null_ned = footer.non_empty_domain.is_empty();
    sink.write_u8(u8::from(null_ned));
    if null_ned {
        // Dummy zeros keep pre-trailer footers a computable fixed size.
        for dim in footer.schema.domain().dimensions() {
            let zeros = vec![0u8; 2 * dim.coord_size() as usize];
            sink.write_bytes(&zeros);
        }
    } else {
        write_ndrange(sink, footer.schema.domain(), &footer.non_empty_domain);
    }

    sink.write_u64(footer.sparse_tile_num);
    let cells_per_tile = if footer.dense {
        footer.schema.domain().cell_num_per_tile()
    } else {
        footer.schema.capacity()
    };
    let last_tile_cell_num = if footer.last_tile_cell_num == 0 {
        cells_per_tile
    } else {
        footer.last_tile_cell_num
    };
    sink.write_u64(last_tile_cell_num);

    if version >= 14 {
        sink.write_u8(u8::from(footer.has_timestamps));
    }
    if version >= 15 {
        sink.write_u8(u8::from(footer.has_delete_meta));
    }

    sink.write_u64_slice(&footer.file_sizes);
    sink.write_u64_slice(&footer.file_var_sizes);
    if version >= 7 {
        sink.write_u64_slice(&footer.file_validity_sizes);
    }

    let gt = &footer.gt_offsets;
    sink.write_u64(gt.rtree);
    sink.write_u64_slice(&gt.tile_offsets);
    sink.write_u64_slice(&gt.tile_var_offsets);
    sink.write_u64_slice(&gt.tile_var_sizes);
    if version >= 7 {
        sink.write_u64_slice(&gt.tile_validity_offsets);
    }
    if version >= 11 {
        sink.write_u64_slice(&gt.tile_min_offsets);
        sink.write_u64_slice(&gt.tile_max_offsets);
        sink.write_u64_slice(&gt.tile_sum_offsets);
        sink.write_u64_slice(&gt.tile_null_count_offsets);
    }
    if version >= 12 {
        sink.write_u64(gt.fragment_min_max_sum_null_count);
    }
    if version >= 16 {
        sink.write_u64(gt.processed_conditions);
    }
}
