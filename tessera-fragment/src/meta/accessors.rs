//! Reader-side accessors. Everything that touches a lazy section checks its
//! loaded flag and fails with `UsageError` when the caller skipped the load.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tessera_dtype::{
    Datatype, NDRange, NativeCellType, Range, TryFromLeBytes, CELL_VAR_OFFSET_SIZE,
};
use tessera_error::{tessera_bail, tessera_err, TesseraExpect, TesseraResult};
use tessera_io::EncryptionKey;
use tessera_schema::ArraySchema;

use super::{read_offset_slot, FragmentMetadata, TileMetadata};
use crate::{has_min_max_metadata, has_sum_metadata, TileOverlap, FRAGMENT_METADATA_FILENAME};

impl FragmentMetadata {
    /// The schema this fragment was written under.
    pub fn array_schema(&self) -> TesseraResult<Arc<ArraySchema>> {
        self.footer.with("footer", |f| Arc::clone(&f.schema))
    }

    /// Name of the schema this fragment was written under.
    pub fn array_schema_name(&self) -> TesseraResult<String> {
        self.footer.with("footer", |f| f.schema_name.clone())
    }

    /// Whether the fragment is dense.
    pub fn dense(&self) -> TesseraResult<bool> {
        self.footer.with("footer", |f| f.dense)
    }

    /// The fragment's non-empty domain; empty when nothing was committed.
    pub fn non_empty_domain(&self) -> TesseraResult<NDRange> {
        self.footer.with("footer", |f| f.non_empty_domain.clone())
    }

    /// For dense fragments, the tile-aligned domain queries resolve against.
    pub fn domain(&self) -> TesseraResult<NDRange> {
        self.footer.with("footer", |f| f.domain.clone())
    }

    /// Number of committed sparse tiles.
    pub fn sparse_tile_num(&self) -> TesseraResult<u64> {
        self.footer.with("footer", |f| f.sparse_tile_num)
    }

    /// Cells in the last tile.
    pub fn last_tile_cell_num(&self) -> TesseraResult<u64> {
        self.footer.with("footer", |f| f.last_tile_cell_num)
    }

    /// Whether cells carry a timestamp column.
    pub fn has_timestamps(&self) -> TesseraResult<bool> {
        self.footer.with("footer", |f| f.has_timestamps)
    }

    /// Whether the fragment carries delete metadata columns.
    pub fn has_delete_meta(&self) -> TesseraResult<bool> {
        self.footer.with("footer", |f| f.has_delete_meta)
    }

    /// Whether the footer came out of a consolidated footer blob.
    pub fn has_consolidated_footer(&self) -> TesseraResult<bool> {
        self.footer.with("footer", |f| f.has_consolidated_footer)
    }

    /// Byte size of the footer on storage.
    pub fn footer_size(&self) -> TesseraResult<u64> {
        self.footer.with("footer", |f| f.footer_size)
    }

    /// Number of indexed fields (attributes, coords, dimensions, specials).
    pub fn num_dims_and_attrs(&self) -> TesseraResult<usize> {
        self.footer.with("footer", |f| f.num_fields())
    }

    /// The fixed field order of this fragment.
    pub fn field_names(&self) -> TesseraResult<Vec<String>> {
        self.footer.with("footer", |f| f.field_names.clone())
    }

    pub(crate) fn field_index(&self, name: &str) -> TesseraResult<usize> {
        self.footer.with("footer", |f| {
            f.idx_map
                .get(name)
                .copied()
                .ok_or_else(|| tessera_err!(InvalidArgument: "field {:?} not in this fragment", name))
        })?
    }

    /// Number of tiles in the fragment.
    pub fn tile_num(&self) -> TesseraResult<u64> {
        self.footer.with("footer", |f| {
            if f.dense {
                f.schema.domain().tile_num(&f.domain)
            } else {
                f.sparse_tile_num
            }
        })
    }

    /// Total number of cells in the fragment.
    pub fn cell_num(&self) -> TesseraResult<u64> {
        let tile_num = self.tile_num()?;
        self.footer.with("footer", |f| {
            if f.dense {
                tile_num * f.schema.domain().cell_num_per_tile()
            } else if tile_num == 0 {
                0
            } else {
                (tile_num - 1) * f.schema.capacity() + f.last_tile_cell_num
            }
        })
    }

    /// Number of cells in tile `tile_pos`.
    pub fn cell_num_of_tile(&self, tile_pos: u64) -> TesseraResult<u64> {
        let tile_num = self.tile_num()?;
        self.footer.with("footer", |f| {
            if f.dense {
                f.schema.domain().cell_num_per_tile()
            } else if tile_pos + 1 == tile_num {
                f.last_tile_cell_num
            } else {
                f.schema.capacity()
            }
        })
    }

    /// Datatypes of the dimensions in order.
    pub fn dim_types(&self) -> TesseraResult<Vec<Datatype>> {
        self.footer.with("footer", |f| {
            f.schema
                .domain()
                .dimensions()
                .iter()
                .map(|d| d.datatype())
                .collect()
        })
    }

    /// Total persisted bytes of the field's fixed data file.
    pub fn file_size(&self, name: &str) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        self.footer.with("footer", |f| f.file_sizes[idx])
    }

    /// Total persisted bytes of the field's var data file.
    pub fn file_var_size(&self, name: &str) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        self.footer.with("footer", |f| f.file_var_sizes[idx])
    }

    /// Total persisted bytes of the field's validity file.
    pub fn file_validity_size(&self, name: &str) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        self.footer.with("footer", |f| f.file_validity_sizes[idx])
    }

    /// Total persisted size of the fragment: all data files plus the
    /// manifest.
    pub fn fragment_size(&self) -> TesseraResult<u64> {
        let mut size = self.footer.with("footer", |f| {
            f.file_sizes.iter().sum::<u64>()
                + f.file_var_sizes.iter().sum::<u64>()
                + f.file_validity_sizes.iter().sum::<u64>()
        })?;
        let mut meta_file_size = self.footer.with("footer", |f| f.meta_file_size)?;
        if meta_file_size == 0 {
            let uri = format!("{}/{}", self.fragment_uri(), FRAGMENT_METADATA_FILENAME);
            meta_file_size = self.resources().vfs().size(&uri)?;
        }
        size += meta_file_size;
        Ok(size)
    }

    /// Persisted offset of tile `tid` in the field's fixed data file.
    pub fn file_offset(&self, name: &str, tid: u64) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        self.sections_ref()?.tile_offsets[idx]
            .with("tile offsets", |v| v.get(tid as usize).copied())?
            .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of bounds for field {:?}", tid, name))
    }

    /// Persisted offset of tile `tid` in the field's var data file.
    pub fn file_var_offset(&self, name: &str, tid: u64) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        self.sections_ref()?.tile_var_offsets[idx]
            .with("tile var offsets", |v| v.get(tid as usize).copied())?
            .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of bounds for field {:?}", tid, name))
    }

    /// Persisted offset of tile `tid` in the field's validity file.
    pub fn file_validity_offset(&self, name: &str, tid: u64) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        self.sections_ref()?.tile_validity_offsets[idx]
            .with("tile validity offsets", |v| v.get(tid as usize).copied())?
            .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of bounds for field {:?}", tid, name))
    }

    fn persisted_size(
        &self,
        offsets: &super::Lazy<Vec<u64>>,
        section: &str,
        total: u64,
        tid: u64,
        tile_num: u64,
    ) -> TesseraResult<u64> {
        offsets.with(section, |v| {
            let start = *v
                .get(tid as usize)
                .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of {}", tid, v.len()))?;
            Ok(if tid + 1 == tile_num {
                total - start
            } else {
                v[tid as usize + 1] - start
            })
        })?
    }

    /// On-storage (filtered) size of tile `tid` in the fixed data file.
    pub fn persisted_tile_size(&self, name: &str, tid: u64) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        let total = self.footer.with("footer", |f| f.file_sizes[idx])?;
        let tile_num = self.tile_num()?;
        self.persisted_size(
            &self.sections_ref()?.tile_offsets[idx],
            "tile offsets",
            total,
            tid,
            tile_num,
        )
    }

    /// On-storage size of tile `tid` in the var data file.
    pub fn persisted_tile_var_size(&self, name: &str, tid: u64) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        let total = self.footer.with("footer", |f| f.file_var_sizes[idx])?;
        let tile_num = self.tile_num()?;
        self.persisted_size(
            &self.sections_ref()?.tile_var_offsets[idx],
            "tile var offsets",
            total,
            tid,
            tile_num,
        )
    }

    /// On-storage size of tile `tid` in the validity file.
    pub fn persisted_tile_validity_size(&self, name: &str, tid: u64) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        let total = self.footer.with("footer", |f| f.file_validity_sizes[idx])?;
        let tile_num = self.tile_num()?;
        self.persisted_size(
            &self.sections_ref()?.tile_validity_offsets[idx],
            "tile validity offsets",
            total,
            tid,
            tile_num,
        )
    }

    /// Logical in-memory size of tile `tid`: cell count times cell size, or
    /// the offsets-buffer size for var fields.
    pub fn tile_size(&self, name: &str, tid: u64) -> TesseraResult<u64> {
        let cell_num = self.cell_num_of_tile(tid)?;
        let field = self
            .footer
            .with("footer", |f| f.schema.field_schema(name))??;
        Ok(match field.cell_size() {
            Some(cell_size) => cell_num * cell_size,
            None => (cell_num + 1) * CELL_VAR_OFFSET_SIZE,
        })
    }

    /// Unfiltered var-payload size of tile `tid`, from the persisted
    /// `tile_var_sizes` array.
    pub fn tile_var_size(&self, name: &str, tid: u64) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        self.sections_ref()?.tile_var_sizes[idx]
            .with("tile var sizes", |v| v.get(tid as usize).copied())?
            .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of bounds for field {:?}", tid, name))
    }

    fn check_min_max_present(&self, name: &str, want_var: bool) -> TesseraResult<usize> {
        let idx = self.field_index(name)?;
        let field = self
            .footer
            .with("footer", |f| f.schema.field_schema(name))??;
        if field.var_size() != want_var
            && !matches!(field.datatype, Datatype::Char | Datatype::StringAscii)
        {
            tessera_bail!(UsageError: "trying to access tile min/max of {:?} as the wrong type", name);
        }
        if !has_min_max_metadata(
            field.datatype,
            field.is_dim,
            field.var_size(),
            field.cell_val_num,
        ) {
            tessera_bail!(UsageError: "tile min/max metadata is not present for {:?}", name);
        }
        Ok(idx)
    }

    /// The minimum of tile `tid` decoded as `T`.
    pub fn get_tile_min_as<T: NativeCellType>(&self, name: &str, tid: u64) -> TesseraResult<T> {
        let idx = self.check_min_max_present(name, false)?;
        let cell_size = self.footer.with("footer", |f| f.schema.cell_size(name))??;
        if cell_size != std::mem::size_of::<T>() as u64 {
            tessera_bail!(UsageError: "trying to access tile min of {:?} as the wrong type", name);
        }
        self.sections_ref()?.tile_min[idx].with("tile min", |mm| {
            let start = (tid * cell_size) as usize;
            let bytes = mm
                .buffer
                .get(start..start + cell_size as usize)
                .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of bounds for field {:?}", tid, name))?;
            T::try_from_le_bytes(bytes)
        })?
    }

    /// The maximum of tile `tid` decoded as `T`.
    pub fn get_tile_max_as<T: NativeCellType>(&self, name: &str, tid: u64) -> TesseraResult<T> {
        let idx = self.check_min_max_present(name, false)?;
        let cell_size = self.footer.with("footer", |f| f.schema.cell_size(name))??;
        if cell_size != std::mem::size_of::<T>() as u64 {
            tessera_bail!(UsageError: "trying to access tile max of {:?} as the wrong type", name);
        }
        self.sections_ref()?.tile_max[idx].with("tile max", |mm| {
            let start = (tid * cell_size) as usize;
            let bytes = mm
                .buffer
                .get(start..start + cell_size as usize)
                .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of bounds for field {:?}", tid, name))?;
            T::try_from_le_bytes(bytes)
        })?
    }

    fn min_max_bytes(
        &self,
        idx: usize,
        tid: u64,
        tile_num: u64,
        var: bool,
        cell_size: u64,
        use_min: bool,
    ) -> TesseraResult<Vec<u8>> {
        let sections = self.sections_ref()?;
        let (lazy, section) = if use_min {
            (&sections.tile_min[idx], "tile min")
        } else {
            (&sections.tile_max[idx], "tile max")
        };
        lazy.with(section, |mm| {
            if var {
                if (tid as usize + 1) * 8 > mm.buffer.len() {
                    tessera_bail!(OutOfBounds: "tile {} out of {} min/max slots", tid, mm.buffer.len() / 8);
                }
                let start = read_offset_slot(&mm.buffer, tid as usize) as usize;
                let end = if tid + 1 == tile_num {
                    mm.var_buffer.len()
                } else {
                    read_offset_slot(&mm.buffer, tid as usize + 1) as usize
                };
                mm.var_buffer
                    .get(start..end)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| tessera_err!(Corrupt: "min/max offsets point past the var buffer"))
            } else {
                let start = (tid * cell_size) as usize;
                mm.buffer
                    .get(start..start + cell_size as usize)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of min/max bounds", tid))
            }
        })?
    }

    fn tile_stat_bytes(&self, name: &str, tid: u64, use_min: bool) -> TesseraResult<Vec<u8>> {
        let idx = self.field_index(name)?;
        let field = self
            .footer
            .with("footer", |f| f.schema.field_schema(name))??;
        if !has_min_max_metadata(
            field.datatype,
            field.is_dim,
            field.var_size(),
            field.cell_val_num,
        ) {
            tessera_bail!(UsageError: "tile min/max metadata is not present for {:?}", name);
        }
        let tile_num = self.tile_num()?;
        let cell_size = field.cell_size().unwrap_or(0);
        self.min_max_bytes(idx, tid, tile_num, field.var_size(), cell_size, use_min)
    }

    /// The minimum of tile `tid` as raw bytes; works for var-size fields and
    /// fixed character vectors.
    pub fn get_tile_min_bytes(&self, name: &str, tid: u64) -> TesseraResult<Vec<u8>> {
        self.check_min_max_present(name, true)?;
        self.tile_stat_bytes(name, tid, true)
    }

    /// The maximum of tile `tid` as raw bytes.
    pub fn get_tile_max_bytes(&self, name: &str, tid: u64) -> TesseraResult<Vec<u8>> {
        self.check_min_max_present(name, true)?;
        self.tile_stat_bytes(name, tid, false)
    }

    /// The sum of tile `tid`, reinterpreted by the caller per datatype.
    pub fn get_tile_sum(&self, name: &str, tid: u64) -> TesseraResult<[u8; 8]> {
        let idx = self.field_index(name)?;
        let field = self
            .footer
            .with("footer", |f| f.schema.field_schema(name))??;
        if !has_sum_metadata(field.datatype, field.var_size(), field.cell_val_num) {
            tessera_bail!(UsageError: "tile sum metadata is not present for {:?}", name);
        }
        self.sections_ref()?.tile_sums[idx].with("tile sum", |sums| {
            let start = (tid * 8) as usize;
            sums.get(start..start + 8)
                .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of bounds for field {:?}", tid, name))
                .map(|s| s.try_into().tessera_expect("slice of eight bytes"))
        })?
    }

    /// The null count of tile `tid`.
    pub fn get_tile_null_count(&self, name: &str, tid: u64) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        let nullable = self
            .footer
            .with("footer", |f| f.schema.is_nullable(name))??;
        if !nullable {
            tessera_bail!(UsageError: "tile null count metadata is not present for {:?}", name);
        }
        self.sections_ref()?.tile_null_counts[idx]
            .with("tile null count", |v| v.get(tid as usize).copied())?
            .ok_or_else(|| tessera_err!(OutOfBounds: "tile {} out of bounds for field {:?}", tid, name))
    }

    /// The fragment-level minimum of `name`.
    pub fn get_min(&self, name: &str) -> TesseraResult<Vec<u8>> {
        let idx = self.field_index(name)?;
        self.sections_ref()?
            .fragment_stats
            .with("fragment min max sum null count", |s| s.mins[idx].clone())
    }

    /// The fragment-level maximum of `name`.
    pub fn get_max(&self, name: &str) -> TesseraResult<Vec<u8>> {
        let idx = self.field_index(name)?;
        self.sections_ref()?
            .fragment_stats
            .with("fragment min max sum null count", |s| s.maxs[idx].clone())
    }

    /// The fragment-level sum of `name`.
    pub fn get_sum(&self, name: &str) -> TesseraResult<[u8; 8]> {
        let idx = self.field_index(name)?;
        self.sections_ref()?
            .fragment_stats
            .with("fragment min max sum null count", |s| {
                s.sums[idx].to_le_bytes()
            })
    }

    /// The fragment-level null count of `name`.
    pub fn get_null_count(&self, name: &str) -> TesseraResult<u64> {
        let idx = self.field_index(name)?;
        self.sections_ref()?
            .fragment_stats
            .with("fragment min max sum null count", |s| s.null_counts[idx])
    }

    /// Delete predicates already folded into this fragment.
    pub fn get_processed_conditions(&self) -> TesseraResult<Vec<String>> {
        self.sections_ref()?
            .processed_conditions
            .with("processed conditions", |pc| pc.list.clone())
    }

    /// The MBR of sparse tile `tid`.
    pub fn mbr(&self, tid: u64) -> TesseraResult<NDRange> {
        self.sections_ref()?
            .rtree
            .with("rtree", |t| t.leaf(tid).clone())
    }

    /// All MBRs in tile order.
    pub fn mbrs(&self) -> TesseraResult<Vec<NDRange>> {
        self.sections_ref()?
            .rtree
            .with("rtree", |t| t.leaves().to_vec())
    }

    /// The statistics view of one tile for pushed-down aggregates.
    /// Dimension min/max come from the R-tree leaf on that dimension.
    pub fn get_tile_metadata(&self, name: &str, tid: u64) -> TesseraResult<TileMetadata> {
        let count = self.cell_num_of_tile(tid)?;
        let field = self
            .footer
            .with("footer", |f| f.schema.field_schema(name))??;
        let null_count = if field.nullable {
            self.get_tile_null_count(name, tid)?
        } else {
            0
        };

        if field.is_dim {
            let dim_idx = self
                .footer
                .with("footer", |f| f.schema.domain().dimension_index(name))??;
            let mbr = self.mbr(tid)?;
            let range = &mbr[dim_idx as usize];
            return Ok(TileMetadata {
                count,
                null_count,
                min: range.start_bytes().to_vec(),
                max: range.end_bytes().to_vec(),
                sum: None,
            });
        }

        if field.var_size() {
            return Ok(TileMetadata {
                count,
                null_count,
                min: self.tile_stat_bytes(name, tid, true)?,
                max: self.tile_stat_bytes(name, tid, false)?,
                sum: None,
            });
        }

        let min = self.tile_stat_bytes(name, tid, true)?;
        let max = self.tile_stat_bytes(name, tid, false)?;
        let sum = has_sum_metadata(field.datatype, false, field.cell_val_num)
            .then(|| self.get_tile_sum(name, tid))
            .transpose()?;
        Ok(TileMetadata {
            count,
            null_count,
            min,
            max,
            sum,
        })
    }

    /// Which tiles `range` touches. The R-tree must be loaded.
    pub fn get_tile_overlap(
        &self,
        range: &NDRange,
        is_default: &[bool],
    ) -> TesseraResult<TileOverlap> {
        let schema = self.array_schema()?;
        self.sections_ref()?.rtree.with("rtree", |t| {
            t.get_tile_overlap(schema.domain(), range, is_default)
        })
    }

    /// Mark tiles whose MBR intersects `range` on dimension `d`. The R-tree
    /// must be loaded.
    pub fn compute_tile_bitmap(
        &self,
        range: &Range,
        d: u32,
        bitmap: &mut [u8],
    ) -> TesseraResult<()> {
        let schema = self.array_schema()?;
        self.sections_ref()?.rtree.with("rtree", |t| {
            t.compute_tile_bitmap(schema.domain(), range, d, bitmap)
        })
    }

    /// Tile positions of dense tiles intersecting `subarray`.
    pub fn compute_overlapping_tile_ids(&self, subarray: &NDRange) -> TesseraResult<Vec<u64>> {
        Ok(self
            .overlapping_tiles(subarray)?
            .into_iter()
            .map(|(tid, _)| tid)
            .collect())
    }

    /// Tile positions of dense tiles intersecting `subarray`, with the
    /// fraction of each tile the subarray covers.
    pub fn compute_overlapping_tile_ids_cov(
        &self,
        subarray: &NDRange,
    ) -> TesseraResult<Vec<(u64, f64)>> {
        self.overlapping_tiles(subarray)
    }

    fn overlapping_tiles(&self, subarray: &NDRange) -> TesseraResult<Vec<(u64, f64)>> {
        if !self.dense()? {
            tessera_bail!(UsageError: "dense tile walks apply only to dense fragments");
        }
        let schema = self.array_schema()?;
        let frag_domain = self.domain()?;
        let domain = schema.domain();
        if subarray.len() != domain.dim_num() as usize {
            tessera_bail!(
                InvalidArgument: "subarray has {} ranges, domain has {} dimensions",
                subarray.len(),
                domain.dim_num()
            );
        }

        let Some(bounds) = domain.tile_index_domain(&frag_domain, subarray) else {
            return Ok(Vec::new());
        };
        let tiles_per_dim: Vec<u64> = domain
            .dimensions()
            .iter()
            .zip(&frag_domain)
            .map(|(d, r)| d.tile_num(r))
            .collect();

        let mut tids = Vec::new();
        let mut coords: Vec<u64> = bounds.iter().map(|(lo, _)| *lo).collect();
        loop {
            let tile_subarray = domain.get_tile_subarray(&frag_domain, &coords);
            let mut cov = 1.0f64;
            for (d, (dim, tile_range)) in domain
                .dimensions()
                .iter()
                .zip(&tile_subarray)
                .enumerate()
            {
                cov *= dim.overlap_ratio(&subarray[d], tile_range);
            }
            tids.push((domain.get_tile_pos(&tiles_per_dim, &coords), cov));
            if !domain.get_next_tile_coords(&bounds, &mut coords) {
                break;
            }
        }
        tids.sort_by_key(|(tid, _)| *tid);
        Ok(tids)
    }

    /// Add this fragment's contribution to the caller's maximum buffer
    /// sizes for a prospective read of `subarray`. Entries map field names
    /// to `(fixed_or_offsets_bytes, var_bytes)`.
    pub fn add_max_buffer_sizes(
        &self,
        key: &EncryptionKey,
        subarray: &NDRange,
        buffer_sizes: &mut FxHashMap<String, (u64, u64)>,
    ) -> TesseraResult<()> {
        if self.dense()? {
            let tids = self.compute_overlapping_tile_ids(subarray)?;
            self.add_tile_sizes(tids.into_iter(), buffer_sizes)
        } else {
            self.load_rtree(key)?;
            let overlap = self.get_tile_overlap(subarray, &vec![false; subarray.len()])?;
            let range_tiles = overlap
                .tile_ranges
                .iter()
                .flat_map(|(lo, hi)| *lo..=*hi)
                .collect::<Vec<_>>();
            self.add_tile_sizes(range_tiles.into_iter(), buffer_sizes)?;
            self.add_tile_sizes(overlap.tiles.iter().map(|(t, _)| *t), buffer_sizes)
        }
    }

    fn add_tile_sizes(
        &self,
        tids: impl Iterator<Item = u64>,
        buffer_sizes: &mut FxHashMap<String, (u64, u64)>,
    ) -> TesseraResult<()> {
        for tid in tids {
            let cell_num = self.cell_num_of_tile(tid)?;
            for (name, (fixed, var)) in buffer_sizes.iter_mut() {
                let field = self
                    .footer
                    .with("footer", |f| f.schema.field_schema(name))??;
                match field.cell_size() {
                    Some(cell_size) => *fixed += cell_num * cell_size,
                    None => {
                        *fixed += cell_num * CELL_VAR_OFFSET_SIZE;
                        *var += self.tile_var_size(name, tid)?;
                    }
                }
            }
        }
        Ok(())
    }
}
