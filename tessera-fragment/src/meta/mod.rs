//! The fragment manifest: where every tile of every field lives on storage,
//! plus the statistics and the R-tree index over it.

mod accessors;
mod load;
mod store;

pub use load::{consolidate_fragment_footers, ConsolidatedFooters};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tessera_dtype::{
    NDRange, COORDS_NAME, DELETE_CONDITION_INDEX_NAME, DELETE_TIMESTAMPS_NAME, TIMESTAMPS_NAME,
};
use tessera_error::{tessera_bail, tessera_err, tessera_panic, TesseraExpect, TesseraResult};
use tessera_io::ContextResources;
use tessera_schema::ArraySchema;

use crate::{
    has_min_max_metadata, has_sum_metadata, FragmentName, MemoryTracker, MemoryType, RTree,
    FILE_SUFFIX, FRAGMENT_METADATA_FILENAME,
};

/// A lazily loaded metadata section: double-checked loading behind its own
/// lock, an authoritative loaded flag, and the bytes it charged against the
/// memory tracker.
pub(crate) struct Lazy<T> {
    data: RwLock<Option<T>>,
    loaded: AtomicBool,
    charged: AtomicU64,
}

impl<T> Lazy<T> {
    pub(crate) fn new_unloaded() -> Self {
        Self {
            data: RwLock::new(None),
            loaded: AtomicBool::new(false),
            charged: AtomicU64::new(0),
        }
    }

    pub(crate) fn new_loaded(value: T) -> Self {
        Self {
            data: RwLock::new(Some(value)),
            loaded: AtomicBool::new(true),
            charged: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Read the section, failing with `UsageError` when it is not loaded.
    pub(crate) fn with<R>(
        &self,
        section: &str,
        f: impl FnOnce(&T) -> R,
    ) -> TesseraResult<R> {
        if !self.is_loaded() {
            tessera_bail!(UsageError: "trying to access {} metadata that's not loaded", section);
        }
        let guard = self.data.read();
        guard
            .as_ref()
            .map(f)
            .ok_or_else(|| tessera_err!(UsageError: "trying to access {} metadata that's not loaded", section))
    }

    /// Idempotent load: the producer runs at most once per loaded lifetime
    /// and returns the value plus the bytes it charged.
    pub(crate) fn get_or_load(
        &self,
        producer: impl FnOnce() -> TesseraResult<(T, u64)>,
    ) -> TesseraResult<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let mut guard = self.data.write();
        if self.is_loaded() {
            return Ok(());
        }
        let (value, charged) = producer()?;
        *guard = Some(value);
        self.charged.store(charged, Ordering::Release);
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Drop the section, returning the bytes to release from the tracker.
    pub(crate) fn free(&self) -> u64 {
        let mut guard = self.data.write();
        *guard = None;
        self.loaded.store(false, Ordering::Release);
        self.charged.swap(0, Ordering::AcqRel)
    }

    /// Writer-side exclusive access; the section must be resident.
    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.data
            .get_mut()
            .as_mut()
            .tessera_expect("writer section is resident")
    }
}

/// Absolute offsets of every generic tile inside the manifest file.
#[derive(Debug, Clone, Default)]
pub(crate) struct GenericTileOffsets {
    pub rtree: u64,
    pub tile_offsets: Vec<u64>,
    pub tile_var_offsets: Vec<u64>,
    pub tile_var_sizes: Vec<u64>,
    pub tile_validity_offsets: Vec<u64>,
    pub tile_min_offsets: Vec<u64>,
    pub tile_max_offsets: Vec<u64>,
    pub tile_sum_offsets: Vec<u64>,
    pub tile_null_count_offsets: Vec<u64>,
    pub fragment_min_max_sum_null_count: u64,
    pub processed_conditions: u64,
}

/// Everything the footer carries, plus the derived name→index map.
pub(crate) struct Footer {
    pub schema_name: String,
    pub schema: Arc<ArraySchema>,
    pub dense: bool,
    /// Empty when the fragment has no committed cells yet.
    pub non_empty_domain: NDRange,
    /// For dense fragments, the non-empty domain expanded to tile
    /// boundaries; what tile positions are computed against.
    pub domain: NDRange,
    pub sparse_tile_num: u64,
    pub last_tile_cell_num: u64,
    pub has_timestamps: bool,
    pub has_delete_meta: bool,
    pub file_sizes: Vec<u64>,
    pub file_var_sizes: Vec<u64>,
    pub file_validity_sizes: Vec<u64>,
    pub gt_offsets: GenericTileOffsets,
    pub idx_map: FxHashMap<String, usize>,
    pub field_names: Vec<String>,
    pub meta_file_size: u64,
    pub footer_size: u64,
    pub has_consolidated_footer: bool,
}

impl Footer {
    /// The fixed and dense field order: attributes, the coords pseudo-field,
    /// dimensions (v5+), then the optional timestamp and delete fields.
    pub(crate) fn build_field_order(
        schema: &ArraySchema,
        version: u32,
        has_timestamps: bool,
        has_delete_meta: bool,
    ) -> (Vec<String>, FxHashMap<String, usize>) {
        let mut names = Vec::new();
        for attr in schema.attributes() {
            names.push(attr.name().to_string());
        }
        names.push(COORDS_NAME.to_string());
        if version >= 5 {
            for dim in schema.domain().dimensions() {
                names.push(dim.name().to_string());
            }
        }
        if has_timestamps {
            names.push(TIMESTAMPS_NAME.to_string());
        }
        if has_delete_meta {
            names.push(DELETE_TIMESTAMPS_NAME.to_string());
            names.push(DELETE_CONDITION_INDEX_NAME.to_string());
        }
        let idx_map = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        (names, idx_map)
    }

    pub(crate) fn num_fields(&self) -> usize {
        self.field_names.len()
    }
}

/// Fixed and var-size halves of a per-tile min or max buffer. For var
/// fields, `buffer` holds one `u64` per tile: sizes while the writer
/// streams, offsets into `var_buffer` after the one-shot conversion.
#[derive(Debug, Clone, Default)]
pub(crate) struct MinMaxBuffer {
    pub buffer: Vec<u8>,
    pub var_buffer: Vec<u8>,
}

/// The fragment-level rollup of per-tile statistics.
#[derive(Debug, Clone, Default)]
pub(crate) struct FragmentStats {
    pub mins: Vec<Vec<u8>>,
    pub maxs: Vec<Vec<u8>>,
    pub sums: Vec<u64>,
    pub null_counts: Vec<u64>,
}

/// Delete predicates already folded into this fragment.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProcessedConditions {
    pub list: Vec<String>,
    pub set: FxHashSet<String>,
}

/// All lazily loaded sections. Tile offset families hold one slot per
/// field so attribute loads can proceed in parallel.
pub(crate) struct Sections {
    pub rtree: Lazy<RTree>,
    pub tile_offsets: Vec<Lazy<Vec<u64>>>,
    pub tile_var_offsets: Vec<Lazy<Vec<u64>>>,
    pub tile_var_sizes: Vec<Lazy<Vec<u64>>>,
    pub tile_validity_offsets: Vec<Lazy<Vec<u64>>>,
    pub tile_min: Vec<Lazy<MinMaxBuffer>>,
    pub tile_max: Vec<Lazy<MinMaxBuffer>>,
    pub tile_sums: Vec<Lazy<Vec<u8>>>,
    pub tile_null_counts: Vec<Lazy<Vec<u64>>>,
    pub fragment_stats: Lazy<FragmentStats>,
    pub processed_conditions: Lazy<ProcessedConditions>,
}

impl Sections {
    fn per_field<T>(num: usize, f: impl Fn() -> Lazy<T>) -> Vec<Lazy<T>> {
        (0..num).map(|_| f()).collect()
    }

    pub(crate) fn new_unloaded(num: usize) -> Self {
        Self {
            rtree: Lazy::new_unloaded(),
            tile_offsets: Self::per_field(num, Lazy::new_unloaded),
            tile_var_offsets: Self::per_field(num, Lazy::new_unloaded),
            tile_var_sizes: Self::per_field(num, Lazy::new_unloaded),
            tile_validity_offsets: Self::per_field(num, Lazy::new_unloaded),
            tile_min: Self::per_field(num, Lazy::new_unloaded),
            tile_max: Self::per_field(num, Lazy::new_unloaded),
            tile_sums: Self::per_field(num, Lazy::new_unloaded),
            tile_null_counts: Self::per_field(num, Lazy::new_unloaded),
            fragment_stats: Lazy::new_unloaded(),
            processed_conditions: Lazy::new_unloaded(),
        }
    }

    pub(crate) fn new_for_write(num: usize) -> Self {
        Self {
            rtree: Lazy::new_loaded(RTree::default()),
            tile_offsets: Self::per_field(num, || Lazy::new_loaded(Vec::new())),
            tile_var_offsets: Self::per_field(num, || Lazy::new_loaded(Vec::new())),
            tile_var_sizes: Self::per_field(num, || Lazy::new_loaded(Vec::new())),
            tile_validity_offsets: Self::per_field(num, || Lazy::new_loaded(Vec::new())),
            tile_min: Self::per_field(num, || Lazy::new_loaded(MinMaxBuffer::default())),
            tile_max: Self::per_field(num, || Lazy::new_loaded(MinMaxBuffer::default())),
            tile_sums: Self::per_field(num, || Lazy::new_loaded(Vec::new())),
            tile_null_counts: Self::per_field(num, || Lazy::new_loaded(Vec::new())),
            fragment_stats: Lazy::new_loaded(FragmentStats::default()),
            processed_conditions: Lazy::new_loaded(ProcessedConditions::default()),
        }
    }
}

/// The statistics view of one tile handed to pushed-down aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMetadata {
    /// Cell count of the tile.
    pub count: u64,
    /// Null cells in the tile.
    pub null_count: u64,
    /// Minimum value bytes.
    pub min: Vec<u8>,
    /// Maximum value bytes.
    pub max: Vec<u8>,
    /// The tile sum, when the field carries one.
    pub sum: Option<[u8; 8]>,
}

/// The per-fragment manifest.
///
/// Writers construct with [`FragmentMetadata::new`], stream per-tile entries
/// through the `set_*` methods, and persist with `store`. Readers obtain one
/// through `load` (footer only) and pull further sections on demand.
pub struct FragmentMetadata {
    resources: Arc<ContextResources>,
    memory_tracker: Arc<MemoryTracker>,
    fragment_uri: String,
    fragment_name: FragmentName,
    version: u32,
    tile_index_base: u64,
    min_max_converted: Vec<bool>,
    pub(crate) footer: Lazy<Footer>,
    pub(crate) sections: OnceLock<Sections>,
}

impl FragmentMetadata {
    /// A manifest for a fragment about to be written.
    pub fn new(
        resources: Arc<ContextResources>,
        memory_tracker: Arc<MemoryTracker>,
        schema: Arc<ArraySchema>,
        array_uri: &str,
        timestamp_range: (u64, u64),
        has_timestamps: bool,
        has_delete_meta: bool,
    ) -> Self {
        let version = schema.write_version();
        let fragment_name = FragmentName::generate(timestamp_range, version);
        let fragment_uri = format!("{}/{}", array_uri.trim_end_matches('/'), fragment_name.name());
        let (field_names, idx_map) =
            Footer::build_field_order(&schema, version, has_timestamps, has_delete_meta);
        let num = field_names.len();
        let footer = Footer {
            schema_name: schema.name().to_string(),
            dense: schema.dense(),
            schema,
            non_empty_domain: NDRange::new(),
            domain: NDRange::new(),
            sparse_tile_num: 0,
            last_tile_cell_num: 0,
            has_timestamps,
            has_delete_meta,
            file_sizes: vec![0; num],
            file_var_sizes: vec![0; num],
            file_validity_sizes: vec![0; num],
            gt_offsets: GenericTileOffsets::default(),
            idx_map,
            field_names,
            meta_file_size: 0,
            footer_size: 0,
            has_consolidated_footer: false,
        };
        Self {
            resources,
            memory_tracker,
            fragment_uri,
            fragment_name,
            version,
            tile_index_base: 0,
            min_max_converted: vec![false; num],
            footer: Lazy::new_loaded(footer),
            sections: OnceLock::new(),
        }
    }

    /// Initialize the writer-side sections and, for dense fragments, expand
    /// the domain to tile boundaries so consolidation may include whole
    /// space tiles.
    pub fn init(&mut self, non_empty_domain: &NDRange) {
        let footer = self.footer.get_mut();
        if footer.dense && !non_empty_domain.is_empty() {
            let mut ned = non_empty_domain.clone();
            footer.schema.domain().crop_ndrange(&mut ned);
            let mut domain = ned.clone();
            footer.schema.domain().expand_to_tiles(&mut domain);
            footer.non_empty_domain = ned;
            footer.domain = domain;
        }
        let num = footer.num_fields();
        if self.sections.set(Sections::new_for_write(num)).is_err() {
            tessera_panic!(UsageError: "init runs once per manifest");
        }
    }

    /// Size every per-field vector for `num_tiles` tiles, honoring the
    /// min/max/sum policy per field.
    pub fn set_num_tiles(&mut self, num_tiles: u64) -> TesseraResult<()> {
        let footer = self.footer.get_mut();
        let sections = self
            .sections
            .get_mut()
            .ok_or_else(|| tessera_err!(UsageError: "set_num_tiles before init"))?;

        for (idx, name) in footer.field_names.iter().enumerate() {
            let field = footer.schema.field_schema(name)?;
            let n = num_tiles as usize;
            if (sections.tile_offsets[idx].get_mut().len() as u64) > num_tiles {
                tessera_bail!(UsageError: "cannot shrink tile vectors of field {:?}", name);
            }

            sections.tile_offsets[idx].get_mut().resize(n, 0);
            sections.tile_var_offsets[idx].get_mut().resize(n, 0);
            sections.tile_var_sizes[idx].get_mut().resize(n, 0);
            sections.tile_validity_offsets[idx].get_mut().resize(n, 0);

            // Dense coordinates carry no per-tile statistics.
            let dense_dim = footer.dense && field.is_dim;
            if !dense_dim {
                if has_min_max_metadata(
                    field.datatype,
                    field.is_dim,
                    field.var_size(),
                    field.cell_val_num,
                ) {
                    let slot = field.cell_size().unwrap_or(tessera_dtype::CELL_VAR_OFFSET_SIZE);
                    sections.tile_min[idx]
                        .get_mut()
                        .buffer
                        .resize(n * slot as usize, 0);
                    sections.tile_max[idx]
                        .get_mut()
                        .buffer
                        .resize(n * slot as usize, 0);
                }
                if !field.var_size()
                    && has_sum_metadata(field.datatype, field.var_size(), field.cell_val_num)
                {
                    sections.tile_sums[idx].get_mut().resize(n * 8, 0);
                }
                if field.nullable {
                    sections.tile_null_counts[idx].get_mut().resize(n, 0);
                }
            }
        }

        if !footer.dense {
            sections.rtree.get_mut().set_leaf_num(num_tiles);
            footer.sparse_tile_num = num_tiles;
        }
        Ok(())
    }

    /// Base added to every `tid` argument; bumped between consolidation
    /// passes.
    pub fn set_tile_index_base(&mut self, base: u64) {
        self.tile_index_base = base;
    }

    /// The current tile index base.
    pub fn tile_index_base(&self) -> u64 {
        self.tile_index_base
    }

    /// Record the MBR of tile `tid` and grow the non-empty domain.
    pub fn set_mbr(&mut self, tid: u64, mbr: &NDRange) -> TesseraResult<()> {
        let tid = tid + self.tile_index_base;
        let sections = self.sections_mut()?;
        sections.rtree.get_mut().set_leaf(tid, mbr.clone())?;
        self.expand_non_empty_domain(mbr);
        Ok(())
    }

    /// Grow the non-empty domain to include `mbr`.
    pub fn expand_non_empty_domain(&mut self, mbr: &NDRange) {
        let footer = self.footer.get_mut();
        if footer.non_empty_domain.is_empty() {
            footer.non_empty_domain = mbr.clone();
            return;
        }
        let Footer {
            schema,
            non_empty_domain,
            ..
        } = footer;
        schema.domain().expand_ndrange(mbr, non_empty_domain);
    }

    fn sections_mut(&mut self) -> TesseraResult<&mut Sections> {
        self.sections
            .get_mut()
            .ok_or_else(|| tessera_err!(UsageError: "manifest sections not initialized"))
    }

    pub(crate) fn sections_ref(&self) -> TesseraResult<&Sections> {
        self.sections
            .get()
            .ok_or_else(|| tessera_err!(UsageError: "manifest sections not initialized"))
    }

    fn writer_field_index(&mut self, name: &str) -> usize {
        self.footer
            .get_mut()
            .idx_map
            .get(name)
            .copied()
            .tessera_expect("field exists in this fragment")
    }

    /// Record the persisted offset of tile `tid` for `name`, extending the
    /// field's file size by `step`.
    pub fn set_tile_offset(&mut self, name: &str, tid: u64, step: u64) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let file_size = self.footer.get_mut().file_sizes[idx];
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        sections.tile_offsets[idx].get_mut()[tid] = file_size;
        self.footer.get_mut().file_sizes[idx] += step;
    }

    /// Record the persisted var-payload offset of tile `tid` for `name`.
    pub fn set_tile_var_offset(&mut self, name: &str, tid: u64, step: u64) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let file_var_size = self.footer.get_mut().file_var_sizes[idx];
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        sections.tile_var_offsets[idx].get_mut()[tid] = file_var_size;
        self.footer.get_mut().file_var_sizes[idx] += step;
    }

    /// Record the unfiltered var-payload size of tile `tid` for `name`.
    pub fn set_tile_var_size(&mut self, name: &str, tid: u64, size: u64) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        sections.tile_var_sizes[idx].get_mut()[tid] = size;
    }

    /// Record the persisted validity offset of tile `tid` for `name`.
    pub fn set_tile_validity_offset(&mut self, name: &str, tid: u64, step: u64) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let file_validity_size = self.footer.get_mut().file_validity_sizes[idx];
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        sections.tile_validity_offsets[idx].get_mut()[tid] = file_validity_size;
        self.footer.get_mut().file_validity_sizes[idx] += step;
    }

    /// Record a fixed-size tile minimum.
    pub fn set_tile_min(&mut self, name: &str, tid: u64, min: &[u8]) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        let buffer = &mut sections.tile_min[idx].get_mut().buffer;
        buffer[tid * min.len()..(tid + 1) * min.len()].copy_from_slice(min);
    }

    /// Record a fixed-size tile maximum.
    pub fn set_tile_max(&mut self, name: &str, tid: u64, max: &[u8]) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        let buffer = &mut sections.tile_max[idx].get_mut().buffer;
        buffer[tid * max.len()..(tid + 1) * max.len()].copy_from_slice(max);
    }

    /// Record the byte size of a var-size tile minimum. Sizes become
    /// offsets in the one-shot conversion before `store`.
    pub fn set_tile_min_var_size(&mut self, name: &str, tid: u64, size: u64) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        let buffer = &mut sections.tile_min[idx].get_mut().buffer;
        buffer[tid * 8..(tid + 1) * 8].copy_from_slice(&size.to_le_bytes());
    }

    /// Record the byte size of a var-size tile maximum.
    pub fn set_tile_max_var_size(&mut self, name: &str, tid: u64, size: u64) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        let buffer = &mut sections.tile_max[idx].get_mut().buffer;
        buffer[tid * 8..(tid + 1) * 8].copy_from_slice(&size.to_le_bytes());
    }

    /// Copy a var-size tile minimum into its converted slot.
    pub fn set_tile_min_var(&mut self, name: &str, tid: u64, min: &[u8]) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        let mm = sections.tile_min[idx].get_mut();
        copy_var_value(mm, tid, min);
    }

    /// Copy a var-size tile maximum into its converted slot.
    pub fn set_tile_max_var(&mut self, name: &str, tid: u64, max: &[u8]) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        let mm = sections.tile_max[idx].get_mut();
        copy_var_value(mm, tid, max);
    }

    /// Record a tile sum.
    pub fn set_tile_sum(&mut self, name: &str, tid: u64, sum: &[u8; 8]) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        sections.tile_sums[idx].get_mut()[tid * 8..(tid + 1) * 8].copy_from_slice(sum);
    }

    /// Record a tile null count.
    pub fn set_tile_null_count(&mut self, name: &str, tid: u64, null_count: u64) {
        let idx = self.writer_field_index(name);
        let tid = (tid + self.tile_index_base) as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        sections.tile_null_counts[idx].get_mut()[tid] = null_count;
    }

    /// One-shot flip of the var min/max buffers from per-tile sizes to a
    /// prefix sum of offsets, sizing the var buffers to match. Must run
    /// exactly once per var field before `store`.
    pub fn convert_tile_min_max_var_sizes_to_offsets(
        &mut self,
        name: &str,
    ) -> TesseraResult<()> {
        let idx = self.writer_field_index(name);
        if self.min_max_converted[idx] {
            tessera_bail!(
                UsageError: "min/max sizes of field {:?} were already converted to offsets", name
            );
        }
        self.min_max_converted[idx] = true;
        let base = self.tile_index_base as usize;
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        convert_sizes_to_offsets(sections.tile_min[idx].get_mut(), base);
        convert_sizes_to_offsets(sections.tile_max[idx].get_mut(), base);
        Ok(())
    }

    /// Record the number of cells in the last tile.
    pub fn set_last_tile_cell_num(&mut self, cell_num: u64) {
        self.footer.get_mut().last_tile_cell_num = cell_num;
    }

    /// Replace the processed delete conditions.
    pub fn set_processed_conditions(&mut self, conditions: Vec<String>) {
        let sections = self.sections_mut().tessera_expect("writer is initialized");
        let pc = sections.processed_conditions.get_mut();
        pc.set = conditions.iter().cloned().collect();
        pc.list = conditions;
    }

    /// The fragment URI.
    pub fn fragment_uri(&self) -> &str {
        &self.fragment_uri
    }

    /// The parsed fragment name.
    pub fn fragment_name(&self) -> &FragmentName {
        &self.fragment_name
    }

    /// The on-disk format version.
    pub fn format_version(&self) -> u32 {
        self.version
    }

    /// The fragment's timestamp range.
    pub fn timestamp_range(&self) -> (u64, u64) {
        self.fragment_name.timestamp_range()
    }

    /// The start of the timestamp range.
    pub fn first_timestamp(&self) -> u64 {
        self.fragment_name.timestamp_range().0
    }

    pub(crate) fn resources(&self) -> &ContextResources {
        &self.resources
    }

    /// URI of the manifest file.
    pub fn metadata_uri(&self) -> String {
        format!("{}/{}", self.fragment_uri, FRAGMENT_METADATA_FILENAME)
    }

    /// Encode a field name for use in data-file names.
    ///
    /// Raw names through version 7, a canonical percent-encoding at
    /// version 8, and compact `a{i}` / `d{i}` / `t` / `dt` / `dci` names
    /// afterwards.
    pub fn encode_name(&self, name: &str) -> TesseraResult<String> {
        if self.version <= 7 {
            return Ok(name.to_string());
        }
        if self.version == 8 {
            return Ok(percent_encode_v8(name));
        }
        self.footer.with("footer", |footer| {
            let idx = footer
                .idx_map
                .get(name)
                .copied()
                .ok_or_else(|| tessera_err!(InvalidArgument: "field {:?} not in this fragment", name))?;
            if footer.schema.is_attr(name) {
                return Ok(format!("a{idx}"));
            }
            if footer.schema.is_dim(name) {
                let dim_idx = idx - footer.schema.attribute_num() as usize - 1;
                return Ok(format!("d{dim_idx}"));
            }
            Ok(match name {
                COORDS_NAME => name.to_string(),
                TIMESTAMPS_NAME => "t".to_string(),
                DELETE_TIMESTAMPS_NAME => "dt".to_string(),
                DELETE_CONDITION_INDEX_NAME => "dci".to_string(),
                other => {
                    tessera_bail!(InvalidArgument: "unable to locate field {:?}", other)
                }
            })
        })?
    }

    /// URI of the field's fixed data file.
    pub fn uri(&self, name: &str) -> TesseraResult<String> {
        Ok(format!(
            "{}/{}{}",
            self.fragment_uri,
            self.encode_name(name)?,
            FILE_SUFFIX
        ))
    }

    /// URI of the field's var data file.
    pub fn var_uri(&self, name: &str) -> TesseraResult<String> {
        Ok(format!(
            "{}/{}_var{}",
            self.fragment_uri,
            self.encode_name(name)?,
            FILE_SUFFIX
        ))
    }

    /// URI of the field's validity data file.
    pub fn validity_uri(&self, name: &str) -> TesseraResult<String> {
        Ok(format!(
            "{}/{}_validity{}",
            self.fragment_uri,
            self.encode_name(name)?,
            FILE_SUFFIX
        ))
    }

    /// Free the R-tree, releasing its bytes to the tracker. A later
    /// `load_rtree` re-reads it from storage.
    pub fn free_rtree(&self) -> TesseraResult<()> {
        let freed = self.sections_ref()?.rtree.free();
        self.memory_tracker.release_memory(freed, MemoryType::RTree);
        Ok(())
    }

    /// Free every tile offset family, releasing their bytes to the tracker.
    pub fn free_tile_offsets(&self) -> TesseraResult<()> {
        let sections = self.sections_ref()?;
        let families = [
            &sections.tile_offsets,
            &sections.tile_var_offsets,
            &sections.tile_var_sizes,
            &sections.tile_validity_offsets,
        ];
        for family in families {
            for section in family {
                let freed = section.free();
                self.memory_tracker
                    .release_memory(freed, MemoryType::TileOffsets);
            }
        }
        Ok(())
    }
}

impl Drop for FragmentMetadata {
    fn drop(&mut self) {
        self.memory_tracker
            .release_memory(self.footer.free(), MemoryType::Footer);
        if let Some(sections) = self.sections.get() {
            self.memory_tracker
                .release_memory(sections.rtree.free(), MemoryType::RTree);
            for family in [
                &sections.tile_offsets,
                &sections.tile_var_offsets,
                &sections.tile_var_sizes,
                &sections.tile_validity_offsets,
            ] {
                for section in family {
                    self.memory_tracker
                        .release_memory(section.free(), MemoryType::TileOffsets);
                }
            }
            for family in [&sections.tile_min, &sections.tile_max] {
                for section in family {
                    self.memory_tracker
                        .release_memory(section.free(), MemoryType::MinMaxSumNullCount);
                }
            }
            for section in &sections.tile_sums {
                self.memory_tracker
                    .release_memory(section.free(), MemoryType::MinMaxSumNullCount);
            }
            for section in &sections.tile_null_counts {
                self.memory_tracker
                    .release_memory(section.free(), MemoryType::MinMaxSumNullCount);
            }
            self.memory_tracker
                .release_memory(sections.fragment_stats.free(), MemoryType::MinMaxSumNullCount);
            self.memory_tracker.release_memory(
                sections.processed_conditions.free(),
                MemoryType::ProcessedConditions,
            );
        }
    }
}

fn read_offset_slot(buffer: &[u8], i: usize) -> u64 {
    u64::from_le_bytes(
        buffer[i * 8..(i + 1) * 8]
            .try_into()
            .tessera_expect("offset slots are eight bytes"),
    )
}

fn copy_var_value(mm: &mut MinMaxBuffer, tid: usize, value: &[u8]) {
    let slot_num = mm.buffer.len() / 8;
    let start = read_offset_slot(&mm.buffer, tid) as usize;
    let end = if tid + 1 < slot_num {
        read_offset_slot(&mm.buffer, tid + 1) as usize
    } else {
        mm.var_buffer.len()
    };
    if end > start {
        mm.var_buffer[start..end].copy_from_slice(value);
    }
}

fn convert_sizes_to_offsets(mm: &mut MinMaxBuffer, tile_index_base: usize) {
    let mut offset = mm.var_buffer.len() as u64;
    for slot in mm.buffer.chunks_exact_mut(8).skip(tile_index_base) {
        let size = u64::from_le_bytes(slot.try_into().tessera_expect("exact chunks of eight"));
        slot.copy_from_slice(&offset.to_le_bytes());
        offset += size;
    }
    mm.var_buffer.resize(offset as usize, 0);
}

fn percent_encode_v8(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '!' => out.push_str("%21"),
            '#' => out.push_str("%23"),
            '$' => out.push_str("%24"),
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '\'' => out.push_str("%27"),
            '(' => out.push_str("%28"),
            ')' => out.push_str("%29"),
            '*' => out.push_str("%2A"),
            '+' => out.push_str("%2B"),
            ',' => out.push_str("%2C"),
            '/' => out.push_str("%2F"),
            ':' => out.push_str("%3A"),
            ';' => out.push_str("%3B"),
            '=' => out.push_str("%3D"),
            '?' => out.push_str("%3F"),
            '@' => out.push_str("%40"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            '"' => out.push_str("%22"),
            '<' => out.push_str("%20"),
            '>' => out.push_str("%2D"),
            '\\' => out.push_str("%30"),
            '|' => out.push_str("%3C"),
            other => out.push(other),
        }
    }
    out
}
