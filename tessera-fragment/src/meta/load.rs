//! Loading the manifest: footer first (from the fragment's own file or a
//! consolidated blob), then every other section lazily, memory-tracked and
//! double-check locked.

use std::sync::Arc;

use itertools::Itertools;
use rustc_hash::FxHashMap;
use tessera_dtype::NDRange;
use tessera_error::{tessera_bail, tessera_err, TesseraResult};
use tessera_io::{ContextResources, Deserializer, EncryptionKey, GenericTileIo, Tile};
use tessera_schema::{SchemaMap, CURRENT_FORMAT_VERSION};

use super::{
    Footer, FragmentMetadata, FragmentStats, GenericTileOffsets, Lazy, MinMaxBuffer,
    ProcessedConditions, Sections,
};
use crate::wire::read_ndrange;
use crate::{FragmentName, MemoryTracker, MemoryType, RTree, LEGACY_SCHEMA_NAME};

/// Consolidated footers: fragment name to the in-memory blob and the byte
/// offset of that fragment's footer within it.
pub type ConsolidatedFooters = FxHashMap<String, (Tile, u64)>;

impl FragmentMetadata {
    /// Load a fragment's manifest footer; every other section stays on
    /// storage until first use. When `consolidated` holds this fragment's
    /// footer, it is parsed from memory instead of the fragment's own file.
    pub fn load(
        resources: Arc<ContextResources>,
        memory_tracker: Arc<MemoryTracker>,
        fragment_uri: &str,
        key: &EncryptionKey,
        consolidated: Option<(&Tile, u64)>,
        schemas: &SchemaMap,
    ) -> TesseraResult<Self> {
        let fragment_name = FragmentName::parse(fragment_uri)?;
        let version = fragment_name.version();
        if version < 3 {
            tessera_bail!(
                FormatVersionUnsupported: "fragment {} uses legacy format version {}",
                fragment_name.name(), version
            );
        }
        if version > CURRENT_FORMAT_VERSION {
            tessera_bail!(
                FormatVersionUnsupported: "fragment {} uses format version {} newer than {}",
                fragment_name.name(), version, CURRENT_FORMAT_VERSION
            );
        }

        let meta = Self {
            resources,
            memory_tracker,
            fragment_uri: fragment_uri.trim_end_matches('/').to_string(),
            fragment_name,
            version,
            tile_index_base: 0,
            min_max_converted: Vec::new(),
            footer: Lazy::new_unloaded(),
            sections: std::sync::OnceLock::new(),
        };
        meta.load_footer(key, consolidated, schemas)?;
        let num = meta.num_dims_and_attrs()?;
        let _ = meta.sections.set(Sections::new_unloaded(num));
        Ok(meta)
    }

    /// Load many fragments in parallel over the shared compute pool.
    pub fn load_many(
        resources: Arc<ContextResources>,
        memory_tracker: Arc<MemoryTracker>,
        fragment_uris: &[String],
        key: &EncryptionKey,
        consolidated: &ConsolidatedFooters,
        schemas: &SchemaMap,
    ) -> TesseraResult<Vec<Arc<Self>>> {
        use rayon::prelude::*;
        let pool = Arc::clone(&resources);
        pool.compute_pool().install(|| {
            fragment_uris
                .par_iter()
                .map(|uri| {
                    let name = FragmentName::parse(uri)?;
                    let entry = consolidated
                        .get(name.name())
                        .map(|(tile, offset)| (tile, *offset));
                    Ok(Arc::new(Self::load(
                        Arc::clone(&resources),
                        Arc::clone(&memory_tracker),
                        uri,
                        key,
                        entry,
                        schemas,
                    )?))
                })
                .collect()
        })
    }

    fn load_footer(
        &self,
        _key: &EncryptionKey,
        consolidated: Option<(&Tile, u64)>,
        schemas: &SchemaMap,
    ) -> TesseraResult<()> {
        self.footer.get_or_load(|| {
            self.resources.check_cancelled()?;
            match consolidated {
                Some((tile, offset)) => {
                    let mut de = tile.deserializer_at(offset)?;
                    let before = de.remaining();
                    let mut footer = parse_footer(&mut de, self.version, schemas)?;
                    footer.footer_size = before - de.remaining();
                    footer.has_consolidated_footer = true;
                    footer.meta_file_size = 0;
                    Ok((footer, 0))
                }
                None => {
                    let meta_uri = self.metadata_uri();
                    let meta_file_size = self.resources.vfs().size(&meta_uri)?;
                    let (offset, size) = self.footer_offset_and_size(
                        &meta_uri,
                        meta_file_size,
                        schemas,
                    )?;
                    if !self
                        .memory_tracker
                        .take_memory(size, MemoryType::Footer)
                    {
                        tessera_bail!(
                            OutOfBudget: "cannot load footer; needed {} but only {} of {} remain",
                            size,
                            self.memory_tracker.available(),
                            self.memory_tracker.budget()
                        );
                    }
                    let result = (|| {
                        let bytes = self.resources.vfs().read(&meta_uri, offset, size)?;
                        self.resources
                            .metrics()
                            .add_counter("fragment.read.footer_bytes", size as i64);
                        let mut de = Deserializer::new(&bytes);
                        let mut footer = parse_footer(&mut de, self.version, schemas)?;
                        footer.footer_size = size;
                        footer.meta_file_size = meta_file_size;
                        footer.has_consolidated_footer = false;
                        Ok(footer)
                    })();
                    match result {
                        Ok(footer) => Ok((footer, size)),
                        Err(e) => {
                            self.memory_tracker.release_memory(size, MemoryType::Footer);
                            Err(e)
                        }
                    }
                }
            }
        })
    }

    fn footer_offset_and_size(
        &self,
        meta_uri: &str,
        meta_file_size: u64,
        schemas: &SchemaMap,
    ) -> TesseraResult<(u64, u64)> {
        footer_location(&self.resources, self.version, meta_uri, meta_file_size, schemas)
    }

    fn read_generic_tile(&self, key: &EncryptionKey, offset: u64) -> TesseraResult<Tile> {
        self.resources.check_cancelled()?;
        let meta_uri = self.metadata_uri();
        let io = GenericTileIo::new(self.resources.vfs(), &meta_uri);
        io.read_generic(offset, key, self.resources.config())
    }

    fn charge(&self, n: u64, memory_type: MemoryType, what: &str) -> TesseraResult<()> {
        if !self.memory_tracker.take_memory(n, memory_type) {
            tessera_bail!(
                OutOfBudget: "cannot load {}; needed {} but only {} of {} remain",
                what,
                n,
                self.memory_tracker.available(),
                self.memory_tracker.budget()
            );
        }
        Ok(())
    }

    /// Load the R-tree, charging its serialized size against the tracker.
    pub fn load_rtree(&self, key: &EncryptionKey) -> TesseraResult<()> {
        let schema = self.array_schema()?;
        let offset = self.footer.with("footer", |f| f.gt_offsets.rtree)?;
        let sparse = !self.dense()?;
        let sparse_tile_num = self.sparse_tile_num()?;
        self.sections_ref()?.rtree.get_or_load(|| {
            let tile = self.read_generic_tile(key, offset)?;
            self.resources
                .metrics()
                .add_counter("fragment.read.rtree_bytes", tile.size() as i64);
            self.charge(tile.size(), MemoryType::RTree, "R-tree")?;
            let result = (|| {
                let mut de = tile.deserializer_at(0)?;
                let tree = RTree::deserialize(&mut de, schema.domain())?;
                if sparse && tree.leaf_num() != sparse_tile_num {
                    tessera_bail!(
                        Corrupt: "R-tree holds {} leaves, footer expects {} tiles",
                        tree.leaf_num(), sparse_tile_num
                    );
                }
                Ok(tree)
            })();
            match result {
                Ok(tree) => Ok((tree, tile.size())),
                Err(e) => {
                    self.memory_tracker
                        .release_memory(tile.size(), MemoryType::RTree);
                    Err(e)
                }
            }
        })
    }

    fn sorted_indices(&self, names: &[String]) -> TesseraResult<Vec<(usize, String)>> {
        // Load in field order so reads walk the file sequentially.
        let pairs: Vec<(usize, String)> = names
            .iter()
            .map(|n| Ok((self.field_index(n)?, n.clone())))
            .collect::<TesseraResult<Vec<_>>>()?;
        Ok(pairs.into_iter().sorted_by_key(|(i, _)| *i).collect())
    }

    /// Load the tile offsets of `names`, then var offsets for the var-size
    /// fields, then validity offsets for the nullable ones.
    pub fn load_tile_offsets(&self, key: &EncryptionKey, names: &[String]) -> TesseraResult<()> {
        let schema = self.array_schema()?;
        let pairs = self.sorted_indices(names)?;
        for (idx, _) in &pairs {
            self.load_tile_offsets_idx(key, *idx)?;
        }
        for (idx, name) in &pairs {
            if schema.var_size(name)? {
                self.load_tile_var_offsets_idx(key, *idx)?;
            }
        }
        for (idx, name) in &pairs {
            if schema.is_nullable(name)? {
                self.load_tile_validity_offsets_idx(key, *idx)?;
            }
        }
        Ok(())
    }

    /// Load the unfiltered var-payload sizes of one field.
    pub fn load_tile_var_sizes(&self, key: &EncryptionKey, name: &str) -> TesseraResult<()> {
        let idx = self.field_index(name)?;
        let offset = self
            .footer
            .with("footer", |f| f.gt_offsets.tile_var_sizes[idx])?;
        self.load_u64_section(
            key,
            &self.sections_ref()?.tile_var_sizes[idx],
            offset,
            "fragment.read.tile_var_sizes_bytes",
            "tile var sizes",
        )
    }

    fn load_tile_offsets_idx(&self, key: &EncryptionKey, idx: usize) -> TesseraResult<()> {
        let offset = self
            .footer
            .with("footer", |f| f.gt_offsets.tile_offsets[idx])?;
        self.load_u64_section(
            key,
            &self.sections_ref()?.tile_offsets[idx],
            offset,
            "fragment.read.tile_offsets_bytes",
            "tile offsets",
        )
    }

    fn load_tile_var_offsets_idx(&self, key: &EncryptionKey, idx: usize) -> TesseraResult<()> {
        let offset = self
            .footer
            .with("footer", |f| f.gt_offsets.tile_var_offsets[idx])?;
        self.load_u64_section(
            key,
            &self.sections_ref()?.tile_var_offsets[idx],
            offset,
            "fragment.read.tile_var_offsets_bytes",
            "tile var offsets",
        )
    }

    fn load_tile_validity_offsets_idx(
        &self,
        key: &EncryptionKey,
        idx: usize,
    ) -> TesseraResult<()> {
        if self.version < 7 {
            return Ok(());
        }
        let offset = self
            .footer
            .with("footer", |f| f.gt_offsets.tile_validity_offsets[idx])?;
        self.load_u64_section(
            key,
            &self.sections_ref()?.tile_validity_offsets[idx],
            offset,
            "fragment.read.tile_validity_offsets_bytes",
            "tile validity offsets",
        )
    }

    fn load_u64_section(
        &self,
        key: &EncryptionKey,
        section: &Lazy<Vec<u64>>,
        offset: u64,
        counter: &str,
        what: &str,
    ) -> TesseraResult<()> {
        let tile_num = self.tile_num()?;
        section.get_or_load(|| {
            let tile = self.read_generic_tile(key, offset)?;
            self.resources
                .metrics()
                .add_counter(counter.to_string(), tile.size() as i64);
            let mut de = tile.deserializer_at(0)?;
            let n = de.read_u64()?;
            if n != 0 && n != tile_num {
                tessera_bail!(Corrupt: "{} section holds {} entries, expected {}", what, n, tile_num);
            }
            let size = n * 8;
            self.charge(size, MemoryType::TileOffsets, what)?;
            match de.read_u64_vec(n) {
                Ok(values) => Ok((values, size)),
                Err(e) => {
                    self.memory_tracker
                        .release_memory(size, MemoryType::TileOffsets);
                    Err(e)
                }
            }
        })
    }

    /// Load the per-tile minimum values of `names`.
    pub fn load_tile_min_values(
        &self,
        key: &EncryptionKey,
        names: &[String],
    ) -> TesseraResult<()> {
        for (idx, _) in self.sorted_indices(names)? {
            self.load_min_max_idx(key, idx, true)?;
        }
        Ok(())
    }

    /// Load the per-tile maximum values of `names`.
    pub fn load_tile_max_values(
        &self,
        key: &EncryptionKey,
        names: &[String],
    ) -> TesseraResult<()> {
        for (idx, _) in self.sorted_indices(names)? {
            self.load_min_max_idx(key, idx, false)?;
        }
        Ok(())
    }

    fn load_min_max_idx(
        &self,
        key: &EncryptionKey,
        idx: usize,
        min: bool,
    ) -> TesseraResult<()> {
        if self.version < 11 {
            return Ok(());
        }
        let (offset, counter, what, section) = if min {
            (
                self.footer
                    .with("footer", |f| f.gt_offsets.tile_min_offsets[idx])?,
                "fragment.read.tile_min_bytes",
                "tile min",
                &self.sections_ref()?.tile_min[idx],
            )
        } else {
            (
                self.footer
                    .with("footer", |f| f.gt_offsets.tile_max_offsets[idx])?,
                "fragment.read.tile_max_bytes",
                "tile max",
                &self.sections_ref()?.tile_max[idx],
            )
        };
        section.get_or_load(|| {
            let tile = self.read_generic_tile(key, offset)?;
            self.resources
                .metrics()
                .add_counter(counter.to_string(), tile.size() as i64);
            let mut de = tile.deserializer_at(0)?;
            let buffer_size = de.read_u64()?;
            let var_buffer_size = de.read_u64()?;
            let size = buffer_size + var_buffer_size;
            self.charge(size, MemoryType::MinMaxSumNullCount, what)?;
            let result = (|| {
                let buffer = de.read_bytes(buffer_size)?.to_vec();
                let var_buffer = de.read_bytes(var_buffer_size)?.to_vec();
                Ok(MinMaxBuffer { buffer, var_buffer })
            })();
            match result {
                Ok(mm) => Ok((mm, size)),
                Err(e) => {
                    self.memory_tracker
                        .release_memory(size, MemoryType::MinMaxSumNullCount);
                    Err(e)
                }
            }
        })
    }

    /// Load the per-tile sums of `names`.
    pub fn load_tile_sum_values(
        &self,
        key: &EncryptionKey,
        names: &[String],
    ) -> TesseraResult<()> {
        if self.version < 11 {
            return Ok(());
        }
        for (idx, _) in self.sorted_indices(names)? {
            let offset = self
                .footer
                .with("footer", |f| f.gt_offsets.tile_sum_offsets[idx])?;
            self.sections_ref()?.tile_sums[idx].get_or_load(|| {
                let tile = self.read_generic_tile(key, offset)?;
                self.resources
                    .metrics()
                    .add_counter("fragment.read.tile_sum_bytes", tile.size() as i64);
                let mut de = tile.deserializer_at(0)?;
                let n = de.read_u64()?;
                let size = n * 8;
                self.charge(size, MemoryType::MinMaxSumNullCount, "tile sums")?;
                match de.read_bytes(size) {
                    Ok(bytes) => Ok((bytes.to_vec(), size)),
                    Err(e) => {
                        self.memory_tracker
                            .release_memory(size, MemoryType::MinMaxSumNullCount);
                        Err(e)
                    }
                }
            })?;
        }
        Ok(())
    }

    /// Load the per-tile null counts of `names`.
    pub fn load_tile_null_count_values(
        &self,
        key: &EncryptionKey,
        names: &[String],
    ) -> TesseraResult<()> {
        if self.version < 11 {
            return Ok(());
        }
        for (idx, _) in self.sorted_indices(names)? {
            let offset = self
                .footer
                .with("footer", |f| f.gt_offsets.tile_null_count_offsets[idx])?;
            self.sections_ref()?.tile_null_counts[idx].get_or_load(|| {
                let tile = self.read_generic_tile(key, offset)?;
                self.resources
                    .metrics()
                    .add_counter("fragment.read.tile_null_count_bytes", tile.size() as i64);
                let mut de = tile.deserializer_at(0)?;
                let n = de.read_u64()?;
                let size = n * 8;
                self.charge(size, MemoryType::MinMaxSumNullCount, "tile null counts")?;
                match de.read_u64_vec(n) {
                    Ok(values) => Ok((values, size)),
                    Err(e) => {
                        self.memory_tracker
                            .release_memory(size, MemoryType::MinMaxSumNullCount);
                        Err(e)
                    }
                }
            })?;
        }
        Ok(())
    }

    /// Load the fragment-level min/max/sum/null-count rollup.
    pub fn load_fragment_min_max_sum_null_count(
        &self,
        key: &EncryptionKey,
    ) -> TesseraResult<()> {
        if self.version < 12 {
            return Ok(());
        }
        let num = self.num_dims_and_attrs()?;
        let offset = self
            .footer
            .with("footer", |f| f.gt_offsets.fragment_min_max_sum_null_count)?;
        self.sections_ref()?.fragment_stats.get_or_load(|| {
            let tile = self.read_generic_tile(key, offset)?;
            self.resources
                .metrics()
                .add_counter("fragment.read.fragment_stats_bytes", tile.size() as i64);
            self.charge(
                tile.size(),
                MemoryType::MinMaxSumNullCount,
                "fragment min max sum null count",
            )?;
            let result = (|| {
                let mut de = tile.deserializer_at(0)?;
                let mut stats = FragmentStats::default();
                for _ in 0..num {
                    let min_size = de.read_u64()?;
                    stats.mins.push(de.read_bytes(min_size)?.to_vec());
                    let max_size = de.read_u64()?;
                    stats.maxs.push(de.read_bytes(max_size)?.to_vec());
                    stats.sums.push(de.read_u64()?);
                    stats.null_counts.push(de.read_u64()?);
                }
                Ok(stats)
            })();
            match result {
                Ok(stats) => Ok((stats, tile.size())),
                Err(e) => {
                    self.memory_tracker
                        .release_memory(tile.size(), MemoryType::MinMaxSumNullCount);
                    Err(e)
                }
            }
        })
    }

    /// Load the processed delete conditions.
    pub fn load_processed_conditions(&self, key: &EncryptionKey) -> TesseraResult<()> {
        if self.version < 16 {
            return Ok(());
        }
        let offset = self
            .footer
            .with("footer", |f| f.gt_offsets.processed_conditions)?;
        self.sections_ref()?.processed_conditions.get_or_load(|| {
            let tile = self.read_generic_tile(key, offset)?;
            self.resources
                .metrics()
                .add_counter("fragment.read.processed_conditions_bytes", tile.size() as i64);
            self.charge(
                tile.size(),
                MemoryType::ProcessedConditions,
                "processed conditions",
            )?;
            let result = (|| {
                let mut de = tile.deserializer_at(0)?;
                let n = de.read_u64()?;
                let mut list = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let len = de.read_u64()?;
                    let bytes = de.read_bytes(len)?;
                    list.push(String::from_utf8_lossy(bytes).into_owned());
                }
                let set = list.iter().cloned().collect();
                Ok(ProcessedConditions { list, set })
            })();
            match result {
                Ok(pc) => Ok((pc, tile.size())),
                Err(e) => {
                    self.memory_tracker
                        .release_memory(tile.size(), MemoryType::ProcessedConditions);
                    Err(e)
                }
            }
        })
    }
}

/// Where a fragment's footer lives in its manifest file. Fixed-dimension
/// fragments older than version 10 have a computable footer size; all others
/// read the trailing size word.
fn footer_location(
    resources: &ContextResources,
    version: u32,
    meta_uri: &str,
    meta_file_size: u64,
    schemas: &SchemaMap,
) -> TesseraResult<(u64, u64)> {
    if version < 10 {
        let schema = schemas.get(LEGACY_SCHEMA_NAME).ok_or_else(|| {
            tessera_err!(NotFound: "schema {} not in the loaded schema map", LEGACY_SCHEMA_NAME)
        })?;
        if schema.domain().all_dims_fixed() {
            let size = fixed_footer_size(schema, version);
            return Ok((meta_file_size - size, size));
        }
    }
    if meta_file_size < 8 {
        tessera_bail!(Truncated: "manifest {} is too small for a footer trailer", meta_uri);
    }
    let trailer = resources.vfs().read(meta_uri, meta_file_size - 8, 8)?;
    let size = Deserializer::new(&trailer).read_u64()?;
    if size + 8 > meta_file_size {
        tessera_bail!(
            Corrupt: "footer trailer of {} claims {} bytes in a {} byte file",
            meta_uri, size, meta_file_size
        );
    }
    Ok((meta_file_size - size - 8, size))
}

/// Concatenate the raw footers of `fragment_uris` into one consolidated
/// blob, returning it with each fragment's footer offset keyed by fragment
/// name. Loading against this blob skips every per-fragment footer read.
pub fn consolidate_fragment_footers(
    resources: &ContextResources,
    fragment_uris: &[String],
    schemas: &SchemaMap,
) -> TesseraResult<(Tile, FxHashMap<String, u64>)> {
    let mut blob = Vec::new();
    let mut offsets = FxHashMap::default();
    for uri in fragment_uris {
        resources.check_cancelled()?;
        let name = FragmentName::parse(uri)?;
        let meta_uri = format!(
            "{}/{}",
            uri.trim_end_matches('/'),
            crate::FRAGMENT_METADATA_FILENAME
        );
        let meta_file_size = resources.vfs().size(&meta_uri)?;
        let (offset, size) =
            footer_location(resources, name.version(), &meta_uri, meta_file_size, schemas)?;
        let bytes = resources.vfs().read(&meta_uri, offset, size)?;
        offsets.insert(name.name().to_string(), blob.len() as u64);
        blob.extend_from_slice(&bytes);
    }
    Ok((Tile::from_bytes(blob), offsets))
}

/// Footer size of fixed-dimension fragments older than the trailer rule.
fn fixed_footer_size(schema: &tessera_schema::ArraySchema, version: u32) -> u64 {
    let attr_num = schema.attribute_num() as u64;
    let dim_num = schema.dim_num() as u64;
    let domain_size: u64 = schema
        .domain()
        .dimensions()
        .iter()
        .map(|d| 2 * d.coord_size())
        .sum();
    let mut size = 4 + 1 + 1 + domain_size + 8 + 8;
    if version < 5 {
        size += (attr_num + 1) * 8; // file sizes
        size += attr_num * 8; // file var sizes
        size += 8; // R-tree offset
        size += (attr_num + 1) * 8; // tile offset offsets
        size += attr_num * 8 * 2; // var offset and var size offsets
    } else {
        let num = attr_num + 1 + dim_num;
        let families: u64 = if version < 7 { 2 + 3 } else { 3 + 4 };
        size += num * 8 * families;
        size += 8; // R-tree offset
    }
    size
}

fn parse_footer(
    de: &mut Deserializer<'_>,
    expected_version: u32,
    schemas: &SchemaMap,
) -> TesseraResult<Footer> {
    let version = de.read_u32()?;
    if version != expected_version {
        tessera_bail!(
            Corrupt: "footer version {} disagrees with fragment name version {}",
            version, expected_version
        );
    }

    let schema_name = if version >= 10 {
        let len = de.read_u64()?;
        if len == 0 {
            tessera_bail!(Corrupt: "footer holds an empty schema name");
        }
        String::from_utf8_lossy(de.read_bytes(len)?).into_owned()
    } else {
        LEGACY_SCHEMA_NAME.to_string()
    };
    let schema = schemas
        .get(&schema_name)
        .cloned()
        .ok_or_else(|| {
            tessera_err!(
                NotFound: "schema {} not in the loaded schema map; reload the array to pick up new schemas",
                schema_name
            )
        })?;

    let dense = de.read_u8()? != 0;
    let null_ned = de.read_u8()? != 0;
    let non_empty_domain = if null_ned {
        for dim in schema.domain().dimensions() {
            de.read_bytes(2 * dim.coord_size())?;
        }
        NDRange::new()
    } else {
        read_ndrange(de, schema.domain())?
    };
    let mut domain = NDRange::new();
    if dense && !non_empty_domain.is_empty() {
        domain = non_empty_domain.clone();
        schema.domain().expand_to_tiles(&mut domain);
    }

    let sparse_tile_num = de.read_u64()?;
    let last_tile_cell_num = de.read_u64()?;
    let has_timestamps = version >= 14 && de.read_u8()? != 0;
    let has_delete_meta = version >= 15 && de.read_u8()? != 0;

    let (field_names, idx_map) =
        Footer::build_field_order(&schema, version, has_timestamps, has_delete_meta);
    let num = field_names.len() as u64;
    // Versions 3 and 4 size the var families by attribute count only.
    let var_num = if version < 5 {
        schema.attribute_num() as u64
    } else {
        num
    };

    let file_sizes = de.read_u64_vec(num)?;
    let mut file_var_sizes = de.read_u64_vec(var_num)?;
    file_var_sizes.resize(num as usize, 0);
    let file_validity_sizes = if version >= 7 {
        de.read_u64_vec(num)?
    } else {
        vec![0; num as usize]
    };

    let mut gt = GenericTileOffsets {
        rtree: de.read_u64()?,
        tile_offsets: de.read_u64_vec(num)?,
        tile_var_offsets: de.read_u64_vec(var_num)?,
        tile_var_sizes: de.read_u64_vec(var_num)?,
        ..Default::default()
    };
    gt.tile_var_offsets.resize(num as usize, 0);
    gt.tile_var_sizes.resize(num as usize, 0);
    if version >= 7 {
        gt.tile_validity_offsets = de.read_u64_vec(num)?;
    }
    if version >= 11 {
        gt.tile_min_offsets = de.read_u64_vec(num)?;
        gt.tile_max_offsets = de.read_u64_vec(num)?;
        gt.tile_sum_offsets = de.read_u64_vec(num)?;
        gt.tile_null_count_offsets = de.read_u64_vec(num)?;
    }
    if version >= 12 {
        gt.fragment_min_max_sum_null_count = de.read_u64()?;
    }
    if version >= 16 {
        gt.processed_conditions = de.read_u64()?;
    }

    Ok(Footer {
        schema_name,
        schema,
        dense,
        non_empty_domain,
        domain,
        sparse_tile_num,
        last_tile_cell_num,
        has_timestamps,
        has_delete_meta,
        file_sizes,
        file_var_sizes,
        file_validity_sizes,
        gt_offsets: gt,
        idx_map,
        field_names,
        meta_file_size: 0,
        footer_size: 0,
        has_consolidated_footer: false,
    })
}
