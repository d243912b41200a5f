//! The per-array collection of fragments: time-window selection, vacuum
//! candidates, and per-fragment summaries for tooling and consolidation.

use std::sync::Arc;

use tessera_dtype::NDRange;
use tessera_error::{tessera_bail, tessera_err, TesseraResult};
use tessera_io::{Config, ContextResources, EncryptionKey};
use tessera_schema::{ArraySchema, Domain, SchemaMap};

use crate::{
    ConsolidatedFooters, FragmentMetadata, FragmentName, MemoryTracker, VACUUM_FILE_SUFFIX,
};

/// A loaded fragment's summary within a [`FragmentInfo`].
pub struct SingleFragmentInfo {
    meta: Arc<FragmentMetadata>,
    name: String,
    cell_num: u64,
    fragment_size: u64,
}

impl SingleFragmentInfo {
    fn new(meta: Arc<FragmentMetadata>) -> TesseraResult<Self> {
        Ok(Self {
            name: meta.fragment_name().name().to_string(),
            cell_num: meta.cell_num()?,
            fragment_size: meta.fragment_size()?,
            meta,
        })
    }

    /// The bare fragment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fragment URI.
    pub fn uri(&self) -> &str {
        self.meta.fragment_uri()
    }

    /// The fragment's on-disk format version.
    pub fn version(&self) -> u32 {
        self.meta.format_version()
    }

    /// Whether the fragment is dense.
    pub fn dense(&self) -> TesseraResult<bool> {
        self.meta.dense()
    }

    /// Whether the fragment is sparse.
    pub fn sparse(&self) -> TesseraResult<bool> {
        Ok(!self.meta.dense()?)
    }

    /// Total cells committed in the fragment.
    pub fn cell_num(&self) -> u64 {
        self.cell_num
    }

    /// Total persisted bytes, manifest included.
    pub fn fragment_size(&self) -> u64 {
        self.fragment_size
    }

    /// The fragment's timestamp range.
    pub fn timestamp_range(&self) -> (u64, u64) {
        self.meta.timestamp_range()
    }

    /// The fragment's non-empty domain.
    pub fn non_empty_domain(&self) -> TesseraResult<NDRange> {
        self.meta.non_empty_domain()
    }

    /// The schema this fragment was written under.
    pub fn array_schema(&self) -> TesseraResult<Arc<ArraySchema>> {
        self.meta.array_schema()
    }

    /// Name of the schema this fragment was written under.
    pub fn array_schema_name(&self) -> TesseraResult<String> {
        self.meta.array_schema_name()
    }

    /// Whether the footer came out of a consolidated blob.
    pub fn has_consolidated_metadata(&self) -> TesseraResult<bool> {
        self.meta.has_consolidated_footer()
    }

    /// Number of MBRs (sparse tiles), loading the R-tree on demand.
    pub fn mbr_num(&self, key: &EncryptionKey) -> TesseraResult<u64> {
        self.meta.load_rtree(key)?;
        self.meta.sparse_tile_num()
    }

    /// The MBR of tile `mid` on dimension `did`, loading the R-tree on
    /// demand.
    pub fn mbr(
        &self,
        key: &EncryptionKey,
        mid: u64,
        did: u32,
    ) -> TesseraResult<tessera_dtype::Range> {
        self.meta.load_rtree(key)?;
        let mbr = self.meta.mbr(mid)?;
        mbr.get(did as usize).cloned().ok_or_else(
            || tessera_err!(OutOfBounds: "dimension {} out of bounds for MBR {}", did, mid),
        )
    }

    /// The underlying manifest handle.
    pub fn meta(&self) -> &Arc<FragmentMetadata> {
        &self.meta
    }
}

/// All fragments of one array within a timestamp window.
///
/// Created empty; `load` populates it exactly once; afterwards the
/// collection is read-only apart from `load_and_replace`, which swaps
/// consolidated fragments in place.
pub struct FragmentInfo {
    array_uri: String,
    resources: Arc<ContextResources>,
    memory_tracker: Arc<MemoryTracker>,
    config: Config,
    schema_latest: Option<Arc<ArraySchema>>,
    schemas: SchemaMap,
    fragments: Vec<SingleFragmentInfo>,
    to_vacuum: Vec<String>,
    unconsolidated_metadata_num: u32,
    anterior_ndrange: NDRange,
    timestamp_start: u64,
    timestamp_end: u64,
    loaded: bool,
}

impl FragmentInfo {
    /// An unloaded collection bound to `array_uri`.
    pub fn new(
        array_uri: impl Into<String>,
        resources: Arc<ContextResources>,
        memory_tracker: Arc<MemoryTracker>,
    ) -> Self {
        let config = resources.config().clone();
        Self {
            array_uri: array_uri.into(),
            resources,
            memory_tracker,
            config,
            schema_latest: None,
            schemas: SchemaMap::default(),
            fragments: Vec::new(),
            to_vacuum: Vec::new(),
            unconsolidated_metadata_num: 0,
            anterior_ndrange: NDRange::new(),
            timestamp_start: 0,
            timestamp_end: u64::MAX,
            loaded: false,
        }
    }

    /// Override the configuration. Permitted only before `load`.
    pub fn set_config(&mut self, config: Config) -> TesseraResult<()> {
        if self.loaded {
            tessera_bail!(UsageError: "cannot set config after fragment info is loaded");
        }
        self.config = config;
        Ok(())
    }

    fn ensure_loaded(&self) -> TesseraResult<()> {
        if !self.loaded {
            tessera_bail!(UsageError: "fragment info is not loaded");
        }
        Ok(())
    }

    /// Discover and load every fragment whose timestamp range intersects
    /// `[timestamp_start, timestamp_end]`, honoring vacuum files and the
    /// consolidated footers handed in.
    pub fn load(
        &mut self,
        timestamp_start: u64,
        timestamp_end: u64,
        key: &EncryptionKey,
        schemas: SchemaMap,
        consolidated: &ConsolidatedFooters,
    ) -> TesseraResult<()> {
        if self.loaded {
            tessera_bail!(UsageError: "fragment info is already loaded");
        }
        self.timestamp_start = timestamp_start;
        self.timestamp_end = timestamp_end;
        // The schema directory orders names; the lexicographic maximum is
        // the latest.
        self.schema_latest = schemas
            .iter()
            .max_by(|a, b| a.0.cmp(b.0))
            .map(|(_, schema)| Arc::clone(schema));
        self.schemas = schemas;

        let children = self.resources.vfs().list(&self.array_uri)?;
        let mut vacuum_set = rustc_hash::FxHashSet::default();
        for child in &children {
            if child.ends_with(VACUUM_FILE_SUFFIX) {
                let size = self.resources.vfs().size(child)?;
                let bytes = self.resources.vfs().read(child, 0, size)?;
                for line in String::from_utf8_lossy(&bytes).lines() {
                    let line = line.trim();
                    if !line.is_empty() {
                        vacuum_set.insert(crate::last_path_part(line).to_string());
                        self.to_vacuum.push(line.to_string());
                    }
                }
            }
        }

        let mut uris = Vec::new();
        for child in children {
            let Ok(name) = FragmentName::parse(&child) else {
                continue;
            };
            if vacuum_set.contains(name.name()) {
                continue;
            }
            let (t1, t2) = name.timestamp_range();
            if t1 > timestamp_end || t2 < timestamp_start {
                continue;
            }
            uris.push(child);
        }
        uris.sort_by_key(|uri| {
            FragmentName::parse(uri)
                .map(|n| n.timestamp_range())
                .unwrap_or((u64::MAX, u64::MAX))
        });

        let metas = FragmentMetadata::load_many(
            Arc::clone(&self.resources),
            Arc::clone(&self.memory_tracker),
            &uris,
            key,
            consolidated,
            &self.schemas,
        )?;
        for meta in metas {
            if !meta.has_consolidated_footer()? {
                self.unconsolidated_metadata_num += 1;
            }
            self.fragments.push(SingleFragmentInfo::new(meta)?);
        }

        self.loaded = true;
        Ok(())
    }

    /// Number of loaded fragments.
    pub fn fragment_num(&self) -> TesseraResult<u32> {
        self.ensure_loaded()?;
        Ok(self.fragments.len() as u32)
    }

    /// The fragment at index `fid`.
    pub fn fragment(&self, fid: u32) -> TesseraResult<&SingleFragmentInfo> {
        self.ensure_loaded()?;
        self.fragments
            .get(fid as usize)
            .ok_or_else(|| tessera_err!(OutOfBounds: "fragment {} out of {}", fid, self.fragments.len()))
    }

    /// All loaded fragments in timestamp order.
    pub fn fragments(&self) -> TesseraResult<&[SingleFragmentInfo]> {
        self.ensure_loaded()?;
        Ok(&self.fragments)
    }

    /// Total cells across all loaded fragments.
    pub fn total_cell_num(&self) -> TesseraResult<u64> {
        self.ensure_loaded()?;
        Ok(self.fragments.iter().map(|f| f.cell_num()).sum())
    }

    /// Fragment URIs scheduled for deletion by a previous consolidation.
    pub fn to_vacuum(&self) -> TesseraResult<&[String]> {
        self.ensure_loaded()?;
        Ok(&self.to_vacuum)
    }

    /// Number of fragments scheduled for deletion.
    pub fn to_vacuum_num(&self) -> TesseraResult<u32> {
        self.ensure_loaded()?;
        Ok(self.to_vacuum.len() as u32)
    }

    /// Number of loaded fragments whose footer did not come from a
    /// consolidated blob.
    pub fn unconsolidated_metadata_num(&self) -> TesseraResult<u32> {
        self.ensure_loaded()?;
        Ok(self.unconsolidated_metadata_num)
    }

    /// The latest array schema.
    pub fn array_schema_latest(&self) -> TesseraResult<Arc<ArraySchema>> {
        self.ensure_loaded()?;
        self.schema_latest
            .clone()
            .ok_or_else(|| tessera_err!(NotFound: "no schema was loaded"))
    }

    /// All schemas keyed by name.
    pub fn array_schemas_all(&self) -> TesseraResult<&SchemaMap> {
        self.ensure_loaded()?;
        Ok(&self.schemas)
    }

    /// The effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Union of non-empty domains committed strictly before the load
    /// window's start.
    pub fn anterior_ndrange(&self) -> TesseraResult<&NDRange> {
        self.ensure_loaded()?;
        Ok(&self.anterior_ndrange)
    }

    /// Grow the anterior NDRange by `range` under `domain`.
    pub fn expand_anterior_ndrange(&mut self, domain: &Domain, range: &NDRange) {
        domain.expand_ndrange(range, &mut self.anterior_ndrange);
    }

    /// Atomically replace the contiguous run of fragments named in
    /// `to_replace` with the freshly loaded fragment at `new_fragment_uri`;
    /// the new entry lands at the first replaced position. Used after a
    /// consolidation commit.
    pub fn load_and_replace(
        &mut self,
        new_fragment_uri: &str,
        to_replace: &[String],
        key: &EncryptionKey,
    ) -> TesseraResult<()> {
        self.ensure_loaded()?;
        if to_replace.is_empty() {
            tessera_bail!(InvalidArgument: "nothing to replace");
        }
        let replace_names: Vec<String> = to_replace
            .iter()
            .map(|uri| Ok(FragmentName::parse(uri)?.name().to_string()))
            .collect::<TesseraResult<_>>()?;
        let first = self
            .fragments
            .iter()
            .position(|f| f.name() == replace_names[0])
            .ok_or_else(|| {
                tessera_err!(InvalidArgument: "fragment {:?} is not loaded", replace_names[0])
            })?;
        for (offset, name) in replace_names.iter().enumerate() {
            let found = self
                .fragments
                .get(first + offset)
                .map(|f| f.name() == name.as_str())
                .unwrap_or(false);
            if !found {
                tessera_bail!(
                    InvalidArgument: "fragments to replace are not a contiguous loaded run"
                );
            }
        }

        let meta = FragmentMetadata::load(
            Arc::clone(&self.resources),
            Arc::clone(&self.memory_tracker),
            new_fragment_uri,
            key,
            None,
            &self.schemas,
        )?;
        let new_info = SingleFragmentInfo::new(Arc::new(meta))?;
        self.fragments
            .splice(first..first + replace_names.len(), [new_info]);
        Ok(())
    }
}
