//! A bulk-built R-tree over the minimum bounding rectangles of a fragment's
//! sparse tiles.
//!
//! Leaves sit in tile write order, one MBR per tile. Internal levels are
//! built bottom-up with a fixed fanout once all leaves are set; level 0 is
//! the root. Queries walk depth-first so fully covered subtrees collapse
//! into contiguous tile-id ranges.

use tessera_dtype::{NDRange, Range};
use tessera_error::{tessera_bail, TesseraResult};
use tessera_io::{Deserializer, Sink};
use tessera_schema::Domain;

use crate::wire::{read_ndrange, write_ndrange};
use crate::TileOverlap;

/// Default fanout of the R-tree.
pub const RTREE_FANOUT: u64 = 10;

/// A bulk-built R-tree over per-tile MBRs.
#[derive(Debug, Clone)]
pub struct RTree {
    fanout: u64,
    /// `levels[0]` is the root level, the last level holds the leaves.
    levels: Vec<Vec<NDRange>>,
}

impl Default for RTree {
    fn default() -> Self {
        Self::new(RTREE_FANOUT)
    }
}

impl RTree {
    /// An empty tree with the given fanout.
    pub fn new(fanout: u64) -> Self {
        Self {
            fanout: fanout.max(2),
            levels: Vec::new(),
        }
    }

    /// The fanout.
    pub fn fanout(&self) -> u64 {
        self.fanout
    }

    /// Size the leaf level to `n` empty MBRs, discarding internal levels.
    pub fn set_leaf_num(&mut self, n: u64) {
        self.levels = vec![vec![NDRange::new(); n as usize]];
    }

    /// Set leaf `i`. Leaves may be set in any order, but all must be set
    /// before [`Self::build_tree`].
    pub fn set_leaf(&mut self, i: u64, mbr: NDRange) -> TesseraResult<()> {
        let Some(leaves) = self.levels.last_mut() else {
            tessera_bail!(UsageError: "set_leaf before set_leaf_num");
        };
        if i >= leaves.len() as u64 {
            tessera_bail!(OutOfBounds: "leaf {} out of {} leaves", i, leaves.len());
        }
        leaves[i as usize] = mbr;
        Ok(())
    }

    /// Number of leaves.
    pub fn leaf_num(&self) -> u64 {
        self.levels.last().map_or(0, |l| l.len() as u64)
    }

    /// All leaves in tile order.
    pub fn leaves(&self) -> &[NDRange] {
        self.levels.last().map_or(&[], |l| l.as_slice())
    }

    /// The leaf at index `i`.
    pub fn leaf(&self, i: u64) -> &NDRange {
        &self.leaves()[i as usize]
    }

    /// Build the internal levels bottom-up. Rebuilding from the same leaves
    /// is idempotent.
    pub fn build_tree(&mut self, domain: &Domain) {
        let leaves = match self.levels.pop() {
            Some(l) => l,
            None => return,
        };
        let mut levels = vec![leaves];
        while levels.last().map_or(0, Vec::len) > 1 {
            let child_level = levels.last().expect("levels is non-empty");
            let mut parent_level =
                Vec::with_capacity(child_level.len().div_ceil(self.fanout as usize));
            for group in child_level.chunks(self.fanout as usize) {
                let mut union = NDRange::new();
                for mbr in group {
                    domain.expand_ndrange(mbr, &mut union);
                }
                parent_level.push(union);
            }
            levels.push(parent_level);
        }
        levels.reverse();
        self.levels = levels;
    }

    /// Number of levels, root included.
    pub fn level_num(&self) -> usize {
        self.levels.len()
    }

    /// Drop every level and report the bytes released.
    pub fn free_memory(&mut self) -> u64 {
        let freed = self.memory_size();
        self.levels = Vec::new();
        freed
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_size(&self) -> u64 {
        self.levels
            .iter()
            .flat_map(|level| level.iter())
            .flat_map(|mbr| mbr.iter())
            .map(|r| r.size() + std::mem::size_of::<Range>() as u64)
            .sum()
    }

    fn node_coverage(
        &self,
        domain: &Domain,
        range: &NDRange,
        is_default: &[bool],
        mbr: &NDRange,
    ) -> (f64, bool) {
        let mut ratio = 1.0f64;
        let mut covered = true;
        for (d, dim) in domain.dimensions().iter().enumerate() {
            if is_default.get(d).copied().unwrap_or(false) {
                continue;
            }
            let r = dim.overlap_ratio(&range[d], &mbr[d]);
            if r == 0.0 {
                return (0.0, false);
            }
            covered &= dim.covered(&mbr[d], &range[d]);
            ratio *= r;
        }
        (ratio, covered)
    }

    /// Tile ids of leaves under node `idx` at `level`: `[first, last]`.
    fn subtree_leaf_range(&self, level: usize, idx: u64) -> (u64, u64) {
        let height = (self.levels.len() - 1 - level) as u32;
        let span = self.fanout.saturating_pow(height);
        let first = idx * span;
        let last = ((idx + 1) * span - 1).min(self.leaf_num() - 1);
        (first, last)
    }

    /// Which tiles `range` touches. `is_default[d]` skips dimension `d`'s
    /// overlap test.
    pub fn get_tile_overlap(
        &self,
        domain: &Domain,
        range: &NDRange,
        is_default: &[bool],
    ) -> TileOverlap {
        let mut overlap = TileOverlap::new();
        if self.levels.is_empty() || self.leaf_num() == 0 || range.is_empty() {
            return overlap;
        }
        self.overlap_visit(domain, range, is_default, 0, 0, &mut overlap);
        overlap
    }

    fn overlap_visit(
        &self,
        domain: &Domain,
        range: &NDRange,
        is_default: &[bool],
        level: usize,
        idx: u64,
        out: &mut TileOverlap,
    ) {
        let mbr = &self.levels[level][idx as usize];
        if mbr.is_empty() {
            return;
        }
        let (ratio, covered) = self.node_coverage(domain, range, is_default, mbr);
        if ratio == 0.0 {
            return;
        }
        let (first, last) = self.subtree_leaf_range(level, idx);
        if covered {
            for t in first..=last {
                out.push(t, 1.0);
            }
            return;
        }
        if level + 1 == self.levels.len() {
            out.push(first, ratio);
            return;
        }
        let child_first = idx * self.fanout;
        let child_last = ((idx + 1) * self.fanout).min(self.levels[level + 1].len() as u64);
        for child in child_first..child_last {
            self.overlap_visit(domain, range, is_default, level + 1, child, out);
        }
    }

    /// Set `bitmap[t] = 1` for every leaf whose range on dimension `d`
    /// intersects `range`. `bitmap` must be sized to the leaf count.
    pub fn compute_tile_bitmap(
        &self,
        domain: &Domain,
        range: &Range,
        d: u32,
        bitmap: &mut [u8],
    ) {
        if self.levels.is_empty() || self.leaf_num() == 0 {
            return;
        }
        self.bitmap_visit(domain, range, d, 0, 0, bitmap);
    }

    fn bitmap_visit(
        &self,
        domain: &Domain,
        range: &Range,
        d: u32,
        level: usize,
        idx: u64,
        bitmap: &mut [u8],
    ) {
        let mbr = &self.levels[level][idx as usize];
        if mbr.is_empty() || !domain.dimension(d).overlap(range, &mbr[d as usize]) {
            return;
        }
        if level + 1 == self.levels.len() {
            bitmap[idx as usize] = 1;
            return;
        }
        let child_first = idx * self.fanout;
        let child_last = ((idx + 1) * self.fanout).min(self.levels[level + 1].len() as u64);
        for child in child_first..child_last {
            self.bitmap_visit(domain, range, d, level + 1, child, bitmap);
        }
    }

    /// Serialize the leaf level: `u64 mbr_num` then each MBR's bytes.
    pub fn serialize<S: Sink + ?Sized>(&self, sink: &mut S, domain: &Domain) {
        sink.write_u64(self.leaf_num());
        for mbr in self.leaves() {
            write_ndrange(sink, domain, mbr);
        }
    }

    /// Rebuild a tree from persisted leaves; internal levels are recomputed.
    pub fn deserialize(de: &mut Deserializer<'_>, domain: &Domain) -> TesseraResult<Self> {
        let mbr_num = de.read_u64()?;
        let mut tree = Self::default();
        tree.set_leaf_num(mbr_num);
        for i in 0..mbr_num {
            let mbr = read_ndrange(de, domain)?;
            tree.set_leaf(i, mbr)?;
        }
        tree.build_tree(domain);
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_dtype::Datatype;
    use tessera_io::Serializer;
    use tessera_schema::{Dimension, Layout};

    fn domain_2d() -> Domain {
        Domain::new(
            vec![
                Dimension::new("x", Datatype::I64, (0i64, 999i64), 10i64).unwrap(),
                Dimension::new("y", Datatype::I64, (0i64, 999i64), 10i64).unwrap(),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap()
    }

    fn mbr(x0: i64, x1: i64, y0: i64, y1: i64) -> NDRange {
        vec![Range::from_typed(x0, x1), Range::from_typed(y0, y1)]
    }

    fn query(x0: i64, x1: i64, y0: i64, y1: i64) -> NDRange {
        mbr(x0, x1, y0, y1)
    }

    fn build(leaves: Vec<NDRange>, domain: &Domain) -> RTree {
        let mut tree = RTree::new(3);
        tree.set_leaf_num(leaves.len() as u64);
        for (i, leaf) in leaves.into_iter().enumerate() {
            tree.set_leaf(i as u64, leaf).unwrap();
        }
        tree.build_tree(domain);
        tree
    }

    fn row_leaves() -> Vec<NDRange> {
        // 30 unit squares along x.
        (0..30)
            .map(|i| mbr(i * 10, i * 10 + 9, 0, 9))
            .collect()
    }

    #[test]
    fn internal_nodes_union_children() {
        let domain = domain_2d();
        let tree = build(row_leaves(), &domain);
        assert_eq!(tree.leaf_num(), 30);
        let root = &tree.levels[0][0];
        assert_eq!(root[0].start_as::<i64>(), 0);
        assert_eq!(root[0].end_as::<i64>(), 299);
        // Rebuild is idempotent.
        let mut again = tree.clone();
        again.build_tree(&domain);
        assert_eq!(again.level_num(), tree.level_num());
        assert_eq!(again.levels[0][0], tree.levels[0][0]);
    }

    #[test]
    fn covered_subtrees_collapse_to_ranges() {
        let domain = domain_2d();
        let tree = build(row_leaves(), &domain);
        let overlap = tree.get_tile_overlap(&domain, &query(0, 299, 0, 9), &[false, false]);
        assert_eq!(overlap.tile_ranges, vec![(0, 29)]);
        assert!(overlap.tiles.is_empty());
    }

    #[test]
    fn partial_tiles_carry_coverage() {
        let domain = domain_2d();
        let tree = build(row_leaves(), &domain);
        // Covers tile 0 fully, half of tile 1 on x.
        let overlap = tree.get_tile_overlap(&domain, &query(0, 14, 0, 9), &[false, false]);
        assert_eq!(overlap.tile_ranges, vec![(0, 0)]);
        assert_eq!(overlap.tiles.len(), 1);
        assert_eq!(overlap.tiles[0].0, 1);
        assert!((overlap.tiles[0].1 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn disjoint_query_is_empty() {
        let domain = domain_2d();
        let tree = build(row_leaves(), &domain);
        let overlap = tree.get_tile_overlap(&domain, &query(500, 600, 500, 600), &[false, false]);
        assert!(overlap.is_empty());
    }

    #[test]
    fn default_dimensions_are_skipped() {
        let domain = domain_2d();
        let tree = build(row_leaves(), &domain);
        // y would exclude everything, but it is marked default.
        let overlap = tree.get_tile_overlap(&domain, &query(0, 9, 500, 600), &[false, true]);
        assert_eq!(overlap.tile_ranges, vec![(0, 0)]);
    }

    #[test]
    fn bitmap_matches_per_dimension_overlap() {
        let domain = domain_2d();
        let tree = build(row_leaves(), &domain);
        let mut bitmap = vec![0u8; 30];
        tree.compute_tile_bitmap(&domain, &Range::from_typed(25i64, 44i64), 0, &mut bitmap);
        let expected: Vec<u8> = (0..30)
            .map(|i| u8::from((2..=4).contains(&i)))
            .collect();
        assert_eq!(bitmap, expected);
    }

    #[test]
    fn serialization_rebuilds_internal_levels() {
        let domain = domain_2d();
        let tree = build(row_leaves(), &domain);
        let mut ser = Serializer::new();
        tree.serialize(&mut ser, &domain);
        let bytes = ser.into_inner();

        let mut de = Deserializer::new(&bytes);
        let rebuilt = RTree::deserialize(&mut de, &domain).unwrap();
        assert_eq!(rebuilt.leaf_num(), 30);
        assert_eq!(rebuilt.leaves(), tree.leaves());
        let overlap = rebuilt.get_tile_overlap(&domain, &query(0, 299, 0, 9), &[false, false]);
        assert_eq!(overlap.tile_ranges, vec![(0, 29)]);
    }

    #[test]
    fn leaf_bounds_checked() {
        let mut tree = RTree::default();
        assert!(tree.set_leaf(0, NDRange::new()).is_err());
        tree.set_leaf_num(2);
        assert!(tree.set_leaf(2, NDRange::new()).is_err());
        assert!(tree.set_leaf(1, NDRange::new()).is_ok());
    }
}
