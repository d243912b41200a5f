//! The array domain: an ordered list of dimensions and the tile-grid
//! arithmetic derived from it.

use tessera_dtype::{match_each_native_dtype, NDRange, Range};
use tessera_error::{tessera_bail, tessera_err, TesseraResult};

use crate::dimension::TileArithmetic;
use crate::Dimension;

/// Cell or tile ordering within the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Layout {
    /// Row-major: the last dimension varies fastest.
    #[default]
    RowMajor = 0,
    /// Column-major: the first dimension varies fastest.
    ColMajor = 1,
}

/// An ordered list of dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    dimensions: Vec<Dimension>,
    tile_order: Layout,
    cell_order: Layout,
}

impl Domain {
    /// A domain over `dimensions` with the given tile and cell orders.
    pub fn new(
        dimensions: Vec<Dimension>,
        tile_order: Layout,
        cell_order: Layout,
    ) -> TesseraResult<Self> {
        if dimensions.is_empty() {
            tessera_bail!(InvalidArgument: "a domain needs at least one dimension");
        }
        Ok(Self {
            dimensions,
            tile_order,
            cell_order,
        })
    }

    /// Number of dimensions.
    pub fn dim_num(&self) -> u32 {
        self.dimensions.len() as u32
    }

    /// The dimension at index `d`.
    pub fn dimension(&self, d: u32) -> &Dimension {
        &self.dimensions[d as usize]
    }

    /// All dimensions in order.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Index of the dimension named `name`.
    pub fn dimension_index(&self, name: &str) -> TesseraResult<u32> {
        self.dimensions
            .iter()
            .position(|d| d.name() == name)
            .map(|p| p as u32)
            .ok_or_else(|| tessera_err!(InvalidArgument: "no dimension named {:?}", name))
    }

    /// The tile order.
    pub fn tile_order(&self) -> Layout {
        self.tile_order
    }

    /// The cell order.
    pub fn cell_order(&self) -> Layout {
        self.cell_order
    }

    /// Whether every dimension is fixed size.
    pub fn all_dims_fixed(&self) -> bool {
        self.dimensions.iter().all(|d| !d.var_size())
    }

    /// Whether every dimension has the same datatype.
    pub fn all_dims_same_type(&self) -> bool {
        self.dimensions
            .windows(2)
            .all(|w| w[0].datatype() == w[1].datatype())
    }

    /// Number of cells in one dense tile: the product of tile extents.
    pub fn cell_num_per_tile(&self) -> u64 {
        self.dimensions
            .iter()
            .map(|d| {
                let dt = d.datatype().physical();
                match_each_native_dtype!(dt, |$T| {
                    <$T as TileArithmetic>::tile_idx(
                        d.tile_extent_as::<$T>(),
                        <$T as num_traits::Zero>::zero(),
                        <$T as num_traits::One>::one(),
                    )
                })
            })
            .product()
    }

    /// Number of tiles `ndrange` spans: the product of per-dimension counts.
    pub fn tile_num(&self, ndrange: &NDRange) -> u64 {
        self.dimensions
            .iter()
            .zip(ndrange)
            .map(|(d, r)| d.tile_num(r))
            .product()
    }

    /// Per-dimension inclusive tile-index bounds of `subarray` within
    /// `domain`, or `None` when they do not intersect.
    pub fn tile_index_domain(
        &self,
        domain: &NDRange,
        subarray: &NDRange,
    ) -> Option<Vec<(u64, u64)>> {
        let mut bounds = Vec::with_capacity(self.dimensions.len());
        for (d, (dom, sub)) in self.dimensions.iter().zip(domain.iter().zip(subarray)) {
            if !d.overlap(dom, sub) {
                return None;
            }
            let dt = d.datatype().physical();
            let dim_bounds = match_each_native_dtype!(dt, |$T| {
                let extent = d.tile_extent_as::<$T>();
                let dom_low = dom.start_as::<$T>();
                let lo = if sub.start_as::<$T>() > dom_low {
                    sub.start_as::<$T>()
                } else {
                    dom_low
                };
                let hi = if sub.end_as::<$T>() < dom.end_as::<$T>() {
                    sub.end_as::<$T>()
                } else {
                    dom.end_as::<$T>()
                };
                (
                    <$T as TileArithmetic>::tile_idx(lo, dom_low, extent),
                    <$T as TileArithmetic>::tile_idx(hi, dom_low, extent),
                )
            });
            bounds.push(dim_bounds);
        }
        Some(bounds)
    }

    /// Linearize tile coordinates into a tile position, following the tile
    /// order. `tiles_per_dim` holds the tile count of each dimension in
    /// `domain`.
    pub fn get_tile_pos(&self, tiles_per_dim: &[u64], tile_coords: &[u64]) -> u64 {
        let dim_num = tiles_per_dim.len();
        let mut pos = 0u64;
        match self.tile_order {
            Layout::RowMajor => {
                for d in 0..dim_num {
                    pos = pos * tiles_per_dim[d] + tile_coords[d];
                }
            }
            Layout::ColMajor => {
                for d in (0..dim_num).rev() {
                    pos = pos * tiles_per_dim[d] + tile_coords[d];
                }
            }
        }
        pos
    }

    /// Advance `tile_coords` to the next tile inside `bounds`, following the
    /// tile order. Returns `false` once the walk is exhausted.
    pub fn get_next_tile_coords(&self, bounds: &[(u64, u64)], tile_coords: &mut [u64]) -> bool {
        let dim_num = bounds.len();
        let order: Box<dyn Iterator<Item = usize>> = match self.tile_order {
            // Row-major walks advance the last dimension fastest.
            Layout::RowMajor => Box::new((0..dim_num).rev()),
            Layout::ColMajor => Box::new(0..dim_num),
        };
        for d in order {
            if tile_coords[d] < bounds[d].1 {
                tile_coords[d] += 1;
                return true;
            }
            tile_coords[d] = bounds[d].0;
        }
        false
    }

    /// The subarray covered by the tile at `tile_coords` within `domain`,
    /// cropped to the domain.
    pub fn get_tile_subarray(&self, domain: &NDRange, tile_coords: &[u64]) -> NDRange {
        self.dimensions
            .iter()
            .zip(domain.iter().zip(tile_coords))
            .map(|(d, (dom, k))| {
                let dt = d.datatype().physical();
                match_each_native_dtype!(dt, |$T| {
                    let extent = d.tile_extent_as::<$T>();
                    let dom_low = dom.start_as::<$T>();
                    let lo = <$T as TileArithmetic>::tile_coord_low(*k, dom_low, extent);
                    let hi = <$T as TileArithmetic>::tile_coord_high(*k, dom_low, extent);
                    let hi = if hi > dom.end_as::<$T>() {
                        dom.end_as::<$T>()
                    } else {
                        hi
                    };
                    Range::from_typed(lo, hi)
                })
            })
            .collect()
    }

    /// Snap every range of `ndrange` outward to tile boundaries.
    pub fn expand_to_tiles(&self, ndrange: &mut NDRange) {
        for (d, r) in self.dimensions.iter().zip(ndrange.iter_mut()) {
            d.expand_to_tile(r);
        }
    }

    /// Crop every range of `ndrange` to the dimension domains.
    pub fn crop_ndrange(&self, ndrange: &mut NDRange) {
        for (d, r) in self.dimensions.iter().zip(ndrange.iter_mut()) {
            d.crop_range(r);
        }
    }

    /// Expand `into` to the union of itself and `other`.
    pub fn expand_ndrange(&self, other: &NDRange, into: &mut NDRange) {
        if into.is_empty() {
            *into = other.clone();
            return;
        }
        for (d, (src, dst)) in self.dimensions.iter().zip(other.iter().zip(into.iter_mut())) {
            d.expand_range(src, dst);
        }
    }

    /// Validate an NDRange as a subarray of this domain.
    pub fn check_ndrange(&self, ndrange: &NDRange) -> TesseraResult<()> {
        if ndrange.len() != self.dimensions.len() {
            tessera_bail!(
                InvalidArgument: "subarray has {} ranges, domain has {} dimensions",
                ndrange.len(),
                self.dimensions.len()
            );
        }
        for (d, r) in self.dimensions.iter().zip(ndrange) {
            d.check_range(r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_dtype::Datatype;

    fn grid_2d(tile_order: Layout) -> Domain {
        Domain::new(
            vec![
                Dimension::new("r", Datatype::I32, (0i32, 99i32), 10i32).unwrap(),
                Dimension::new("c", Datatype::I32, (0i32, 99i32), 10i32).unwrap(),
            ],
            tile_order,
            Layout::RowMajor,
        )
        .unwrap()
    }

    fn full_domain() -> NDRange {
        vec![
            Range::from_typed(0i32, 99i32),
            Range::from_typed(0i32, 99i32),
        ]
    }

    #[test]
    fn cells_per_tile() {
        assert_eq!(grid_2d(Layout::RowMajor).cell_num_per_tile(), 100);
    }

    #[test]
    fn tile_counts() {
        let domain = grid_2d(Layout::RowMajor);
        assert_eq!(domain.tile_num(&full_domain()), 100);
        let sub = vec![
            Range::from_typed(5i32, 25i32),
            Range::from_typed(0i32, 9i32),
        ];
        assert_eq!(domain.tile_num(&sub), 3);
    }

    #[test]
    fn tile_walk_row_major() {
        let domain = grid_2d(Layout::RowMajor);
        let bounds = domain
            .tile_index_domain(&full_domain(), &full_domain())
            .unwrap();
        assert_eq!(bounds, vec![(0, 9), (0, 9)]);

        let tiles_per_dim = [10u64, 10u64];
        assert_eq!(domain.get_tile_pos(&tiles_per_dim, &[0, 3]), 3);
        assert_eq!(domain.get_tile_pos(&tiles_per_dim, &[2, 3]), 23);

        let sub_bounds = vec![(1u64, 2u64), (4u64, 5u64)];
        let mut coords = vec![1u64, 4u64];
        let mut visited = vec![coords.clone()];
        while domain.get_next_tile_coords(&sub_bounds, &mut coords) {
            visited.push(coords.clone());
        }
        assert_eq!(
            visited,
            vec![vec![1, 4], vec![1, 5], vec![2, 4], vec![2, 5]]
        );
    }

    #[test]
    fn tile_walk_col_major() {
        let domain = grid_2d(Layout::ColMajor);
        let tiles_per_dim = [10u64, 10u64];
        assert_eq!(domain.get_tile_pos(&tiles_per_dim, &[2, 3]), 32);

        let sub_bounds = vec![(1u64, 2u64), (4u64, 5u64)];
        let mut coords = vec![1u64, 4u64];
        let mut visited = vec![coords.clone()];
        while domain.get_next_tile_coords(&sub_bounds, &mut coords) {
            visited.push(coords.clone());
        }
        assert_eq!(
            visited,
            vec![vec![1, 4], vec![2, 4], vec![1, 5], vec![2, 5]]
        );
    }

    #[test]
    fn tile_subarray_is_cropped() {
        let domain = Domain::new(
            vec![Dimension::new("d", Datatype::I64, (0i64, 12i64), 5i64).unwrap()],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap();
        let dom = vec![Range::from_typed(0i64, 12i64)];
        let tile2 = domain.get_tile_subarray(&dom, &[2]);
        assert_eq!(tile2[0].start_as::<i64>(), 10);
        assert_eq!(tile2[0].end_as::<i64>(), 12);
    }

    #[test]
    fn expand_and_union() {
        let domain = grid_2d(Layout::RowMajor);
        let mut nd = vec![
            Range::from_typed(13i32, 17i32),
            Range::from_typed(5i32, 95i32),
        ];
        domain.expand_to_tiles(&mut nd);
        assert_eq!(
            (nd[0].start_as::<i32>(), nd[0].end_as::<i32>()),
            (10, 19)
        );
        assert_eq!((nd[1].start_as::<i32>(), nd[1].end_as::<i32>()), (0, 99));

        let mut acc = NDRange::new();
        domain.expand_ndrange(&nd, &mut acc);
        let other = vec![
            Range::from_typed(50i32, 60i32),
            Range::from_typed(0i32, 0i32),
        ];
        domain.expand_ndrange(&other, &mut acc);
        assert_eq!((acc[0].start_as::<i32>(), acc[0].end_as::<i32>()), (10, 60));
    }

    #[test]
    fn ndrange_validation() {
        let domain = grid_2d(Layout::RowMajor);
        assert!(domain.check_ndrange(&full_domain()).is_ok());
        assert!(domain
            .check_ndrange(&vec![Range::from_typed(0i32, 1i32)])
            .is_err());
    }
}
