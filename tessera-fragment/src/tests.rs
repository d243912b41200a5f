//! End-to-end scenarios over in-memory storage: write a fragment through the
//! manifest API, persist it, reload it, and query it.

use std::sync::Arc;

use rstest::rstest;
use rustc_hash::FxHashMap;
use tessera_dtype::{CellValNum, Datatype, NativeCellType, Range, ToLeBytes};
use tessera_error::TesseraError;
use tessera_io::{Config, ContextResources, EncryptionKey, MemoryVfs};
use tessera_schema::{ArraySchema, ArrayType, Attribute, Dimension, Domain, Layout, SchemaMap};

use crate::{
    consolidate_fragment_footers, ConsolidatedFooters, FragmentMetadata, MemoryTracker,
    TileMetadataGenerator,
};

fn resources() -> Arc<ContextResources> {
    Arc::new(ContextResources::new(Arc::new(MemoryVfs::new()), Config::new()).unwrap())
}

fn tracker() -> Arc<MemoryTracker> {
    Arc::new(MemoryTracker::new(1 << 30))
}

fn le_cells<T: NativeCellType>(values: &[T]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| v.to_le_bytes().as_ref().to_vec())
        .collect()
}

fn schema_map(schema: &Arc<ArraySchema>) -> SchemaMap {
    let mut map = SchemaMap::default();
    map.insert(schema.name().to_string(), Arc::clone(schema));
    map
}

fn dense_1d_schema(version: u32) -> Arc<ArraySchema> {
    let domain = Domain::new(
        vec![Dimension::new("d", Datatype::I64, (0i64, 9i64), 5i64).unwrap()],
        Layout::RowMajor,
        Layout::RowMajor,
    )
    .unwrap();
    Arc::new(
        ArraySchema::new(
            "schema_0",
            ArrayType::Dense,
            domain,
            vec![Attribute::new("a", Datatype::I32)],
            0,
        )
        .unwrap()
        .with_version(version)
        .unwrap(),
    )
}

/// Dense 1-D fragment with two tiles of five `i32` cells each.
fn write_dense_1d(
    resources: &Arc<ContextResources>,
    tracker: &Arc<MemoryTracker>,
    schema: &Arc<ArraySchema>,
) -> FragmentMetadata {
    let key = EncryptionKey::no_encryption();
    let mut meta = FragmentMetadata::new(
        Arc::clone(resources),
        Arc::clone(tracker),
        Arc::clone(schema),
        "mem://arrays/dense1d",
        (1, 1),
        false,
        false,
    );
    meta.init(&vec![Range::from_typed(0i64, 9i64)]);
    meta.set_num_tiles(2).unwrap();

    let field = schema.field_schema("a").unwrap();
    let tiles = [
        le_cells(&[10i32, 11, 12, 13, 14]),
        le_cells(&[20i32, 21, 22, 23, 24]),
    ];
    for (t, cells) in tiles.iter().enumerate() {
        let stats = TileMetadataGenerator::compute_fixed(&field, cells, None);
        meta.set_tile_offset("a", t as u64, cells.len() as u64);
        meta.set_tile_min("a", t as u64, &stats.min);
        meta.set_tile_max("a", t as u64, &stats.max);
        meta.set_tile_sum("a", t as u64, &stats.sum);
    }
    meta.set_last_tile_cell_num(5);
    meta.compute_fragment_min_max_sum_null_count().unwrap();
    meta.store(&key).unwrap();
    meta
}

#[test]
fn dense_1d_write_and_query() {
    let resources = resources();
    let tracker = tracker();
    let schema = dense_1d_schema(16);
    let meta = write_dense_1d(&resources, &tracker, &schema);

    assert_eq!(meta.tile_num().unwrap(), 2);
    assert_eq!(meta.cell_num().unwrap(), 10);
    assert_eq!(meta.file_size("a").unwrap(), 40);
    assert_eq!(meta.get_tile_min_as::<i32>("a", 0).unwrap(), 10);
    assert_eq!(meta.get_tile_max_as::<i32>("a", 1).unwrap(), 24);
    assert_eq!(
        i64::from_le_bytes(meta.get_tile_sum("a", 0).unwrap()),
        10 + 11 + 12 + 13 + 14
    );

    let subarray = vec![Range::from_typed(3i64, 7i64)];
    let cov = meta.compute_overlapping_tile_ids_cov(&subarray).unwrap();
    assert_eq!(cov.len(), 2);
    assert_eq!(cov[0].0, 0);
    assert!((cov[0].1 - 0.4).abs() < 1e-12);
    assert_eq!(cov[1].0, 1);
    assert!((cov[1].1 - 0.6).abs() < 1e-12);

    // A disjoint subarray intersects nothing.
    let outside = vec![Range::from_typed(20i64, 30i64)];
    assert!(meta.compute_overlapping_tile_ids(&outside).unwrap().is_empty());
}

#[test]
fn dense_1d_round_trip() {
    let resources = resources();
    let tracker = tracker();
    let schema = dense_1d_schema(16);
    let written = write_dense_1d(&resources, &tracker, &schema);
    let key = EncryptionKey::no_encryption();

    let loaded = FragmentMetadata::load(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        written.fragment_uri(),
        &key,
        None,
        &schema_map(&schema),
    )
    .unwrap();

    assert_eq!(loaded.tile_num().unwrap(), 2);
    assert_eq!(loaded.dense().unwrap(), true);
    assert_eq!(loaded.file_size("a").unwrap(), 40);
    assert_eq!(loaded.array_schema_name().unwrap(), "schema_0");
    assert_eq!(
        loaded.non_empty_domain().unwrap(),
        written.non_empty_domain().unwrap()
    );

    // Tile offsets gate their accessors until loaded.
    assert!(matches!(
        loaded.file_offset("a", 0),
        Err(TesseraError::UsageError(_))
    ));
    loaded
        .load_tile_offsets(&key, &["a".to_string()])
        .unwrap();
    assert_eq!(loaded.file_offset("a", 0).unwrap(), 0);
    assert_eq!(loaded.file_offset("a", 1).unwrap(), 20);
    assert_eq!(loaded.persisted_tile_size("a", 0).unwrap(), 20);
    assert_eq!(loaded.persisted_tile_size("a", 1).unwrap(), 20);
    assert_eq!(loaded.tile_size("a", 0).unwrap(), 20);

    loaded
        .load_tile_min_values(&key, &["a".to_string()])
        .unwrap();
    loaded
        .load_tile_max_values(&key, &["a".to_string()])
        .unwrap();
    loaded
        .load_tile_sum_values(&key, &["a".to_string()])
        .unwrap();
    assert_eq!(loaded.get_tile_min_as::<i32>("a", 0).unwrap(), 10);
    assert_eq!(loaded.get_tile_max_as::<i32>("a", 1).unwrap(), 24);

    loaded.load_fragment_min_max_sum_null_count(&key).unwrap();
    assert_eq!(loaded.get_min("a").unwrap(), 10i32.to_le_bytes());
    assert_eq!(loaded.get_max("a").unwrap(), 24i32.to_le_bytes());
    assert_eq!(
        i64::from_le_bytes(loaded.get_sum("a").unwrap()),
        (10..=14).sum::<i64>() + (20..=24).sum::<i64>()
    );
}

fn sparse_2d_schema() -> Arc<ArraySchema> {
    let domain = Domain::new(
        vec![
            Dimension::new("d0", Datatype::I32, (0i32, 99i32), 10i32).unwrap(),
            Dimension::new("d1", Datatype::I32, (0i32, 99i32), 10i32).unwrap(),
        ],
        Layout::RowMajor,
        Layout::RowMajor,
    )
    .unwrap();
    Arc::new(
        ArraySchema::new(
            "schema_0",
            ArrayType::Sparse,
            domain,
            vec![Attribute::new("s", Datatype::StringAscii).with_cell_val_num(CellValNum::Var)],
            2,
        )
        .unwrap(),
    )
}

fn mbr_2d(x: i32, y: i32) -> Vec<Range> {
    vec![Range::from_typed(x, x), Range::from_typed(y, y)]
}

/// Sparse 2-D fragment with one cell per tile: `(1,1)="a"`, `(2,2)="bb"`,
/// `(80,80)="c"`.
fn write_sparse_2d(
    resources: &Arc<ContextResources>,
    tracker: &Arc<MemoryTracker>,
    schema: &Arc<ArraySchema>,
    array_uri: &str,
) -> FragmentMetadata {
    let key = EncryptionKey::no_encryption();
    let mut meta = FragmentMetadata::new(
        Arc::clone(resources),
        Arc::clone(tracker),
        Arc::clone(schema),
        array_uri,
        (2, 2),
        false,
        false,
    );
    meta.init(&Vec::new());
    meta.set_num_tiles(3).unwrap();

    let cells: [(&str, i32); 3] = [("a", 1), ("bb", 2), ("c", 80)];
    for (t, (value, coord)) in cells.iter().enumerate() {
        let t = t as u64;
        meta.set_mbr(t, &mbr_2d(*coord, *coord)).unwrap();
        meta.set_tile_offset("s", t, 16);
        meta.set_tile_var_offset("s", t, value.len() as u64);
        meta.set_tile_var_size("s", t, value.len() as u64);
        meta.set_tile_min_var_size("s", t, value.len() as u64);
        meta.set_tile_max_var_size("s", t, value.len() as u64);
        for d in ["d0", "d1"] {
            meta.set_tile_offset(d, t, 4);
            meta.set_tile_min(d, t, &coord.to_le_bytes());
            meta.set_tile_max(d, t, &coord.to_le_bytes());
            meta.set_tile_sum(d, t, &(*coord as i64).to_le_bytes());
        }
    }
    meta.convert_tile_min_max_var_sizes_to_offsets("s").unwrap();
    for (t, (value, _)) in cells.iter().enumerate() {
        meta.set_tile_min_var("s", t as u64, value.as_bytes());
        meta.set_tile_max_var("s", t as u64, value.as_bytes());
    }
    meta.set_last_tile_cell_num(1);
    meta.compute_fragment_min_max_sum_null_count().unwrap();
    meta.store(&key).unwrap();
    meta
}

#[test]
fn sparse_2d_overlap_queries() {
    let resources = resources();
    let tracker = tracker();
    let schema = sparse_2d_schema();
    let meta = write_sparse_2d(&resources, &tracker, &schema, "mem://arrays/sparse2d");

    assert_eq!(meta.sparse_tile_num().unwrap(), 3);
    assert_eq!(meta.mbrs().unwrap().len(), 3);

    let hit = vec![Range::from_typed(0i32, 9i32), Range::from_typed(0i32, 9i32)];
    let overlap = meta.get_tile_overlap(&hit, &[false, false]).unwrap();
    assert_eq!(overlap.tile_ranges, vec![(0, 1)]);
    assert!(overlap.tiles.is_empty());

    let miss = vec![
        Range::from_typed(50i32, 59i32),
        Range::from_typed(50i32, 59i32),
    ];
    assert!(meta.get_tile_overlap(&miss, &[false, false]).unwrap().is_empty());

    let mut bitmap = vec![0u8; 3];
    meta.compute_tile_bitmap(&Range::from_typed(0i32, 9i32), 0, &mut bitmap)
        .unwrap();
    assert_eq!(bitmap, vec![1, 1, 0]);
}

#[test]
fn sparse_2d_round_trip_var_stats() {
    let resources = resources();
    let tracker = tracker();
    let schema = sparse_2d_schema();
    let written = write_sparse_2d(&resources, &tracker, &schema, "mem://arrays/sparse2d");
    let key = EncryptionKey::no_encryption();

    let loaded = FragmentMetadata::load(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        written.fragment_uri(),
        &key,
        None,
        &schema_map(&schema),
    )
    .unwrap();

    loaded.load_rtree(&key).unwrap();
    assert_eq!(loaded.mbrs().unwrap(), written.mbrs().unwrap());

    loaded
        .load_tile_min_values(&key, &["s".to_string()])
        .unwrap();
    loaded
        .load_tile_max_values(&key, &["s".to_string()])
        .unwrap();
    assert_eq!(loaded.get_tile_min_bytes("s", 0).unwrap(), b"a");
    assert_eq!(loaded.get_tile_max_bytes("s", 1).unwrap(), b"bb");
    assert_eq!(loaded.get_tile_min_bytes("s", 2).unwrap(), b"c");

    loaded.load_fragment_min_max_sum_null_count(&key).unwrap();
    assert_eq!(loaded.get_min("s").unwrap(), b"a");
    assert_eq!(loaded.get_max("s").unwrap(), b"c");

    loaded
        .load_tile_offsets(&key, &["s".to_string()])
        .unwrap();
    loaded.load_tile_var_sizes(&key, "s").unwrap();
    assert_eq!(loaded.file_offset("s", 2).unwrap(), 32);
    assert_eq!(loaded.file_var_offset("s", 2).unwrap(), 3);
    assert_eq!(loaded.tile_var_size("s", 1).unwrap(), 2);

    let tile_meta = loaded.get_tile_metadata("d0", 1).unwrap();
    assert_eq!(tile_meta.min, 2i32.to_le_bytes());
    assert_eq!(tile_meta.max, 2i32.to_le_bytes());
    // Non-final sparse tiles report the schema capacity.
    assert_eq!(tile_meta.count, 2);
}

#[test]
fn nullable_rollup_skips_all_null_tiles() {
    let resources = resources();
    let tracker = tracker();
    let domain = Domain::new(
        vec![Dimension::new("d", Datatype::I64, (0i64, 9999i64), 100i64).unwrap()],
        Layout::RowMajor,
        Layout::RowMajor,
    )
    .unwrap();
    let schema = Arc::new(
        ArraySchema::new(
            "schema_0",
            ArrayType::Sparse,
            domain,
            vec![Attribute::new("a", Datatype::I32).nullable()],
            100,
        )
        .unwrap(),
    );
    let key = EncryptionKey::no_encryption();

    let mut meta = FragmentMetadata::new(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        Arc::clone(&schema),
        "mem://arrays/nullable",
        (3, 3),
        false,
        false,
    );
    meta.init(&Vec::new());
    meta.set_num_tiles(2).unwrap();
    meta.set_mbr(0, &vec![Range::from_typed(0i64, 99i64)]).unwrap();
    meta.set_mbr(1, &vec![Range::from_typed(100i64, 199i64)])
        .unwrap();

    let field = schema.field_schema("a").unwrap();
    // Tile 0: all 100 cells null.
    let zeros = le_cells(&vec![0i32; 100]);
    let null_validity = vec![0u8; 100];
    let stats0 = TileMetadataGenerator::compute_fixed(&field, &zeros, Some(&null_validity));
    assert_eq!(stats0.null_count, 100);
    meta.set_tile_offset("a", 0, 400);
    meta.set_tile_validity_offset("a", 0, 100);
    meta.set_tile_null_count("a", 0, stats0.null_count);
    meta.set_tile_min("a", 0, &0i32.to_le_bytes());
    meta.set_tile_max("a", 0, &0i32.to_le_bytes());
    meta.set_tile_sum("a", 0, &stats0.sum);

    // Tile 1: values 0..100, none null.
    let values: Vec<i32> = (0..100).collect();
    let stats1 = TileMetadataGenerator::compute_fixed(&field, &le_cells(&values), None);
    meta.set_tile_offset("a", 1, 400);
    meta.set_tile_validity_offset("a", 1, 100);
    meta.set_tile_null_count("a", 1, 0);
    meta.set_tile_min("a", 1, &stats1.min);
    meta.set_tile_max("a", 1, &stats1.max);
    meta.set_tile_sum("a", 1, &stats1.sum);

    meta.set_last_tile_cell_num(100);
    meta.compute_fragment_min_max_sum_null_count().unwrap();

    assert_eq!(meta.get_min("a").unwrap(), 0i32.to_le_bytes());
    assert_eq!(meta.get_max("a").unwrap(), 99i32.to_le_bytes());
    assert_eq!(i64::from_le_bytes(meta.get_sum("a").unwrap()), 4950);
    assert_eq!(meta.get_null_count("a").unwrap(), 100);
}

#[test]
fn rollup_sum_saturates_instead_of_wrapping() {
    let resources = resources();
    let tracker = tracker();
    let domain = Domain::new(
        vec![Dimension::new("d", Datatype::I64, (0i64, 99i64), 10i64).unwrap()],
        Layout::RowMajor,
        Layout::RowMajor,
    )
    .unwrap();
    let schema = Arc::new(
        ArraySchema::new(
            "schema_0",
            ArrayType::Sparse,
            domain,
            vec![Attribute::new("a", Datatype::I64)],
            1,
        )
        .unwrap(),
    );

    let mut meta = FragmentMetadata::new(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        Arc::clone(&schema),
        "mem://arrays/saturate",
        (4, 4),
        false,
        false,
    );
    meta.init(&Vec::new());
    meta.set_num_tiles(2).unwrap();
    meta.set_mbr(0, &vec![Range::from_typed(0i64, 0i64)]).unwrap();
    meta.set_mbr(1, &vec![Range::from_typed(1i64, 1i64)]).unwrap();
    for (t, v) in [(0u64, i64::MAX), (1u64, 1i64)] {
        meta.set_tile_offset("a", t, 8);
        meta.set_tile_min("a", t, &v.to_le_bytes());
        meta.set_tile_max("a", t, &v.to_le_bytes());
        meta.set_tile_sum("a", t, &v.to_le_bytes());
    }
    meta.set_last_tile_cell_num(1);
    meta.compute_fragment_min_max_sum_null_count().unwrap();
    assert_eq!(i64::from_le_bytes(meta.get_sum("a").unwrap()), i64::MAX);
}

fn mixed_schema(version: u32) -> Arc<ArraySchema> {
    let domain = Domain::new(
        vec![
            Dimension::new("x", Datatype::I64, (0i64, 999i64), 100i64).unwrap(),
            Dimension::new_var("name", Datatype::StringAscii).unwrap(),
        ],
        Layout::RowMajor,
        Layout::RowMajor,
    )
    .unwrap();
    Arc::new(
        ArraySchema::new(
            "schema_0",
            ArrayType::Sparse,
            domain,
            vec![
                Attribute::new("a", Datatype::I32),
                Attribute::new("s", Datatype::StringAscii).with_cell_val_num(CellValNum::Var),
                Attribute::new("n", Datatype::F64).nullable(),
            ],
            4,
        )
        .unwrap()
        .with_version(version)
        .unwrap(),
    )
}

fn write_mixed(
    resources: &Arc<ContextResources>,
    tracker: &Arc<MemoryTracker>,
    schema: &Arc<ArraySchema>,
    array_uri: &str,
    version: u32,
) -> FragmentMetadata {
    let key = EncryptionKey::no_encryption();
    let mut meta = FragmentMetadata::new(
        Arc::clone(resources),
        Arc::clone(tracker),
        Arc::clone(schema),
        array_uri,
        (7, 9),
        version >= 14,
        version >= 15,
    );
    meta.init(&Vec::new());
    meta.set_num_tiles(2).unwrap();

    for t in 0..2u64 {
        let lo = (t as i64) * 100;
        meta.set_mbr(
            t,
            &vec![
                Range::from_typed(lo, lo + 50),
                Range::from_var(b"alpha", b"omega"),
            ],
        )
        .unwrap();
        meta.set_tile_offset("a", t, 16);
        meta.set_tile_min("a", t, &(t as i32).to_le_bytes());
        meta.set_tile_max("a", t, &(t as i32 + 10).to_le_bytes());
        meta.set_tile_sum("a", t, &(40i64 + t as i64).to_le_bytes());

        meta.set_tile_offset("s", t, 32);
        meta.set_tile_var_offset("s", t, 7);
        meta.set_tile_var_size("s", t, 7);
        meta.set_tile_min_var_size("s", t, 2);
        meta.set_tile_max_var_size("s", t, 3);

        meta.set_tile_offset("n", t, 32);
        meta.set_tile_validity_offset("n", t, 4);
        meta.set_tile_null_count("n", t, t);
        meta.set_tile_min("n", t, &(1.5f64 * t as f64).to_le_bytes());
        meta.set_tile_max("n", t, &(2.5f64 * t as f64).to_le_bytes());
        meta.set_tile_sum("n", t, &(8.0f64).to_le_bytes());

        meta.set_tile_offset("x", t, 32);
        meta.set_tile_min("x", t, &lo.to_le_bytes());
        meta.set_tile_max("x", t, &(lo + 50).to_le_bytes());
        meta.set_tile_sum("x", t, &lo.to_le_bytes());

        meta.set_tile_offset("name", t, 32);
        meta.set_tile_var_offset("name", t, 11);
        meta.set_tile_var_size("name", t, 11);

        if version >= 14 {
            meta.set_tile_offset(tessera_dtype::TIMESTAMPS_NAME, t, 32);
        }
        if version >= 15 {
            meta.set_tile_offset(tessera_dtype::DELETE_TIMESTAMPS_NAME, t, 32);
            meta.set_tile_offset(tessera_dtype::DELETE_CONDITION_INDEX_NAME, t, 8);
        }
    }
    meta.convert_tile_min_max_var_sizes_to_offsets("s").unwrap();
    for t in 0..2u64 {
        meta.set_tile_min_var("s", t, b"ab");
        meta.set_tile_max_var("s", t, b"xyz");
    }
    meta.set_last_tile_cell_num(4);
    meta.compute_fragment_min_max_sum_null_count().unwrap();
    if version >= 16 {
        meta.set_processed_conditions(vec!["cond_a".to_string(), "cond_b".to_string()]);
    }
    meta.store(&key).unwrap();
    meta
}

#[rstest]
#[case(7)]
#[case(10)]
#[case(11)]
#[case(12)]
#[case(14)]
#[case(15)]
#[case(16)]
fn footer_round_trip_across_versions(#[case] version: u32) {
    let resources = resources();
    let tracker = tracker();
    let schema = mixed_schema(version);
    let array_uri = format!("mem://arrays/mixed_v{version}");
    let written = write_mixed(&resources, &tracker, &schema, &array_uri, version);
    let key = EncryptionKey::no_encryption();

    let mut schemas = schema_map(&schema);
    // Pre-named-schema fragments resolve the single legacy schema entry.
    schemas.insert(crate::LEGACY_SCHEMA_NAME.to_string(), Arc::clone(&schema));

    let loaded = FragmentMetadata::load(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        written.fragment_uri(),
        &key,
        None,
        &schemas,
    )
    .unwrap();

    assert_eq!(loaded.format_version(), version);
    assert_eq!(loaded.tile_num().unwrap(), 2);
    assert_eq!(loaded.last_tile_cell_num().unwrap(), 4);
    assert_eq!(loaded.has_timestamps().unwrap(), version >= 14);
    assert_eq!(loaded.has_delete_meta().unwrap(), version >= 15);
    assert_eq!(
        loaded.num_dims_and_attrs().unwrap(),
        written.num_dims_and_attrs().unwrap()
    );
    assert_eq!(
        loaded.non_empty_domain().unwrap(),
        written.non_empty_domain().unwrap()
    );
    for name in ["a", "s", "n", "x", "name"] {
        assert_eq!(
            loaded.file_size(name).unwrap(),
            written.file_size(name).unwrap()
        );
        assert_eq!(
            loaded.file_var_size(name).unwrap(),
            written.file_var_size(name).unwrap()
        );
        assert_eq!(
            loaded.file_validity_size(name).unwrap(),
            written.file_validity_size(name).unwrap()
        );
    }

    let names: Vec<String> = ["a", "s", "n"].iter().map(|s| s.to_string()).collect();
    loaded.load_tile_offsets(&key, &names).unwrap();
    for t in 0..2 {
        assert_eq!(
            loaded.file_offset("a", t).unwrap(),
            written.file_offset("a", t).unwrap()
        );
        assert_eq!(
            loaded.persisted_tile_size("a", t).unwrap(),
            written.persisted_tile_size("a", t).unwrap()
        );
        assert_eq!(
            loaded.file_var_offset("s", t).unwrap(),
            written.file_var_offset("s", t).unwrap()
        );
        assert_eq!(
            loaded.file_validity_offset("n", t).unwrap(),
            written.file_validity_offset("n", t).unwrap()
        );
    }

    loaded.load_rtree(&key).unwrap();
    assert_eq!(loaded.mbrs().unwrap(), written.mbrs().unwrap());

    if version >= 11 {
        loaded.load_tile_min_values(&key, &names).unwrap();
        loaded.load_tile_max_values(&key, &names).unwrap();
        loaded.load_tile_sum_values(&key, &names).unwrap();
        loaded.load_tile_null_count_values(&key, &names).unwrap();
        assert_eq!(loaded.get_tile_min_as::<i32>("a", 1).unwrap(), 1);
        assert_eq!(loaded.get_tile_max_as::<i32>("a", 1).unwrap(), 11);
        assert_eq!(loaded.get_tile_min_bytes("s", 0).unwrap(), b"ab");
        assert_eq!(loaded.get_tile_max_bytes("s", 0).unwrap(), b"xyz");
        assert_eq!(loaded.get_tile_null_count("n", 1).unwrap(), 1);
    }
    if version >= 12 {
        loaded.load_fragment_min_max_sum_null_count(&key).unwrap();
        assert_eq!(loaded.get_min("a").unwrap(), written.get_min("a").unwrap());
        assert_eq!(loaded.get_max("a").unwrap(), written.get_max("a").unwrap());
        assert_eq!(loaded.get_sum("a").unwrap(), written.get_sum("a").unwrap());
        assert_eq!(
            loaded.get_null_count("n").unwrap(),
            written.get_null_count("n").unwrap()
        );
    }
    if version >= 16 {
        loaded.load_processed_conditions(&key).unwrap();
        assert_eq!(
            loaded.get_processed_conditions().unwrap(),
            vec!["cond_a".to_string(), "cond_b".to_string()]
        );
    }
}

#[test]
fn consolidated_footer_matches_direct_load() {
    let resources = resources();
    let tracker = tracker();
    let schema = sparse_2d_schema();
    let array_uri = "mem://arrays/consolidated";
    let frag_a = write_sparse_2d(&resources, &tracker, &schema, array_uri);
    let frag_b = write_sparse_2d(&resources, &tracker, &schema, array_uri);
    let key = EncryptionKey::no_encryption();
    let schemas = schema_map(&schema);

    let uris = vec![
        frag_a.fragment_uri().to_string(),
        frag_b.fragment_uri().to_string(),
    ];
    let (blob, offsets) = consolidate_fragment_footers(&resources, &uris, &schemas).unwrap();
    assert_eq!(offsets.len(), 2);
    let offset_b = offsets[frag_b.fragment_name().name()];

    let direct = FragmentMetadata::load(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        frag_b.fragment_uri(),
        &key,
        None,
        &schemas,
    )
    .unwrap();
    let via_blob = FragmentMetadata::load(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        frag_b.fragment_uri(),
        &key,
        Some((&blob, offset_b)),
        &schemas,
    )
    .unwrap();

    assert!(via_blob.has_consolidated_footer().unwrap());
    assert!(!direct.has_consolidated_footer().unwrap());
    assert_eq!(via_blob.tile_num().unwrap(), direct.tile_num().unwrap());
    assert_eq!(
        via_blob.non_empty_domain().unwrap(),
        direct.non_empty_domain().unwrap()
    );
    assert_eq!(
        via_blob.file_size("s").unwrap(),
        direct.file_size("s").unwrap()
    );

    // Lazy sections still come from the fragment's own file.
    via_blob.load_rtree(&key).unwrap();
    direct.load_rtree(&key).unwrap();
    assert_eq!(via_blob.mbrs().unwrap(), direct.mbrs().unwrap());
}

#[test]
fn load_free_load_is_idempotent_and_returns_memory() {
    let resources = resources();
    let tracker = tracker();
    let schema = sparse_2d_schema();
    let written = write_sparse_2d(&resources, &tracker, &schema, "mem://arrays/freeload");
    let key = EncryptionKey::no_encryption();

    let loaded = FragmentMetadata::load(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        written.fragment_uri(),
        &key,
        None,
        &schema_map(&schema),
    )
    .unwrap();
    let footer_only = tracker.used();

    loaded.load_rtree(&key).unwrap();
    loaded
        .load_tile_offsets(&key, &["s".to_string()])
        .unwrap();
    let first_mbrs = loaded.mbrs().unwrap();
    let first_offsets: Vec<u64> = (0..3)
        .map(|t| loaded.file_offset("s", t).unwrap())
        .collect();
    assert!(tracker.used() > footer_only);

    loaded.free_rtree().unwrap();
    loaded.free_tile_offsets().unwrap();
    assert_eq!(tracker.used(), footer_only);
    assert!(matches!(
        loaded.mbrs(),
        Err(TesseraError::UsageError(_))
    ));

    loaded.load_rtree(&key).unwrap();
    loaded
        .load_tile_offsets(&key, &["s".to_string()])
        .unwrap();
    assert_eq!(loaded.mbrs().unwrap(), first_mbrs);
    let second_offsets: Vec<u64> = (0..3)
        .map(|t| loaded.file_offset("s", t).unwrap())
        .collect();
    assert_eq!(second_offsets, first_offsets);

    drop(loaded);
    assert_eq!(tracker.used(), 0);
}

#[test]
fn memory_budget_refusal_is_recoverable() {
    let resources = resources();
    let big_tracker = tracker();
    let schema = sparse_2d_schema();
    let written = write_sparse_2d(&resources, &big_tracker, &schema, "mem://arrays/budget");
    let key = EncryptionKey::no_encryption();

    // Probe the footer size so the budget admits it and nothing more.
    let probe = FragmentMetadata::load(
        Arc::clone(&resources),
        Arc::clone(&big_tracker),
        written.fragment_uri(),
        &key,
        None,
        &schema_map(&schema),
    )
    .unwrap();
    let footer_size = probe.footer_size().unwrap();
    drop(probe);

    let small_tracker = Arc::new(MemoryTracker::new(footer_size + 8));
    let loaded = FragmentMetadata::load(
        Arc::clone(&resources),
        Arc::clone(&small_tracker),
        written.fragment_uri(),
        &key,
        None,
        &schema_map(&schema),
    )
    .unwrap();
    let after_footer = small_tracker.used();

    let err = loaded.load_rtree(&key).unwrap_err();
    assert!(matches!(err, TesseraError::OutOfBudget(_)));
    // The refusal left no partial state behind.
    assert_eq!(small_tracker.used(), after_footer);
    assert!(matches!(
        loaded.mbrs(),
        Err(TesseraError::UsageError(_))
    ));
}

#[test]
fn add_max_buffer_sizes_bounds_read_buffers() {
    let resources = resources();
    let tracker = tracker();
    let schema = sparse_2d_schema();
    let written = write_sparse_2d(&resources, &tracker, &schema, "mem://arrays/maxbuf");
    let key = EncryptionKey::no_encryption();

    let loaded = FragmentMetadata::load(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        written.fragment_uri(),
        &key,
        None,
        &schema_map(&schema),
    )
    .unwrap();
    loaded
        .load_tile_offsets(&key, &["s".to_string()])
        .unwrap();
    loaded.load_tile_var_sizes(&key, "s").unwrap();

    let mut sizes = FxHashMap::default();
    sizes.insert("s".to_string(), (0u64, 0u64));
    let subarray = vec![Range::from_typed(0i32, 9i32), Range::from_typed(0i32, 9i32)];
    loaded
        .add_max_buffer_sizes(&key, &subarray, &mut sizes)
        .unwrap();
    let (offsets_bytes, var_bytes) = sizes["s"];
    // Tiles 0 and 1 qualify; each is bounded by the capacity of 2 cells.
    assert_eq!(offsets_bytes, 2 * 2 * 8);
    assert_eq!(var_bytes, 1 + 2);
}

#[test]
fn one_shot_conversion_faults_on_rerun() {
    let resources = resources();
    let tracker = tracker();
    let schema = sparse_2d_schema();
    let mut meta = FragmentMetadata::new(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        Arc::clone(&schema),
        "mem://arrays/oneshot",
        (5, 5),
        false,
        false,
    );
    meta.init(&Vec::new());
    meta.set_num_tiles(1).unwrap();
    meta.set_tile_min_var_size("s", 0, 1);
    meta.set_tile_max_var_size("s", 0, 1);
    meta.convert_tile_min_max_var_sizes_to_offsets("s").unwrap();
    assert!(matches!(
        meta.convert_tile_min_max_var_sizes_to_offsets("s"),
        Err(TesseraError::UsageError(_))
    ));
}

#[test]
fn fragment_info_lifecycle() {
    use crate::FragmentInfo;

    let resources = resources();
    let tracker = tracker();
    let schema = sparse_2d_schema();
    let array_uri = "mem://arrays/info";
    let key = EncryptionKey::no_encryption();

    let frag_a = write_sparse_2d(&resources, &tracker, &schema, array_uri);
    let frag_b = write_sparse_2d(&resources, &tracker, &schema, array_uri);

    let mut info = FragmentInfo::new(array_uri, Arc::clone(&resources), Arc::clone(&tracker));
    // Accessors fault before load.
    assert!(matches!(
        info.fragment_num(),
        Err(TesseraError::UsageError(_))
    ));

    info.load(
        0,
        u64::MAX,
        &key,
        schema_map(&schema),
        &ConsolidatedFooters::default(),
    )
    .unwrap();
    assert_eq!(info.fragment_num().unwrap(), 2);
    // Two non-final tiles at capacity 2, one final tile with a single cell.
    assert_eq!(info.total_cell_num().unwrap(), 2 * 5);
    assert_eq!(info.unconsolidated_metadata_num().unwrap(), 2);
    assert_eq!(info.to_vacuum_num().unwrap(), 0);
    assert_eq!(info.array_schema_latest().unwrap().name(), "schema_0");

    let first = info.fragment(0).unwrap();
    assert!(first.sparse().unwrap());
    assert_eq!(first.timestamp_range(), (2, 2));
    assert_eq!(first.mbr_num(&key).unwrap(), 3);
    let mbr_range = first.mbr(&key, 2, 0).unwrap();
    assert_eq!(mbr_range.start_as::<i32>(), 80);

    // Config is sealed once loaded; a second load is rejected.
    assert!(info.set_config(Config::new()).is_err());
    assert!(info
        .load(0, u64::MAX, &key, schema_map(&schema), &ConsolidatedFooters::default())
        .is_err());

    let _ = (frag_a, frag_b);
}

#[test]
fn fragment_info_windows_and_vacuum() {
    use crate::FragmentInfo;

    let resources = resources();
    let tracker = tracker();
    let schema = sparse_2d_schema();
    let array_uri = "mem://arrays/windows";
    let key = EncryptionKey::no_encryption();

    let frag = write_sparse_2d(&resources, &tracker, &schema, array_uri);
    // A vacuum file excludes its listed fragment from loading.
    let vacuumed = write_sparse_2d(&resources, &tracker, &schema, array_uri);
    resources
        .vfs()
        .write(
            &format!("{array_uri}/__consolidation.vac"),
            format!("{}\n", vacuumed.fragment_uri()).as_bytes(),
        )
        .unwrap();

    let mut info = FragmentInfo::new(array_uri, Arc::clone(&resources), Arc::clone(&tracker));
    info.load(
        0,
        u64::MAX,
        &key,
        schema_map(&schema),
        &ConsolidatedFooters::default(),
    )
    .unwrap();
    assert_eq!(info.fragment_num().unwrap(), 1);
    assert_eq!(info.to_vacuum_num().unwrap(), 1);
    assert_eq!(
        info.fragment(0).unwrap().name(),
        frag.fragment_name().name()
    );

    // A window past every fragment's range selects nothing.
    let mut late = FragmentInfo::new(array_uri, Arc::clone(&resources), Arc::clone(&tracker));
    late.load(
        10,
        20,
        &key,
        schema_map(&schema),
        &ConsolidatedFooters::default(),
    )
    .unwrap();
    assert_eq!(late.fragment_num().unwrap(), 0);
}

#[test]
fn fragment_info_load_and_replace() {
    use crate::FragmentInfo;

    let resources = resources();
    let tracker = tracker();
    let schema = sparse_2d_schema();
    let array_uri = "mem://arrays/replace";
    let key = EncryptionKey::no_encryption();

    let frag_a = write_sparse_2d(&resources, &tracker, &schema, array_uri);
    let frag_b = write_sparse_2d(&resources, &tracker, &schema, array_uri);

    let mut info = FragmentInfo::new(array_uri, Arc::clone(&resources), Arc::clone(&tracker));
    info.load(
        0,
        u64::MAX,
        &key,
        schema_map(&schema),
        &ConsolidatedFooters::default(),
    )
    .unwrap();
    assert_eq!(info.fragment_num().unwrap(), 2);

    // Consolidate both fragments into one written elsewhere in the array.
    let merged = write_sparse_2d(&resources, &tracker, &schema, array_uri);
    info.load_and_replace(
        merged.fragment_uri(),
        &[
            frag_a.fragment_uri().to_string(),
            frag_b.fragment_uri().to_string(),
        ],
        &key,
    )
    .unwrap();
    assert_eq!(info.fragment_num().unwrap(), 1);
    assert_eq!(
        info.fragment(0).unwrap().name(),
        merged.fragment_name().name()
    );

    // Replacing something that is no longer loaded fails.
    assert!(info
        .load_and_replace(
            merged.fragment_uri(),
            &[frag_a.fragment_uri().to_string()],
            &key
        )
        .is_err());
}

#[test]
fn encoded_data_file_names() {
    let resources = resources();
    let tracker = tracker();
    let schema = mixed_schema(16);
    let meta = FragmentMetadata::new(
        Arc::clone(&resources),
        Arc::clone(&tracker),
        Arc::clone(&schema),
        "mem://arrays/names",
        (1, 1),
        true,
        true,
    );
    assert_eq!(meta.encode_name("a").unwrap(), "a0");
    assert_eq!(meta.encode_name("s").unwrap(), "a1");
    assert_eq!(meta.encode_name("x").unwrap(), "d0");
    assert_eq!(meta.encode_name("name").unwrap(), "d1");
    assert_eq!(meta.encode_name(tessera_dtype::TIMESTAMPS_NAME).unwrap(), "t");
    assert_eq!(
        meta.encode_name(tessera_dtype::DELETE_TIMESTAMPS_NAME).unwrap(),
        "dt"
    );
    assert_eq!(
        meta.encode_name(tessera_dtype::DELETE_CONDITION_INDEX_NAME)
            .unwrap(),
        "dci"
    );
    assert!(meta.uri("a").unwrap().ends_with("/a0.tdb"));
    assert!(meta.var_uri("s").unwrap().ends_with("/a1_var.tdb"));
    assert!(meta.validity_uri("a").unwrap().ends_with("/a0_validity.tdb"));
}
