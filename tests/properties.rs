//! Property-based tests for block access, validation and CSR structure.

use proptest::collection::vec as prop_vec;
use proptest::prelude::*;

use numeric_tables::data::{
    AccessMode, AosTable, CsrTable, Dictionary, FeatureDescriptor, HomogenTable, LayoutMask,
    MemoryFlags, NumericTable, NumericTableExt, PackedTable, Scalar, ScalarType, SoaTable,
    StorageLayout,
};
use numeric_tables::validate::{check_numeric_table, TableCheck};

// =============================================================================
// Strategies
// =============================================================================

/// Small integers are exact in every scalar type except bool.
fn arb_cells(max_rows: usize, max_cols: usize) -> impl Strategy<Value = (usize, usize, Vec<f64>)> {
    (1..=max_rows, 1..=max_cols).prop_flat_map(|(rows, cols)| {
        prop_vec((-100i32..100).prop_map(f64::from), rows * cols)
            .prop_map(move |cells| (rows, cols, cells))
    })
}

/// Mostly-zero cells for sparse tables.
fn arb_sparse_cells() -> impl Strategy<Value = (usize, usize, Vec<f64>)> {
    (1usize..8, 1usize..8).prop_flat_map(|(rows, cols)| {
        prop_vec(
            prop_oneof![3 => Just(0.0), 1 => (-50i32..50).prop_map(f64::from)],
            rows * cols,
        )
        .prop_map(move |cells| (rows, cols, cells))
    })
}

fn arb_numeric_type() -> impl Strategy<Value = ScalarType> {
    prop::sample::select(vec![
        ScalarType::I8,
        ScalarType::I16,
        ScalarType::I32,
        ScalarType::I64,
        ScalarType::F32,
        ScalarType::F64,
    ])
}

fn arb_packed_layout() -> impl Strategy<Value = StorageLayout> {
    prop::sample::select(LayoutMask::PACKED.layouts().collect::<Vec<_>>())
}

fn mixed_features(types: &[ScalarType]) -> Vec<FeatureDescriptor> {
    types.iter().map(|&t| FeatureDescriptor::new(t)).collect()
}

/// Write every row through one `T` block, then read them back as `T`.
fn write_then_read_as<T: Scalar, N: NumericTable>(table: &mut N, cells: &[T]) -> Vec<T> {
    let rows = table.num_rows();
    let mut block = table
        .get_block_of_rows_mut::<T>(0, rows, AccessMode::WriteOnly)
        .unwrap();
    block.copy_from_slice(cells);
    block.release().unwrap();
    table.get_block_of_rows::<T>(0, rows).unwrap().into_owned()
}

fn write_then_read<N: NumericTable>(table: &mut N, cells: &[f64]) -> Vec<f64> {
    write_then_read_as(table, cells)
}

/// Symmetric matrix built from the lower triangle of `cells`.
fn symmetrize(cells: &mut [f64], n: usize) {
    for i in 0..n {
        for j in (i + 1)..n {
            cells[i * n + j] = cells[j * n + i];
        }
    }
}

// =============================================================================
// Round trip
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Dense tables of any numeric type keep small integers exactly.
    #[test]
    fn dense_round_trip((rows, cols, cells) in arb_cells(12, 6)) {
        let mut f64_table = HomogenTable::<f64>::new(rows, cols).unwrap();
        prop_assert_eq!(write_then_read(&mut f64_table, &cells), cells.clone());

        let mut i16_table = HomogenTable::<i16>::new(rows, cols).unwrap();
        prop_assert_eq!(write_then_read(&mut i16_table, &cells), cells);
    }

    /// Heterogeneous record and column tables convert per field.
    #[test]
    fn aos_and_soa_round_trip(
        types in prop_vec(arb_numeric_type(), 1..6),
        rows in 1usize..10,
        seed in prop_vec(-100i32..100, 60),
    ) {
        let cols = types.len();
        let cells: Vec<f64> = (0..rows * cols).map(|i| f64::from(seed[i % seed.len()])).collect();

        let mut aos = AosTable::new(Dictionary::packed_record(mixed_features(&types)), rows).unwrap();
        prop_assert_eq!(write_then_read(&mut aos, &cells), cells.clone());

        let mut soa = SoaTable::new(Dictionary::from_features(mixed_features(&types)), rows).unwrap();
        prop_assert_eq!(write_then_read(&mut soa, &cells), cells);
    }

    /// Blocks in the stored 64-bit type keep the full integer range.
    #[test]
    fn wide_integers_round_trip_exactly(
        rows in 1usize..8,
        signed in prop_vec(any::<i64>(), 16),
        unsigned in prop_vec(any::<u64>(), 16),
    ) {
        let signed = &signed[..rows * 2];
        let unsigned = &unsigned[..rows * 2];

        let i64_record = Dictionary::packed_record(mixed_features(&[ScalarType::I64; 2]));
        let mut aos = AosTable::new(i64_record, rows).unwrap();
        prop_assert_eq!(write_then_read_as(&mut aos, signed), signed.to_vec());
        let mut soa = SoaTable::new(Dictionary::homogeneous(2, ScalarType::I64), rows).unwrap();
        prop_assert_eq!(write_then_read_as(&mut soa, signed), signed.to_vec());

        let u64_record = Dictionary::packed_record(mixed_features(&[ScalarType::U64; 2]));
        let mut aos = AosTable::new(u64_record, rows).unwrap();
        prop_assert_eq!(write_then_read_as(&mut aos, unsigned), unsigned.to_vec());
        let mut soa = SoaTable::new(Dictionary::homogeneous(2, ScalarType::U64), rows).unwrap();
        prop_assert_eq!(write_then_read_as(&mut soa, unsigned), unsigned.to_vec());
    }

    /// Dense writes into CSR insert and drop non-zeros as needed.
    #[test]
    fn csr_round_trip((rows, cols, cells) in arb_sparse_cells()) {
        let mut csr = CsrTable::<f32>::new(rows, cols).unwrap();
        prop_assert_eq!(write_then_read(&mut csr, &cells), cells.clone());

        let expected_nnz = cells.iter().filter(|v| **v != 0.0).count();
        prop_assert!(csr.nnz() >= expected_nnz);
    }

    /// Packed tables round-trip matrices that fit their fill pattern.
    #[test]
    fn packed_round_trip(n in 1usize..7, layout in arb_packed_layout(), seed in prop_vec(-100i32..100, 49)) {
        let mut cells: Vec<f64> = seed[..n * n].iter().map(|&v| f64::from(v)).collect();
        if layout.is_symmetric() {
            symmetrize(&mut cells, n);
        } else {
            for i in 0..n {
                for j in 0..n {
                    let outside = if layout.is_upper() { j < i } else { j > i };
                    if outside {
                        cells[i * n + j] = 0.0;
                    }
                }
            }
        }

        let mut table = PackedTable::<f64>::square(layout, n).unwrap();
        prop_assert_eq!(write_then_read(&mut table, &cells), cells);
        prop_assert_eq!(table.num_rows(), table.num_columns());
    }

    /// Writing a sub-range touches only that range.
    #[test]
    fn partial_write_round_trip(
        (rows, cols, cells) in arb_cells(10, 4),
        start_frac in 0.0f64..1.0,
        value in -100i32..100,
    ) {
        let start = ((rows as f64) * start_frac) as usize;
        let n = rows - start;
        let mut table = HomogenTable::from_vec(cells.clone(), rows, cols).unwrap();
        {
            let mut block = table
                .get_block_of_rows_mut::<i32>(start, n, AccessMode::WriteOnly)
                .unwrap();
            block.fill(value);
        }
        let block = table.get_block_of_rows::<f64>(0, rows).unwrap();
        prop_assert_eq!(&block[..start * cols], &cells[..start * cols]);
        prop_assert!(block[start * cols..].iter().all(|&v| v == f64::from(value)));
    }
}

// =============================================================================
// Bounds
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Requests past the last row fail and leave the table untouched.
    #[test]
    fn out_of_bounds_requests_fail(
        (rows, cols, cells) in arb_cells(10, 3),
        start in 0usize..15,
        n in 1usize..15,
    ) {
        prop_assume!(start + n > rows);

        let mut dense = HomogenTable::from_vec(cells.clone(), rows, cols).unwrap();
        prop_assert!(dense.get_block_of_rows::<f64>(start, n).is_err());
        prop_assert!(dense.get_block_of_rows_mut::<f32>(start, n, AccessMode::WriteOnly).is_err());
        prop_assert!(dense.get_block_of_rows_mut::<f64>(start, n, AccessMode::ReadWrite).is_err());
        prop_assert_eq!(dense.as_slice(), cells.as_slice());

        let mut csr = CsrTable::from_dense(&cells, rows, cols).unwrap();
        let before = csr.values().to_vec();
        prop_assert!(csr.get_block_of_rows_mut::<f64>(start, n, AccessMode::WriteOnly).is_err());
        prop_assert!(csr.get_sparse_block_of_rows::<f64>(start, n).is_err());
        prop_assert_eq!(csr.values(), before.as_slice());
    }
}

// =============================================================================
// Validator monotonicity
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// A missing table never passes, whatever the other parameters.
    #[test]
    fn null_table_never_passes(
        forbidden in any::<u32>(),
        cols in 0usize..5,
        rows in 0usize..5,
        allow_zero in any::<bool>(),
    ) {
        let status = check_numeric_table(
            None,
            "x",
            LayoutMask::from_bits(forbidden),
            MemoryFlags::ANY,
            cols,
            rows,
            allow_zero,
        );
        prop_assert!(!status.is_ok());
    }

    /// A forbidden layout never passes, whatever the other parameters.
    #[test]
    fn forbidden_layout_never_passes(
        forbidden in any::<u32>(),
        cols in 0usize..5,
        rows in 0usize..5,
        allow_zero_columns in any::<bool>(),
        allow_zero_rows in any::<bool>(),
        which in 0usize..3,
    ) {
        let dense = HomogenTable::<f64>::new(3, 3).unwrap();
        let csr = CsrTable::<f64>::new(3, 3).unwrap();
        let packed = PackedTable::<f64>::square(StorageLayout::LowerPackedTriangular, 3).unwrap();
        let table: &dyn NumericTable = match which {
            0 => &dense,
            1 => &csr,
            _ => &packed,
        };
        let mask = LayoutMask::from_bits(forbidden);
        let check = TableCheck {
            forbidden_layouts: mask,
            allowed_memory: MemoryFlags::ANY,
            expected_columns: cols,
            expected_rows: rows,
            allow_zero_columns,
            allow_zero_rows,
            ..TableCheck::default()
        };
        let status = check.check(Some(table));
        if mask.contains(table.layout()) {
            prop_assert!(!status.is_ok());
        }
        if !mask.contains(table.layout()) && (cols == 0 || cols == 3) && (rows == 0 || rows == 3) {
            prop_assert!(status.is_ok(), "{}", status);
        }
    }
}

// =============================================================================
// CSR structure
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Row offsets stay non-decreasing, one longer than the row count, and
    /// end at the non-zero count, across construction and writes.
    #[test]
    fn csr_offsets_are_monotonic(
        (rows, cols, cells) in arb_sparse_cells(),
        update in arb_sparse_cells(),
    ) {
        let mut csr = CsrTable::from_dense(&cells, rows, cols).unwrap();
        let check = |csr: &CsrTable<f64>| -> Result<(), TestCaseError> {
            let offsets = csr.row_offsets();
            prop_assert_eq!(offsets.len(), csr.num_rows() + 1);
            prop_assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(offsets.last().copied(), Some(csr.nnz()));
            prop_assert!(csr.check_structure().is_ok());
            Ok(())
        };
        check(&csr)?;

        let (_, _, new_cells) = update;
        let width = cols;
        let take = rows.min(new_cells.len() / width);
        if take > 0 {
            let mut block = csr
                .get_block_of_rows_mut::<f64>(rows - take, take, AccessMode::WriteOnly)
                .unwrap();
            block.copy_from_slice(&new_cells[..take * width]);
            block.release().unwrap();
        }
        check(&csr)?;
    }
}
