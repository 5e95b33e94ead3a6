//! Compressed Sparse Row (CSR) table.
//!
//! Only non-zero cells are stored, row by row:
//!
//! - `values`: stored cells, row by row
//! - `column_indices`: column of each stored cell, strictly increasing
//!   within a row
//! - `row_offsets`: `row_offsets[i]..row_offsets[i + 1]` is row `i`'s
//!   range in `values`; `num_rows + 1` entries starting at zero
//!
//! Indices are kept zero-based internally. One-based arrays (as produced by
//! Fortran-style sparse libraries) are converted on the way in and out with
//! [`CsrIndexing`].
//!
//! Dense row blocks expand rows with zeros. Writing dense rows back keeps
//! every stored cell (even if it becomes zero) and inserts cells for new
//! non-zero values.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::ops::{Deref, DerefMut, Range};
use std::sync::Arc;

use tracing::{debug, trace};

use super::block::{allocate, AccessMode};
use super::dictionary::{Dictionary, SharedDictionary};
use super::homogen::cell_count;
use super::layout::{check_column, check_len, check_rows, row_range, LayoutMask, StorageLayout};
use super::statistics::BasicStatistics;
use super::table::{check_dictionary_len, MemoryStatus, NumericTable, NumericTableExt, TableKind};
use super::types::{convert_slice, Scalar, ScalarSlice, ScalarSliceMut};
use crate::error::{Status, TableError};
use crate::persist::{TablePayload, TableTag};

/// Base of the column indices and row offsets in external arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsrIndexing {
    #[default]
    ZeroBased,
    OneBased,
}

impl CsrIndexing {
    /// Value added to every index and offset.
    #[inline]
    pub const fn base(self) -> usize {
        match self {
            CsrIndexing::ZeroBased => 0,
            CsrIndexing::OneBased => 1,
        }
    }
}

/// Check the CSR invariants for zero-based arrays.
pub fn validate_csr(
    nnz: usize,
    column_indices: &[usize],
    row_offsets: &[usize],
    num_columns: usize,
) -> Result<(), TableError> {
    let invalid = |msg: String| Err(TableError::InvalidCsr(msg));
    match row_offsets.first() {
        None => return invalid("row offsets must have num_rows + 1 entries".into()),
        Some(&first) if first != 0 => {
            return invalid(format!("first row offset is {first}, expected 0"))
        }
        Some(_) => {}
    }
    if let Some(i) = row_offsets.windows(2).position(|w| w[0] > w[1]) {
        return invalid(format!(
            "row offsets decrease at row {i}: {} > {}",
            row_offsets[i],
            row_offsets[i + 1]
        ));
    }
    let last = row_offsets[row_offsets.len() - 1];
    if last != nnz || column_indices.len() != nnz {
        return invalid(format!(
            "last row offset {last}, {} column indices and {nnz} values must agree",
            column_indices.len()
        ));
    }
    if let Some(&col) = column_indices.iter().find(|&&c| c >= num_columns) {
        return invalid(format!("column index {col} out of bounds for {num_columns} columns"));
    }
    for (row, w) in row_offsets.windows(2).enumerate() {
        let cols = &column_indices[w[0]..w[1]];
        if cols.windows(2).any(|c| c[0] >= c[1]) {
            return invalid(format!("column indices of row {row} are not strictly increasing"));
        }
    }
    Ok(())
}

/// Sparse table in compressed-row form with values of type `T`.
///
/// # Example
///
/// ```
/// use numeric_tables::data::{CsrIndexing, CsrTable, NumericTableExt};
///
/// // [1 0 2]
/// // [0 0 3]
/// let table = CsrTable::from_raw_parts(
///     vec![1.0f64, 2.0, 3.0],
///     vec![1, 3, 3],
///     vec![1, 3, 4],
///     3,
///     CsrIndexing::OneBased,
/// )
/// .unwrap();
/// assert_eq!(table.column_indices(), &[0, 2, 2]);
/// let dense = table.get_block_of_rows::<f64>(0, 2).unwrap();
/// assert_eq!(&*dense, &[1.0, 0.0, 2.0, 0.0, 0.0, 3.0]);
/// ```
#[derive(Debug)]
pub struct CsrTable<T: Scalar = f64> {
    values: Vec<T>,
    column_indices: Vec<usize>,
    row_offsets: Vec<usize>,
    num_columns: usize,
    status: MemoryStatus,
    dictionary: SharedDictionary,
    statistics: BasicStatistics,
}

// =============================================================================
// Constructors
// =============================================================================

impl<T: Scalar> CsrTable<T> {
    fn with_parts(
        values: Vec<T>,
        column_indices: Vec<usize>,
        row_offsets: Vec<usize>,
        num_columns: usize,
        status: MemoryStatus,
    ) -> Self {
        Self {
            values,
            column_indices,
            row_offsets,
            num_columns,
            status,
            dictionary: Dictionary::homogeneous(num_columns, T::TYPE).into(),
            statistics: BasicStatistics::default(),
        }
    }

    /// All-zero table with no stored cells.
    pub fn new(num_rows: usize, num_columns: usize) -> Result<Self, TableError> {
        let row_offsets = allocate::<usize>(num_rows.saturating_add(1))?;
        Ok(Self::with_parts(
            Vec::new(),
            Vec::new(),
            row_offsets,
            num_columns,
            MemoryStatus::InternallyAllocated,
        ))
    }

    /// Attach caller-provided CSR arrays.
    ///
    /// Arrays in [`CsrIndexing::OneBased`] form are rebased to zero. The
    /// structure is validated; the table is user-allocated, so writes that
    /// would insert new cells fail.
    pub fn from_raw_parts(
        values: Vec<T>,
        mut column_indices: Vec<usize>,
        mut row_offsets: Vec<usize>,
        num_columns: usize,
        indexing: CsrIndexing,
    ) -> Result<Self, TableError> {
        let base = indexing.base();
        if base > 0 {
            for v in column_indices.iter_mut().chain(row_offsets.iter_mut()) {
                *v = v.checked_sub(base).ok_or_else(|| {
                    TableError::InvalidCsr(format!("index 0 in {indexing:?} arrays"))
                })?;
            }
        }
        validate_csr(values.len(), &column_indices, &row_offsets, num_columns)?;
        debug!(
            num_rows = row_offsets.len() - 1,
            num_columns,
            nnz = values.len(),
            "attached csr arrays"
        );
        Ok(Self::with_parts(
            values,
            column_indices,
            row_offsets,
            num_columns,
            MemoryStatus::UserAllocated,
        ))
    }

    /// Take over attached storage, e.g. after decoding it from an archive.
    pub(crate) fn into_internal(mut self) -> Self {
        self.status = MemoryStatus::InternallyAllocated;
        self
    }

    /// Compress row-major dense data, storing values for which `include`
    /// returns true.
    pub fn from_dense_with_predicate<F>(
        data: &[T],
        num_rows: usize,
        num_columns: usize,
        include: F,
    ) -> Result<Self, TableError>
    where
        F: Fn(T) -> bool,
    {
        check_len(cell_count(num_rows, num_columns)?, data.len())?;
        let mut values = Vec::new();
        let mut column_indices = Vec::new();
        let offsets_len = num_rows
            .checked_add(1)
            .ok_or(TableError::AllocationFailed { bytes: usize::MAX })?;
        let mut row_offsets = allocate::<usize>(offsets_len)?;
        for row in 0..num_rows {
            let cells = &data[row * num_columns..(row + 1) * num_columns];
            for (col, &v) in cells.iter().enumerate() {
                if include(v) {
                    values.push(v);
                    column_indices.push(col);
                }
            }
            row_offsets[row + 1] = values.len();
        }
        Ok(Self::with_parts(
            values,
            column_indices,
            row_offsets,
            num_columns,
            MemoryStatus::InternallyAllocated,
        ))
    }

    /// Compress row-major dense data, dropping zeros.
    ///
    /// NaN values are stored.
    pub fn from_dense(data: &[T], num_rows: usize, num_columns: usize) -> Result<Self, TableError> {
        Self::from_dense_with_predicate(data, num_rows, num_columns, |v| v != T::default())
    }

    /// Compress any table, converting cells to `T`.
    pub fn from_table<N: NumericTable + ?Sized>(table: &N) -> Result<Self, TableError> {
        let block = table.get_block_of_rows::<T>(0, table.num_rows())?;
        Self::from_dense(&block, table.num_rows(), table.num_columns())
    }

    /// Export the arrays with the requested index base.
    pub fn to_raw_parts(&self, indexing: CsrIndexing) -> (Vec<T>, Vec<usize>, Vec<usize>) {
        let base = indexing.base();
        (
            self.values.clone(),
            self.column_indices.iter().map(|&c| c + base).collect(),
            self.row_offsets.iter().map(|&o| o + base).collect(),
        )
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of stored cells.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Stored values, row by row.
    #[inline]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Stored values, mutably. The sparsity pattern cannot change this way.
    #[inline]
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Zero-based column index of each stored value.
    #[inline]
    pub fn column_indices(&self) -> &[usize] {
        &self.column_indices
    }

    /// Zero-based row offsets (`num_rows + 1` entries).
    #[inline]
    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// Iterate over `(column, value)` pairs of `row`.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let span = self.row_span(row).unwrap_or(0..0);
        self.column_indices[span.clone()]
            .iter()
            .copied()
            .zip(self.values[span].iter().copied())
    }

    /// Cell `(row, col)`; zero if not stored, `None` if out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if col >= self.num_columns {
            return None;
        }
        let span = self.row_span(row)?;
        Some(match self.column_indices[span.clone()].binary_search(&col) {
            Ok(k) => self.values[span.start + k],
            Err(_) => T::default(),
        })
    }

    #[inline]
    fn row_span(&self, row: usize) -> Option<Range<usize>> {
        Some(*self.row_offsets.get(row)?..*self.row_offsets.get(row + 1)?)
    }

    fn expand(&self, rows: Range<usize>) -> Result<Vec<T>, TableError> {
        let width = self.num_columns;
        let mut dense = allocate::<T>(cell_count(rows.len(), width)?)?;
        for (i, row) in rows.enumerate() {
            let out = &mut dense[i * width..(i + 1) * width];
            for (col, v) in self.row(row) {
                out[col] = v;
            }
        }
        Ok(dense)
    }

    // =========================================================================
    // Sparse blocks
    // =========================================================================

    /// Sparse view of rows `start..start + n` with values as `U`.
    ///
    /// Values are borrowed when `U` is the stored type. Row offsets are
    /// rebased so the block's first row starts at zero.
    pub fn get_sparse_block_of_rows<U: Scalar>(
        &self,
        start: usize,
        n: usize,
    ) -> Result<CsrBlock<'_, U>, TableError> {
        let rows = row_range(start, n, self.num_rows())?;
        let lo = self.row_offsets[rows.start];
        let hi = self.row_offsets[rows.end];
        let values = match U::unwrap(T::wrap(&self.values[lo..hi])) {
            Some(same) => Cow::Borrowed(same),
            None => {
                let mut converted = allocate::<U>(hi - lo)?;
                convert_slice(&self.values[lo..hi], &mut converted);
                Cow::Owned(converted)
            }
        };
        let row_offsets = self.row_offsets[rows.start..=rows.end]
            .iter()
            .map(|&o| o - lo)
            .collect();
        trace!(start, n, nnz = hi - lo, "sparse row block");
        Ok(CsrBlock {
            values,
            column_indices: &self.column_indices[lo..hi],
            row_offsets,
            start,
            num_columns: self.num_columns,
        })
    }

    /// Mutable view of the stored values of rows `start..start + n` as `U`.
    ///
    /// The sparsity pattern is fixed; `WriteOnly`/`ReadWrite` blocks write
    /// their values back on release or drop.
    pub fn get_sparse_block_of_rows_mut<U: Scalar>(
        &mut self,
        start: usize,
        n: usize,
        mode: AccessMode,
    ) -> Result<CsrBlockMut<'_, T, U>, TableError> {
        let rows = row_range(start, n, self.num_rows())?;
        let span = self.row_offsets[rows.start]..self.row_offsets[rows.end];
        let mut buffer = allocate::<U>(span.len())?;
        if mode.reads() {
            convert_slice(&self.values[span.clone()], &mut buffer);
        }
        Ok(CsrBlockMut {
            table: self,
            buffer,
            rows,
            span,
            mode,
            released: false,
        })
    }
}

// =============================================================================
// NumericTable
// =============================================================================

impl<T: Scalar> NumericTable for CsrTable<T> {
    fn num_rows(&self) -> usize {
        self.row_offsets.len().saturating_sub(1)
    }

    fn num_columns(&self) -> usize {
        self.num_columns
    }

    fn layout(&self) -> StorageLayout {
        StorageLayout::Csr
    }

    fn dictionary(&self) -> &SharedDictionary {
        &self.dictionary
    }

    fn set_dictionary(&mut self, dictionary: SharedDictionary) -> Result<(), TableError> {
        {
            let dict = dictionary.read();
            if dict.num_features() != self.num_columns {
                return Err(TableError::DictionaryMismatch(format!(
                    "{} features for {} columns",
                    dict.num_features(),
                    self.num_columns
                )));
            }
            if let Some(f) = dict.iter().find(|f| f.scalar_type != T::TYPE) {
                return Err(TableError::ScalarTypeMismatch {
                    expected: T::TYPE,
                    actual: f.scalar_type,
                });
            }
        }
        self.dictionary = dictionary;
        Ok(())
    }

    fn memory_status(&self) -> MemoryStatus {
        self.status
    }

    fn basic_statistics(&self) -> &BasicStatistics {
        &self.statistics
    }

    fn basic_statistics_mut(&mut self) -> &mut BasicStatistics {
        &mut self.statistics
    }

    fn read_rows(&self, rows: Range<usize>, dst: ScalarSliceMut<'_>) -> Result<(), TableError> {
        check_rows(&rows, self.num_rows())?;
        check_len(cell_count(rows.len(), self.num_columns)?, dst.len())?;
        let dense = self.expand(rows)?;
        dst.fill_from(&dense);
        Ok(())
    }

    fn write_rows(&mut self, rows: Range<usize>, src: ScalarSlice<'_>) -> Result<(), TableError> {
        check_rows(&rows, self.num_rows())?;
        let width = self.num_columns;
        check_len(cell_count(rows.len(), width)?, src.len())?;
        let mut dense = allocate::<T>(src.len())?;
        src.convert_into(T::wrap_mut(&mut dense));

        let lo = self.row_offsets[rows.start];
        let hi = self.row_offsets[rows.end];
        let mut values = Vec::new();
        let mut indices = Vec::new();
        let mut ends = Vec::with_capacity(rows.len());
        for (i, row) in rows.clone().enumerate() {
            let stored = &self.column_indices[self.row_offsets[row]..self.row_offsets[row + 1]];
            for (col, &v) in dense[i * width..(i + 1) * width].iter().enumerate() {
                if v != T::default() || stored.binary_search(&col).is_ok() {
                    values.push(v);
                    indices.push(col);
                }
            }
            ends.push(values.len());
        }

        // Stored cells are always kept, so equal counts mean an unchanged pattern.
        if values.len() != hi - lo && self.status == MemoryStatus::UserAllocated {
            return Err(TableError::OwnershipViolation(format!(
                "writing rows {}..{} would insert {} cells into user-provided csr arrays",
                rows.start,
                rows.end,
                values.len() - (hi - lo)
            )));
        }

        let new_hi = lo + values.len();
        self.values.splice(lo..hi, values);
        self.column_indices.splice(lo..hi, indices);
        for (row, end) in rows.clone().zip(ends) {
            self.row_offsets[row + 1] = lo + end;
        }
        for offset in &mut self.row_offsets[rows.end + 1..] {
            *offset = *offset - hi + new_hi;
        }
        Ok(())
    }

    fn read_column(
        &self,
        column: usize,
        rows: Range<usize>,
        dst: ScalarSliceMut<'_>,
    ) -> Result<(), TableError> {
        check_column(column, self.num_columns)?;
        check_rows(&rows, self.num_rows())?;
        check_len(rows.len(), dst.len())?;
        let mut values = allocate::<T>(rows.len())?;
        for (slot, row) in values.iter_mut().zip(rows) {
            *slot = self.get(row, column).unwrap_or_default();
        }
        dst.fill_from(&values);
        Ok(())
    }

    fn write_column(
        &mut self,
        column: usize,
        rows: Range<usize>,
        src: ScalarSlice<'_>,
    ) -> Result<(), TableError> {
        check_column(column, self.num_columns)?;
        check_rows(&rows, self.num_rows())?;
        check_len(rows.len(), src.len())?;
        let mut column_values = allocate::<T>(rows.len())?;
        src.convert_into(T::wrap_mut(&mut column_values));
        let mut dense = self.expand(rows.clone())?;
        for (i, v) in column_values.into_iter().enumerate() {
            dense[i * self.num_columns + column] = v;
        }
        self.write_rows(rows, T::wrap(&dense))
    }

    fn resize(&mut self, num_rows: usize) -> Result<(), TableError> {
        let current = self.num_rows();
        if num_rows == current {
            return Ok(());
        }
        if self.status == MemoryStatus::UserAllocated {
            return Err(TableError::OwnershipViolation(format!(
                "cannot resize user-provided csr arrays from {current} to {num_rows} rows"
            )));
        }
        if num_rows < current {
            self.row_offsets.truncate(num_rows + 1);
            let nnz = self.row_offsets[num_rows];
            self.values.truncate(nnz);
            self.column_indices.truncate(nnz);
        } else {
            let nnz = self.values.len();
            self.row_offsets
                .try_reserve_exact(num_rows - current)
                .map_err(|_| TableError::AllocationFailed { bytes: usize::MAX })?;
            self.row_offsets.resize(num_rows + 1, nnz);
        }
        debug!(from = current, to = num_rows, "resized csr table");
        Ok(())
    }

    fn check_structure(&self) -> Status {
        check_dictionary_len(&self.dictionary, self.num_columns)
            | Status::from(validate_csr(
                self.values.len(),
                &self.column_indices,
                &self.row_offsets,
                self.num_columns,
            ))
    }

    fn serialization_tag(&self) -> TableTag {
        TableTag::Csr
    }

    fn to_payload(&self) -> Result<TablePayload, TableError> {
        Ok(TablePayload::Csr {
            num_columns: self.num_columns,
            values: T::into_scalar_vec(self.values.clone()),
            column_indices: self.column_indices.clone(),
            row_offsets: self.row_offsets.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T: Scalar> TableKind for CsrTable<T> {
    const LAYOUTS: LayoutMask = LayoutMask::CSR;
}

// =============================================================================
// Sparse block descriptors
// =============================================================================

/// Read-only sparse view of a run of rows.
#[derive(Debug, Clone)]
pub struct CsrBlock<'a, U: Scalar> {
    values: Cow<'a, [U]>,
    column_indices: &'a [usize],
    row_offsets: Vec<usize>,
    start: usize,
    num_columns: usize,
}

impl<'a, U: Scalar> CsrBlock<'a, U> {
    /// Stored values of the block's rows.
    pub fn values(&self) -> &[U] {
        &self.values
    }

    /// Zero-based column index of each stored value.
    pub fn column_indices(&self) -> &'a [usize] {
        self.column_indices
    }

    /// Row offsets rebased to the block (first entry is zero).
    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// First table row of the block.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of rows in the block.
    pub fn num_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    /// Number of stored cells in the block.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the values borrow table storage.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.values, Cow::Borrowed(_))
    }

    /// Iterate over `(column, value)` pairs of block row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, U)> + '_ {
        let span = match (self.row_offsets.get(i), self.row_offsets.get(i + 1)) {
            (Some(&a), Some(&b)) => a..b,
            _ => 0..0,
        };
        self.column_indices[span.clone()]
            .iter()
            .copied()
            .zip(self.values[span].iter().copied())
    }

    /// Expand into row-major dense values.
    pub fn to_dense(&self) -> Vec<U> {
        let mut dense = vec![U::default(); self.num_rows() * self.num_columns];
        for i in 0..self.num_rows() {
            for (col, v) in self.row(i) {
                dense[i * self.num_columns + col] = v;
            }
        }
        dense
    }
}

/// Mutable view of the stored values of a run of rows.
///
/// Dereferences to the values as `U`; the column pattern is read-only.
pub struct CsrBlockMut<'a, T: Scalar, U: Scalar> {
    table: &'a mut CsrTable<T>,
    buffer: Vec<U>,
    rows: Range<usize>,
    span: Range<usize>,
    mode: AccessMode,
    released: bool,
}

impl<T: Scalar, U: Scalar> CsrBlockMut<'_, T, U> {
    /// Zero-based column index of each value.
    pub fn column_indices(&self) -> &[usize] {
        &self.table.column_indices[self.span.clone()]
    }

    /// Row offsets rebased to the block.
    pub fn row_offsets(&self) -> Vec<usize> {
        self.table.row_offsets[self.rows.start..=self.rows.end]
            .iter()
            .map(|&o| o - self.span.start)
            .collect()
    }

    /// Access mode the block was acquired with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Write the values back (if the mode writes) and end the borrow.
    pub fn release(mut self) {
        self.flush();
    }

    fn flush(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.mode.writes() {
            convert_slice(&self.buffer, &mut self.table.values[self.span.clone()]);
            trace!(rows = ?self.rows, "flushed sparse block");
        }
    }
}

impl<T: Scalar, U: Scalar> Deref for CsrBlockMut<'_, T, U> {
    type Target = [U];

    fn deref(&self) -> &[U] {
        &self.buffer
    }
}

impl<T: Scalar, U: Scalar> DerefMut for CsrBlockMut<'_, T, U> {
    fn deref_mut(&mut self) -> &mut [U] {
        &mut self.buffer
    }
}

impl<T: Scalar, U: Scalar> Drop for CsrBlockMut<'_, T, U> {
    fn drop(&mut self) {
        self.flush();
    }
}

impl<T: Scalar, U: Scalar> fmt::Debug for CsrBlockMut<'_, T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrBlockMut")
            .field("rows", &self.rows)
            .field("mode", &self.mode)
            .field("values", &self.buffer)
            .finish()
    }
}
