//! Dense homogeneous table: one contiguous row-major array of `T`.

use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use super::block::allocate;
use super::dictionary::{Dictionary, SharedDictionary};
use super::layout::{check_column, check_len, check_rows, LayoutMask, StorageLayout, StridedIter};
use super::statistics::BasicStatistics;
use super::table::{
    check_dictionary_len, ensure_allocated, MemoryStatus, NumericTable, NumericTableExt, TableKind,
};
use super::types::{Scalar, ScalarSlice, ScalarSliceMut, ScalarType};
use crate::error::{Status, TableError};
use crate::persist::{TablePayload, TableTag};

/// Number of cells in a `num_rows x num_columns` table.
pub(crate) fn cell_count(num_rows: usize, num_columns: usize) -> Result<usize, TableError> {
    num_rows
        .checked_mul(num_columns)
        .ok_or(TableError::AllocationFailed { bytes: usize::MAX })
}

/// Dense row-major table where every column has type `T`.
///
/// The fastest layout: row blocks requested as `T` borrow storage directly.
///
/// # Example
///
/// ```
/// use numeric_tables::data::{HomogenTable, MemoryStatus, NumericTable};
///
/// let table = HomogenTable::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3).unwrap();
/// assert_eq!(table.row_slice(1), Some(&[4.0, 5.0, 6.0][..]));
/// assert_eq!(table.memory_status(), MemoryStatus::UserAllocated);
/// ```
#[derive(Debug)]
pub struct HomogenTable<T: Scalar = f64> {
    data: Vec<T>,
    num_rows: usize,
    num_columns: usize,
    status: MemoryStatus,
    dictionary: SharedDictionary,
    statistics: BasicStatistics,
}

// =============================================================================
// Constructors
// =============================================================================

impl<T: Scalar> HomogenTable<T> {
    fn with_parts(data: Vec<T>, num_rows: usize, num_columns: usize, status: MemoryStatus) -> Self {
        Self {
            data,
            num_rows,
            num_columns,
            status,
            dictionary: Dictionary::homogeneous(num_columns, T::TYPE).into(),
            statistics: BasicStatistics::default(),
        }
    }

    /// Zero-filled table with internally allocated storage.
    pub fn new(num_rows: usize, num_columns: usize) -> Result<Self, TableError> {
        Self::filled(num_rows, num_columns, T::default())
    }

    /// Table with every cell set to `value`.
    pub fn filled(num_rows: usize, num_columns: usize, value: T) -> Result<Self, TableError> {
        let mut data = allocate::<T>(cell_count(num_rows, num_columns)?)?;
        data.fill(value);
        debug!(num_rows, num_columns, scalar = %T::TYPE, "allocated dense table");
        Ok(Self::with_parts(
            data,
            num_rows,
            num_columns,
            MemoryStatus::InternallyAllocated,
        ))
    }

    /// Attach caller-provided row-major data.
    ///
    /// The table is marked user-allocated: it will not reallocate `data`, so
    /// operations that change the row count fail.
    pub fn from_vec(data: Vec<T>, num_rows: usize, num_columns: usize) -> Result<Self, TableError> {
        check_len(cell_count(num_rows, num_columns)?, data.len())?;
        Ok(Self::with_parts(
            data,
            num_rows,
            num_columns,
            MemoryStatus::UserAllocated,
        ))
    }

    /// Copy rows given as slices. All rows must have the same length.
    pub fn from_rows<R: AsRef<[T]>>(rows: &[R]) -> Result<Self, TableError> {
        let num_columns = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = allocate::<T>(cell_count(rows.len(), num_columns)?)?;
        for (dst, row) in data.chunks_exact_mut(num_columns.max(1)).zip(rows) {
            check_len(num_columns, row.as_ref().len())?;
            dst.copy_from_slice(row.as_ref());
        }
        Ok(Self::with_parts(
            data,
            rows.len(),
            num_columns,
            MemoryStatus::InternallyAllocated,
        ))
    }

    /// Take over attached storage, e.g. after decoding it from an archive.
    pub(crate) fn into_internal(mut self) -> Self {
        self.status = MemoryStatus::InternallyAllocated;
        self
    }

    /// Table with a known shape but no storage yet.
    ///
    /// Call [`allocate_data_memory`](Self::allocate_data_memory) before
    /// accessing cells.
    pub fn unallocated(num_rows: usize, num_columns: usize) -> Self {
        Self::with_parts(Vec::new(), num_rows, num_columns, MemoryStatus::NotAllocated)
    }

    /// Copy any table into a dense `T` table, converting every cell.
    pub fn from_table<N: NumericTable + ?Sized>(table: &N) -> Result<Self, TableError> {
        let block = table.get_block_of_rows::<T>(0, table.num_rows())?;
        let mut dense = Self::with_parts(
            block.into_owned(),
            table.num_rows(),
            table.num_columns(),
            MemoryStatus::InternallyAllocated,
        );
        let mut names = table.dictionary().snapshot();
        for feature in names.iter_mut() {
            feature.scalar_type = T::TYPE;
            feature.offset = 0;
        }
        dense.dictionary = names.into();
        Ok(dense)
    }

    // =========================================================================
    // Memory management
    // =========================================================================

    /// Allocate zeroed storage for the current shape.
    pub fn allocate_data_memory(&mut self) -> Result<(), TableError> {
        if self.status == MemoryStatus::UserAllocated {
            return Err(TableError::OwnershipViolation(
                "cannot reallocate user-provided storage".into(),
            ));
        }
        self.data = allocate::<T>(cell_count(self.num_rows, self.num_columns)?)?;
        self.status = MemoryStatus::InternallyAllocated;
        debug!(num_rows = self.num_rows, num_columns = self.num_columns, "allocated dense storage");
        Ok(())
    }

    /// Drop the storage, keeping the shape.
    pub fn free_data_memory(&mut self) {
        self.data = Vec::new();
        self.status = MemoryStatus::NotAllocated;
        debug!("freed dense storage");
    }

    // =========================================================================
    // Typed access
    // =========================================================================

    /// All cells, row-major.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// All cells, row-major, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Cell `(row, col)`, or `None` if out of bounds or unallocated.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.num_rows || col >= self.num_columns {
            return None;
        }
        self.data.get(row * self.num_columns + col).copied()
    }

    /// Contiguous values of `row`.
    #[inline]
    pub fn row_slice(&self, row: usize) -> Option<&[T]> {
        self.rows_slice(row..row.checked_add(1)?)
    }

    /// Contiguous values of `rows`.
    #[inline]
    pub fn rows_slice(&self, rows: Range<usize>) -> Option<&[T]> {
        if rows.start > rows.end || rows.end > self.num_rows {
            return None;
        }
        let start = rows.start.checked_mul(self.num_columns)?;
        self.data.get(start..rows.end.checked_mul(self.num_columns)?)
    }

    /// Iterate over column `col`.
    pub fn column_iter(&self, col: usize) -> StridedIter<'_, T> {
        let count = if col < self.num_columns { self.num_rows } else { 0 };
        StridedIter::new(&self.data, col, self.num_columns, count)
    }

    /// Take the row-major storage.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    fn cells(&self, rows: &Range<usize>) -> Range<usize> {
        rows.start * self.num_columns..rows.end * self.num_columns
    }

    fn check_access(&self, rows: &Range<usize>) -> Result<(), TableError> {
        ensure_allocated(self)?;
        check_rows(rows, self.num_rows)
    }
}

// =============================================================================
// NumericTable
// =============================================================================

impl<T: Scalar> NumericTable for HomogenTable<T> {
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn num_columns(&self) -> usize {
        self.num_columns
    }

    fn layout(&self) -> StorageLayout {
        StorageLayout::Dense
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
        self.check_access(&rows)?;
        let cells = self.cells(&rows);
        check_len(cells.len(), dst.len())?;
        dst.fill_from(&self.data[cells]);
        Ok(())
    }

    fn write_rows(&mut self, rows: Range<usize>, src: ScalarSlice<'_>) -> Result<(), TableError> {
        self.check_access(&rows)?;
        let cells = self.cells(&rows);
        check_len(cells.len(), src.len())?;
        src.convert_into(T::wrap_mut(&mut self.data[cells]));
        Ok(())
    }

    fn read_column(
        &self,
        column: usize,
        rows: Range<usize>,
        dst: ScalarSliceMut<'_>,
    ) -> Result<(), TableError> {
        check_column(column, self.num_columns)?;
        self.check_access(&rows)?;
        check_len(rows.len(), dst.len())?;
        let start = rows.start * self.num_columns + column;
        let mut values = allocate::<T>(rows.len())?;
        let column_values = StridedIter::new(&self.data, start, self.num_columns, rows.len());
        for (slot, &value) in values.iter_mut().zip(column_values) {
            *slot = value;
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
        self.check_access(&rows)?;
        check_len(rows.len(), src.len())?;
        let mut values = allocate::<T>(rows.len())?;
        src.convert_into(T::wrap_mut(&mut values));
        for (row, value) in rows.zip(values) {
            self.data[row * self.num_columns + column] = value;
        }
        Ok(())
    }

    fn native_row_type(&self) -> Option<ScalarType> {
        self.status.is_allocated().then_some(T::TYPE)
    }

    fn native_rows(&self, rows: Range<usize>) -> Option<ScalarSlice<'_>> {
        self.rows_slice(rows).map(T::wrap)
    }

    fn native_rows_mut(&mut self, rows: Range<usize>) -> Option<ScalarSliceMut<'_>> {
        if rows.start > rows.end || rows.end > self.num_rows {
            return None;
        }
        let cells = self.cells(&rows);
        self.data.get_mut(cells).map(T::wrap_mut)
    }

    fn native_column_type(&self, column: usize) -> Option<ScalarType> {
        (self.num_columns == 1 && column == 0)
            .then(|| self.native_row_type())
            .flatten()
    }

    fn native_column(&self, column: usize, rows: Range<usize>) -> Option<ScalarSlice<'_>> {
        if self.num_columns != 1 || column != 0 {
            return None;
        }
        self.native_rows(rows)
    }

    fn native_column_mut(
        &mut self,
        column: usize,
        rows: Range<usize>,
    ) -> Option<ScalarSliceMut<'_>> {
        if self.num_columns != 1 || column != 0 {
            return None;
        }
        self.native_rows_mut(rows)
    }

    fn resize(&mut self, num_rows: usize) -> Result<(), TableError> {
        if num_rows == self.num_rows {
            return Ok(());
        }
        match self.status {
            MemoryStatus::UserAllocated => {
                return Err(TableError::OwnershipViolation(format!(
                    "cannot resize user-provided storage from {} to {num_rows} rows",
                    self.num_rows
                )))
            }
            MemoryStatus::NotAllocated => {}
            MemoryStatus::InternallyAllocated => {
                let len = cell_count(num_rows, self.num_columns)?;
                if len > self.data.len() {
                    self.data
                        .try_reserve_exact(len - self.data.len())
                        .map_err(|_| TableError::AllocationFailed {
                            bytes: len.saturating_mul(std::mem::size_of::<T>()),
                        })?;
                }
                self.data.resize(len, T::default());
            }
        }
        debug!(from = self.num_rows, to = num_rows, "resized dense table");
        self.num_rows = num_rows;
        Ok(())
    }

    fn check_structure(&self) -> Status {
        let mut status = check_dictionary_len(&self.dictionary, self.num_columns);
        if self.status.is_allocated() {
            status |= Status::from(check_len(self.num_rows * self.num_columns, self.data.len()));
        }
        status
    }

    fn serialization_tag(&self) -> TableTag {
        TableTag::Dense
    }

    fn to_payload(&self) -> Result<TablePayload, TableError> {
        ensure_allocated(self)?;
        Ok(TablePayload::Dense {
            num_rows: self.num_rows,
            num_columns: self.num_columns,
            values: T::into_scalar_vec(self.data.clone()),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T: Scalar> TableKind for HomogenTable<T> {
    const LAYOUTS: LayoutMask = LayoutMask::DENSE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AccessMode, FeatureDescriptor};

    fn sample() -> HomogenTable<f64> {
        HomogenTable::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2).unwrap()
    }

    #[test]
    fn construction() {
        let table = HomogenTable::<f32>::new(4, 3).unwrap();
        assert_eq!(table.num_rows(), 4);
        assert_eq!(table.num_columns(), 3);
        assert_eq!(table.layout(), StorageLayout::Dense);
        assert_eq!(table.memory_status(), MemoryStatus::InternallyAllocated);
        assert_eq!(table.as_slice(), &[0.0; 12]);
        assert_eq!(table.dictionary().read().homogeneous_type(), Some(ScalarType::F32));
    }

    #[test]
    fn from_vec_length_mismatch() {
        let err = HomogenTable::from_vec(vec![1.0f64; 5], 2, 3).unwrap_err();
        assert_eq!(err, TableError::BufferLengthMismatch { expected: 6, actual: 5 });
    }

    #[test]
    fn from_rows_copies() {
        let table = HomogenTable::from_rows(&[[1u8, 2], [3, 4]]).unwrap();
        assert_eq!(table.as_slice(), &[1, 2, 3, 4]);
        assert!(HomogenTable::from_rows(&[vec![1u8, 2], vec![3]]).is_err());
    }

    #[test]
    fn typed_accessors() {
        let table = sample();
        assert_eq!(table.get(2, 1), Some(6.0));
        assert_eq!(table.get(3, 0), None);
        assert_eq!(table.rows_slice(1..3), Some(&[3.0, 4.0, 5.0, 6.0][..]));
        let col: Vec<_> = table.column_iter(1).copied().collect();
        assert_eq!(col, vec![2.0, 4.0, 6.0]);
        assert_eq!(table.column_iter(2).count(), 0);
    }

    #[test]
    fn row_slice_bounds() {
        let table = sample();
        assert_eq!(table.row_slice(2), Some(&[5.0, 6.0][..]));
        assert_eq!(table.row_slice(3), None);
        assert_eq!(table.row_slice(usize::MAX), None);

        let shape_only = HomogenTable::<f64>::unallocated(usize::MAX, 4);
        assert_eq!(shape_only.row_slice(usize::MAX - 1), None);
    }

    #[test]
    fn column_subrange_read() {
        let table = sample();
        let mut col = [0i64; 2];
        table.read_column(0, 1..3, i64::wrap_mut(&mut col)).unwrap();
        assert_eq!(col, [3, 5]);
        let mut empty: [f64; 0] = [];
        table.read_column(1, 3..3, f64::wrap_mut(&mut empty)).unwrap();
    }

    #[test]
    fn erased_read_write() {
        let mut table = sample();
        let mut out = [0i32; 2];
        table.read_rows(2..3, i32::wrap_mut(&mut out)).unwrap();
        assert_eq!(out, [5, 6]);

        table.write_rows(0..1, f32::wrap(&[9.0, 8.0])).unwrap();
        assert_eq!(table.row_slice(0), Some(&[9.0, 8.0][..]));

        let mut col = [0.0f32; 3];
        table.read_column(1, 0..3, f32::wrap_mut(&mut col)).unwrap();
        assert_eq!(col, [8.0, 4.0, 6.0]);

        table.write_column(0, 1..3, u8::wrap(&[7, 7])).unwrap();
        assert_eq!(table.as_slice(), &[9.0, 8.0, 7.0, 4.0, 7.0, 6.0]);
    }

    #[test]
    fn length_mismatch_rejected() {
        let table = sample();
        let mut out = [0.0f64; 3];
        assert!(matches!(
            table.read_rows(0..1, f64::wrap_mut(&mut out)),
            Err(TableError::BufferLengthMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn direct_mutable_block() {
        let mut table = sample();
        let mut block = table
            .get_block_of_rows_mut::<f64>(1, 1, AccessMode::ReadWrite)
            .unwrap();
        assert!(block.is_direct());
        block[1] = 40.0;
        block.release().unwrap();
        assert_eq!(table.get(1, 1), Some(40.0));
    }

    #[test]
    fn single_column_is_native_column() {
        let table = HomogenTable::from_vec(vec![1u32, 2, 3], 3, 1).unwrap();
        let block = table.get_block_of_column_values::<u32>(0, 1, 2).unwrap();
        assert!(block.is_borrowed());
        assert_eq!(&*block, &[2, 3]);
    }

    #[test]
    fn resize_internal_grows_with_zeros() {
        let mut table = HomogenTable::<i64>::filled(1, 2, 5).unwrap();
        table.resize(3).unwrap();
        assert_eq!(table.as_slice(), &[5, 5, 0, 0, 0, 0]);
        table.resize(1).unwrap();
        assert_eq!(table.as_slice(), &[5, 5]);
    }

    #[test]
    fn resize_user_allocated_is_ownership_violation() {
        let mut table = sample();
        assert!(matches!(table.resize(5), Err(TableError::OwnershipViolation(_))));
        assert!(table.resize(3).is_ok());
        assert_eq!(table.num_rows(), 3);
    }

    #[test]
    fn allocation_lifecycle() {
        let mut table = HomogenTable::<f32>::unallocated(2, 2);
        assert_eq!(table.memory_status(), MemoryStatus::NotAllocated);
        assert_eq!(table.get_block_of_rows::<f32>(0, 1).unwrap_err(), TableError::NotAllocated);
        table.resize(3).unwrap();
        table.allocate_data_memory().unwrap();
        assert_eq!(table.as_slice().len(), 6);
        table.free_data_memory();
        assert_eq!(table.memory_status(), MemoryStatus::NotAllocated);

        let mut user = sample();
        assert!(user.allocate_data_memory().is_err());
    }

    #[test]
    fn set_dictionary_checks_types() {
        let mut table = sample();
        let good = Dictionary::homogeneous(2, ScalarType::F64);
        assert!(table.set_dictionary(good.into()).is_ok());

        let wrong_type = Dictionary::from_features(vec![
            FeatureDescriptor::new(ScalarType::F64),
            FeatureDescriptor::new(ScalarType::I32),
        ]);
        assert!(matches!(
            table.set_dictionary(wrong_type.into()),
            Err(TableError::ScalarTypeMismatch { .. })
        ));

        let wrong_len = Dictionary::homogeneous(3, ScalarType::F64);
        assert!(matches!(
            table.set_dictionary(wrong_len.into()),
            Err(TableError::DictionaryMismatch(_))
        ));
    }

    #[test]
    fn shared_dictionary_shrink_breaks_structure() {
        let table = sample();
        assert!(table.check_structure().is_ok());
        table.dictionary().set_num_features(1);
        assert!(!table.check_structure().is_ok());
    }

    #[test]
    fn from_table_converts() {
        let source = HomogenTable::from_vec(vec![1i8, -2, 3, -4], 2, 2).unwrap();
        let copy = HomogenTable::<f32>::from_table(&source).unwrap();
        assert_eq!(copy.as_slice(), &[1.0, -2.0, 3.0, -4.0]);
        assert_eq!(copy.memory_status(), MemoryStatus::InternallyAllocated);
        assert_eq!(copy.dictionary().read().homogeneous_type(), Some(ScalarType::F32));
    }
}
