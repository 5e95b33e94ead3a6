//! Structure-of-arrays table: one contiguous typed array per column.

use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use super::dictionary::{Dictionary, FeatureDescriptor, SharedDictionary};
use super::layout::{check_column, check_len, check_rows, LayoutMask, StorageLayout};
use super::statistics::BasicStatistics;
use super::table::{check_dictionary_len, ensure_allocated, MemoryStatus, NumericTable, TableKind};
use super::types::{Scalar, ScalarSlice, ScalarSliceMut, ScalarType, ScalarVec};
use crate::error::{Status, TableError};
use crate::persist::{TablePayload, TableTag};

/// Table with one independently typed array per column.
///
/// Column blocks requested in the column's own type borrow storage directly,
/// which makes this the natural layout for feature-wise algorithms.
///
/// # Example
///
/// ```
/// use numeric_tables::data::{NumericTableExt, ScalarVec, SoaTable};
///
/// let table = SoaTable::from_columns(vec![
///     ScalarVec::F32(vec![0.5, 1.5]),
///     ScalarVec::U8(vec![3, 4]),
/// ])
/// .unwrap();
/// let col = table.get_block_of_column_values::<f32>(0, 0, 2).unwrap();
/// assert!(col.is_borrowed());
/// let rows = table.get_block_of_rows::<f64>(0, 2).unwrap();
/// assert_eq!(&*rows, &[0.5, 3.0, 1.5, 4.0]);
/// ```
#[derive(Debug)]
pub struct SoaTable {
    columns: Vec<ScalarVec>,
    num_rows: usize,
    status: MemoryStatus,
    dictionary: SharedDictionary,
    statistics: BasicStatistics,
}

impl SoaTable {
    fn with_parts(
        columns: Vec<ScalarVec>,
        num_rows: usize,
        dictionary: Dictionary,
        status: MemoryStatus,
    ) -> Self {
        Self {
            columns,
            num_rows,
            status,
            dictionary: dictionary.into(),
            statistics: BasicStatistics::default(),
        }
    }

    /// Zero-filled columns typed by `dictionary`.
    pub fn new(dictionary: Dictionary, num_rows: usize) -> Result<Self, TableError> {
        let mut columns = Vec::new();
        columns
            .try_reserve_exact(dictionary.num_features())
            .map_err(|_| TableError::AllocationFailed { bytes: usize::MAX })?;
        for feature in dictionary.iter() {
            columns.push(ScalarVec::zeros(feature.scalar_type, num_rows)?);
        }
        debug!(num_rows, columns = columns.len(), "allocated soa table");
        Ok(Self::with_parts(
            columns,
            num_rows,
            dictionary,
            MemoryStatus::InternallyAllocated,
        ))
    }

    /// Attach caller-provided columns. All columns must have the same length.
    pub fn from_columns(columns: Vec<ScalarVec>) -> Result<Self, TableError> {
        let num_rows = columns.first().map_or(0, ScalarVec::len);
        for column in &columns {
            check_len(num_rows, column.len())?;
        }
        let dictionary = columns
            .iter()
            .map(|c| FeatureDescriptor::new(c.scalar_type()))
            .collect();
        Ok(Self::with_parts(
            columns,
            num_rows,
            dictionary,
            MemoryStatus::UserAllocated,
        ))
    }

    /// Take over attached storage, e.g. after decoding it from an archive.
    pub(crate) fn into_internal(mut self) -> Self {
        self.status = MemoryStatus::InternallyAllocated;
        self
    }

    /// Table with a known shape but no storage yet.
    pub fn unallocated(dictionary: Dictionary, num_rows: usize) -> Self {
        Self::with_parts(Vec::new(), num_rows, dictionary, MemoryStatus::NotAllocated)
    }

    /// Allocate zeroed columns for the current shape and dictionary.
    pub fn allocate_data_memory(&mut self) -> Result<(), TableError> {
        if self.status == MemoryStatus::UserAllocated {
            return Err(TableError::OwnershipViolation(
                "cannot reallocate user-provided storage".into(),
            ));
        }
        let types: Vec<ScalarType> = self.dictionary.read().iter().map(|f| f.scalar_type).collect();
        self.columns = types
            .into_iter()
            .map(|t| ScalarVec::zeros(t, self.num_rows))
            .collect::<Result<_, _>>()?;
        self.status = MemoryStatus::InternallyAllocated;
        Ok(())
    }

    /// Append a column of `num_rows` values, extending the dictionary.
    pub fn push_column(&mut self, column: ScalarVec) -> Result<(), TableError> {
        ensure_allocated(self)?;
        check_len(self.num_rows, column.len())?;
        self.dictionary
            .write()
            .push(FeatureDescriptor::new(column.scalar_type()));
        self.columns.push(column);
        Ok(())
    }

    /// Column `j` as `T`, if it is stored as `T`.
    pub fn column<T: Scalar>(&self, j: usize) -> Option<&[T]> {
        T::unwrap(self.columns.get(j)?.as_slice())
    }

    /// Column `j` in its stored type.
    pub fn column_values(&self, j: usize) -> Option<ScalarSlice<'_>> {
        self.columns.get(j).map(ScalarVec::as_slice)
    }

    /// Take the columns.
    pub fn into_columns(self) -> Vec<ScalarVec> {
        self.columns
    }

    fn check_access(&self, rows: &Range<usize>) -> Result<(), TableError> {
        ensure_allocated(self)?;
        check_rows(rows, self.num_rows)
    }
}

impl NumericTable for SoaTable {
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn num_columns(&self) -> usize {
        if self.status.is_allocated() {
            self.columns.len()
        } else {
            self.dictionary.num_features()
        }
    }

    fn layout(&self) -> StorageLayout {
        StorageLayout::Soa
    }

    fn dictionary(&self) -> &SharedDictionary {
        &self.dictionary
    }

    fn set_dictionary(&mut self, dictionary: SharedDictionary) -> Result<(), TableError> {
        {
            let dict = dictionary.read();
            if self.status.is_allocated() {
                check_len(self.columns.len(), dict.num_features()).map_err(|_| {
                    TableError::DictionaryMismatch(format!(
                        "{} features for {} columns",
                        dict.num_features(),
                        self.columns.len()
                    ))
                })?;
                for (feature, column) in dict.iter().zip(&self.columns) {
                    if feature.scalar_type != column.scalar_type() {
                        return Err(TableError::ScalarTypeMismatch {
                            expected: column.scalar_type(),
                            actual: feature.scalar_type,
                        });
                    }
                }
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

    fn read_rows(&self, rows: Range<usize>, mut dst: ScalarSliceMut<'_>) -> Result<(), TableError> {
        self.check_access(&rows)?;
        let width = self.columns.len();
        check_len(rows.len() * width, dst.len())?;
        for (j, column) in self.columns.iter().enumerate() {
            let values = column.as_slice().slice(rows.clone());
            for i in 0..rows.len() {
                dst.copy_cell(i * width + j, values, i);
            }
        }
        Ok(())
    }

    fn write_rows(&mut self, rows: Range<usize>, src: ScalarSlice<'_>) -> Result<(), TableError> {
        self.check_access(&rows)?;
        let width = self.columns.len();
        check_len(rows.len() * width, src.len())?;
        for (j, column) in self.columns.iter_mut().enumerate() {
            let mut values = column.as_mut_slice().into_range(rows.clone());
            for i in 0..rows.len() {
                values.copy_cell(i, src, i * width + j);
            }
        }
        Ok(())
    }

    fn read_column(
        &self,
        column: usize,
        rows: Range<usize>,
        dst: ScalarSliceMut<'_>,
    ) -> Result<(), TableError> {
        check_column(column, self.columns.len())?;
        self.check_access(&rows)?;
        check_len(rows.len(), dst.len())?;
        self.columns[column]
            .as_slice()
            .slice(rows)
            .convert_into(dst);
        Ok(())
    }

    fn write_column(
        &mut self,
        column: usize,
        rows: Range<usize>,
        src: ScalarSlice<'_>,
    ) -> Result<(), TableError> {
        check_column(column, self.columns.len())?;
        self.check_access(&rows)?;
        check_len(rows.len(), src.len())?;
        src.convert_into(self.columns[column].as_mut_slice().into_range(rows));
        Ok(())
    }

    fn native_row_type(&self) -> Option<ScalarType> {
        match self.columns.as_slice() {
            [only] if self.status.is_allocated() => Some(only.scalar_type()),
            _ => None,
        }
    }

    fn native_rows(&self, rows: Range<usize>) -> Option<ScalarSlice<'_>> {
        match self.columns.as_slice() {
            [_] => self.native_column(0, rows),
            _ => None,
        }
    }

    fn native_rows_mut(&mut self, rows: Range<usize>) -> Option<ScalarSliceMut<'_>> {
        if self.columns.len() != 1 {
            return None;
        }
        self.native_column_mut(0, rows)
    }

    fn native_column_type(&self, column: usize) -> Option<ScalarType> {
        self.columns.get(column).map(ScalarVec::scalar_type)
    }

    fn native_column(&self, column: usize, rows: Range<usize>) -> Option<ScalarSlice<'_>> {
        if rows.start > rows.end || rows.end > self.num_rows {
            return None;
        }
        Some(self.columns.get(column)?.as_slice().slice(rows))
    }

    fn native_column_mut(
        &mut self,
        column: usize,
        rows: Range<usize>,
    ) -> Option<ScalarSliceMut<'_>> {
        if rows.start > rows.end || rows.end > self.num_rows {
            return None;
        }
        Some(self.columns.get_mut(column)?.as_mut_slice().into_range(rows))
    }

    fn resize(&mut self, num_rows: usize) -> Result<(), TableError> {
        if num_rows == self.num_rows {
            return Ok(());
        }
        if self.status == MemoryStatus::UserAllocated {
            return Err(TableError::OwnershipViolation(format!(
                "cannot resize user-provided columns from {} to {num_rows} rows",
                self.num_rows
            )));
        }
        for j in 0..self.columns.len() {
            if let Err(err) = self.columns[j].resize(num_rows) {
                // Shrinking back cannot fail.
                for column in &mut self.columns[..j] {
                    column.resize(self.num_rows)?;
                }
                return Err(err);
            }
        }
        debug!(from = self.num_rows, to = num_rows, "resized soa table");
        self.num_rows = num_rows;
        Ok(())
    }

    fn check_structure(&self) -> Status {
        let mut status = check_dictionary_len(&self.dictionary, self.num_columns());
        if self.status.is_allocated() {
            status.extend(
                self.columns
                    .iter()
                    .filter_map(|c| check_len(self.num_rows, c.len()).err()),
            );
            let dictionary = self.dictionary.read();
            status.extend(dictionary.iter().zip(&self.columns).filter_map(|(f, c)| {
                (f.scalar_type != c.scalar_type()).then(|| TableError::ScalarTypeMismatch {
                    expected: c.scalar_type(),
                    actual: f.scalar_type,
                })
            }));
        }
        status
    }

    fn serialization_tag(&self) -> TableTag {
        TableTag::Soa
    }

    fn to_payload(&self) -> Result<TablePayload, TableError> {
        ensure_allocated(self)?;
        Ok(TablePayload::Soa {
            num_rows: self.num_rows,
            columns: self.columns.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl TableKind for SoaTable {
    const LAYOUTS: LayoutMask = LayoutMask::SOA;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AccessMode, NumericTableExt};

    fn mixed() -> SoaTable {
        SoaTable::from_columns(vec![
            ScalarVec::I32(vec![1, 2, 3]),
            ScalarVec::F64(vec![0.25, 0.5, 0.75]),
            ScalarVec::Bool(vec![true, false, true]),
        ])
        .unwrap()
    }

    #[test]
    fn shape_and_dictionary() {
        let table = mixed();
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.num_columns(), 3);
        assert_eq!(table.memory_status(), MemoryStatus::UserAllocated);
        let dict = table.dictionary().read();
        assert_eq!(dict.get(2).map(|f| f.scalar_type), Some(ScalarType::Bool));
        assert!(!dict.is_homogeneous());
    }

    #[test]
    fn ragged_columns_rejected() {
        let err = SoaTable::from_columns(vec![ScalarVec::U8(vec![1, 2]), ScalarVec::U8(vec![1])]);
        assert!(matches!(err, Err(TableError::BufferLengthMismatch { expected: 2, actual: 1 })));
    }

    #[test]
    fn rows_interleave_columns() {
        let table = mixed();
        let block = table.get_block_of_rows::<f32>(1, 2).unwrap();
        assert_eq!(&*block, &[2.0, 0.5, 0.0, 3.0, 0.75, 1.0]);
    }

    #[test]
    fn native_column_block() {
        let mut table = mixed();
        {
            let block = table.get_block_of_column_values::<i32>(0, 0, 3).unwrap();
            assert!(block.is_borrowed());
        }
        {
            let mut block = table
                .get_block_of_column_values_mut::<i32>(0, 1, 2, AccessMode::WriteOnly)
                .unwrap();
            assert!(block.is_direct());
            block.copy_from_slice(&[20, 30]);
            block.release().unwrap();
        }
        assert_eq!(table.column::<i32>(0), Some(&[1, 20, 30][..]));
        assert_eq!(table.column::<f64>(0), None);
    }

    #[test]
    fn converted_column_write() {
        let mut table = mixed();
        let mut block = table
            .get_block_of_column_values_mut::<f64>(2, 0, 3, AccessMode::ReadWrite)
            .unwrap();
        assert!(!block.is_direct());
        assert_eq!(&*block, &[1.0, 0.0, 1.0]);
        block[1] = 4.0;
        block.release().unwrap();
        assert_eq!(table.column::<bool>(2), Some(&[true, true, true][..]));
    }

    #[test]
    fn row_write_converts_per_column() {
        let mut table = mixed();
        table.write_rows(0..1, f64::wrap(&[9.7, 1.5, 0.0])).unwrap();
        assert_eq!(table.column::<i32>(0), Some(&[9, 2, 3][..]));
        assert_eq!(table.column::<f64>(1), Some(&[1.5, 0.5, 0.75][..]));
        assert_eq!(table.column::<bool>(2), Some(&[false, false, true][..]));
    }

    #[test]
    fn push_column_extends_dictionary() {
        let mut table = SoaTable::new(Dictionary::homogeneous(1, ScalarType::U16), 2).unwrap();
        table.push_column(ScalarVec::I8(vec![-1, 1])).unwrap();
        assert_eq!(table.num_columns(), 2);
        assert_eq!(table.dictionary().num_features(), 2);
        assert!(table.push_column(ScalarVec::I8(vec![0])).is_err());
        assert!(table.check_structure().is_ok());
    }

    #[test]
    fn wide_integers_rows_are_exact() {
        let big = [(1i64 << 53) + 1, i64::MAX, i64::MIN, -((1i64 << 53) + 1)];
        let mut table = SoaTable::new(Dictionary::homogeneous(2, ScalarType::I64), 2).unwrap();
        {
            let mut block = table
                .get_block_of_rows_mut::<i64>(0, 2, AccessMode::WriteOnly)
                .unwrap();
            block.copy_from_slice(&big);
            block.release().unwrap();
        }
        assert_eq!(&*table.get_block_of_rows::<i64>(0, 2).unwrap(), &big);
        assert_eq!(table.column::<i64>(1), Some(&[i64::MAX, -((1i64 << 53) + 1)][..]));
    }

    #[test]
    fn unsigned_rows_are_exact() {
        let mut table = SoaTable::from_columns(vec![
            ScalarVec::U64(vec![0, 0]),
            ScalarVec::U8(vec![0, 0]),
        ])
        .unwrap();
        table
            .write_rows(0..2, u64::wrap(&[u64::MAX, 7, (1u64 << 53) + 1, 300]))
            .unwrap();
        assert_eq!(table.column::<u64>(0), Some(&[u64::MAX, (1u64 << 53) + 1][..]));
        assert_eq!(table.column::<u8>(1), Some(&[7, 255][..]));
    }

    #[test]
    fn oversized_allocation_is_an_error() {
        let err = SoaTable::new(Dictionary::homogeneous(1, ScalarType::F64), usize::MAX).unwrap_err();
        assert!(matches!(err, TableError::AllocationFailed { .. }));

        let mut table = SoaTable::unallocated(Dictionary::homogeneous(2, ScalarType::U32), usize::MAX);
        assert!(matches!(table.allocate_data_memory(), Err(TableError::AllocationFailed { .. })));
        assert_eq!(table.memory_status(), MemoryStatus::NotAllocated);
    }

    #[test]
    fn failed_resize_keeps_shape() {
        let dictionary = [ScalarType::U8, ScalarType::F64]
            .into_iter()
            .map(FeatureDescriptor::new)
            .collect();
        let mut table = SoaTable::new(dictionary, 2).unwrap();
        assert!(matches!(table.resize(usize::MAX), Err(TableError::AllocationFailed { .. })));
        assert_eq!(table.num_rows(), 2);
        assert!(table.check_structure().is_ok());
    }

    #[test]
    fn resize_internal_only() {
        let mut internal = SoaTable::new(Dictionary::homogeneous(2, ScalarType::F32), 1).unwrap();
        internal.resize(4).unwrap();
        assert_eq!(internal.column::<f32>(1).map(<[f32]>::len), Some(4));
        let mut user = mixed();
        assert!(matches!(user.resize(1), Err(TableError::OwnershipViolation(_))));
    }
}
