//! Packed triangular and symmetric tables.
//!
//! A packed table keeps one triangle of an `n x n` matrix in a single array of
//! `n (n + 1) / 2` values, row by row (see [`packed_index`]). Row blocks are
//! expanded on the fly: symmetric layouts mirror the stored triangle,
//! triangular layouts read zero outside it.

use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use super::block::allocate;
use super::dictionary::{Dictionary, SharedDictionary};
use super::homogen::cell_count;
use super::layout::{
    check_column, check_len, check_rows, packed_index, packed_len, packed_symmetric_index,
    LayoutMask, StorageLayout,
};
use super::statistics::BasicStatistics;
use super::table::{check_dictionary_len, MemoryStatus, NumericTable, TableKind};
use super::types::{Scalar, ScalarSlice, ScalarSliceMut};
use crate::error::{Status, TableError};
use crate::persist::{TablePayload, TableTag};

/// Square table stored as one packed triangle.
///
/// # Example
///
/// ```
/// use numeric_tables::data::{NumericTableExt, PackedTable, StorageLayout};
///
/// // [1 2 4]
/// // [2 3 5]
/// // [4 5 6]
/// let table = PackedTable::from_packed(
///     StorageLayout::LowerPackedSymmetric,
///     vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0],
///     3,
/// )
/// .unwrap();
/// let row = table.get_block_of_rows::<f64>(0, 1).unwrap();
/// assert_eq!(&*row, &[1.0, 2.0, 4.0]);
/// ```
#[derive(Debug)]
pub struct PackedTable<T: Scalar = f64> {
    values: Vec<T>,
    dimension: usize,
    layout: StorageLayout,
    status: MemoryStatus,
    dictionary: SharedDictionary,
    statistics: BasicStatistics,
}

fn check_packed_layout(layout: StorageLayout) -> Result<(), TableError> {
    if layout.is_packed() {
        Ok(())
    } else {
        Err(TableError::Unsupported {
            operation: "packed storage",
            layout,
        })
    }
}

impl<T: Scalar> PackedTable<T> {
    fn with_parts(
        values: Vec<T>,
        dimension: usize,
        layout: StorageLayout,
        status: MemoryStatus,
    ) -> Self {
        Self {
            values,
            dimension,
            layout,
            status,
            dictionary: Dictionary::homogeneous(dimension, T::TYPE).into(),
            statistics: BasicStatistics::default(),
        }
    }

    /// Zero-filled packed table.
    ///
    /// Fails with [`TableError::NotSquare`] unless `num_rows == num_columns`
    /// and with [`TableError::Unsupported`] for a non-packed layout.
    pub fn new(
        layout: StorageLayout,
        num_rows: usize,
        num_columns: usize,
    ) -> Result<Self, TableError> {
        check_packed_layout(layout)?;
        if num_rows != num_columns {
            return Err(TableError::NotSquare {
                layout,
                num_rows,
                num_columns,
            });
        }
        let values = allocate::<T>(packed_len(num_rows)?)?;
        debug!(%layout, dimension = num_rows, "allocated packed table");
        Ok(Self::with_parts(
            values,
            num_rows,
            layout,
            MemoryStatus::InternallyAllocated,
        ))
    }

    /// Zero-filled `n x n` packed table.
    pub fn square(layout: StorageLayout, n: usize) -> Result<Self, TableError> {
        Self::new(layout, n, n)
    }

    /// Attach a caller-provided packed array of `n (n + 1) / 2` values.
    pub fn from_packed(
        layout: StorageLayout,
        values: Vec<T>,
        n: usize,
    ) -> Result<Self, TableError> {
        check_packed_layout(layout)?;
        check_len(packed_len(n)?, values.len())?;
        Ok(Self::with_parts(values, n, layout, MemoryStatus::UserAllocated))
    }

    /// Take over attached storage, e.g. after decoding it from an archive.
    pub(crate) fn into_internal(mut self) -> Self {
        self.status = MemoryStatus::InternallyAllocated;
        self
    }

    /// Pack the relevant triangle of a row-major `n x n` matrix.
    pub fn from_dense_square(
        layout: StorageLayout,
        data: &[T],
        n: usize,
    ) -> Result<Self, TableError> {
        check_packed_layout(layout)?;
        check_len(cell_count(n, n)?, data.len())?;
        let mut table = Self::square(layout, n)?;
        for row in 0..n {
            for col in 0..n {
                if let Some(k) = packed_index(layout.is_upper(), row, col, n) {
                    table.values[k] = data[row * n + col];
                }
            }
        }
        Ok(table)
    }

    /// Number of rows (and columns).
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The packed triangle.
    #[inline]
    pub fn packed_values(&self) -> &[T] {
        &self.values
    }

    /// The packed triangle, mutably.
    #[inline]
    pub fn packed_values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Storage offset of `(row, col)`, mirroring for symmetric layouts.
    #[inline]
    fn cell(&self, row: usize, col: usize) -> Option<usize> {
        let upper = self.layout.is_upper();
        if self.layout.is_symmetric() {
            Some(packed_symmetric_index(upper, row, col, self.dimension))
        } else {
            packed_index(upper, row, col, self.dimension)
        }
    }

    /// Cell `(row, col)`; `None` if out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.dimension || col >= self.dimension {
            return None;
        }
        Some(
            self.cell(row, col)
                .and_then(|k| self.values.get(k).copied())
                .unwrap_or_default(),
        )
    }

    /// Store `value` at `(row, col)`. Returns false if the cell is out of
    /// bounds or outside a triangular layout's triangle.
    pub fn set(&mut self, row: usize, col: usize, value: T) -> bool {
        if row >= self.dimension || col >= self.dimension {
            return false;
        }
        match self.cell(row, col).and_then(|k| self.values.get_mut(k)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn expand(&self, rows: Range<usize>) -> Result<Vec<T>, TableError> {
        let n = self.dimension;
        let mut dense = allocate::<T>(cell_count(rows.len(), n)?)?;
        for (i, row) in rows.enumerate() {
            for col in 0..n {
                dense[i * n + col] = self.get(row, col).unwrap_or_default();
            }
        }
        Ok(dense)
    }
}

impl<T: Scalar> NumericTable for PackedTable<T> {
    fn num_rows(&self) -> usize {
        self.dimension
    }

    fn num_columns(&self) -> usize {
        self.dimension
    }

    fn layout(&self) -> StorageLayout {
        self.layout
    }

    fn dictionary(&self) -> &SharedDictionary {
        &self.dictionary
    }

    fn set_dictionary(&mut self, dictionary: SharedDictionary) -> Result<(), TableError> {
        {
            let dict = dictionary.read();
            if dict.num_features() != self.dimension {
                return Err(TableError::DictionaryMismatch(format!(
                    "{} features for {} columns",
                    dict.num_features(),
                    self.dimension
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
        check_rows(&rows, self.dimension)?;
        check_len(cell_count(rows.len(), self.dimension)?, dst.len())?;
        let dense = self.expand(rows)?;
        dst.fill_from(&dense);
        Ok(())
    }

    fn write_rows(&mut self, rows: Range<usize>, src: ScalarSlice<'_>) -> Result<(), TableError> {
        check_rows(&rows, self.dimension)?;
        let n = self.dimension;
        check_len(cell_count(rows.len(), n)?, src.len())?;
        let mut dense = allocate::<T>(src.len())?;
        src.convert_into(T::wrap_mut(&mut dense));
        for (i, row) in rows.enumerate() {
            for col in 0..n {
                self.set(row, col, dense[i * n + col]);
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
        check_column(column, self.dimension)?;
        check_rows(&rows, self.dimension)?;
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
        check_column(column, self.dimension)?;
        check_rows(&rows, self.dimension)?;
        check_len(rows.len(), src.len())?;
        let mut values = allocate::<T>(rows.len())?;
        src.convert_into(T::wrap_mut(&mut values));
        for (row, value) in rows.zip(values) {
            self.set(row, column, value);
        }
        Ok(())
    }

    fn resize(&mut self, num_rows: usize) -> Result<(), TableError> {
        if num_rows == self.dimension {
            return Ok(());
        }
        Err(TableError::Unsupported {
            operation: "resize",
            layout: self.layout,
        })
    }

    fn check_structure(&self) -> Status {
        check_dictionary_len(&self.dictionary, self.dimension)
            | Status::from(
                packed_len(self.dimension).and_then(|len| check_len(len, self.values.len())),
            )
    }

    fn serialization_tag(&self) -> TableTag {
        TableTag::Packed
    }

    fn to_payload(&self) -> Result<TablePayload, TableError> {
        Ok(TablePayload::Packed {
            layout: self.layout,
            dimension: self.dimension,
            values: T::into_scalar_vec(self.values.clone()),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T: Scalar> TableKind for PackedTable<T> {
    const LAYOUTS: LayoutMask = LayoutMask::PACKED;
}
