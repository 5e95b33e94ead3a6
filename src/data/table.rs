//! The numeric table abstraction.
//!
//! [`NumericTable`] is the object-safe interface every storage variant
//! implements: shape, layout tag, dictionary, memory status, and erased
//! row/column transfer. Algorithms never call the transfer methods directly;
//! they go through [`NumericTableExt`], which hands out typed
//! [`BlockDescriptor`]s and takes the zero-copy path whenever the table
//! already stores the requested type contiguously.
//!
//! # Example
//!
//! ```
//! use numeric_tables::data::{AccessMode, HomogenTable, NumericTable, NumericTableExt};
//!
//! let mut table = HomogenTable::<f64>::new(3, 2).unwrap();
//! {
//!     let mut block = table.get_block_of_rows_mut::<f64>(0, 3, AccessMode::WriteOnly).unwrap();
//!     block.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//!     block.release().unwrap();
//! }
//! let block = table.get_block_of_rows::<f32>(1, 2).unwrap();
//! assert_eq!(&*block, &[3.0f32, 4.0, 5.0, 6.0]);
//! ```

use std::any::Any;
use std::fmt;
use std::ops::{BitOr, Range};
use std::sync::Arc;

use tracing::trace;

use super::block::{allocate, AccessMode, BlockDescriptor, BlockDescriptorMut, BlockRegion};
use super::dictionary::SharedDictionary;
use super::layout::{check_column, row_range, LayoutMask, StorageLayout};
use super::statistics::BasicStatistics;
use super::types::{Scalar, ScalarSlice, ScalarSliceMut, ScalarType};
use crate::error::{Status, TableError};
use crate::persist::{TablePayload, TableTag};

/// Shared handle to a table of any layout.
pub type NumericTablePtr = Arc<dyn NumericTable>;

// =============================================================================
// Memory status
// =============================================================================

/// Who owns a table's backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryStatus {
    /// Shape is known but no storage exists yet.
    NotAllocated,
    /// Storage was allocated by the library and may be reallocated by it.
    InternallyAllocated,
    /// Storage was supplied by the caller; the library will not reallocate it.
    UserAllocated,
}

impl MemoryStatus {
    /// The status's bit in a [`MemoryFlags`] set.
    #[inline]
    pub const fn flag(self) -> u8 {
        match self {
            MemoryStatus::NotAllocated => MemoryFlags::NOT_ALLOCATED.0,
            MemoryStatus::InternallyAllocated => MemoryFlags::INTERNAL.0,
            MemoryStatus::UserAllocated => MemoryFlags::USER.0,
        }
    }

    /// Returns true when storage exists.
    #[inline]
    pub const fn is_allocated(self) -> bool {
        !matches!(self, MemoryStatus::NotAllocated)
    }
}

/// Set of accepted [`MemoryStatus`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryFlags(u8);

impl MemoryFlags {
    pub const NOT_ALLOCATED: MemoryFlags = MemoryFlags(1 << 0);
    pub const INTERNAL: MemoryFlags = MemoryFlags(1 << 1);
    pub const USER: MemoryFlags = MemoryFlags(1 << 2);
    /// Either allocation mode, but not unallocated.
    pub const ALLOCATED: MemoryFlags = MemoryFlags(Self::INTERNAL.0 | Self::USER.0);
    /// Any status.
    pub const ANY: MemoryFlags = MemoryFlags(Self::ALLOCATED.0 | Self::NOT_ALLOCATED.0);

    /// Returns true if `status` is accepted.
    #[inline]
    pub const fn contains(self, status: MemoryStatus) -> bool {
        self.0 & status.flag() != 0
    }
}

impl Default for MemoryFlags {
    fn default() -> Self {
        Self::ALLOCATED
    }
}

impl BitOr for MemoryFlags {
    type Output = MemoryFlags;

    fn bitor(self, rhs: MemoryFlags) -> MemoryFlags {
        MemoryFlags(self.0 | rhs.0)
    }
}

impl From<MemoryStatus> for MemoryFlags {
    fn from(status: MemoryStatus) -> Self {
        MemoryFlags(status.flag())
    }
}

// =============================================================================
// NumericTable
// =============================================================================

/// A two-dimensional table of `rows x columns` numeric cells.
///
/// Implementations differ in physical layout ([`StorageLayout`]) but share
/// this contract:
///
/// - `read_*`/`write_*` transfer cells in row-major order, converting between
///   the stored type and the type of the erased buffer. Buffers must hold
///   exactly the requested number of cells.
/// - Row ranges are validated; out-of-range requests fail with
///   [`TableError::RowRangeOutOfBounds`] and leave the table untouched.
/// - `native_*` expose storage directly when it already holds the cells of a
///   range contiguously. Returning `None` is always correct.
pub trait NumericTable: Send + Sync + fmt::Debug {
    /// Number of rows.
    fn num_rows(&self) -> usize;

    /// Number of columns.
    fn num_columns(&self) -> usize;

    /// Physical layout tag.
    fn layout(&self) -> StorageLayout;

    /// Shared per-column schema.
    fn dictionary(&self) -> &SharedDictionary;

    /// Replace the dictionary. Fails if it does not describe this table's
    /// columns.
    fn set_dictionary(&mut self, dictionary: SharedDictionary) -> Result<(), TableError>;

    /// Who owns the backing storage.
    fn memory_status(&self) -> MemoryStatus;

    /// Optional pre-aggregated per-column statistics.
    fn basic_statistics(&self) -> &BasicStatistics;

    /// Mutable access to the statistics slots.
    fn basic_statistics_mut(&mut self) -> &mut BasicStatistics;

    /// Copy rows `rows` into `dst` (row-major, `rows.len() * num_columns()` cells).
    fn read_rows(&self, rows: Range<usize>, dst: ScalarSliceMut<'_>) -> Result<(), TableError>;

    /// Store rows `rows` from `src` (row-major).
    fn write_rows(&mut self, rows: Range<usize>, src: ScalarSlice<'_>) -> Result<(), TableError>;

    /// Copy one column over `rows` into `dst`.
    fn read_column(
        &self,
        column: usize,
        rows: Range<usize>,
        dst: ScalarSliceMut<'_>,
    ) -> Result<(), TableError>;

    /// Store one column over `rows` from `src`.
    fn write_column(
        &mut self,
        column: usize,
        rows: Range<usize>,
        src: ScalarSlice<'_>,
    ) -> Result<(), TableError>;

    /// Stored type when rows are kept as one contiguous row-major array.
    fn native_row_type(&self) -> Option<ScalarType> {
        None
    }

    /// Direct view of rows `rows` in storage order.
    fn native_rows(&self, _rows: Range<usize>) -> Option<ScalarSlice<'_>> {
        None
    }

    /// Direct mutable view of rows `rows` in storage order.
    fn native_rows_mut(&mut self, _rows: Range<usize>) -> Option<ScalarSliceMut<'_>> {
        None
    }

    /// Stored type when `column` is kept as one contiguous array.
    fn native_column_type(&self, _column: usize) -> Option<ScalarType> {
        None
    }

    /// Direct view of `column` over `rows`.
    fn native_column(&self, _column: usize, _rows: Range<usize>) -> Option<ScalarSlice<'_>> {
        None
    }

    /// Direct mutable view of `column` over `rows`.
    fn native_column_mut(
        &mut self,
        _column: usize,
        _rows: Range<usize>,
    ) -> Option<ScalarSliceMut<'_>> {
        None
    }

    /// Change the number of rows.
    fn resize(&mut self, num_rows: usize) -> Result<(), TableError>;

    /// Check the layout's structural invariants.
    fn check_structure(&self) -> Status {
        check_dictionary_len(self.dictionary(), self.num_columns())
    }

    /// Tag identifying the concrete type in the storage format.
    fn serialization_tag(&self) -> TableTag;

    /// Raw arrays for persistence.
    fn to_payload(&self) -> Result<TablePayload, TableError>;

    /// Upcast for downcasting by reference.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for downcasting shared handles.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Structural check shared by all layouts: one descriptor per column.
pub fn check_dictionary_len(dictionary: &SharedDictionary, num_columns: usize) -> Status {
    let features = dictionary.num_features();
    if features == num_columns {
        Status::ok()
    } else {
        TableError::DictionaryMismatch(format!(
            "dictionary has {features} features but table has {num_columns} columns"
        ))
        .into()
    }
}

/// Fail with [`TableError::NotAllocated`] for tables without storage.
#[inline]
pub fn ensure_allocated<N: NumericTable + ?Sized>(table: &N) -> Result<(), TableError> {
    if table.memory_status().is_allocated() {
        Ok(())
    } else {
        Err(TableError::NotAllocated)
    }
}

// =============================================================================
// Checked down-cast
// =============================================================================

/// A concrete table type that can be recovered from a [`NumericTablePtr`].
pub trait TableKind: NumericTable + Sized + 'static {
    /// Layouts instances of this type can report.
    const LAYOUTS: LayoutMask;

    /// Down-cast a shared handle. Returns `None` if the handle holds a
    /// different layout or type.
    fn cast(table: &NumericTablePtr) -> Option<Arc<Self>> {
        if !Self::LAYOUTS.contains(table.layout()) {
            return None;
        }
        Arc::clone(table).into_any().downcast::<Self>().ok()
    }

    /// Down-cast a borrowed table.
    fn cast_ref(table: &dyn NumericTable) -> Option<&Self> {
        if !Self::LAYOUTS.contains(table.layout()) {
            return None;
        }
        table.as_any().downcast_ref::<Self>()
    }
}

// =============================================================================
// Typed block access
// =============================================================================

/// Typed block access on top of [`NumericTable`].
///
/// Implemented for every table, including `dyn NumericTable`.
pub trait NumericTableExt: NumericTable {
    /// Read-only view of rows `start..start + n` as `T`.
    ///
    /// Borrows storage directly when the table keeps these rows as a
    /// contiguous `T` array; otherwise converts into an owned buffer.
    fn get_block_of_rows<T: Scalar>(
        &self,
        start: usize,
        n: usize,
    ) -> Result<BlockDescriptor<'_, T>, TableError> {
        ensure_allocated(self)?;
        let rows = row_range(start, n, self.num_rows())?;
        let width = self.num_columns();
        let region = BlockRegion::Rows { start, len: n };

        if self.native_row_type() == Some(T::TYPE) {
            if let Some(values) = self.native_rows(rows.clone()).and_then(T::unwrap) {
                trace!(start, n, layout = %self.layout(), "zero-copy row block");
                return Ok(BlockDescriptor::borrowed(values, region, width));
            }
        }

        let mut buffer = allocate::<T>(n * width)?;
        self.read_rows(rows, T::wrap_mut(&mut buffer))?;
        trace!(start, n, layout = %self.layout(), "converted row block");
        Ok(BlockDescriptor::owned(buffer, region, width))
    }

    /// Mutable view of rows `start..start + n` as `T`.
    ///
    /// `WriteOnly` and `ReadWrite` blocks write back on
    /// [`release`](BlockDescriptorMut::release) (or on drop). They edit storage
    /// in place when the table keeps these rows as a contiguous `T` array.
    /// `ReadOnly` blocks always work on a private copy.
    fn get_block_of_rows_mut<T: Scalar>(
        &mut self,
        start: usize,
        n: usize,
        mode: AccessMode,
    ) -> Result<BlockDescriptorMut<'_, T, Self>, TableError> {
        ensure_allocated(self)?;
        let rows = row_range(start, n, self.num_rows())?;
        let width = self.num_columns();
        let region = BlockRegion::Rows { start, len: n };
        let layout = self.layout();

        if mode.writes() && self.native_row_type() == Some(T::TYPE) {
            let values = self
                .native_rows_mut(rows)
                .and_then(T::unwrap_mut)
                .ok_or(TableError::Unsupported {
                    operation: "direct row access",
                    layout,
                })?;
            trace!(start, n, %layout, ?mode, "zero-copy mutable row block");
            return Ok(BlockDescriptorMut::direct(values, region, width, mode));
        }

        let mut buffer = allocate::<T>(n * width)?;
        if mode.reads() {
            self.read_rows(rows, T::wrap_mut(&mut buffer))?;
        }
        trace!(start, n, %layout, ?mode, "staged mutable row block");
        Ok(BlockDescriptorMut::staged(self, buffer, region, width, mode))
    }

    /// Read-only view of `column` over rows `start..start + n` as `T`.
    fn get_block_of_column_values<T: Scalar>(
        &self,
        column: usize,
        start: usize,
        n: usize,
    ) -> Result<BlockDescriptor<'_, T>, TableError> {
        ensure_allocated(self)?;
        check_column(column, self.num_columns())?;
        let rows = row_range(start, n, self.num_rows())?;
        let region = BlockRegion::Column { column, start, len: n };

        if self.native_column_type(column) == Some(T::TYPE) {
            if let Some(values) = self.native_column(column, rows.clone()).and_then(T::unwrap) {
                trace!(column, start, n, "zero-copy column block");
                return Ok(BlockDescriptor::borrowed(values, region, 1));
            }
        }

        let mut buffer = allocate::<T>(n)?;
        self.read_column(column, rows, T::wrap_mut(&mut buffer))?;
        Ok(BlockDescriptor::owned(buffer, region, 1))
    }

    /// Mutable view of `column` over rows `start..start + n` as `T`.
    fn get_block_of_column_values_mut<T: Scalar>(
        &mut self,
        column: usize,
        start: usize,
        n: usize,
        mode: AccessMode,
    ) -> Result<BlockDescriptorMut<'_, T, Self>, TableError> {
        ensure_allocated(self)?;
        check_column(column, self.num_columns())?;
        let rows = row_range(start, n, self.num_rows())?;
        let region = BlockRegion::Column { column, start, len: n };
        let layout = self.layout();

        if mode.writes() && self.native_column_type(column) == Some(T::TYPE) {
            let values = self
                .native_column_mut(column, rows)
                .and_then(T::unwrap_mut)
                .ok_or(TableError::Unsupported {
                    operation: "direct column access",
                    layout,
                })?;
            return Ok(BlockDescriptorMut::direct(values, region, 1, mode));
        }

        let mut buffer = allocate::<T>(n)?;
        if mode.reads() {
            self.read_column(column, rows, T::wrap_mut(&mut buffer))?;
        }
        Ok(BlockDescriptorMut::staged(self, buffer, region, 1, mode))
    }

    /// Release a read-only block. Equivalent to dropping it.
    fn release_block_of_rows<T: Scalar>(&self, block: BlockDescriptor<'_, T>) {
        block.release();
    }

    /// Cell `(row, column)` converted to `T`.
    fn value<T: Scalar>(&self, row: usize, column: usize) -> Result<T, TableError> {
        let block = self.get_block_of_column_values::<T>(column, row, 1)?;
        Ok(block[0])
    }
}

impl<N: NumericTable + ?Sized> NumericTableExt for N {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CsrTable, HomogenTable, PackedTable};

    #[test]
    fn memory_flags() {
        assert!(MemoryFlags::ALLOCATED.contains(MemoryStatus::UserAllocated));
        assert!(MemoryFlags::ALLOCATED.contains(MemoryStatus::InternallyAllocated));
        assert!(!MemoryFlags::ALLOCATED.contains(MemoryStatus::NotAllocated));
        assert!(MemoryFlags::ANY.contains(MemoryStatus::NotAllocated));
        let user_only = MemoryFlags::from(MemoryStatus::UserAllocated);
        assert!(!user_only.contains(MemoryStatus::InternallyAllocated));
    }

    #[test]
    fn cast_matches_concrete_type() {
        let table: NumericTablePtr = Arc::new(HomogenTable::<f64>::new(2, 2).unwrap());
        assert!(HomogenTable::<f64>::cast(&table).is_some());
        assert!(HomogenTable::<f32>::cast(&table).is_none());
        assert!(CsrTable::<f64>::cast(&table).is_none());
        assert!(PackedTable::<f64>::cast(&table).is_none());
    }

    #[test]
    fn cast_ref_on_borrowed_table() {
        let table = CsrTable::<f32>::new(3, 3).unwrap();
        let erased: &dyn NumericTable = &table;
        assert!(CsrTable::<f32>::cast_ref(erased).is_some());
        assert!(HomogenTable::<f32>::cast_ref(erased).is_none());
    }

    #[test]
    fn dyn_table_block_access() {
        let table: NumericTablePtr =
            Arc::new(HomogenTable::from_vec(vec![1i32, 2, 3, 4], 2, 2).unwrap());
        let block = table.get_block_of_rows::<f64>(1, 1).unwrap();
        assert_eq!(&*block, &[3.0, 4.0]);
        assert_eq!(table.value::<i64>(0, 1).unwrap(), 2);
    }

    #[test]
    fn unallocated_table_rejects_blocks() {
        let table = HomogenTable::<f64>::unallocated(4, 2);
        assert_eq!(
            table.get_block_of_rows::<f64>(0, 1).unwrap_err(),
            TableError::NotAllocated
        );
    }

    #[test]
    fn column_out_of_bounds() {
        let table = HomogenTable::<f64>::new(2, 2).unwrap();
        assert!(matches!(
            table.get_block_of_column_values::<f64>(2, 0, 1),
            Err(TableError::ColumnOutOfBounds { column: 2, num_columns: 2 })
        ));
    }
}
