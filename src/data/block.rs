//! Scoped, type-converting views onto table rows or columns.
//!
//! A block is acquired from a table through
//! [`NumericTableExt`](super::NumericTableExt) and released by
//! [`release`](BlockDescriptorMut::release) or by going out of scope. Mutable
//! blocks borrow their table exclusively, so overlapping writers and
//! use-after-release are compile errors rather than runtime hazards.

use std::borrow::Cow;
use std::fmt;
use std::ops::{Deref, DerefMut};

use tracing::{trace, warn};

use super::table::NumericTable;
use super::types::Scalar;
use crate::error::TableError;

/// How a mutable block will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Values are read; nothing is written back.
    ReadOnly,
    /// Values are written back on release; initial contents are unspecified.
    WriteOnly,
    /// Values are read on acquisition and written back on release.
    ReadWrite,
}

impl AccessMode {
    /// Returns true if the block is filled from the table on acquisition.
    #[inline]
    pub const fn reads(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    /// Returns true if the block is written back on release.
    #[inline]
    pub const fn writes(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

/// The cells a block covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRegion {
    /// Rows `start..start + len`, every column, row-major.
    Rows { start: usize, len: usize },
    /// One column over rows `start..start + len`.
    Column {
        column: usize,
        start: usize,
        len: usize,
    },
}

impl BlockRegion {
    /// First row.
    #[inline]
    pub fn start(&self) -> usize {
        match *self {
            BlockRegion::Rows { start, .. } | BlockRegion::Column { start, .. } => start,
        }
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        match *self {
            BlockRegion::Rows { len, .. } | BlockRegion::Column { len, .. } => len,
        }
    }

    /// Returns true if the region covers no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Covered rows as a range.
    #[inline]
    pub fn rows(&self) -> std::ops::Range<usize> {
        self.start()..self.start() + self.len()
    }
}

/// Allocate a zeroed buffer of `len` values, reporting failure instead of
/// aborting.
pub(crate) fn allocate<T: Clone + Default>(len: usize) -> Result<Vec<T>, TableError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| TableError::AllocationFailed {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}

// =============================================================================
// Read-only block
// =============================================================================

/// Read-only view of a block of cells as `T`.
///
/// Dereferences to the row-major values. Borrowed from the table when no
/// conversion was needed, owned otherwise.
#[derive(Clone)]
pub struct BlockDescriptor<'a, T: Scalar> {
    values: Cow<'a, [T]>,
    region: BlockRegion,
    width: usize,
}

impl<'a, T: Scalar> BlockDescriptor<'a, T> {
    pub(crate) fn borrowed(values: &'a [T], region: BlockRegion, width: usize) -> Self {
        Self {
            values: Cow::Borrowed(values),
            region,
            width,
        }
    }

    pub(crate) fn owned(values: Vec<T>, region: BlockRegion, width: usize) -> Self {
        Self {
            values: Cow::Owned(values),
            region,
            width,
        }
    }

    /// The covered cells.
    pub fn region(&self) -> BlockRegion {
        self.region
    }

    /// Number of rows in the block.
    pub fn num_rows(&self) -> usize {
        self.region.len()
    }

    /// Number of values per row.
    pub fn num_columns(&self) -> usize {
        self.width
    }

    /// Returns true if the block points straight into table storage.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.values, Cow::Borrowed(_))
    }

    /// Values of row `i` within the block.
    pub fn row(&self, i: usize) -> Option<&[T]> {
        let start = i.checked_mul(self.width)?;
        self.values.get(start..start + self.width)
    }

    /// Iterate over the block's rows.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        (0..self.num_rows()).filter_map(move |i| self.row(i))
    }

    /// Take the values, copying only if they are borrowed.
    pub fn into_owned(self) -> Vec<T> {
        self.values.into_owned()
    }

    /// Release the block. Equivalent to dropping it.
    pub fn release(self) {
        trace!(region = ?self.region, "released read-only block");
    }
}

impl<T: Scalar> Deref for BlockDescriptor<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.values
    }
}

impl<T: Scalar> fmt::Debug for BlockDescriptor<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDescriptor")
            .field("region", &self.region)
            .field("width", &self.width)
            .field("borrowed", &self.is_borrowed())
            .field("values", &&*self.values)
            .finish()
    }
}

// =============================================================================
// Mutable block
// =============================================================================

enum BlockTarget<'a, T, N: ?Sized> {
    /// Edits go straight to table storage.
    Direct(&'a mut [T]),
    /// Edits go to a buffer converted back on flush.
    Staged { table: &'a mut N, buffer: Vec<T> },
    Released,
}

/// Mutable view of a block of cells as `T`.
///
/// Holds an exclusive borrow of the table until released. `WriteOnly` and
/// `ReadWrite` blocks write their values back on [`release`](Self::release);
/// a block dropped without release flushes as well, logging any failure.
pub struct BlockDescriptorMut<'a, T: Scalar, N: NumericTable + ?Sized> {
    target: BlockTarget<'a, T, N>,
    region: BlockRegion,
    width: usize,
    mode: AccessMode,
}

impl<'a, T: Scalar, N: NumericTable + ?Sized> BlockDescriptorMut<'a, T, N> {
    pub(crate) fn direct(
        values: &'a mut [T],
        region: BlockRegion,
        width: usize,
        mode: AccessMode,
    ) -> Self {
        Self {
            target: BlockTarget::Direct(values),
            region,
            width,
            mode,
        }
    }

    pub(crate) fn staged(
        table: &'a mut N,
        buffer: Vec<T>,
        region: BlockRegion,
        width: usize,
        mode: AccessMode,
    ) -> Self {
        Self {
            target: BlockTarget::Staged { table, buffer },
            region,
            width,
            mode,
        }
    }

    /// The covered cells.
    pub fn region(&self) -> BlockRegion {
        self.region
    }

    /// Access mode the block was acquired with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Number of rows in the block.
    pub fn num_rows(&self) -> usize {
        self.region.len()
    }

    /// Number of values per row.
    pub fn num_columns(&self) -> usize {
        self.width
    }

    /// Returns true if edits go straight to table storage.
    pub fn is_direct(&self) -> bool {
        matches!(self.target, BlockTarget::Direct(_))
    }

    /// Mutable values of row `i` within the block.
    pub fn row_mut(&mut self, i: usize) -> Option<&mut [T]> {
        let width = self.width;
        let start = i.checked_mul(width)?;
        self.deref_mut().get_mut(start..start + width)
    }

    /// Write the block back (if its mode writes) and end the borrow.
    pub fn release(mut self) -> Result<(), TableError> {
        self.flush()
    }

    fn flush(&mut self) -> Result<(), TableError> {
        let target = std::mem::replace(&mut self.target, BlockTarget::Released);
        let BlockTarget::Staged { table, buffer } = target else {
            trace!(region = ?self.region, mode = ?self.mode, "released block");
            return Ok(());
        };
        if !self.mode.writes() {
            trace!(region = ?self.region, "released read-only staged block");
            return Ok(());
        }
        let src = T::wrap(&buffer);
        match self.region {
            BlockRegion::Rows { start, len } => table.write_rows(start..start + len, src)?,
            BlockRegion::Column { column, start, len } => {
                table.write_column(column, start..start + len, src)?
            }
        }
        trace!(region = ?self.region, "flushed staged block");
        Ok(())
    }
}

impl<T: Scalar, N: NumericTable + ?Sized> Deref for BlockDescriptorMut<'_, T, N> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match &self.target {
            BlockTarget::Direct(values) => values,
            BlockTarget::Staged { buffer, .. } => buffer,
            BlockTarget::Released => &[],
        }
    }
}

impl<T: Scalar, N: NumericTable + ?Sized> DerefMut for BlockDescriptorMut<'_, T, N> {
    fn deref_mut(&mut self) -> &mut [T] {
        match &mut self.target {
            BlockTarget::Direct(values) => values,
            BlockTarget::Staged { buffer, .. } => buffer,
            BlockTarget::Released => &mut [],
        }
    }
}

impl<T: Scalar, N: NumericTable + ?Sized> Drop for BlockDescriptorMut<'_, T, N> {
    fn drop(&mut self) {
        if matches!(self.target, BlockTarget::Released) {
            return;
        }
        if let Err(err) = self.flush() {
            warn!(region = ?self.region, error = %err, "failed to flush dropped block");
        }
    }
}

impl<T: Scalar, N: NumericTable + ?Sized> fmt::Debug for BlockDescriptorMut<'_, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDescriptorMut")
            .field("region", &self.region)
            .field("width", &self.width)
            .field("mode", &self.mode)
            .field("direct", &self.is_direct())
            .field("values", &self.deref())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CsrTable, HomogenTable, NumericTableExt};

    #[test]
    fn access_mode_flags() {
        assert!(AccessMode::ReadOnly.reads());
        assert!(!AccessMode::ReadOnly.writes());
        assert!(!AccessMode::WriteOnly.reads());
        assert!(AccessMode::WriteOnly.writes());
        assert!(AccessMode::ReadWrite.reads() && AccessMode::ReadWrite.writes());
    }

    #[test]
    fn region_rows() {
        let region = BlockRegion::Column { column: 3, start: 2, len: 4 };
        assert_eq!(region.rows(), 2..6);
        assert!(!region.is_empty());
    }

    #[test]
    fn native_block_is_borrowed() {
        let table = HomogenTable::from_vec(vec![1.0f64, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let block = table.get_block_of_rows::<f64>(0, 2).unwrap();
        assert!(block.is_borrowed());
        assert_eq!(block.row(1), Some(&[3.0, 4.0][..]));
        assert_eq!(block.rows().count(), 2);
    }

    #[test]
    fn converted_block_is_owned() {
        let table = HomogenTable::from_vec(vec![1.0f64, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let block = table.get_block_of_rows::<i32>(0, 2).unwrap();
        assert!(!block.is_borrowed());
        assert_eq!(block.into_owned(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn read_only_mutable_block_discards_edits() {
        let mut table = HomogenTable::from_vec(vec![1.0f64, 2.0], 1, 2).unwrap();
        {
            let mut block = table
                .get_block_of_rows_mut::<f64>(0, 1, AccessMode::ReadOnly)
                .unwrap();
            assert!(!block.is_direct());
            block[0] = 99.0;
            block.release().unwrap();
        }
        assert_eq!(table.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn staged_block_flushes_on_drop() {
        let mut table = HomogenTable::<i16>::new(2, 2).unwrap();
        {
            let mut block = table
                .get_block_of_rows_mut::<f64>(1, 1, AccessMode::WriteOnly)
                .unwrap();
            block.copy_from_slice(&[7.6, -3.2]);
        }
        assert_eq!(table.as_slice(), &[0, 0, 7, -3]);
    }

    #[test]
    fn read_write_round_trip_through_conversion() {
        let mut table = HomogenTable::from_vec(vec![1.0f32, 2.0, 3.0], 3, 1).unwrap();
        let mut block = table
            .get_block_of_rows_mut::<f64>(0, 3, AccessMode::ReadWrite)
            .unwrap();
        for v in block.iter_mut() {
            *v *= 10.0;
        }
        block.release().unwrap();
        assert_eq!(table.as_slice(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn row_mut_indexes_rows() {
        let mut table = CsrTable::<f64>::new(2, 3).unwrap();
        let mut block = table
            .get_block_of_rows_mut::<f64>(0, 2, AccessMode::ReadWrite)
            .unwrap();
        if let Some(row) = block.row_mut(1) {
            row[2] = 5.0;
        }
        assert!(block.row_mut(2).is_none());
        block.release().unwrap();
        assert_eq!(table.values(), &[5.0]);
        assert_eq!(table.column_indices(), &[2]);
    }

    #[test]
    fn allocate_zeroed() {
        let buffer = allocate::<u16>(4).unwrap();
        assert_eq!(buffer, vec![0; 4]);
    }
}
