//! Array-of-structures table: one fixed-size heterogeneous record per row.
//!
//! Each column lives at a byte offset inside the row record, as described by
//! the dictionary. Records are stored back to back in one byte buffer, so a
//! slice of `#[repr(C)]` structs can be attached without conversion.

use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use super::block::allocate;
use super::dictionary::{Dictionary, SharedDictionary};
use super::homogen::cell_count;
use super::layout::{check_column, check_len, check_rows, LayoutMask, StorageLayout};
use super::statistics::BasicStatistics;
use super::table::{check_dictionary_len, ensure_allocated, MemoryStatus, NumericTable, TableKind};
use super::types::{ScalarSlice, ScalarSliceMut, ScalarType};
use crate::error::{Status, TableError};
use crate::persist::{TablePayload, TableTag};

/// Location of one column inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    scalar_type: ScalarType,
    offset: usize,
}

impl Field {
    #[inline]
    fn span(&self) -> Range<usize> {
        self.offset..self.offset + self.scalar_type.size_of()
    }
}

fn fields_of(dictionary: &Dictionary, record_size: usize) -> Result<Vec<Field>, TableError> {
    dictionary
        .iter()
        .enumerate()
        .map(|(j, f)| {
            let field = Field {
                scalar_type: f.scalar_type,
                offset: f.offset,
            };
            if field.span().end > record_size {
                return Err(TableError::DictionaryMismatch(format!(
                    "feature {j} ({}) at offset {} overruns {record_size}-byte record",
                    f.scalar_type, f.offset
                )));
            }
            Ok(field)
        })
        .collect()
}

/// Table of fixed-size records with per-column types and offsets.
///
/// # Example
///
/// ```
/// use numeric_tables::data::{AosTable, Dictionary, FeatureDescriptor, NumericTableExt, ScalarType};
///
/// let dict = Dictionary::packed_record(vec![
///     FeatureDescriptor::new(ScalarType::U8),
///     FeatureDescriptor::new(ScalarType::F64),
/// ]);
/// let table = AosTable::new(dict, 2).unwrap();
/// assert_eq!(table.record_size(), 16);
/// let block = table.get_block_of_rows::<f32>(0, 2).unwrap();
/// assert_eq!(&*block, &[0.0; 4]);
/// ```
#[derive(Debug)]
pub struct AosTable {
    bytes: Vec<u8>,
    record_size: usize,
    fields: Vec<Field>,
    num_rows: usize,
    status: MemoryStatus,
    dictionary: SharedDictionary,
    statistics: BasicStatistics,
}

// =============================================================================
// Constructors
// =============================================================================

impl AosTable {
    fn from_parts(
        bytes: Vec<u8>,
        num_rows: usize,
        record_size: usize,
        dictionary: Dictionary,
        status: MemoryStatus,
    ) -> Result<Self, TableError> {
        let fields = fields_of(&dictionary, record_size)?;
        if status.is_allocated() {
            check_len(cell_count(num_rows, record_size)?, bytes.len())?;
        }
        Ok(Self {
            bytes,
            record_size,
            fields,
            num_rows,
            status,
            dictionary: dictionary.into(),
            statistics: BasicStatistics::default(),
        })
    }

    /// Zeroed table whose record size is the end of the furthest field.
    pub fn new(dictionary: Dictionary, num_rows: usize) -> Result<Self, TableError> {
        let record_size = dictionary.record_size();
        Self::with_record_size(dictionary, record_size, num_rows)
    }

    /// Zeroed table with an explicit record size (e.g. including trailing
    /// padding).
    pub fn with_record_size(
        dictionary: Dictionary,
        record_size: usize,
        num_rows: usize,
    ) -> Result<Self, TableError> {
        let bytes = allocate::<u8>(cell_count(num_rows, record_size)?)?;
        debug!(num_rows, record_size, columns = dictionary.num_features(), "allocated aos table");
        Self::from_parts(
            bytes,
            num_rows,
            record_size,
            dictionary,
            MemoryStatus::InternallyAllocated,
        )
    }

    /// Copy a slice of plain-old-data records. The record size is
    /// `size_of::<R>()`.
    pub fn from_records<R: bytemuck::NoUninit>(
        records: &[R],
        dictionary: Dictionary,
    ) -> Result<Self, TableError> {
        let bytes: &[u8] = bytemuck::cast_slice(records);
        Self::from_parts(
            bytes.to_vec(),
            records.len(),
            std::mem::size_of::<R>(),
            dictionary,
            MemoryStatus::InternallyAllocated,
        )
    }

    /// Attach caller-provided record bytes. The table is user-allocated.
    pub fn from_bytes(
        bytes: Vec<u8>,
        num_rows: usize,
        record_size: usize,
        dictionary: Dictionary,
    ) -> Result<Self, TableError> {
        Self::from_parts(
            bytes,
            num_rows,
            record_size,
            dictionary,
            MemoryStatus::UserAllocated,
        )
    }

    /// Take over attached storage, e.g. after decoding it from an archive.
    pub(crate) fn into_internal(mut self) -> Self {
        self.status = MemoryStatus::InternallyAllocated;
        self
    }

    /// Table with a known shape but no storage yet.
    pub fn unallocated(dictionary: Dictionary, num_rows: usize) -> Result<Self, TableError> {
        let record_size = dictionary.record_size();
        Self::from_parts(
            Vec::new(),
            num_rows,
            record_size,
            dictionary,
            MemoryStatus::NotAllocated,
        )
    }

    /// Allocate zeroed record storage for the current shape.
    pub fn allocate_data_memory(&mut self) -> Result<(), TableError> {
        if self.status == MemoryStatus::UserAllocated {
            return Err(TableError::OwnershipViolation(
                "cannot reallocate user-provided storage".into(),
            ));
        }
        self.bytes = allocate::<u8>(cell_count(self.num_rows, self.record_size)?)?;
        self.status = MemoryStatus::InternallyAllocated;
        Ok(())
    }

    // =========================================================================
    // Record access
    // =========================================================================

    /// Bytes per record.
    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// All records, back to back.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes of record `row`.
    pub fn record_bytes(&self, row: usize) -> Option<&[u8]> {
        if row >= self.num_rows {
            return None;
        }
        let start = row.checked_mul(self.record_size)?;
        self.bytes.get(start..start.checked_add(self.record_size)?)
    }

    /// Copy the records out as `R`. Fails unless `size_of::<R>()` equals the
    /// record size.
    pub fn to_records<R: bytemuck::AnyBitPattern>(&self) -> Result<Vec<R>, TableError> {
        ensure_allocated(self)?;
        check_len(self.record_size, std::mem::size_of::<R>())?;
        if self.record_size == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .bytes
            .chunks_exact(self.record_size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    #[inline]
    fn cell(&self, row: usize, column: usize) -> Range<usize> {
        let field = self.fields[column].span();
        let base = row * self.record_size;
        base + field.start..base + field.end
    }

    fn check_access(&self, rows: &Range<usize>) -> Result<(), TableError> {
        ensure_allocated(self)?;
        check_rows(rows, self.num_rows)
    }
}

// =============================================================================
// NumericTable
// =============================================================================

impl NumericTable for AosTable {
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn num_columns(&self) -> usize {
        self.fields.len()
    }

    fn layout(&self) -> StorageLayout {
        StorageLayout::Aos
    }

    fn dictionary(&self) -> &SharedDictionary {
        &self.dictionary
    }

    fn set_dictionary(&mut self, dictionary: SharedDictionary) -> Result<(), TableError> {
        let fields = fields_of(&dictionary.read(), self.record_size)?;
        if fields != self.fields {
            return Err(TableError::DictionaryMismatch(
                "record types and offsets must match the stored records".into(),
            ));
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
        let width = self.fields.len();
        check_len(rows.len() * width, dst.len())?;
        for (i, row) in rows.enumerate() {
            for (j, field) in self.fields.iter().enumerate() {
                field
                    .scalar_type
                    .read_cell(&self.bytes[self.cell(row, j)], &mut dst, i * width + j);
            }
        }
        Ok(())
    }

    fn write_rows(&mut self, rows: Range<usize>, src: ScalarSlice<'_>) -> Result<(), TableError> {
        self.check_access(&rows)?;
        let width = self.fields.len();
        check_len(rows.len() * width, src.len())?;
        for (i, row) in rows.enumerate() {
            for j in 0..width {
                let cell = self.cell(row, j);
                self.fields[j]
                    .scalar_type
                    .write_cell(&mut self.bytes[cell], src, i * width + j);
            }
        }
        Ok(())
    }

    fn read_column(
        &self,
        column: usize,
        rows: Range<usize>,
        mut dst: ScalarSliceMut<'_>,
    ) -> Result<(), TableError> {
        check_column(column, self.fields.len())?;
        self.check_access(&rows)?;
        check_len(rows.len(), dst.len())?;
        let scalar_type = self.fields[column].scalar_type;
        for (i, row) in rows.enumerate() {
            scalar_type.read_cell(&self.bytes[self.cell(row, column)], &mut dst, i);
        }
        Ok(())
    }

    fn write_column(
        &mut self,
        column: usize,
        rows: Range<usize>,
        src: ScalarSlice<'_>,
    ) -> Result<(), TableError> {
        check_column(column, self.fields.len())?;
        self.check_access(&rows)?;
        check_len(rows.len(), src.len())?;
        let scalar_type = self.fields[column].scalar_type;
        for (i, row) in rows.enumerate() {
            let cell = self.cell(row, column);
            scalar_type.write_cell(&mut self.bytes[cell], src, i);
        }
        Ok(())
    }

    fn resize(&mut self, num_rows: usize) -> Result<(), TableError> {
        if num_rows == self.num_rows {
            return Ok(());
        }
        match self.status {
            MemoryStatus::UserAllocated => {
                return Err(TableError::OwnershipViolation(format!(
                    "cannot resize user-provided records from {} to {num_rows} rows",
                    self.num_rows
                )))
            }
            MemoryStatus::NotAllocated => {}
            MemoryStatus::InternallyAllocated => {
                let len = cell_count(num_rows, self.record_size)?;
                if len > self.bytes.len() {
                    self.bytes
                        .try_reserve_exact(len - self.bytes.len())
                        .map_err(|_| TableError::AllocationFailed { bytes: len })?;
                }
                self.bytes.resize(len, 0);
            }
        }
        debug!(from = self.num_rows, to = num_rows, "resized aos table");
        self.num_rows = num_rows;
        Ok(())
    }

    fn check_structure(&self) -> Status {
        let mut status = check_dictionary_len(&self.dictionary, self.fields.len());
        let dictionary = self.dictionary.read();
        let drifted = dictionary
            .iter()
            .zip(&self.fields)
            .any(|(f, field)| f.scalar_type != field.scalar_type || f.offset != field.offset);
        if drifted {
            status |= TableError::DictionaryMismatch(
                "dictionary types or offsets no longer match the records".into(),
            );
        }
        status
    }

    fn serialization_tag(&self) -> TableTag {
        TableTag::Aos
    }

    fn to_payload(&self) -> Result<TablePayload, TableError> {
        ensure_allocated(self)?;
        Ok(TablePayload::Aos {
            num_rows: self.num_rows,
            record_size: self.record_size,
            bytes: self.bytes.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl TableKind for AosTable {
    const LAYOUTS: LayoutMask = LayoutMask::AOS;
}
