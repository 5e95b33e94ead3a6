//! Table archives.
//!
//! [`write_table`] stores any [`NumericTable`] as a header followed by a
//! Postcard-encoded [`TableRecord`] (layout, dictionary and backing arrays).
//! [`read_table`] looks the header's [`TableTag`] up in the
//! [`TableRegistry`] to rebuild the concrete table behind a
//! [`NumericTablePtr`]. Attached basic statistics are not archived.
//!
//! # Example
//!
//! ```
//! use numeric_tables::data::{CsrTable, NumericTable, NumericTableExt, StorageLayout, TableKind};
//! use numeric_tables::persist;
//!
//! let table = CsrTable::from_dense(&[0.0f64, 1.5, 2.0, 0.0], 2, 2).unwrap();
//! let bytes = persist::to_bytes(&table).unwrap();
//!
//! let loaded = persist::from_bytes(&bytes).unwrap();
//! assert_eq!(loaded.layout(), StorageLayout::Csr);
//! assert_eq!(loaded.value::<f64>(1, 0).unwrap(), 2.0);
//! assert!(CsrTable::<f64>::cast(&loaded).is_some());
//! ```

mod native;
mod payload;
mod registry;

use std::io::{Read, Write};

use thiserror::Error;
use tracing::debug;

pub use native::{
    compute_checksum, read_frame, write_frame, FormatFlags, FormatHeader, CURRENT_VERSION_MAJOR,
    CURRENT_VERSION_MINOR, HEADER_SIZE, MAGIC,
};
pub use payload::{TablePayload, TableRecord};
pub use registry::{CreateFn, TableRegistry, TableTag};

use crate::data::{NumericTable, NumericTablePtr};
use crate::error::TableError;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while writing or reading an archive.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Data is not a table archive (wrong magic).
    #[error("not a table archive")]
    NotATable,

    /// Archive requires a newer format version.
    #[error("archive format {major}.{minor} is newer than supported")]
    UnsupportedVersion { major: u8, minor: u8 },

    /// No constructor is registered for the tag.
    #[error("unknown table tag {0}")]
    UnknownTag(u8),

    /// Payload checksum doesn't match.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Archive was truncated.
    #[error("archive truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Encoded payload does not fit the header's 32-bit size field.
    #[error("payload of {0} bytes is too large")]
    PayloadTooLarge(usize),

    /// Column count does not fit the header's 32-bit field.
    #[error("{0} columns exceed the archive header limit")]
    TooManyColumns(usize),

    /// Payload decoded but describes an inconsistent table.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    /// Rebuilt table failed its own validation.
    #[error(transparent)]
    Table(#[from] TableError),

    /// Postcard encoding or decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] postcard::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Entry points
// ============================================================================

/// Write `table` as an archive.
pub fn write_table<W: Write, N: NumericTable + ?Sized>(
    writer: &mut W,
    table: &N,
) -> Result<(), PersistError> {
    let num_columns = table.num_columns();
    let columns =
        u32::try_from(num_columns).map_err(|_| PersistError::TooManyColumns(num_columns))?;
    let layout = table.layout();
    let dictionary = table.dictionary().snapshot();

    let mut header = FormatHeader::new(table.serialization_tag(), table.num_rows() as u64, columns);
    if layout.is_sparse() {
        header.flags.set(FormatFlags::SPARSE);
    }
    if layout.is_packed() {
        header.flags.set(FormatFlags::PACKED);
    }
    if !dictionary.is_homogeneous() {
        header.flags.set(FormatFlags::HETEROGENEOUS);
    }
    if dictionary.has_discrete() {
        header.flags.set(FormatFlags::HAS_DISCRETE);
    }

    let record = TableRecord {
        layout,
        dictionary: dictionary.features().to_vec(),
        body: table.to_payload()?,
    };
    let payload = postcard::to_allocvec(&record)?;
    write_frame(writer, &mut header, &payload)?;
    debug!(
        tag = ?header.tag,
        num_rows = header.num_rows,
        num_columns,
        bytes = payload.len(),
        "wrote table archive"
    );
    Ok(())
}

/// Read an archive using the global registry.
pub fn read_table<R: Read>(reader: &mut R) -> Result<NumericTablePtr, PersistError> {
    read_table_with(TableRegistry::global(), reader)
}

/// Read an archive, rebuilding the table through `registry`.
///
/// The rebuilt table must report the layout and shape recorded in the
/// archive; its data is internally allocated.
pub fn read_table_with<R: Read>(
    registry: &TableRegistry,
    reader: &mut R,
) -> Result<NumericTablePtr, PersistError> {
    let (header, payload) = read_frame(reader)?;
    let record: TableRecord = postcard::from_bytes(&payload)?;
    let layout = record.layout;
    let table = registry.create(header.tag, record)?;

    if table.layout() != layout {
        return Err(PersistError::CorruptPayload(format!(
            "archive records layout {layout}, rebuilt table is {}",
            table.layout()
        )));
    }
    if table.num_rows() as u64 != header.num_rows
        || table.num_columns() as u64 != u64::from(header.num_columns)
    {
        return Err(PersistError::CorruptPayload(format!(
            "header shape {}x{} does not match rebuilt table {}x{}",
            header.num_rows,
            header.num_columns,
            table.num_rows(),
            table.num_columns()
        )));
    }
    debug!(tag = ?header.tag, %layout, num_rows = header.num_rows, "read table archive");
    Ok(table)
}

/// Encode `table` into a byte vector.
pub fn to_bytes<N: NumericTable + ?Sized>(table: &N) -> Result<Vec<u8>, PersistError> {
    let mut bytes = Vec::new();
    write_table(&mut bytes, table)?;
    Ok(bytes)
}

/// Decode a table from bytes produced by [`to_bytes`] or [`write_table`].
pub fn from_bytes(bytes: &[u8]) -> Result<NumericTablePtr, PersistError> {
    read_table(&mut &bytes[..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{HomogenTable, NumericTableExt, PackedTable, StorageLayout};

    #[test]
    fn dense_roundtrip() {
        let table = HomogenTable::from_rows(&[[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]]).unwrap();
        let loaded = from_bytes(&to_bytes(&table).unwrap()).unwrap();
        assert_eq!(loaded.num_rows(), 3);
        assert_eq!(loaded.num_columns(), 2);
        let block = loaded.get_block_of_rows::<f32>(0, 3).unwrap();
        assert_eq!(&*block, table.as_slice());
    }

    #[test]
    fn header_flags() {
        let table = PackedTable::<f64>::square(StorageLayout::UpperPackedSymmetric, 2).unwrap();
        let bytes = to_bytes(&table).unwrap();
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = FormatHeader::from_bytes(&header).unwrap();
        assert_eq!(header.tag, TableTag::Packed);
        assert!(header.flags.contains(FormatFlags::PACKED));
        assert!(!header.flags.contains(FormatFlags::SPARSE));
        assert_eq!((header.num_rows, header.num_columns), (2, 2));
    }

    #[test]
    fn unallocated_table_is_not_written() {
        let table = HomogenTable::<f64>::unallocated(2, 2);
        assert!(matches!(
            to_bytes(&table),
            Err(PersistError::Table(TableError::NotAllocated))
        ));
    }

    #[test]
    fn shape_mismatch_is_corrupt() {
        let table = HomogenTable::<u8>::new(2, 3).unwrap();
        let mut bytes = to_bytes(&table).unwrap();
        // Header rows live at offset 20 and are not covered by the checksum.
        bytes[20] = 7;
        assert!(matches!(
            from_bytes(&bytes),
            Err(PersistError::CorruptPayload(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            from_bytes(b"definitely not a table archive!!"),
            Err(PersistError::NotATable)
        ));
        assert!(matches!(
            from_bytes(b"NTBL"),
            Err(PersistError::Truncated { .. })
        ));
    }
}
