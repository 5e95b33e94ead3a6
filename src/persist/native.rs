//! Native table archive format.
//!
//! An archive is a 32-byte header followed by a Postcard-encoded
//! [`TableRecord`](super::TableRecord).
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Header (32 bytes)                        │
//! ├────────────────────────────────────────────────────────────┤
//! │                    Payload (variable)                       │
//! └────────────────────────────────────────────────────────────┘
//! ```

use std::io::{Read, Write};

use super::registry::TableTag;
use super::PersistError;

// ============================================================================
// Constants
// ============================================================================

/// Magic bytes identifying a table archive.
pub const MAGIC: &[u8; 4] = b"NTBL";

/// Current format version (major).
pub const CURRENT_VERSION_MAJOR: u8 = 1;

/// Current format version (minor).
pub const CURRENT_VERSION_MINOR: u8 = 0;

/// Size of the format header in bytes.
pub const HEADER_SIZE: usize = 32;

// ============================================================================
// Format Flags
// ============================================================================

/// Bitfield describing the archived table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatFlags(u16);

impl FormatFlags {
    /// Table stores only non-zero cells.
    pub const SPARSE: u16 = 1 << 0;
    /// Table stores one triangle of a square matrix.
    pub const PACKED: u16 = 1 << 1;
    /// Columns have different scalar types.
    pub const HETEROGENEOUS: u16 = 1 << 2;
    /// Dictionary contains categorical or ordinal features.
    pub const HAS_DISCRETE: u16 = 1 << 3;

    /// Create empty flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create flags from raw value.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Get raw bits.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Check if a flag is set.
    pub const fn contains(self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    /// Set a flag.
    pub fn set(&mut self, flag: u16) {
        self.0 |= flag;
    }
}

// ============================================================================
// Format Header
// ============================================================================

/// 32-byte archive header.
///
/// # Layout
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     Magic ("NTBL")
/// 4       1     Version major
/// 5       1     Version minor
/// 6       1     Table tag
/// 7       1     Reserved
/// 8       2     Flags (bitfield)
/// 10      2     Reserved
/// 12      4     Payload size (bytes)
/// 16      4     CRC32 checksum of payload
/// 20      8     Number of rows
/// 28      4     Number of columns
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub tag: TableTag,
    pub flags: FormatFlags,
    pub payload_size: u32,
    pub checksum: u32,
    pub num_rows: u64,
    pub num_columns: u32,
}

impl FormatHeader {
    /// Create a header with the current version.
    pub fn new(tag: TableTag, num_rows: u64, num_columns: u32) -> Self {
        Self {
            version_major: CURRENT_VERSION_MAJOR,
            version_minor: CURRENT_VERSION_MINOR,
            tag,
            flags: FormatFlags::empty(),
            payload_size: 0,
            checksum: 0,
            num_rows,
            num_columns,
        }
    }

    /// Serialize header to 32 bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version_major;
        buf[5] = self.version_minor;
        buf[6] = self.tag as u8;
        buf[8..10].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf[20..28].copy_from_slice(&self.num_rows.to_le_bytes());
        buf[28..32].copy_from_slice(&self.num_columns.to_le_bytes());
        buf
    }

    /// Parse header from 32 bytes.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, PersistError> {
        if &buf[0..4] != MAGIC {
            return Err(PersistError::NotATable);
        }

        let version_major = buf[4];
        let version_minor = buf[5];
        if version_major > CURRENT_VERSION_MAJOR {
            return Err(PersistError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }

        let tag = TableTag::from_u8(buf[6]).ok_or(PersistError::UnknownTag(buf[6]))?;
        let flags = FormatFlags::from_bits(u16::from_le_bytes([buf[8], buf[9]]));
        let payload_size = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let checksum = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);

        let mut rows = [0u8; 8];
        rows.copy_from_slice(&buf[20..28]);
        let num_rows = u64::from_le_bytes(rows);
        let num_columns = u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]);

        Ok(Self {
            version_major,
            version_minor,
            tag,
            flags,
            payload_size,
            checksum,
            num_rows,
            num_columns,
        })
    }
}

// ============================================================================
// CRC32 Helper
// ============================================================================

/// Compute CRC32 checksum of data.
pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

// ============================================================================
// Framing
// ============================================================================

/// Write header and payload, filling in the payload size and checksum.
pub fn write_frame<W: Write>(
    writer: &mut W,
    header: &mut FormatHeader,
    payload: &[u8],
) -> Result<(), PersistError> {
    header.payload_size =
        u32::try_from(payload.len()).map_err(|_| PersistError::PayloadTooLarge(payload.len()))?;
    header.checksum = compute_checksum(payload);
    writer.write_all(&header.to_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Read header and payload, verifying the checksum.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<(FormatHeader, Vec<u8>), PersistError> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            PersistError::Truncated {
                expected: HEADER_SIZE,
                actual: 0,
            }
        } else {
            PersistError::Io(e)
        }
    })?;
    let header = FormatHeader::from_bytes(&header_buf)?;

    let expected = header.payload_size as usize;
    let mut payload = Vec::new();
    reader.take(expected as u64).read_to_end(&mut payload)?;
    if payload.len() != expected {
        return Err(PersistError::Truncated {
            expected,
            actual: payload.len(),
        });
    }

    let actual_checksum = compute_checksum(&payload);
    if actual_checksum != header.checksum {
        return Err(PersistError::ChecksumMismatch {
            expected: header.checksum,
            actual: actual_checksum,
        });
    }

    Ok((header, payload))
}

// ============================================================================
// Tests
// ============================================================================
