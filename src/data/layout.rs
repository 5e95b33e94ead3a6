//! Storage layout tags and layout-dependent index arithmetic.
//!
//! Every table reports one [`StorageLayout`]. Each layout owns a distinct bit,
//! so "is this layout acceptable" is a single AND against a [`LayoutMask`]:
//!
//! ```
//! use numeric_tables::data::{LayoutMask, StorageLayout};
//!
//! assert!(StorageLayout::LowerPackedSymmetric.is_packed());
//! assert!(!StorageLayout::Csr.is_packed());
//! assert!(LayoutMask::CSR.contains(StorageLayout::Csr));
//! ```
//!
//! Packed layouts store only one triangle of a square matrix, row by row:
//!
//! ```text
//! Lower (n = 3):        Upper (n = 3):
//! [a . .]               [a b c]
//! [b c .]  -> a b c d e f    [. d e]  -> a b c d e f
//! [d e f]               [. . f]
//! ```

use std::fmt;
use std::iter::FusedIterator;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not, Range};

use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Physical arrangement of a table's backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum StorageLayout {
    /// Homogeneous row-major contiguous array.
    Dense = 1 << 0,
    /// Array of fixed-size heterogeneous records, one per row.
    Aos = 1 << 1,
    /// One contiguous typed array per column.
    Soa = 1 << 2,
    /// Compressed sparse rows.
    Csr = 1 << 4,
    /// Upper triangle of a square matrix, zero below the diagonal.
    UpperPackedTriangular = 1 << 7,
    /// Upper triangle of a symmetric square matrix.
    UpperPackedSymmetric = 1 << 8,
    /// Lower triangle of a symmetric square matrix.
    LowerPackedSymmetric = 1 << 9,
    /// Lower triangle of a square matrix, zero above the diagonal.
    LowerPackedTriangular = 1 << 10,
}

impl StorageLayout {
    /// Every layout, in tag order.
    pub const ALL: [StorageLayout; 8] = [
        StorageLayout::Dense,
        StorageLayout::Aos,
        StorageLayout::Soa,
        StorageLayout::Csr,
        StorageLayout::UpperPackedTriangular,
        StorageLayout::UpperPackedSymmetric,
        StorageLayout::LowerPackedSymmetric,
        StorageLayout::LowerPackedTriangular,
    ];

    /// The layout's bit.
    #[inline]
    pub const fn bit(self) -> u32 {
        self as u32
    }

    /// Recover a layout from its bit.
    pub fn from_bit(bit: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.bit() == bit)
    }

    /// True for the four packed triangular/symmetric layouts.
    #[inline]
    pub const fn is_packed(self) -> bool {
        LayoutMask::PACKED.0 & self.bit() != 0
    }

    /// True for packed layouts that keep the upper triangle.
    #[inline]
    pub const fn is_upper(self) -> bool {
        matches!(
            self,
            StorageLayout::UpperPackedSymmetric | StorageLayout::UpperPackedTriangular
        )
    }

    /// True for packed symmetric layouts.
    #[inline]
    pub const fn is_symmetric(self) -> bool {
        LayoutMask::PACKED_SYMMETRIC.0 & self.bit() != 0
    }

    /// True for the sparse layout.
    #[inline]
    pub const fn is_sparse(self) -> bool {
        matches!(self, StorageLayout::Csr)
    }

    /// Short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            StorageLayout::Dense => "dense",
            StorageLayout::Aos => "aos",
            StorageLayout::Soa => "soa",
            StorageLayout::Csr => "csr",
            StorageLayout::UpperPackedTriangular => "upper-packed-triangular",
            StorageLayout::UpperPackedSymmetric => "upper-packed-symmetric",
            StorageLayout::LowerPackedSymmetric => "lower-packed-symmetric",
            StorageLayout::LowerPackedTriangular => "lower-packed-triangular",
        }
    }
}

impl fmt::Display for StorageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of storage layouts, one bit per [`StorageLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LayoutMask(u32);

impl LayoutMask {
    /// No layouts.
    pub const NONE: LayoutMask = LayoutMask(0);
    pub const DENSE: LayoutMask = LayoutMask(StorageLayout::Dense.bit());
    pub const AOS: LayoutMask = LayoutMask(StorageLayout::Aos.bit());
    pub const SOA: LayoutMask = LayoutMask(StorageLayout::Soa.bit());
    pub const CSR: LayoutMask = LayoutMask(StorageLayout::Csr.bit());
    pub const PACKED_TRIANGULAR: LayoutMask = LayoutMask(
        StorageLayout::UpperPackedTriangular.bit() | StorageLayout::LowerPackedTriangular.bit(),
    );
    pub const PACKED_SYMMETRIC: LayoutMask = LayoutMask(
        StorageLayout::UpperPackedSymmetric.bit() | StorageLayout::LowerPackedSymmetric.bit(),
    );
    /// All four packed layouts.
    pub const PACKED: LayoutMask =
        LayoutMask(Self::PACKED_TRIANGULAR.0 | Self::PACKED_SYMMETRIC.0);
    /// Layouts that keep every cell explicitly (dense, AOS, SOA).
    pub const FULL: LayoutMask = LayoutMask(Self::DENSE.0 | Self::AOS.0 | Self::SOA.0);
    /// Every layout.
    pub const ALL: LayoutMask = LayoutMask(Self::FULL.0 | Self::CSR.0 | Self::PACKED.0);

    /// Create a mask from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if no layout is in the mask.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if `layout` is in the mask.
    #[inline]
    pub const fn contains(self, layout: StorageLayout) -> bool {
        self.0 & layout.bit() != 0
    }

    /// Layouts in the mask, in tag order.
    pub fn layouts(self) -> impl Iterator<Item = StorageLayout> {
        StorageLayout::ALL.into_iter().filter(move |l| self.contains(*l))
    }
}

impl From<StorageLayout> for LayoutMask {
    fn from(layout: StorageLayout) -> Self {
        LayoutMask(layout.bit())
    }
}

impl BitOr for LayoutMask {
    type Output = LayoutMask;

    fn bitor(self, rhs: LayoutMask) -> LayoutMask {
        LayoutMask(self.0 | rhs.0)
    }
}

impl BitOr<StorageLayout> for LayoutMask {
    type Output = LayoutMask;

    fn bitor(self, rhs: StorageLayout) -> LayoutMask {
        LayoutMask(self.0 | rhs.bit())
    }
}

impl BitOrAssign for LayoutMask {
    fn bitor_assign(&mut self, rhs: LayoutMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for LayoutMask {
    type Output = LayoutMask;

    fn bitand(self, rhs: LayoutMask) -> LayoutMask {
        LayoutMask(self.0 & rhs.0)
    }
}

impl Not for LayoutMask {
    type Output = LayoutMask;

    fn not(self) -> LayoutMask {
        LayoutMask(!self.0 & Self::ALL.0)
    }
}

// =============================================================================
// Range checks
// =============================================================================

/// Validate a `(start, n)` row request against a table of `num_rows` rows.
#[inline]
pub fn row_range(start: usize, n: usize, num_rows: usize) -> Result<Range<usize>, TableError> {
    match start.checked_add(n) {
        Some(end) if end <= num_rows => Ok(start..end),
        end => Err(TableError::RowRangeOutOfBounds {
            start,
            end: end.unwrap_or(usize::MAX),
            num_rows,
        }),
    }
}

/// Validate a `Range` of rows against a table of `num_rows` rows.
#[inline]
pub fn check_rows(rows: &Range<usize>, num_rows: usize) -> Result<(), TableError> {
    if rows.start > rows.end || rows.end > num_rows {
        return Err(TableError::RowRangeOutOfBounds {
            start: rows.start,
            end: rows.end,
            num_rows,
        });
    }
    Ok(())
}

/// Validate a column index.
#[inline]
pub fn check_column(column: usize, num_columns: usize) -> Result<(), TableError> {
    if column >= num_columns {
        return Err(TableError::ColumnOutOfBounds {
            column,
            num_columns,
        });
    }
    Ok(())
}

/// Validate that an erased buffer has exactly `expected` elements.
#[inline]
pub fn check_len(expected: usize, actual: usize) -> Result<(), TableError> {
    if expected != actual {
        return Err(TableError::BufferLengthMismatch { expected, actual });
    }
    Ok(())
}

// =============================================================================
// Packed index arithmetic
// =============================================================================

/// Number of stored elements for a packed `n x n` matrix.
///
/// Fails with [`TableError::AllocationFailed`] when the count does not fit in
/// `usize`.
#[inline]
pub fn packed_len(n: usize) -> Result<usize, TableError> {
    // Halve the even factor first so `n (n + 1)` itself never has to fit.
    let (a, b) = if n % 2 == 0 { (n / 2, n + 1) } else { (n, n / 2 + 1) };
    a.checked_mul(b)
        .ok_or(TableError::AllocationFailed { bytes: usize::MAX })
}

/// Linear offset of `(row, col)` in the stored triangle, or `None` if the
/// cell lies outside it.
#[inline]
pub fn packed_index(upper: bool, row: usize, col: usize, n: usize) -> Option<usize> {
    if upper {
        // Row i starts after rows 0..i, which hold n, n-1, ..., n-i+1 cells.
        (col >= row).then(|| row * n - row * row.saturating_sub(1) / 2 + (col - row))
    } else {
        (col <= row).then(|| row * (row + 1) / 2 + col)
    }
}

/// Linear offset of `(row, col)` for a symmetric packed matrix, mirroring
/// cells outside the stored triangle.
#[inline]
pub fn packed_symmetric_index(upper: bool, row: usize, col: usize, n: usize) -> usize {
    let (r, c) = if upper == (col >= row) { (row, col) } else { (col, row) };
    // The mirrored coordinate is always inside the stored triangle.
    packed_index(upper, r, c, n).unwrap_or_default()
}

// =============================================================================
// Strided iteration
// =============================================================================

/// Iterator over elements with a fixed stride.
///
/// Used for column access over row-major storage.
#[derive(Debug, Clone)]
pub struct StridedIter<'a, T> {
    data: &'a [T],
    pos: usize,
    stride: usize,
    remaining: usize,
}

impl<'a, T> StridedIter<'a, T> {
    /// Iterate `count` elements of `data` starting at `start`, `stride` apart.
    #[inline]
    pub fn new(data: &'a [T], start: usize, stride: usize, count: usize) -> Self {
        Self {
            data,
            pos: start,
            stride,
            remaining: count,
        }
    }
}

impl<'a, T> Iterator for StridedIter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.data.get(self.pos)?;
        self.pos += self.stride;
        self.remaining -= 1;
        Some(item)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl<T> FusedIterator for StridedIter<'_, T> {}
