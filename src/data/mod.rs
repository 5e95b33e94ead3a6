//! Numeric table containers.
//!
//! This module provides the [`NumericTable`] trait and its storage variants.
//!
//! # Overview
//!
//! Algorithms are written once against [`NumericTable`] and read or write
//! cells through typed blocks ([`BlockDescriptor`], [`BlockDescriptorMut`])
//! obtained from [`NumericTableExt`]. A block converts between the table's
//! element types and the requested type; when they already match and the
//! storage is contiguous, it borrows the table directly.
//!
//! # Storage Types
//!
//! - [`HomogenTable`]: row-major dense storage of one element type
//! - [`AosTable`]: array of fixed-size records with per-field types
//! - [`SoaTable`]: one typed array per column
//! - [`CsrTable`]: compressed sparse rows
//! - [`PackedTable`]: one triangle of a square matrix, triangular or symmetric
//!
//! Each table reports its [`StorageLayout`], so validators can reject a
//! layout with a [`LayoutMask`] test instead of a type check.

mod aos;
#[cfg(feature = "ndarray")]
mod array;
mod block;
mod csr;
mod dictionary;
mod homogen;
mod layout;
mod packed;
mod soa;
mod statistics;
mod table;
mod types;

pub use aos::AosTable;
pub use block::{AccessMode, BlockDescriptor, BlockDescriptorMut, BlockRegion};
pub use csr::{validate_csr, CsrBlock, CsrBlockMut, CsrIndexing, CsrTable};
pub use dictionary::{Dictionary, FeatureDescriptor, FeatureKind, SharedDictionary};
pub use homogen::HomogenTable;
pub use layout::{
    check_column, check_len, check_rows, packed_index, packed_len, packed_symmetric_index,
    row_range, LayoutMask, StorageLayout, StridedIter,
};
pub use packed::PackedTable;
pub use soa::SoaTable;
pub use statistics::{
    attach_basic_statistics, compute_basic_statistics, BasicStatistics, Parallelism,
    StatisticKind,
};
pub use table::{
    check_dictionary_len, ensure_allocated, MemoryFlags, MemoryStatus, NumericTable,
    NumericTableExt, NumericTablePtr, TableKind,
};
pub use types::{convert_slice, Scalar, ScalarSlice, ScalarSliceMut, ScalarType, ScalarVec};
