//! numeric-tables: numeric tables with pluggable storage layouts.
//!
//! This crate provides a single [`NumericTable`](data::NumericTable)
//! abstraction over dense, array-of-structures, structure-of-arrays, CSR and
//! packed triangular/symmetric storage, typed block access that converts
//! between element types, and a shape/layout validator that algorithms run
//! before touching their inputs.
//!
//! # Example
//!
//! ```
//! use numeric_tables::data::{AccessMode, HomogenTable, LayoutMask, MemoryFlags, NumericTableExt};
//! use numeric_tables::validate::check_numeric_table;
//!
//! let mut table = HomogenTable::<f32>::new(3, 2).unwrap();
//! {
//!     let mut block = table.get_block_of_rows_mut::<f64>(0, 3, AccessMode::WriteOnly).unwrap();
//!     block.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//!     block.release().unwrap();
//! }
//!
//! let status = check_numeric_table(Some(&table), "data", LayoutMask::CSR, MemoryFlags::ALLOCATED, 2, 3, false);
//! assert!(status.is_ok());
//! assert_eq!(table.value::<f64>(2, 1).unwrap(), 6.0);
//! ```

pub mod data;
pub mod error;
pub mod persist;
pub mod validate;

pub use data::{
    AccessMode, BlockDescriptor, BlockDescriptorMut, Dictionary, HomogenTable, LayoutMask,
    MemoryFlags, MemoryStatus, NumericTable, NumericTableExt, NumericTablePtr, ScalarType,
    StorageLayout,
};
pub use error::{Status, TableError};
pub use validate::{check_numeric_table, TableCheck, TableCheckBuilder};
