//! Conversions between dense tables and `ndarray` matrices.

use ndarray::{Array2, ArrayView2};

use super::homogen::HomogenTable;
use super::table::NumericTable;
use super::types::Scalar;
use crate::error::TableError;

impl<T: Scalar> HomogenTable<T> {
    /// Copy a 2-D view (any memory order) into a row-major table.
    pub fn from_array(view: ArrayView2<'_, T>) -> Result<Self, TableError> {
        let (num_rows, num_columns) = view.dim();
        let data: Vec<T> = view.iter().copied().collect();
        Ok(Self::from_vec(data, num_rows, num_columns)?.into_internal())
    }

    /// Copy the table into an owned `num_rows x num_columns` array.
    pub fn to_array(&self) -> Result<Array2<T>, TableError> {
        let (rows, cols) = (self.num_rows(), self.num_columns());
        Array2::from_shape_vec((rows, cols), self.as_slice().to_vec()).map_err(|_| {
            TableError::BufferLengthMismatch {
                expected: rows * cols,
                actual: self.as_slice().len(),
            }
        })
    }
}
