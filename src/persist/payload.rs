//! Serializable table contents.

use serde::{Deserialize, Serialize};

use crate::data::{FeatureDescriptor, ScalarVec, StorageLayout};

/// Everything needed to rebuild a table: its layout, dictionary and the raw
/// backing arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    /// Layout reported by the table when it was written.
    pub layout: StorageLayout,
    /// One descriptor per column.
    pub dictionary: Vec<FeatureDescriptor>,
    /// Backing arrays.
    pub body: TablePayload,
}

/// Backing arrays of one concrete table type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TablePayload {
    /// Row-major cells of a dense table.
    Dense {
        num_rows: usize,
        num_columns: usize,
        values: ScalarVec,
    },
    /// Raw record bytes of an array-of-structures table.
    Aos {
        num_rows: usize,
        record_size: usize,
        bytes: Vec<u8>,
    },
    /// One array per column.
    Soa {
        num_rows: usize,
        columns: Vec<ScalarVec>,
    },
    /// Zero-based CSR arrays.
    Csr {
        num_columns: usize,
        values: ScalarVec,
        column_indices: Vec<usize>,
        row_offsets: Vec<usize>,
    },
    /// Packed triangle of a square matrix.
    Packed {
        layout: StorageLayout,
        dimension: usize,
        values: ScalarVec,
    },
}

impl TablePayload {
    /// Row count of the table this payload rebuilds.
    pub fn num_rows(&self) -> usize {
        match self {
            TablePayload::Dense { num_rows, .. }
            | TablePayload::Aos { num_rows, .. }
            | TablePayload::Soa { num_rows, .. } => *num_rows,
            TablePayload::Csr { row_offsets, .. } => row_offsets.len().saturating_sub(1),
            TablePayload::Packed { dimension, .. } => *dimension,
        }
    }
}
