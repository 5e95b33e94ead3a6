//! Error taxonomy and multi-error accumulation.
//!
//! Every fallible table operation returns [`TableError`]. Validators that
//! check several tables (or several properties of one table) collect their
//! findings into a [`Status`] so a single call reports every violation.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::data::{MemoryStatus, ScalarType, StorageLayout};

/// Errors produced by table construction, block access and validation.
///
/// Validation variants carry the caller-supplied argument name so that a
/// report identifies which input failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("{name}: input numeric table is not set")]
    NullInput { name: String },

    #[error("{name}: incorrect number of columns: expected {expected}, got {actual}")]
    IncorrectNumberOfColumns {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{name}: incorrect number of rows: expected {expected}, got {actual}")]
    IncorrectNumberOfRows {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{name}: storage layout {layout} is not accepted here")]
    IncorrectLayout { name: String, layout: StorageLayout },

    #[error("{name}: data memory status {status:?} is not accepted here")]
    IncorrectMemoryStatus { name: String, status: MemoryStatus },

    #[error("row range {start}..{end} out of bounds for table with {num_rows} rows")]
    RowRangeOutOfBounds {
        start: usize,
        end: usize,
        num_rows: usize,
    },

    #[error("column {column} out of bounds for table with {num_columns} columns")]
    ColumnOutOfBounds { column: usize, num_columns: usize },

    #[error("ownership violation: {0}")]
    OwnershipViolation(String),

    #[error("table data is not allocated")]
    NotAllocated,

    #[error("failed to allocate {bytes} bytes")]
    AllocationFailed { bytes: usize },

    #[error("packed layout {layout} requires a square table, got {num_rows}x{num_columns}")]
    NotSquare {
        layout: StorageLayout,
        num_rows: usize,
        num_columns: usize,
    },

    #[error("invalid CSR structure: {0}")]
    InvalidCsr(String),

    #[error("dictionary mismatch: {0}")]
    DictionaryMismatch(String),

    #[error("buffer length {actual} does not match expected {expected}")]
    BufferLengthMismatch { expected: usize, actual: usize },

    #[error("scalar type {actual} does not match expected {expected}")]
    ScalarTypeMismatch {
        expected: ScalarType,
        actual: ScalarType,
    },

    #[error("{operation} is not supported for {layout} tables")]
    Unsupported {
        operation: &'static str,
        layout: StorageLayout,
    },
}

impl TableError {
    /// Returns true for the shape/layout/null kinds a validator reports.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TableError::NullInput { .. }
                | TableError::IncorrectNumberOfColumns { .. }
                | TableError::IncorrectNumberOfRows { .. }
                | TableError::IncorrectLayout { .. }
                | TableError::IncorrectMemoryStatus { .. }
        )
    }
}

/// Accumulated outcome of one or more checks.
///
/// An empty status is success. Statuses combine with `|` (or `|=`), keeping
/// every error from both sides, so callers can run a validator over several
/// inputs and report all violations at once:
///
/// ```
/// use numeric_tables::{Status, TableError};
///
/// let mut status = Status::ok();
/// status |= TableError::NotAllocated;
/// status |= Status::ok();
/// assert!(!status.is_ok());
/// assert_eq!(status.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    errors: Vec<TableError>,
}

impl Status {
    /// A successful status.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Returns true if no error was recorded.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded errors.
    #[inline]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns true if no error was recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record one more error.
    pub fn push(&mut self, error: TableError) {
        self.errors.push(error);
    }

    /// Recorded errors in the order they were added.
    pub fn errors(&self) -> &[TableError] {
        &self.errors
    }

    /// Iterate over recorded errors.
    pub fn iter(&self) -> std::slice::Iter<'_, TableError> {
        self.errors.iter()
    }

    /// Returns true if any recorded error satisfies `pred`.
    pub fn contains(&self, pred: impl Fn(&TableError) -> bool) -> bool {
        self.errors.iter().any(pred)
    }

    /// Convert into a `Result`, failing if any error was recorded.
    pub fn into_result(self) -> Result<(), Status> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// The first recorded error, if any.
    pub fn into_first(self) -> Option<TableError> {
        self.errors.into_iter().next()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("ok");
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

impl From<TableError> for Status {
    fn from(error: TableError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl<E> From<Result<(), E>> for Status
where
    E: Into<Status>,
{
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Status::ok(),
            Err(e) => e.into(),
        }
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(mut self, rhs: Status) -> Status {
        self.errors.extend(rhs.errors);
        self
    }
}

impl BitOr<TableError> for Status {
    type Output = Status;

    fn bitor(mut self, rhs: TableError) -> Status {
        self.errors.push(rhs);
        self
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.errors.extend(rhs.errors);
    }
}

impl BitOrAssign<TableError> for Status {
    fn bitor_assign(&mut self, rhs: TableError) {
        self.errors.push(rhs);
    }
}

impl Extend<TableError> for Status {
    fn extend<I: IntoIterator<Item = TableError>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl FromIterator<TableError> for Status {
    fn from_iter<I: IntoIterator<Item = TableError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Status {
    type Item = TableError;
    type IntoIter = std::vec::IntoIter<TableError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a Status {
    type Item = &'a TableError;
    type IntoIter = std::slice::Iter<'a, TableError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_error(name: &str) -> TableError {
        TableError::IncorrectNumberOfRows {
            name: name.into(),
            expected: 3,
            actual: 4,
        }
    }

    #[test]
    fn empty_status_is_ok() {
        let status = Status::ok();
        assert!(status.is_ok());
        assert!(status.into_result().is_ok());
    }

    #[test]
    fn combining_keeps_every_error() {
        let a = Status::from(rows_error("a"));
        let b = Status::from(rows_error("b")) | TableError::NotAllocated;
        let combined = a | Status::ok() | b;
        assert_eq!(combined.len(), 3);
        assert!(combined.contains(|e| matches!(e, TableError::NotAllocated)));
    }

    #[test]
    fn combination_is_associative() {
        let a = || Status::from(rows_error("a"));
        let b = || Status::from(rows_error("b"));
        let c = || Status::from(TableError::NotAllocated);
        assert_eq!((a() | b()) | c(), a() | (b() | c()));
    }

    #[test]
    fn from_result() {
        let ok: Result<(), TableError> = Ok(());
        assert!(Status::from(ok).is_ok());
        let err: Result<(), TableError> = Err(TableError::NotAllocated);
        assert_eq!(Status::from(err).len(), 1);
    }

    #[test]
    fn display_joins_messages() {
        let status = Status::from(rows_error("data")) | TableError::NotAllocated;
        let text = status.to_string();
        assert!(text.contains("data: incorrect number of rows: expected 3, got 4"));
        assert!(text.contains("; table data is not allocated"));
    }

    #[test]
    fn validation_kinds() {
        assert!(rows_error("x").is_validation());
        assert!(!TableError::NotAllocated.is_validation());
    }
}
