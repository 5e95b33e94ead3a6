//! Shape and layout validation for algorithm inputs.
//!
//! Every algorithm checks its input tables through [`TableCheck`] (or the
//! positional shorthand [`check_numeric_table`]) before touching data. The
//! layout test is a mask comparison against the table's self-reported
//! [`StorageLayout`], so the same check works for every storage variant.
//!
//! Checks return a [`Status`] rather than stopping at the first problem;
//! combine several with `|` to report every violation at once:
//!
//! ```
//! use numeric_tables::data::{CsrTable, HomogenTable, LayoutMask, MemoryFlags};
//! use numeric_tables::validate::check_numeric_table;
//!
//! let data = HomogenTable::<f64>::new(4, 3).unwrap();
//! let weights = CsrTable::<f64>::new(4, 1).unwrap();
//!
//! let status = check_numeric_table(Some(&data), "data", LayoutMask::CSR, MemoryFlags::ALLOCATED, 3, 0, false)
//!     | check_numeric_table(Some(&weights), "weights", LayoutMask::CSR, MemoryFlags::ALLOCATED, 1, 4, false);
//! assert_eq!(status.len(), 1);
//! ```
//!
//! [`StorageLayout`]: crate::data::StorageLayout

use derive_builder::Builder;
use tracing::debug;

use crate::data::{LayoutMask, MemoryFlags, NumericTable};
use crate::error::{Status, TableError};

/// Requirements an input table must satisfy.
///
/// # Example
///
/// ```
/// use numeric_tables::data::{HomogenTable, LayoutMask};
/// use numeric_tables::validate::TableCheckBuilder;
///
/// let check = TableCheckBuilder::default()
///     .name("x")
///     .forbidden_layouts(LayoutMask::CSR | LayoutMask::PACKED)
///     .expected_columns(2usize)
///     .build()
///     .unwrap();
///
/// let table = HomogenTable::<f32>::new(5, 2).unwrap();
/// assert!(check.check(Some(&table)).is_ok());
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), default)]
pub struct TableCheck {
    /// Argument name used in error reports.
    pub name: String,

    // ========================================================================
    // Layout
    // ========================================================================
    /// Layouts the algorithm cannot consume.
    pub forbidden_layouts: LayoutMask,

    /// If not empty, the table's layout must be one of these.
    pub required_layouts: LayoutMask,

    // ========================================================================
    // Memory
    // ========================================================================
    /// Accepted memory states of the table's data.
    pub allowed_memory: MemoryFlags,

    // ========================================================================
    // Shape
    // ========================================================================
    /// Required column count, or 0 for any.
    pub expected_columns: usize,

    /// Required row count, or 0 for any.
    pub expected_rows: usize,

    /// Accept a table without columns.
    pub allow_zero_columns: bool,

    /// Accept a table without rows.
    pub allow_zero_rows: bool,
}

impl Default for TableCheck {
    fn default() -> Self {
        Self {
            name: "table".to_string(),
            forbidden_layouts: LayoutMask::NONE,
            required_layouts: LayoutMask::NONE,
            allowed_memory: MemoryFlags::ALLOCATED,
            expected_columns: 0,
            expected_rows: 0,
            allow_zero_columns: false,
            allow_zero_rows: false,
        }
    }
}

impl TableCheck {
    /// Builder with every requirement relaxed.
    pub fn builder() -> TableCheckBuilder {
        TableCheckBuilder::default()
    }

    /// Check one table, collecting every violation.
    ///
    /// A missing table yields a single [`TableError::NullInput`]. Structural
    /// self-checks run only when the data is allocated.
    pub fn check(&self, table: Option<&dyn NumericTable>) -> Status {
        let Some(table) = table else {
            return TableError::NullInput {
                name: self.name.clone(),
            }
            .into();
        };

        let mut status = Status::ok();
        let memory = table.memory_status();
        if !self.allowed_memory.contains(memory) {
            status |= TableError::IncorrectMemoryStatus {
                name: self.name.clone(),
                status: memory,
            };
        }

        let num_columns = table.num_columns();
        if let Some(expected) =
            mismatch(num_columns, self.expected_columns, self.allow_zero_columns)
        {
            status |= TableError::IncorrectNumberOfColumns {
                name: self.name.clone(),
                expected,
                actual: num_columns,
            };
        }

        let num_rows = table.num_rows();
        if let Some(expected) = mismatch(num_rows, self.expected_rows, self.allow_zero_rows) {
            status |= TableError::IncorrectNumberOfRows {
                name: self.name.clone(),
                expected,
                actual: num_rows,
            };
        }

        let layout = table.layout();
        let required = self.required_layouts;
        if self.forbidden_layouts.contains(layout)
            || (required != LayoutMask::NONE && !required.contains(layout))
        {
            status |= TableError::IncorrectLayout {
                name: self.name.clone(),
                layout,
            };
        }

        if layout.is_packed() && num_rows != num_columns {
            status |= TableError::NotSquare {
                layout,
                num_rows,
                num_columns,
            };
        }

        if memory.is_allocated() {
            status |= table.check_structure();
        }

        if !status.is_ok() {
            debug!(name = %self.name, %layout, errors = status.len(), "table check failed");
        }
        status
    }
}

/// Expected count to report if `actual` violates the requirement.
///
/// Zero is reported as a violation unless `allow_zero`, in which case it
/// also satisfies any expected count.
fn mismatch(actual: usize, expected: usize, allow_zero: bool) -> Option<usize> {
    match (actual, expected) {
        (0, _) if allow_zero => None,
        (0, 0) => Some(1),
        (_, 0) => None,
        (a, e) if a == e => None,
        (_, e) => Some(e),
    }
}

/// Positional form of [`TableCheck::check`].
///
/// Rows and columns are compared only when the expected count is non-zero.
pub fn check_numeric_table(
    table: Option<&dyn NumericTable>,
    name: &str,
    forbidden_layouts: LayoutMask,
    allowed_memory: MemoryFlags,
    expected_columns: usize,
    expected_rows: usize,
    allow_zero_columns: bool,
) -> Status {
    TableCheck {
        name: name.to_string(),
        forbidden_layouts,
        allowed_memory,
        expected_columns,
        expected_rows,
        allow_zero_columns,
        ..TableCheck::default()
    }
    .check(table)
}
