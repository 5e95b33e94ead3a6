//! Table tags and the tag → constructor registry used when reading archives.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use super::payload::{TablePayload, TableRecord};
use super::PersistError;
use crate::data::{
    AosTable, CsrIndexing, CsrTable, Dictionary, FeatureDescriptor, HomogenTable, NumericTable,
    NumericTablePtr, PackedTable, ScalarVec, SoaTable,
};

/// Archive tag of a concrete table type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TableTag {
    /// [`HomogenTable`].
    Dense = 1,
    /// [`AosTable`].
    Aos = 2,
    /// [`SoaTable`].
    Soa = 3,
    /// [`CsrTable`].
    Csr = 4,
    /// [`PackedTable`].
    Packed = 5,
}

impl TableTag {
    /// Every tag.
    pub const ALL: [TableTag; 5] = [
        TableTag::Dense,
        TableTag::Aos,
        TableTag::Soa,
        TableTag::Csr,
        TableTag::Packed,
    ];

    /// Convert from u8, returning None for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Dense),
            2 => Some(Self::Aos),
            3 => Some(Self::Soa),
            4 => Some(Self::Csr),
            5 => Some(Self::Packed),
            _ => None,
        }
    }
}

/// Rebuilds a table from its archived record.
pub type CreateFn = fn(TableRecord) -> Result<NumericTablePtr, PersistError>;

/// Map from [`TableTag`] to the function that rebuilds that table type.
///
/// # Example
///
/// ```
/// use numeric_tables::persist::{TableRegistry, TableTag};
///
/// let registry = TableRegistry::global();
/// assert!(TableTag::ALL.iter().all(|&tag| registry.contains(tag)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    creators: HashMap<TableTag, CreateFn>,
}

impl TableRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a constructor for every built-in table type.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(TableTag::Dense, create_dense);
        registry.register(TableTag::Aos, create_aos);
        registry.register(TableTag::Soa, create_soa);
        registry.register(TableTag::Csr, create_csr);
        registry.register(TableTag::Packed, create_packed);
        registry
    }

    /// Process-wide registry of the built-in types, built on first use.
    pub fn global() -> &'static TableRegistry {
        static REGISTRY: OnceLock<TableRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            debug!("building table registry");
            Self::with_builtin()
        })
    }

    /// Register `create` for `tag`, returning the previous constructor.
    pub fn register(&mut self, tag: TableTag, create: CreateFn) -> Option<CreateFn> {
        self.creators.insert(tag, create)
    }

    /// Returns true if `tag` has a constructor.
    pub fn contains(&self, tag: TableTag) -> bool {
        self.creators.contains_key(&tag)
    }

    /// Rebuild the table archived under `tag`.
    pub fn create(&self, tag: TableTag, record: TableRecord) -> Result<NumericTablePtr, PersistError> {
        let create = self
            .creators
            .get(&tag)
            .ok_or(PersistError::UnknownTag(tag as u8))?;
        debug!(?tag, layout = %record.layout, "creating table from record");
        create(record)
    }
}

// ============================================================================
// Built-in constructors
// ============================================================================

/// Expand `$body` once per [`ScalarVec`] variant with `$v` bound to the typed
/// vector.
macro_rules! with_scalar_vec {
    ($values:expr, |$v:ident| $body:expr) => {
        match $values {
            ScalarVec::I8($v) => $body,
            ScalarVec::I16($v) => $body,
            ScalarVec::I32($v) => $body,
            ScalarVec::I64($v) => $body,
            ScalarVec::U8($v) => $body,
            ScalarVec::U16($v) => $body,
            ScalarVec::U32($v) => $body,
            ScalarVec::U64($v) => $body,
            ScalarVec::F32($v) => $body,
            ScalarVec::F64($v) => $body,
            ScalarVec::Bool($v) => $body,
        }
    };
}

fn wrong_body(tag: TableTag) -> PersistError {
    PersistError::CorruptPayload(format!("payload does not match tag {tag:?}"))
}

fn finish<N: NumericTable + 'static>(
    mut table: N,
    dictionary: Vec<FeatureDescriptor>,
) -> Result<NumericTablePtr, PersistError> {
    table.set_dictionary(Dictionary::from_features(dictionary).into())?;
    let table: NumericTablePtr = Arc::new(table);
    Ok(table)
}

fn create_dense(record: TableRecord) -> Result<NumericTablePtr, PersistError> {
    let TablePayload::Dense {
        num_rows,
        num_columns,
        values,
    } = record.body
    else {
        return Err(wrong_body(TableTag::Dense));
    };
    with_scalar_vec!(values, |v| finish(
        HomogenTable::from_vec(v, num_rows, num_columns)?.into_internal(),
        record.dictionary,
    ))
}

fn create_aos(record: TableRecord) -> Result<NumericTablePtr, PersistError> {
    let TablePayload::Aos {
        num_rows,
        record_size,
        bytes,
    } = record.body
    else {
        return Err(wrong_body(TableTag::Aos));
    };
    let dictionary = Dictionary::from_features(record.dictionary);
    let table: NumericTablePtr =
        Arc::new(AosTable::from_bytes(bytes, num_rows, record_size, dictionary)?.into_internal());
    Ok(table)
}

fn create_soa(record: TableRecord) -> Result<NumericTablePtr, PersistError> {
    let TablePayload::Soa { num_rows, columns } = record.body else {
        return Err(wrong_body(TableTag::Soa));
    };
    let table = SoaTable::from_columns(columns)?.into_internal();
    if table.num_rows() != num_rows {
        return Err(PersistError::CorruptPayload(format!(
            "soa columns hold {} rows, record says {num_rows}",
            table.num_rows()
        )));
    }
    finish(table, record.dictionary)
}

fn create_csr(record: TableRecord) -> Result<NumericTablePtr, PersistError> {
    let TablePayload::Csr {
        num_columns,
        values,
        column_indices,
        row_offsets,
    } = record.body
    else {
        return Err(wrong_body(TableTag::Csr));
    };
    with_scalar_vec!(values, |v| finish(
        CsrTable::from_raw_parts(
            v,
            column_indices,
            row_offsets,
            num_columns,
            CsrIndexing::ZeroBased,
        )?
        .into_internal(),
        record.dictionary,
    ))
}

fn create_packed(record: TableRecord) -> Result<NumericTablePtr, PersistError> {
    let TablePayload::Packed {
        layout,
        dimension,
        values,
    } = record.body
    else {
        return Err(wrong_body(TableTag::Packed));
    };
    with_scalar_vec!(values, |v| finish(
        PackedTable::from_packed(layout, v, dimension)?.into_internal(),
        record.dictionary,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{NumericTableExt, StorageLayout};

    #[test]
    fn tag_conversion() {
        for tag in TableTag::ALL {
            assert_eq!(TableTag::from_u8(tag as u8), Some(tag));
        }
        assert_eq!(TableTag::from_u8(0), None);
        assert_eq!(TableTag::from_u8(6), None);
    }

    #[test]
    fn empty_registry_rejects_tags() {
        let registry = TableRegistry::new();
        let record = TableRecord {
            layout: StorageLayout::Dense,
            dictionary: Vec::new(),
            body: TablePayload::Dense {
                num_rows: 0,
                num_columns: 0,
                values: ScalarVec::F64(Vec::new()),
            },
        };
        assert!(matches!(
            registry.create(TableTag::Dense, record),
            Err(PersistError::UnknownTag(1))
        ));
    }

    #[test]
    fn create_from_record() {
        let table = HomogenTable::from_rows(&[[1i16, 2], [3, 4]]).unwrap();
        let record = TableRecord {
            layout: table.layout(),
            dictionary: table.dictionary().snapshot().features().to_vec(),
            body: table.to_payload().unwrap(),
        };
        let rebuilt = TableRegistry::global().create(TableTag::Dense, record).unwrap();
        assert_eq!(rebuilt.value::<i16>(1, 0).unwrap(), 3);
        assert_eq!(
            rebuilt.memory_status(),
            crate::data::MemoryStatus::InternallyAllocated
        );
    }

    #[test]
    fn mismatched_body_is_corrupt() {
        let record = TableRecord {
            layout: StorageLayout::Csr,
            dictionary: Vec::new(),
            body: TablePayload::Soa {
                num_rows: 0,
                columns: Vec::new(),
            },
        };
        assert!(matches!(
            TableRegistry::global().create(TableTag::Csr, record),
            Err(PersistError::CorruptPayload(_))
        ));
    }

    #[test]
    fn register_replaces() {
        let mut registry = TableRegistry::with_builtin();
        assert!(registry.register(TableTag::Soa, create_dense).is_some());
        assert!(registry.contains(TableTag::Soa));
    }
}
