//! Per-column schema: feature descriptors and the shared dictionary.
//!
//! A [`Dictionary`] holds one [`FeatureDescriptor`] per column. Tables keep it
//! behind a [`SharedDictionary`] so that several tables (or several stages of
//! an algorithm) can observe the same schema; a change made through one
//! handle is visible through all of them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use super::types::ScalarType;

/// How a feature's values are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Continuous numeric feature.
    #[default]
    Continuous,
    /// Ordered discrete levels.
    Ordinal,
    /// Unordered category IDs.
    Categorical,
}

impl FeatureKind {
    /// Returns true for categorical and ordinal features.
    #[inline]
    pub fn is_discrete(&self) -> bool {
        !matches!(self, FeatureKind::Continuous)
    }
}

/// Describes one column: its stored type, where it lives inside a record
/// (array-of-structures layout only), and how to interpret it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    /// Stored scalar type.
    pub scalar_type: ScalarType,
    /// Byte offset within a row record. Zero for non-record layouts.
    pub offset: usize,
    /// Feature name (optional).
    pub name: Option<String>,
    /// Interpretation of the values.
    pub kind: FeatureKind,
    /// Number of categories for discrete features, zero if unknown.
    pub categories: usize,
}

impl FeatureDescriptor {
    /// Continuous feature of the given type.
    pub fn new(scalar_type: ScalarType) -> Self {
        Self {
            scalar_type,
            offset: 0,
            name: None,
            kind: FeatureKind::Continuous,
            categories: 0,
        }
    }

    /// Categorical feature with `categories` levels.
    pub fn categorical(scalar_type: ScalarType, categories: usize) -> Self {
        Self {
            kind: FeatureKind::Categorical,
            categories,
            ..Self::new(scalar_type)
        }
    }

    /// Set the feature name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the record byte offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the feature kind.
    pub fn with_kind(mut self, kind: FeatureKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Ordered sequence of feature descriptors, one per column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dictionary {
    features: Vec<FeatureDescriptor>,
}

impl Dictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// `n` continuous features of the same type.
    pub fn homogeneous(n: usize, scalar_type: ScalarType) -> Self {
        Self {
            features: vec![FeatureDescriptor::new(scalar_type); n],
        }
    }

    /// Build from explicit descriptors.
    pub fn from_features(features: Vec<FeatureDescriptor>) -> Self {
        Self { features }
    }

    /// Build a record layout: assigns naturally aligned offsets in order, the
    /// way a C compiler lays out a struct.
    pub fn packed_record(features: Vec<FeatureDescriptor>) -> Self {
        let mut offset = 0usize;
        let features = features
            .into_iter()
            .map(|f| {
                let size = f.scalar_type.size_of();
                offset = offset.next_multiple_of(size);
                let placed = f.with_offset(offset);
                offset += size;
                placed
            })
            .collect();
        Self { features }
    }

    /// Number of features.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Returns true if there are no features.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Descriptor of feature `index`.
    pub fn get(&self, index: usize) -> Option<&FeatureDescriptor> {
        self.features.get(index)
    }

    /// Mutable descriptor of feature `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut FeatureDescriptor> {
        self.features.get_mut(index)
    }

    /// All descriptors.
    pub fn features(&self) -> &[FeatureDescriptor] {
        &self.features
    }

    /// Iterate over descriptors.
    pub fn iter(&self) -> std::slice::Iter<'_, FeatureDescriptor> {
        self.features.iter()
    }

    /// Iterate over descriptors mutably.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, FeatureDescriptor> {
        self.features.iter_mut()
    }

    /// Change the number of features.
    ///
    /// New features copy the type of the last existing one (or `f64` when the
    /// dictionary was empty) and start out continuous and unnamed.
    pub fn set_num_features(&mut self, n: usize) {
        let fill = self
            .features
            .last()
            .map(|f| f.scalar_type)
            .unwrap_or(ScalarType::F64);
        self.features.resize(n, FeatureDescriptor::new(fill));
    }

    /// Append a feature.
    pub fn push(&mut self, feature: FeatureDescriptor) {
        self.features.push(feature);
    }

    /// Replace feature `index`. Returns false if out of range.
    pub fn set_feature(&mut self, index: usize, feature: FeatureDescriptor) -> bool {
        match self.features.get_mut(index) {
            Some(slot) => {
                *slot = feature;
                true
            }
            None => false,
        }
    }

    /// The common type if every feature shares one.
    pub fn homogeneous_type(&self) -> Option<ScalarType> {
        let first = self.features.first()?.scalar_type;
        self.features
            .iter()
            .all(|f| f.scalar_type == first)
            .then_some(first)
    }

    /// Returns true if every feature has the same stored type.
    pub fn is_homogeneous(&self) -> bool {
        self.features.is_empty() || self.homogeneous_type().is_some()
    }

    /// Returns true if any feature is categorical or ordinal.
    pub fn has_discrete(&self) -> bool {
        self.features.iter().any(|f| f.kind.is_discrete())
    }

    /// Bytes needed for one record: the end of the furthest field.
    pub fn record_size(&self) -> usize {
        self.features
            .iter()
            .map(|f| f.offset + f.scalar_type.size_of())
            .max()
            .unwrap_or(0)
    }

    /// Index of the feature called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.features
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
    }

    /// Map of feature name to index for every named feature.
    pub fn name_index(&self) -> HashMap<String, usize> {
        self.features
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.name.clone().map(|n| (n, i)))
            .collect()
    }
}

impl FromIterator<FeatureDescriptor> for Dictionary {
    fn from_iter<I: IntoIterator<Item = FeatureDescriptor>>(iter: I) -> Self {
        Self::from_features(iter.into_iter().collect())
    }
}

/// Shared, reference-counted handle to a [`Dictionary`].
///
/// Cloning the handle shares the dictionary. Mutations through
/// [`write`](Self::write) are visible to every holder and should happen
/// before concurrent readers exist.
#[derive(Clone, Debug, Default)]
pub struct SharedDictionary(Arc<RwLock<Dictionary>>);

impl SharedDictionary {
    /// Wrap a dictionary.
    pub fn new(dictionary: Dictionary) -> Self {
        Self(Arc::new(RwLock::new(dictionary)))
    }

    /// Read access.
    pub fn read(&self) -> RwLockReadGuard<'_, Dictionary> {
        self.0.read()
    }

    /// Write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, Dictionary> {
        self.0.write()
    }

    /// Number of features.
    pub fn num_features(&self) -> usize {
        self.0.read().num_features()
    }

    /// Change the number of features for every holder.
    pub fn set_num_features(&self, n: usize) {
        self.0.write().set_num_features(n);
    }

    /// Returns true if both handles point at the same dictionary.
    pub fn ptr_eq(&self, other: &SharedDictionary) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of handles sharing this dictionary.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Clone the current contents.
    pub fn snapshot(&self) -> Dictionary {
        self.0.read().clone()
    }
}

impl From<Dictionary> for SharedDictionary {
    fn from(dictionary: Dictionary) -> Self {
        Self::new(dictionary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homogeneous_dictionary() {
        let dict = Dictionary::homogeneous(3, ScalarType::F32);
        assert_eq!(dict.num_features(), 3);
        assert_eq!(dict.homogeneous_type(), Some(ScalarType::F32));
        assert!(dict.is_homogeneous());
        assert!(!dict.has_discrete());
    }

    #[test]
    fn mixed_dictionary() {
        let dict = Dictionary::from_features(vec![
            FeatureDescriptor::new(ScalarType::I32),
            FeatureDescriptor::categorical(ScalarType::U8, 4),
        ]);
        assert_eq!(dict.homogeneous_type(), None);
        assert!(dict.has_discrete());
        assert_eq!(dict.get(1).map(|f| f.categories), Some(4));
    }

    #[test]
    fn packed_record_aligns_fields() {
        let dict = Dictionary::packed_record(vec![
            FeatureDescriptor::new(ScalarType::U8),
            FeatureDescriptor::new(ScalarType::I32),
            FeatureDescriptor::new(ScalarType::F64),
            FeatureDescriptor::new(ScalarType::U16),
        ]);
        let offsets: Vec<_> = dict.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 16]);
        assert_eq!(dict.record_size(), 18);
    }

    #[test]
    fn set_num_features_extends_with_last_type() {
        let mut dict = Dictionary::homogeneous(1, ScalarType::I16);
        dict.set_num_features(3);
        assert_eq!(dict.homogeneous_type(), Some(ScalarType::I16));
        dict.set_num_features(1);
        assert_eq!(dict.num_features(), 1);

        let mut empty = Dictionary::new();
        empty.set_num_features(2);
        assert_eq!(empty.homogeneous_type(), Some(ScalarType::F64));
    }

    #[test]
    fn name_lookup() {
        let dict: Dictionary = [
            FeatureDescriptor::new(ScalarType::F64).with_name("x"),
            FeatureDescriptor::new(ScalarType::F64),
            FeatureDescriptor::new(ScalarType::F64).with_name("z"),
        ]
        .into_iter()
        .collect();
        assert_eq!(dict.index_of("z"), Some(2));
        assert_eq!(dict.index_of("y"), None);
        assert_eq!(dict.name_index().len(), 2);
    }

    #[test]
    fn shared_mutation_is_visible() {
        let a = SharedDictionary::new(Dictionary::homogeneous(2, ScalarType::F64));
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.holders(), 2);

        b.set_num_features(5);
        assert_eq!(a.num_features(), 5);

        a.write().set_feature(0, FeatureDescriptor::new(ScalarType::F64).with_name("first"));
        assert_eq!(b.read().index_of("first"), Some(0));
    }
}
