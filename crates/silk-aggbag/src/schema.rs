//! Declares which [`FieldId`]s make up a bag's key tuple and which make
//! up its counter tuple.

use crate::field::FieldId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("field {0:?} appears in both the key and the counter tuple")]
    FieldInBothTuples(FieldId),
    #[error("field {0:?} is listed more than once")]
    DuplicateField(FieldId),
    #[error("key tuple must list fields in ascending id order ({prev:?} before {next:?})")]
    KeyNotAscending { prev: FieldId, next: FieldId },
    #[error("counter tuple must list fields in ascending id order ({prev:?} before {next:?})")]
    CounterNotAscending { prev: FieldId, next: FieldId },
    #[error("key tuple is empty")]
    EmptyKey,
    #[error("counter tuple is empty")]
    EmptyCounters,
    #[error("encoded key width {width} exceeds the maximum of {max} bytes")]
    KeyTooWide { width: usize, max: usize },
}

/// Maximum encoded key width in bytes. Generous enough for several IPv6
/// fields plus small integer fields without being unbounded.
pub const MAX_KEY_WIDTH: usize = 64;

/// The ordered key/counter field lists for one bag. Immutable once built
/// via [`AggregateBagSchema::new`], mirroring [`silk_codec::schema::Schema`]'s
/// build-then-freeze shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateBagSchema {
    key_fields: Vec<FieldId>,
    counter_fields: Vec<FieldId>,
    key_width: usize,
}

impl AggregateBagSchema {
    /// Validates and freezes a schema: the key and counter tuples must
    /// be disjoint, each field-id unique within its own tuple, and each
    /// tuple listed in ascending id order.
    pub fn new(key_fields: Vec<FieldId>, counter_fields: Vec<FieldId>) -> Result<Self, SchemaError> {
        if key_fields.is_empty() {
            return Err(SchemaError::EmptyKey);
        }
        if counter_fields.is_empty() {
            return Err(SchemaError::EmptyCounters);
        }
        Self::check_ascending_unique(&key_fields, true)?;
        Self::check_ascending_unique(&counter_fields, false)?;

        for &field in &key_fields {
            if counter_fields.contains(&field) {
                return Err(SchemaError::FieldInBothTuples(field));
            }
        }

        let key_width: usize = key_fields.iter().map(|f| f.key_width()).sum();
        if key_width > MAX_KEY_WIDTH {
            return Err(SchemaError::KeyTooWide { width: key_width, max: MAX_KEY_WIDTH });
        }

        Ok(AggregateBagSchema { key_fields, counter_fields, key_width })
    }

    fn check_ascending_unique(fields: &[FieldId], is_key: bool) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for window in fields.windows(2) {
            if window[0].id() >= window[1].id() {
                if window[0] == window[1] {
                    return Err(SchemaError::DuplicateField(window[0]));
                }
                return if is_key {
                    Err(SchemaError::KeyNotAscending { prev: window[0], next: window[1] })
                } else {
                    Err(SchemaError::CounterNotAscending { prev: window[0], next: window[1] })
                };
            }
        }
        for &field in fields {
            if !seen.insert(field) {
                return Err(SchemaError::DuplicateField(field));
            }
        }
        Ok(())
    }

    pub fn key_fields(&self) -> &[FieldId] {
        &self.key_fields
    }

    pub fn counter_fields(&self) -> &[FieldId] {
        &self.counter_fields
    }

    /// Total encoded width in bytes of one key tuple.
    pub fn key_width(&self) -> usize {
        self.key_width
    }

    pub fn key_index(&self, field: FieldId) -> Option<usize> {
        self.key_fields.iter().position(|&f| f == field)
    }

    pub fn counter_index(&self, field: FieldId) -> Option<usize> {
        self.counter_fields.iter().position(|&f| f == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_schema_builds() {
        let schema = AggregateBagSchema::new(vec![FieldId::SIPv4], vec![FieldId::Bytes]).unwrap();
        assert_eq!(schema.key_width(), 16);
        assert_eq!(schema.key_index(FieldId::SIPv4), Some(0));
    }

    #[test]
    fn rejects_field_in_both_tuples() {
        let err = AggregateBagSchema::new(vec![FieldId::SIPv4], vec![FieldId::SIPv4]).unwrap_err();
        assert_eq!(err, SchemaError::FieldInBothTuples(FieldId::SIPv4));
    }

    #[test]
    fn rejects_non_ascending_key_order() {
        let err = AggregateBagSchema::new(vec![FieldId::DIPv4, FieldId::SIPv4], vec![FieldId::Bytes]).unwrap_err();
        assert_eq!(err, SchemaError::KeyNotAscending { prev: FieldId::DIPv4, next: FieldId::SIPv4 });
    }

    #[test]
    fn rejects_duplicate_key_field() {
        let err = AggregateBagSchema::new(vec![FieldId::SIPv4, FieldId::SIPv4], vec![FieldId::Bytes]).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateField(FieldId::SIPv4));
    }

    #[test]
    fn rejects_oversized_key() {
        let err = AggregateBagSchema::new(
            vec![FieldId::SIPv4, FieldId::DIPv4, FieldId::NhIPv4, FieldId::SIPv6],
            vec![FieldId::Bytes],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::KeyTooWide {.. }));
    }
}
