//! The legacy `Bag`: a single-key, single-counter specialization of
//! [`AggregateBag`], the form `to_bag` conversion targets. Narrow
//! integer keys and 128-bit (IPv6) keys get the same treatment here;
//! this specialization just constrains an `AggregateBag` to one key
//! field and one counter field and reuses its machinery — the
//! trie-vs-red-black-tree split some implementations use internally is
//! a storage choice, not part of the contract.

use thiserror::Error;

use crate::bag::{AggregateBag, BagError, BagStats};
use crate::field::{FieldId, FieldValue};
use crate::schema::{AggregateBagSchema, SchemaError};

#[derive(Debug, Error)]
pub enum LegacyBagError {
    #[error("legacy Bag requires exactly one key field and one counter field")]
    WrongShape,
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Bag(#[from] BagError),
}

/// A `Bag`: exactly one key field, one 64-bit counter. A counter value of
/// zero is indistinguishable from the key being absent, so
/// [`Bag::get`] returns a plain `u64` defaulting to 0 rather than an
/// `Option`.
pub struct Bag {
    inner: AggregateBag,
    key_field: FieldId,
}

impl Bag {
    pub fn new(key_field: FieldId) -> Result<Self, LegacyBagError> {
        let schema = AggregateBagSchema::new(vec![key_field], vec![FieldId::Value])?;
        Ok(Bag { inner: AggregateBag::new(schema), key_field })
    }

    /// Wraps an already-built `AggregateBag`, validating it has exactly
    /// the one-key/one-counter shape a legacy `Bag` requires.
    pub fn from_aggregate_bag(inner: AggregateBag) -> Result<Self, LegacyBagError> {
        if inner.schema().key_fields().len() != 1 || inner.schema().counter_fields().len() != 1 {
            return Err(LegacyBagError::WrongShape);
        }
        let key_field = inner.schema().key_fields()[0];
        Ok(Bag { inner, key_field })
    }

    pub fn key_field(&self) -> FieldId {
        self.key_field
    }

    pub fn get(&self, key: FieldValue) -> Result<u64, LegacyBagError> {
        Ok(self.inner.get(&vec![key])?.map(|c| c[0]).unwrap_or(0))
    }

    pub fn set(&mut self, key: FieldValue, value: u64) -> Result<(), LegacyBagError> {
        self.inner.set(&vec![key], vec![value])?;
        Ok(())
    }

    pub fn add(&mut self, key: FieldValue, delta: u64) -> Result<u64, LegacyBagError> {
        Ok(self.inner.add(&vec![key], &vec![delta])?[0])
    }

    pub fn subtract(&mut self, key: FieldValue, delta: u64) -> Result<u64, LegacyBagError> {
        Ok(self.inner.subtract(&vec![key], &vec![delta])?[0])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], u64)> {
        self.inner.iter().map(|(k, c)| (k, c[0]))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> BagStats {
        self.inner.stats()
    }

    pub fn into_aggregate_bag(self) -> AggregateBag {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silk_record::ip::FlowIp;
    use std::net::Ipv4Addr;

    #[test]
    fn absent_key_reads_as_zero() {
        let bag = Bag::new(FieldId::SIPv4).unwrap();
        let ip = FlowIp::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(bag.get(FieldValue::Ip(ip)).unwrap(), 0);
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut bag = Bag::new(FieldId::Protocol).unwrap();
        bag.add(FieldValue::Uint(6), 42).unwrap();
        assert_eq!(bag.get(FieldValue::Uint(6)).unwrap(), 42);
    }

    #[test]
    fn from_aggregate_bag_rejects_wrong_shape() {
        let schema = AggregateBagSchema::new(vec![FieldId::SIPv4, FieldId::DPort], vec![FieldId::Bytes]).unwrap();
        let inner = AggregateBag::new(schema);
        assert!(matches!(Bag::from_aggregate_bag(inner), Err(LegacyBagError::WrongShape)));
    }
}
