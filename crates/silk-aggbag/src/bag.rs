//! The Aggregate Bag core engine: an ordered key tuple →
//! counter tuple map supporting per-key add/subtract/set, inter-bag
//! arithmetic, and schema projection.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::field::{FieldId, FieldValue};
use crate::pool::{NodePool, DEFAULT_CAPACITY};
use crate::schema::AggregateBagSchema;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BagError {
    #[error("key tuple does not match the bag's schema")]
    KeyShapeMismatch,
    #[error("counter tuple does not match the bag's schema")]
    CounterShapeMismatch,
    #[error("counter field {field:?} would overflow (current {current}, delta {delta})")]
    Overflow { field: FieldId, current: u64, delta: u64 },
    #[error("counter field {field:?} would underflow (current {current}, delta {delta})")]
    Underflow { field: FieldId, current: u64, delta: u64 },
    #[error("source schema is not compatible with the destination schema")]
    IncompatibleSchema,
    #[error("field {0:?} is already present in the schema")]
    FieldAlreadyPresent(FieldId),
    #[error("unknown field {0:?}")]
    UnknownField(FieldId),
    #[error("node pool exhausted: bag holds {capacity} entries already")]
    PoolExhausted { capacity: usize },
}

/// A fully-populated key tuple, one [`FieldValue`] per field in
/// [`AggregateBagSchema::key_fields`], in schema order.
pub type Key = Vec<FieldValue>;

/// A fully-populated counter tuple, one value per field in
/// [`AggregateBagSchema::counter_fields`], in schema order.
pub type Counter = Vec<u64>;

/// Footprint summary returned by [`AggregateBag::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BagStats {
    pub unique_keys: usize,
    pub key_width: usize,
    pub counter_width: usize,
    /// Approximate resident bytes: one encoded key plus one counter
    /// pool slot per entry.
    pub footprint_bytes: usize,
}

/// The ordered key → counter map itself. Entries live in a `BTreeMap`
/// keyed by the big-endian encoded key bytes, with counter tuples held in a [`NodePool`] so bulk teardown of
/// a large bag is a single arena drop instead of per-entry frees.
#[derive(Debug)]
pub struct AggregateBag {
    schema: AggregateBagSchema,
    index: BTreeMap<Vec<u8>, usize>,
    counters: NodePool<Counter>,
}

impl AggregateBag {
    /// Builds an empty bag whose counter pool is capped at
    /// [`DEFAULT_CAPACITY`] entries.
    pub fn new(schema: AggregateBagSchema) -> Self {
        Self::with_capacity(schema, DEFAULT_CAPACITY)
    }

    /// Builds an empty bag with an explicit counter-pool ceiling.
    pub fn with_capacity(schema: AggregateBagSchema, capacity: usize) -> Self {
        AggregateBag { schema, index: BTreeMap::new(), counters: NodePool::with_capacity(capacity) }
    }

    pub fn schema(&self) -> &AggregateBagSchema {
        &self.schema
    }

    fn encode_key(&self, key: &Key) -> Result<Vec<u8>, BagError> {
        if key.len() != self.schema.key_fields().len() {
            return Err(BagError::KeyShapeMismatch);
        }
        let mut bytes = Vec::with_capacity(self.schema.key_width());
        for (&field, &value) in self.schema.key_fields().iter().zip(key.iter()) {
            match (field.is_ip(), value) {
                (true, FieldValue::Ip(ip)) => bytes.extend_from_slice(&ip.to_be_bytes16()),
                (false, FieldValue::Uint(v)) => {
                    let width = field.key_width();
                    bytes.extend_from_slice(&v.to_be_bytes()[8 - width..]);
                }
                _ => return Err(BagError::KeyShapeMismatch),
            }
        }
        Ok(bytes)
    }

    fn check_counter_shape(&self, counter: &Counter) -> Result<(), BagError> {
        if counter.len() != self.schema.counter_fields().len() {
            return Err(BagError::CounterShapeMismatch);
        }
        Ok(())
    }

    fn insert_counter(&mut self, counter: Counter) -> Result<usize, BagError> {
        self.counters.insert(counter).ok_or_else(|| BagError::PoolExhausted {
            capacity: self.counters.capacity().unwrap_or(usize::MAX),
        })
    }

    pub fn get(&self, key: &Key) -> Result<Option<Counter>, BagError> {
        let encoded = self.encode_key(key)?;
        Ok(self.index.get(&encoded).and_then(|&slot| self.counters.get(slot).cloned()))
    }

    /// Replaces the counter for `key`, inserting the entry if absent.
    pub fn set(&mut self, key: &Key, counter: Counter) -> Result<(), BagError> {
        self.check_counter_shape(&counter)?;
        let encoded = self.encode_key(key)?;
        if let Some(&slot) = self.index.get(&encoded) {
            *self.counters.get_mut(slot).expect("index points at a live slot") = counter;
        } else {
            let slot = self.insert_counter(counter)?;
            self.index.insert(encoded, slot);
        }
        Ok(())
    }

    /// Inserts an already-encoded key and its counter directly, bypassing
    /// [`Self::encode_key`]'s validation. Used by the wire reader, which
    /// reads raw key bytes straight off the stream rather than building a
    /// [`Key`] from typed field values.
    pub fn set_raw(&mut self, encoded_key: Vec<u8>, counter: Counter) -> Result<(), BagError> {
        let slot = self.insert_counter(counter)?;
        self.index.insert(encoded_key, slot);
        Ok(())
    }

    pub fn remove(&mut self, key: &Key) -> Result<Option<Counter>, BagError> {
        let encoded = self.encode_key(key)?;
        match self.index.remove(&encoded) {
            Some(slot) => Ok(self.counters.remove(slot)),
            None => Ok(None),
        }
    }

    /// Field-wise add of `delta` into the counter for `key`. Creates the
    /// entry (from zero) if absent. Rejects the whole operation, leaving
    /// the bag unchanged, if any field would overflow.
    pub fn add(&mut self, key: &Key, delta: &Counter) -> Result<Counter, BagError> {
        self.check_counter_shape(delta)?;
        let encoded = self.encode_key(key)?;
        let current = match self.index.get(&encoded) {
            Some(&slot) => self.counters.get(slot).expect("index points at a live slot").clone(),
            None => vec![0u64; delta.len()],
        };

        let mut next = Vec::with_capacity(current.len());
        for (i, (&cur, &d)) in current.iter().zip(delta.iter()).enumerate() {
            let field = self.schema.counter_fields()[i];
            match cur.checked_add(d) {
                Some(v) => next.push(v),
                None => return Err(BagError::Overflow { field, current: cur, delta: d }),
            }
        }

        match self.index.get(&encoded) {
            Some(&slot) => *self.counters.get_mut(slot).expect("live slot") = next.clone(),
            None => {
                let slot = self.insert_counter(next.clone())?;
                self.index.insert(encoded, slot);
            }
        }
        Ok(next)
    }

    /// Field-wise subtract of `delta` from the counter for `key`. On
    /// underflow in any field the operation is rejected and the bag is
    /// left unchanged (this method computes the whole new tuple before
    /// committing any of it). When every resulting counter field is
    /// zero, the entry is removed rather than kept as an all-zero row.
    pub fn subtract(&mut self, key: &Key, delta: &Counter) -> Result<Counter, BagError> {
        self.check_counter_shape(delta)?;
        let encoded = self.encode_key(key)?;
        let current = match self.index.get(&encoded) {
            Some(&slot) => self.counters.get(slot).expect("index points at a live slot").clone(),
            None => vec![0u64; delta.len()],
        };

        let mut next = Vec::with_capacity(current.len());
        for (i, (&cur, &d)) in current.iter().zip(delta.iter()).enumerate() {
            let field = self.schema.counter_fields()[i];
            match cur.checked_sub(d) {
                Some(v) => next.push(v),
                None => return Err(BagError::Underflow { field, current: cur, delta: d }),
            }
        }

        if next.iter().all(|&v| v == 0) {
            if let Some(slot) = self.index.remove(&encoded) {
                self.counters.remove(slot);
            }
        } else {
            match self.index.get(&encoded) {
                Some(&slot) => *self.counters.get_mut(slot).expect("live slot") = next.clone(),
                None => {
                    let slot = self.insert_counter(next.clone())?;
                    self.index.insert(encoded, slot);
                }
            }
        }
        Ok(next)
    }

    /// Yields `(key, counter)` pairs in ascending encoded-key order.
    /// The iterator is conceptually invalidated by any mutating call in
    /// between; since this borrows `&self`, the borrow checker enforces
    /// that statically.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Counter)> {
        self.index
        .iter()
        .map(move |(k, &slot)| (k.as_slice(), self.counters.get(slot).expect("index points at a live slot")))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> BagStats {
        let counter_width = self.schema.counter_fields().len() * 8;
        BagStats {
            unique_keys: self.len(),
            key_width: self.schema.key_width(),
            counter_width,
            footprint_bytes: self.len() * (self.schema.key_width() + counter_width),
        }
    }

    /// Adds every entry of `src` into `self`. `src`'s key fields must be
    /// a prefix-compatible subset of `self`'s (the common case: same
    /// schema, or `src` missing fields `self` gained via
    /// [`AggregateBag::insert_field`]). The whole merge is atomic: every
    /// entry's resulting counter is computed first, and `self` is left
    /// completely unchanged if any entry would overflow.
    pub fn add_bag(&mut self, src: &AggregateBag) -> Result<(), BagError> {
        self.merge_bag(src, true)
    }

    /// Symmetric to [`Self::add_bag`]: atomic across entries, and `self`
    /// is left unchanged if any entry would underflow.
    pub fn subtract_bag(&mut self, src: &AggregateBag) -> Result<(), BagError> {
        self.merge_bag(src, false)
    }

    /// Stages every entry's resulting counter (or removal, for a
    /// subtract that zeroes a counter out) without mutating `self`, so a
    /// single `Overflow`/`Underflow` anywhere in `src` aborts the merge
    /// with `self` untouched. Only once every entry has been validated
    /// does the commit phase run, and that phase is infallible by
    /// construction (the pool-capacity pre-check below rules out the one
    /// other way committing could fail).
    fn merge_bag(&mut self, src: &AggregateBag, is_add: bool) -> Result<(), BagError> {
        if !schema_compatible(self.schema.key_fields(), src.schema.key_fields()) {
            return Err(BagError::IncompatibleSchema);
        }
        if self.schema.counter_fields() != src.schema.counter_fields() {
            return Err(BagError::IncompatibleSchema);
        }

        let mut staged: Vec<(Vec<u8>, Option<Counter>)> = Vec::with_capacity(src.len());
        for (raw_key, counter) in src.iter() {
            let key = src.decode_key_for(raw_key, self.schema.key_fields())?;
            let encoded = self.encode_key(&key)?;
            let current = match self.index.get(&encoded) {
                Some(&slot) => self.counters.get(slot).expect("index points at a live slot").clone(),
                None => vec![0u64; counter.len()],
            };

            let mut next = Vec::with_capacity(current.len());
            for (i, (&cur, &d)) in current.iter().zip(counter.iter()).enumerate() {
                let field = self.schema.counter_fields()[i];
                let applied = if is_add {
                    cur.checked_add(d).ok_or(BagError::Overflow { field, current: cur, delta: d })
                } else {
                    cur.checked_sub(d).ok_or(BagError::Underflow { field, current: cur, delta: d })
                };
                next.push(applied?);
            }

            if !is_add && next.iter().all(|&v| v == 0) {
                staged.push((encoded, None));
            } else {
                staged.push((encoded, Some(next)));
            }
        }

        // Removals free pool slots before insertions claim them, so only
        // the net growth needs to fit under the pool's ceiling.
        if let Some(cap) = self.counters.capacity() {
            let mut new_keys = 0usize;
            let mut freed_keys = 0usize;
            for (encoded, value) in &staged {
                let already_present = self.index.contains_key(encoded);
                match (value, already_present) {
                    (Some(_), false) => new_keys += 1,
                    (None, true) => freed_keys += 1,
                    _ => {}
                }
            }
            let net_growth = new_keys.saturating_sub(freed_keys);
            if self.counters.len() + net_growth > cap {
                return Err(BagError::PoolExhausted { capacity: cap });
            }
        }

        for (encoded, value) in staged {
            match value {
                Some(counter) => match self.index.get(&encoded) {
                    Some(&slot) => *self.counters.get_mut(slot).expect("live slot") = counter,
                    None => {
                        let slot = self.insert_counter(counter).expect("capacity pre-checked above");
                        self.index.insert(encoded, slot);
                    }
                },
                None => {
                    if let Some(slot) = self.index.remove(&encoded) {
                        self.counters.remove(slot);
                    }
                }
            }
        }
        Ok(())
    }

    /// Decodes `raw_key` (encoded under `self`'s own schema) into `Key`
    /// values for `target_fields`, which must be a subset of `self`'s key
    /// fields in the same relative order.
    fn decode_key_for(&self, raw_key: &[u8], target_fields: &[FieldId]) -> Result<Key, BagError> {
        let mut offset = 0usize;
        let mut values = Vec::new();
        for &field in self.schema.key_fields() {
            let width = field.key_width();
            let chunk = &raw_key[offset..offset + width];
            offset += width;
            if target_fields.contains(&field) {
                let value = if field.is_ip() {
                    let mut buf = [0u8; 16];
                    buf.copy_from_slice(chunk);
                    FieldValue::Ip(silk_record::ip::FlowIp::from_be_bytes16(buf))
                } else {
                    let mut buf = [0u8; 8];
                    buf[8 - width..].copy_from_slice(chunk);
                    FieldValue::Uint(u64::from_be_bytes(buf))
                };
                values.push(value);
            }
        }
        if values.len() != target_fields.len() {
            return Err(BagError::IncompatibleSchema);
        }
        Ok(values)
    }

    /// Extends this bag's schema by one key field, populated with
    /// `value` for every existing and future entry. Rejects a field
    /// that is already part of the schema.
    pub fn insert_field(&mut self, field: FieldId, value: FieldValue) -> Result<(), BagError> {
        if self.schema.key_index(field).is_some() || self.schema.counter_index(field).is_some() {
            return Err(BagError::FieldAlreadyPresent(field));
        }

        let mut new_key_fields = self.schema.key_fields().to_vec();
        new_key_fields.push(field);
        new_key_fields.sort();
        let new_schema = AggregateBagSchema::new(new_key_fields.clone(), self.schema.counter_fields().to_vec())
        .map_err(|_| BagError::IncompatibleSchema)?;

        let insert_at = new_key_fields.iter().position(|&f| f == field).expect("just inserted");
        let width = field.key_width();
        let encoded_value = match value {
            FieldValue::Ip(ip) => ip.to_be_bytes16().to_vec(),
            FieldValue::Uint(v) => v.to_be_bytes()[8 - width..].to_vec(),
        };

        let mut rebuilt = BTreeMap::new();
        for (old_key, &slot) in self.index.iter() {
            let mut new_key = Vec::with_capacity(new_schema.key_width());
            let mut offset = 0usize;
            for (i, &f) in self.schema.key_fields().iter().enumerate() {
                if i == insert_at {
                    new_key.extend_from_slice(&encoded_value);
                }
                let w = f.key_width();
                new_key.extend_from_slice(&old_key[offset..offset + w]);
                offset += w;
            }
            if insert_at == self.schema.key_fields().len() {
                new_key.extend_from_slice(&encoded_value);
            }
            rebuilt.insert(new_key, slot);
        }

        self.schema = new_schema;
        self.index = rebuilt;
        Ok(())
    }

    /// Produces a new bag over `self`'s schema minus `ids`, summing
    /// counters for entries that collide after the projection.
    pub fn remove_fields(&self, ids: &[FieldId]) -> Result<AggregateBag, BagError> {
        let kept: Vec<FieldId> = self.schema.key_fields().iter().copied().filter(|f| !ids.contains(f)).collect();
        self.project(&kept)
    }

    /// The complement of [`AggregateBag::remove_fields`]: keeps only `ids`.
    pub fn select_fields(&self, ids: &[FieldId]) -> Result<AggregateBag, BagError> {
        let kept: Vec<FieldId> = self.schema.key_fields().iter().copied().filter(|f| ids.contains(f)).collect();
        self.project(&kept)
    }

    fn project(&self, kept_fields: &[FieldId]) -> Result<AggregateBag, BagError> {
        let new_schema = AggregateBagSchema::new(kept_fields.to_vec(), self.schema.counter_fields().to_vec())
        .map_err(|_| BagError::IncompatibleSchema)?;
        let mut projected = AggregateBag::new(new_schema);

        for (raw_key, counter) in self.iter() {
            let key = self.decode_key_for(raw_key, kept_fields)?;
            projected.add(&key, &counter.to_vec())?;
        }
        Ok(projected)
    }
}

fn schema_compatible(dst_fields: &[FieldId], src_fields: &[FieldId]) -> bool {
    src_fields.iter().all(|f| dst_fields.contains(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AggregateBagSchema;
    use silk_record::ip::FlowIp;
    use std::net::Ipv4Addr;

    fn sample_schema() -> AggregateBagSchema {
        AggregateBagSchema::new(vec![FieldId::SIPv4], vec![FieldId::Bytes, FieldId::Packets]).unwrap()
    }

    fn ip_key(addr: Ipv4Addr) -> Key {
        vec![FieldValue::Ip(FlowIp::V4(addr))]
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut bag = AggregateBag::new(sample_schema());
        let key = ip_key(Ipv4Addr::new(10, 0, 0, 1));
        bag.set(&key, vec![100, 5]).unwrap();
        assert_eq!(bag.get(&key).unwrap(), Some(vec![100, 5]));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn add_accumulates_and_creates_absent_entries() {
        let mut bag = AggregateBag::new(sample_schema());
        let key = ip_key(Ipv4Addr::new(10, 0, 0, 1));
        bag.add(&key, &vec![10, 1]).unwrap();
        bag.add(&key, &vec![5, 2]).unwrap();
        assert_eq!(bag.get(&key).unwrap(), Some(vec![15, 3]));
    }

    #[test]
    fn add_overflow_is_rejected() {
        let mut bag = AggregateBag::new(sample_schema());
        let key = ip_key(Ipv4Addr::new(10, 0, 0, 1));
        bag.set(&key, vec![u64::MAX, 0]).unwrap();
        let err = bag.add(&key, &vec![1, 0]).unwrap_err();
        assert!(matches!(err, BagError::Overflow { field: FieldId::Bytes,.. }));
        // unchanged after the rejected add
        assert_eq!(bag.get(&key).unwrap(), Some(vec![u64::MAX, 0]));
    }

    #[test]
    fn subtract_to_zero_removes_the_entry() {
        let mut bag = AggregateBag::new(sample_schema());
        let key = ip_key(Ipv4Addr::new(10, 0, 0, 1));
        bag.set(&key, vec![5, 5]).unwrap();
        bag.subtract(&key, &vec![5, 5]).unwrap();
        assert_eq!(bag.get(&key).unwrap(), None);
        assert!(bag.is_empty());
    }

    #[test]
    fn subtract_underflow_leaves_bag_unchanged() {
        let mut bag = AggregateBag::new(sample_schema());
        let key = ip_key(Ipv4Addr::new(10, 0, 0, 1));
        bag.set(&key, vec![5, 5]).unwrap();
        let err = bag.subtract(&key, &vec![6, 0]).unwrap_err();
        assert!(matches!(err, BagError::Underflow { field: FieldId::Bytes,.. }));
        assert_eq!(bag.get(&key).unwrap(), Some(vec![5, 5]));
    }

    #[test]
    fn iteration_is_in_ascending_key_order() {
        let mut bag = AggregateBag::new(sample_schema());
        bag.set(&ip_key(Ipv4Addr::new(10, 0, 0, 2)), vec![1, 1]).unwrap();
        bag.set(&ip_key(Ipv4Addr::new(10, 0, 0, 1)), vec![1, 1]).unwrap();
        let keys: Vec<_> = bag.iter().map(|(k, _)| k.to_vec()).collect();
        assert!(keys[0] < keys[1]);
    }

    #[test]
    fn add_bag_merges_counters() {
        let mut dst = AggregateBag::new(sample_schema());
        let mut src = AggregateBag::new(sample_schema());
        let key = ip_key(Ipv4Addr::new(192, 168, 0, 1));
        dst.set(&key, vec![10, 1]).unwrap();
        src.set(&key, vec![5, 2]).unwrap();
        dst.add_bag(&src).unwrap();
        assert_eq!(dst.get(&key).unwrap(), Some(vec![15, 3]));
    }

    #[test]
    fn subtract_bag_aborts_atomically_on_a_single_entrys_underflow() {
        // Mirrors spec.md §8 scenario 3: a = {(1.1.1.1)->10}, b =
        // {(1.1.1.1)->3, (2.2.2.2)->1}. The (2.2.2.2) row underflows
        // (it is absent from `a`, so its current value is 0), and that
        // must abort the whole merge, leaving `a` completely unchanged
        // rather than partially applying the (1.1.1.1) row first.
        let schema = AggregateBagSchema::new(vec![FieldId::SIPv4], vec![FieldId::Records]).unwrap();
        let mut a = AggregateBag::new(schema.clone());
        let mut b = AggregateBag::new(schema);
        let ip1 = vec![FieldValue::Ip(FlowIp::V4(Ipv4Addr::new(1, 1, 1, 1)))];
        let ip2 = vec![FieldValue::Ip(FlowIp::V4(Ipv4Addr::new(2, 2, 2, 2)))];
        a.set(&ip1, vec![10]).unwrap();
        b.set(&ip1, vec![3]).unwrap();
        b.set(&ip2, vec![1]).unwrap();

        let err = a.subtract_bag(&b).unwrap_err();
        assert!(matches!(err, BagError::Underflow { .. }));
        assert_eq!(a.get(&ip1).unwrap(), Some(vec![10]));
        assert_eq!(a.get(&ip2).unwrap(), None);
    }

    #[test]
    fn insert_field_extends_schema_with_a_constant() {
        let mut bag = AggregateBag::new(sample_schema());
        let key = ip_key(Ipv4Addr::new(10, 0, 0, 1));
        bag.set(&key, vec![10, 1]).unwrap();
        bag.insert_field(FieldId::Protocol, FieldValue::Uint(6)).unwrap();
        assert_eq!(bag.schema().key_fields().len(), 2);

        let new_key = vec![FieldValue::Uint(6), FieldValue::Ip(FlowIp::V4(Ipv4Addr::new(10, 0, 0, 1)))];
        assert_eq!(bag.get(&new_key).unwrap(), Some(vec![10, 1]));
    }

    #[test]
    fn remove_fields_sums_colliding_entries() {
        let schema = AggregateBagSchema::new(vec![FieldId::SIPv4, FieldId::DPort], vec![FieldId::Bytes]).unwrap();
        let mut bag = AggregateBag::new(schema);
        let ip = FlowIp::V4(Ipv4Addr::new(10, 0, 0, 1));
        bag.set(&vec![FieldValue::Ip(ip), FieldValue::Uint(80)], vec![100]).unwrap();
        bag.set(&vec![FieldValue::Ip(ip), FieldValue::Uint(443)], vec![50]).unwrap();

        let projected = bag.remove_fields(&[FieldId::DPort]).unwrap();
        assert_eq!(projected.get(&vec![FieldValue::Ip(ip)]).unwrap(), Some(vec![150]));
    }
}
