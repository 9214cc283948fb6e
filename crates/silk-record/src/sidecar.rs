//! The per-record sidecar: a keyed map of typed extension values, and the
//! per-stream descriptor that pins each name to a single type.

use std::collections::BTreeMap;

use crate::ip::FlowIp;

/// Width/signedness-tagged integer, float, IP, string, bytes, datetime
/// (at four resolutions), boolean, nested list, or MAC address — the
/// closed catalog of sidecar value types.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SidecarValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ip(FlowIp),
    Str(String),
    Bytes(Vec<u8>),
    DatetimeSeconds(i64),
    DatetimeMillis(i64),
    DatetimeMicros(i64),
    DatetimeNanos(i64),
    Bool(bool),
    Mac([u8; 6]),
    List(Vec<SidecarValue>),
}

/// The type tag of a [`SidecarValue`], used by the descriptor to pin a
/// name to one type across every record in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SidecarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Ip,
    Str,
    Bytes,
    DatetimeSeconds,
    DatetimeMillis,
    DatetimeMicros,
    DatetimeNanos,
    Bool,
    Mac,
    List,
}

impl SidecarValue {
    pub fn type_tag(&self) -> SidecarType {
        match self {
            SidecarValue::I8(_) => SidecarType::I8,
            SidecarValue::U8(_) => SidecarType::U8,
            SidecarValue::I16(_) => SidecarType::I16,
            SidecarValue::U16(_) => SidecarType::U16,
            SidecarValue::I32(_) => SidecarType::I32,
            SidecarValue::U32(_) => SidecarType::U32,
            SidecarValue::I64(_) => SidecarType::I64,
            SidecarValue::U64(_) => SidecarType::U64,
            SidecarValue::F32(_) => SidecarType::F32,
            SidecarValue::F64(_) => SidecarType::F64,
            SidecarValue::Ip(_) => SidecarType::Ip,
            SidecarValue::Str(_) => SidecarType::Str,
            SidecarValue::Bytes(_) => SidecarType::Bytes,
            SidecarValue::DatetimeSeconds(_) => SidecarType::DatetimeSeconds,
            SidecarValue::DatetimeMillis(_) => SidecarType::DatetimeMillis,
            SidecarValue::DatetimeMicros(_) => SidecarType::DatetimeMicros,
            SidecarValue::DatetimeNanos(_) => SidecarType::DatetimeNanos,
            SidecarValue::Bool(_) => SidecarType::Bool,
            SidecarValue::Mac(_) => SidecarType::Mac,
            SidecarValue::List(_) => SidecarType::List,
        }
    }
}

/// Error raised when a sidecar field name is reused with a different type
/// than the stream descriptor already registered for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sidecar field '{name}' already registered as {existing:?}, got {attempted:?}")]
pub struct SidecarTypeConflict {
    pub name: String,
    pub existing: SidecarType,
    pub attempted: SidecarType,
}

/// Per-record sidecar map. Ordered (`BTreeMap`) so serialization and
/// iteration are deterministic, which matters for the codec's
/// write-back path.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Sidecar(BTreeMap<String, SidecarValue>);

impl Sidecar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SidecarValue> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: SidecarValue) {
        self.0.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<SidecarValue> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SidecarValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Per-stream list of `(name, type, list-element-type?)` shared by every
/// record in the stream.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SidecarDescriptor {
    fields: BTreeMap<String, (SidecarType, Option<SidecarType>)>,
}

impl SidecarDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with `kind`, or verifies the existing registration
    /// matches. Returns an error on type conflict.
    pub fn register(
        &mut self,
        name: &str,
        kind: SidecarType,
        list_element: Option<SidecarType>,
    ) -> Result<(), SidecarTypeConflict> {
        match self.fields.get(name) {
            Some((existing, _)) if *existing != kind => Err(SidecarTypeConflict {
                    name: name.to_string(),
                    existing: *existing,
                    attempted: kind,
            }),
            Some(_) => Ok(()),
            None => {
                self.fields.insert(name.to_string(), (kind, list_element));
                Ok(())
            }
        }
    }

    pub fn type_of(&self, name: &str) -> Option<SidecarType> {
        self.fields.get(name).map(|(t, _)| *t)
    }

    /// Unions `other` into `self`, the behavior requires when
    /// merging input streams; a type conflict for a shared name is an
    /// error ("Conflicting sidecar types across inputs
    /// abort the pipeline").
    pub fn union(&mut self, other: &SidecarDescriptor) -> Result<(), SidecarTypeConflict> {
        for (name, (kind, list_elem)) in &other.fields {
            self.register(name, *kind, *list_elem)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &(SidecarType, Option<SidecarType>))> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_same_type_twice_is_fine() {
        let mut desc = SidecarDescriptor::new();
        desc.register("appName", SidecarType::Str, None).unwrap();
        desc.register("appName", SidecarType::Str, None).unwrap();
    }

    #[test]
    fn register_conflicting_type_errors() {
        let mut desc = SidecarDescriptor::new();
        desc.register("appName", SidecarType::Str, None).unwrap();
        let err = desc.register("appName", SidecarType::U32, None).unwrap_err();
        assert_eq!(err.existing, SidecarType::Str);
        assert_eq!(err.attempted, SidecarType::U32);
    }

    #[test]
    fn union_propagates_conflicts() {
        let mut a = SidecarDescriptor::new();
        a.register("n", SidecarType::U32, None).unwrap();
        let mut b = SidecarDescriptor::new();
        b.register("n", SidecarType::Str, None).unwrap();
        assert!(a.union(&b).is_err());
    }
}
