//! Schemas: the ordered field layout of an IPFIX-style record.
//!
//! A schema is an `Arc`-shared immutable value once built: there is no
//! separate freeze step to get wrong, because `SchemaBuilder::build` is
//! the only way to produce a `Schema` and it always returns an `Arc`.

use std::sync::Arc;

use crate::ie::Ie;

/// One field in a schema: an information element plus its effective
/// length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldDescriptor {
    pub ie: Ie,
    pub length: u16,
}

/// An ordered, immutable list of field descriptors. Reference-counted via
/// `Arc<Schema>` so cloning a schema onto a record or a template is O(1).
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_index(&self, ie: Ie) -> Option<usize> {
        self.fields.iter().position(|f| f.ie == ie)
    }

    pub fn contains(&self, ie: Ie) -> bool {
        self.field_index(ie).is_some()
    }

    /// Total encoded record length for this schema (sum of field lengths).
    pub fn record_len(&self) -> usize {
        self.fields.iter().map(|f| f.length as usize).sum()
    }

    /// Two schemas are equivalent iff their field sequences agree in
    /// element identity and length.
    pub fn equivalent(&self, other: &Schema) -> bool {
        self.fields == other.fields
    }
}

#[derive(Debug, Default, Clone)]
pub struct SchemaBuilder {
    fields: Vec<FieldDescriptor>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, ie: Ie, length: u16) -> Self {
        self.fields.push(FieldDescriptor { ie, length });
        self
    }

    pub fn build(self) -> Arc<Schema> {
        Arc::new(Schema {
                fields: self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ie;

    #[test]
    fn equivalent_schemas_compare_equal() {
        let a = SchemaBuilder::new()
        .push(ie::SOURCE_IPV4_ADDRESS, 4)
        .push(ie::PACKET_DELTA_COUNT, 8)
        .build();
        let b = SchemaBuilder::new()
        .push(ie::SOURCE_IPV4_ADDRESS, 4)
        .push(ie::PACKET_DELTA_COUNT, 8)
        .build();
        assert!(a.equivalent(&b));
    }

    #[test]
    fn reordered_fields_are_not_equivalent_schemas() {
        let a = SchemaBuilder::new()
        .push(ie::SOURCE_IPV4_ADDRESS, 4)
        .push(ie::PACKET_DELTA_COUNT, 8)
        .build();
        let b = SchemaBuilder::new()
        .push(ie::PACKET_DELTA_COUNT, 8)
        .push(ie::SOURCE_IPV4_ADDRESS, 4)
        .build();
        assert!(!a.equivalent(&b));
    }
}
