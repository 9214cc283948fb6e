//! Template negotiation and the "interesting element" bitmap.
//!
//! Which fixed-field/time-gauntlet elements a template carries is
//! computed once, when the template arrives, into a small bitset keyed
//! by an enum of interesting elements — rather than rescanned per record.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::ie::{self, Ie};
use crate::schema::Schema;

/// Elements the fixed-field mapper and the time gauntlet consult. Each
/// maps to one bit in a template's [`InterestingMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterestingElement {
    SourceIpv4,
    SourceIpv6,
    DestIpv4,
    DestIpv6,
    NextHopIpv4,
    NextHopIpv6,
    SourcePort,
    DestPort,
    Protocol,
    OctetCount,
    PacketCount,
    ReverseOctetCount,
    ReversePacketCount,
    TcpControlBits,
    ReverseTcpControlBits,
    IngressInterface,
    EgressInterface,
    ApplicationId,
    FlowEndReason,
    BiflowDirection,
    FirewallEvent,
    FlowStartSysUpTime,
    FlowEndSysUpTime,
    SystemInitTime,
    FlowStartMilliseconds,
    FlowEndMilliseconds,
    FlowStartSeconds,
    FlowEndSeconds,
    FlowStartMicroseconds,
    FlowEndMicroseconds,
    FlowStartNanoseconds,
    FlowEndNanoseconds,
    FlowStartDeltaMicroseconds,
    FlowEndDeltaMicroseconds,
    FlowDurationMilliseconds,
    FlowDurationMicroseconds,
    SensorId,
    FlowtypeId,
    TcpInitialFlags,
    TcpSessionFlags,
    TcpAggregateFlags,
    AttributeBits,
}

pub fn element_for_ie(field_ie: Ie) -> Option<InterestingElement> {
    use InterestingElement::*;
    Some(match field_ie {
            ie::SOURCE_IPV4_ADDRESS => SourceIpv4,
            ie::SOURCE_IPV6_ADDRESS => SourceIpv6,
            ie::DESTINATION_IPV4_ADDRESS => DestIpv4,
            ie::DESTINATION_IPV6_ADDRESS => DestIpv6,
            ie::IP_NEXT_HOP_IPV4_ADDRESS => NextHopIpv4,
            ie::IP_NEXT_HOP_IPV6_ADDRESS => NextHopIpv6,
            ie::SOURCE_TRANSPORT_PORT => SourcePort,
            ie::DESTINATION_TRANSPORT_PORT => DestPort,
            ie::PROTOCOL_IDENTIFIER => Protocol,
            ie::OCTET_DELTA_COUNT => OctetCount,
            ie::PACKET_DELTA_COUNT => PacketCount,
            ie::REVERSE_OCTET_DELTA_COUNT => ReverseOctetCount,
            ie::REVERSE_PACKET_DELTA_COUNT => ReversePacketCount,
            ie::TCP_CONTROL_BITS => TcpControlBits,
            ie::REVERSE_TCP_CONTROL_BITS => ReverseTcpControlBits,
            ie::INGRESS_INTERFACE => IngressInterface,
            ie::EGRESS_INTERFACE => EgressInterface,
            ie::APPLICATION_ID => ApplicationId,
            ie::FLOW_END_REASON => FlowEndReason,
            ie::BIFLOW_DIRECTION => BiflowDirection,
            ie::FIREWALL_EVENT => FirewallEvent,
            ie::FLOW_START_SYS_UP_TIME => FlowStartSysUpTime,
            ie::FLOW_END_SYS_UP_TIME => FlowEndSysUpTime,
            ie::SYSTEM_INIT_TIME_MILLISECONDS => SystemInitTime,
            ie::FLOW_START_MILLISECONDS => FlowStartMilliseconds,
            ie::FLOW_END_MILLISECONDS => FlowEndMilliseconds,
            ie::FLOW_START_SECONDS => FlowStartSeconds,
            ie::FLOW_END_SECONDS => FlowEndSeconds,
            ie::FLOW_START_MICROSECONDS => FlowStartMicroseconds,
            ie::FLOW_END_MICROSECONDS => FlowEndMicroseconds,
            ie::FLOW_START_NANOSECONDS => FlowStartNanoseconds,
            ie::FLOW_END_NANOSECONDS => FlowEndNanoseconds,
            ie::FLOW_START_DELTA_MICROSECONDS => FlowStartDeltaMicroseconds,
            ie::FLOW_END_DELTA_MICROSECONDS => FlowEndDeltaMicroseconds,
            ie::FLOW_DURATION_MILLISECONDS => FlowDurationMilliseconds,
            ie::FLOW_DURATION_MICROSECONDS => FlowDurationMicroseconds,
            ie::SENSOR_ID => SensorId,
            ie::FLOWTYPE_ID => FlowtypeId,
            ie::TCP_INITIAL_FLAGS => TcpInitialFlags,
            ie::TCP_SESSION_FLAGS => TcpSessionFlags,
            ie::TCP_AGGREGATE_FLAGS => TcpAggregateFlags,
            ie::ATTRIBUTE_BITS => AttributeBits,
            _ => return None,
    })
}

/// A bitset over [`InterestingElement`], one bit per variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterestingMask(u64);

impl InterestingMask {
    pub fn from_schema(schema: &Schema) -> Self {
        let mut mask = 0u64;
        for field in schema.fields() {
            if let Some(elem) = element_for_ie(field.ie) {
                mask |= 1 << (elem as u8);
            }
        }
        InterestingMask(mask)
    }

    pub fn has(&self, elem: InterestingElement) -> bool {
        self.0 & (1 << (elem as u8)) != 0
    }
}

/// A negotiated template: an id bound to a schema.
#[derive(Debug)]
pub struct Template {
    pub id: u16,
    pub schema: Arc<Schema>,
    pub interesting: InterestingMask,
    /// True for IPFIX/NetFlow-v9 *options* templates (scope-field-count >
    /// 0): cached so the decoder can skip them without erroring.
    pub is_options_template: bool,
}

impl Template {
    pub fn new(id: u16, schema: Arc<Schema>, is_options_template: bool) -> Self {
        let interesting = InterestingMask::from_schema(&schema);
        Template {
            id,
            schema,
            interesting,
            is_options_template,
        }
    }
}

/// Per-stream negotiated template table, backed by an LRU cache so a
/// long-running stream that cycles through many templates (common with
/// multi-exporter IPFIX collectors) bounds its memory use.
#[derive(Debug)]
pub struct TemplateTable {
    templates: LruCache<u16, Arc<Template>>,
}

impl TemplateTable {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        TemplateTable {
            templates: LruCache::new(cap),
        }
    }

    pub fn insert(&mut self, template: Template) {
        self.templates.put(template.id, Arc::new(template));
    }

    pub fn get(&mut self, id: u16) -> Option<Arc<Template>> {
        self.templates.get(&id).cloned()
    }

    pub fn peek(&self, id: u16) -> Option<&Arc<Template>> {
        self.templates.peek(&id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn ids(&self) -> Vec<u16> {
        self.templates.iter().map(|(id, _)| *id).collect()
    }
}

impl Default for TemplateTable {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;

    #[test]
    fn interesting_mask_flags_known_fields_only() {
        let schema = SchemaBuilder::new()
        .push(ie::SOURCE_IPV4_ADDRESS, 4)
        .push(Ie::enterprise(99999, 1), 4) // unknown element
        .build();
        let mask = InterestingMask::from_schema(&schema);
        assert!(mask.has(InterestingElement::SourceIpv4));
        assert!(!mask.has(InterestingElement::DestIpv4));
    }

    #[test]
    fn template_table_evicts_lru_beyond_capacity() {
        let mut table = TemplateTable::new(1);
        let schema = SchemaBuilder::new().build();
        table.insert(Template::new(1, schema.clone(), false));
        table.insert(Template::new(2, schema, false));
        assert!(table.peek(1).is_none());
        assert!(table.peek(2).is_some());
    }
}
