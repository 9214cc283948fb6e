//! Maps between wire field bytes (keyed by [`Ie`]) and the canonical
//! [`Record`]: the template callback's decode half and the writer's
//! canonical-schema construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use nom::bytes::complete::take;
use nom::number::complete::{be_u128, be_u16, be_u32, be_u64, be_u8};
use nom::IResult;
use nom_derive::{Nom, Parse};

use silk_record::ip::FlowIp;
use silk_record::record::Record;
use silk_record::sidecar::SidecarValue;

use crate::ie::{self, Ie};
use crate::quirks::{classify_firewall_event, FirewallDisposition, Quirks};
use crate::schema::{Schema, SchemaBuilder};
use crate::template::{InterestingElement as IE_, Template};
use crate::time_gauntlet::{self, TimeFields};

/// A raw field's decoded form before it's sorted into canonical fields,
/// time-gauntlet inputs, or sidecar overflow.
#[derive(Debug, Clone)]
enum RawValue {
    Uint(u64),
    Ip(FlowIp),
    Bytes(Vec<u8>),
}

/// Parses one field's bytes per its `(ie, length)` template entry: v4/v6
/// address fields decode to an IP, 1-8 byte fields decode to a big-endian
/// uint, everything else is taken as an opaque byte string. Mirrors the
/// by-field-type dispatch a template-driven IPFIX data set decoder uses,
/// here with the set of recognized widths fixed up front since this
/// codec's `Schema` (unlike a live collector's template table) is already
/// fully resolved before a record is seen.
fn parse_field_value(field_ie: Ie, len: usize, i: &[u8]) -> IResult<&[u8], RawValue> {
    match (field_ie, len) {
        (ie::SOURCE_IPV4_ADDRESS, 4)
        | (ie::DESTINATION_IPV4_ADDRESS, 4)
        | (ie::IP_NEXT_HOP_IPV4_ADDRESS, 4) => {
            let (i, addr) = be_u32(i)?;
            Ok((i, RawValue::Ip(FlowIp::V4(std::net::Ipv4Addr::from(addr)))))
        }
        (ie::SOURCE_IPV6_ADDRESS, 16)
        | (ie::DESTINATION_IPV6_ADDRESS, 16)
        | (ie::IP_NEXT_HOP_IPV6_ADDRESS, 16) => {
            let (i, addr) = be_u128(i)?;
            Ok((i, RawValue::Ip(FlowIp::from_be_bytes16(addr.to_be_bytes()))))
        }
        (_, 1) => {
            let (i, v) = be_u8(i)?;
            Ok((i, RawValue::Uint(v as u64)))
        }
        (_, 2) => {
            let (i, v) = be_u16(i)?;
            Ok((i, RawValue::Uint(v as u64)))
        }
        (_, 4) => {
            let (i, v) = be_u32(i)?;
            Ok((i, RawValue::Uint(v as u64)))
        }
        (_, 8) => {
            let (i, v) = be_u64(i)?;
            Ok((i, RawValue::Uint(v)))
        }
        (_, 3) | (_, 5) | (_, 6) | (_, 7) => {
            let (i, bytes) = take(len)(i)?;
            let v = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
            Ok((i, RawValue::Uint(v)))
        }
        _ => {
            let (i, bytes) = take(len)(i)?;
            Ok((i, RawValue::Bytes(bytes.to_vec())))
        }
    }
}

/// Splits one data record's raw bytes into `(ie, value)` pairs per the
/// template's schema, consuming exactly `schema.record_len()` bytes.
fn split_fields(schema: &Schema, raw: &[u8]) -> Vec<(Ie, RawValue)> {
    let mut remaining = raw;
    let mut out = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let len = field.length as usize;
        let (rest, value) = parse_field_value(field.ie, len, remaining)
        .expect("caller has already verified raw.len() >= schema.record_len()");
        remaining = rest;
        out.push((field.ie, value));
    }
    out
}

fn uint_of(fields: &BTreeMap<Ie, RawValue>, ie: Ie) -> Option<u64> {
    match fields.get(&ie)? {
        RawValue::Uint(v) => Some(*v),
        _ => None,
    }
}

fn ip_of(fields: &BTreeMap<Ie, RawValue>, ie: Ie) -> Option<FlowIp> {
    match fields.get(&ie)? {
        RawValue::Ip(v) => Some(*v),
        _ => None,
    }
}

fn time_fields_from_raw(fields: &BTreeMap<Ie, RawValue>) -> TimeFields {
    TimeFields {
        flow_start_sys_up_time_ms: uint_of(fields, ie::FLOW_START_SYS_UP_TIME).map(|v| v as u32),
        flow_end_sys_up_time_ms: uint_of(fields, ie::FLOW_END_SYS_UP_TIME).map(|v| v as u32),
        system_init_time_ms: uint_of(fields, ie::SYSTEM_INIT_TIME_MILLISECONDS),
        flow_start_milliseconds: uint_of(fields, ie::FLOW_START_MILLISECONDS).map(|v| v as i64),
        flow_end_milliseconds: uint_of(fields, ie::FLOW_END_MILLISECONDS).map(|v| v as i64),
        flow_start_seconds: uint_of(fields, ie::FLOW_START_SECONDS).map(|v| v as u32),
        flow_end_seconds: uint_of(fields, ie::FLOW_END_SECONDS).map(|v| v as u32),
        flow_start_microseconds_ntp: uint_of(fields, ie::FLOW_START_MICROSECONDS),
        flow_end_microseconds_ntp: uint_of(fields, ie::FLOW_END_MICROSECONDS),
        flow_start_nanoseconds_ntp: uint_of(fields, ie::FLOW_START_NANOSECONDS),
        flow_end_nanoseconds_ntp: uint_of(fields, ie::FLOW_END_NANOSECONDS),
        flow_start_delta_microseconds: uint_of(fields, ie::FLOW_START_DELTA_MICROSECONDS)
        .map(|v| v as u32),
        flow_end_delta_microseconds: uint_of(fields, ie::FLOW_END_DELTA_MICROSECONDS)
        .map(|v| v as u32),
        flow_duration_milliseconds: uint_of(fields, ie::FLOW_DURATION_MILLISECONDS)
        .map(|v| v as u32),
        flow_duration_microseconds: uint_of(fields, ie::FLOW_DURATION_MICROSECONDS)
        .map(|v| v as u32),
    }
}

/// Best-effort human name for an [`Ie`] not covered by the fixed-field or
/// time-gauntlet mapping, used as the sidecar key for "interesting to the
/// producer but not to SiLK's canonical shape" elements. Unrecognized IEs
/// fall back to a synthesized `ie_<pen>_<id>` name.
fn sidecar_name(field_ie: Ie) -> String {
    match field_ie {
        ie::APPLICATION_ID => "applicationId".to_string(),
        ie::BIFLOW_DIRECTION => "biflowDirection".to_string(),
        other => format!("ie_{}_{}", other.enterprise_id, other.element_id),
    }
}

fn sidecar_value_of(raw: &RawValue) -> SidecarValue {
    match raw {
        RawValue::Uint(v) => SidecarValue::U64(*v),
        RawValue::Ip(ip) => SidecarValue::Ip(*ip),
        RawValue::Bytes(b) => SidecarValue::Bytes(b.clone()),
    }
}

/// Elements the fixed-field / time-gauntlet / biflow machinery already
/// consumes; anything else present in a template becomes sidecar
/// overflow rather than being silently dropped.
fn is_consumed(field_ie: Ie) -> bool {
    matches!(
        field_ie,
        ie::SOURCE_IPV4_ADDRESS
        | ie::SOURCE_IPV6_ADDRESS
        | ie::DESTINATION_IPV4_ADDRESS
        | ie::DESTINATION_IPV6_ADDRESS
        | ie::IP_NEXT_HOP_IPV4_ADDRESS
        | ie::IP_NEXT_HOP_IPV6_ADDRESS
        | ie::SOURCE_TRANSPORT_PORT
        | ie::DESTINATION_TRANSPORT_PORT
        | ie::PROTOCOL_IDENTIFIER
        | ie::OCTET_DELTA_COUNT
        | ie::PACKET_DELTA_COUNT
        | ie::REVERSE_OCTET_DELTA_COUNT
        | ie::REVERSE_PACKET_DELTA_COUNT
        | ie::TCP_CONTROL_BITS
        | ie::REVERSE_TCP_CONTROL_BITS
        | ie::INGRESS_INTERFACE
        | ie::EGRESS_INTERFACE
        | ie::FLOW_END_REASON
        | ie::FIREWALL_EVENT
        | ie::SENSOR_ID
        | ie::FLOWTYPE_ID
        | ie::TCP_INITIAL_FLAGS
        | ie::TCP_SESSION_FLAGS
        | ie::TCP_AGGREGATE_FLAGS
        | ie::ATTRIBUTE_BITS
        | ie::FLOW_START_SYS_UP_TIME
        | ie::FLOW_END_SYS_UP_TIME
        | ie::SYSTEM_INIT_TIME_MILLISECONDS
        | ie::FLOW_START_MILLISECONDS
        | ie::FLOW_END_MILLISECONDS
        | ie::FLOW_START_SECONDS
        | ie::FLOW_END_SECONDS
        | ie::FLOW_START_MICROSECONDS
        | ie::FLOW_END_MICROSECONDS
        | ie::FLOW_START_NANOSECONDS
        | ie::FLOW_END_NANOSECONDS
        | ie::FLOW_START_DELTA_MICROSECONDS
        | ie::FLOW_END_DELTA_MICROSECONDS
        | ie::FLOW_DURATION_MILLISECONDS
        | ie::FLOW_DURATION_MICROSECONDS
    )
}

/// Decodes one raw data record against `template` into zero, one, or two
/// canonical records (zero for dropped firewall events or quirks-
/// rejected zero-packet flows; two for genuinely bidirectional flows).
pub fn decode_data_record(
    template: &Template,
    raw: &[u8],
    export_time_ms: i64,
    quirks: Quirks,
) -> Vec<Record> {
    let split = split_fields(&template.schema, raw);
    let by_ie: BTreeMap<Ie, RawValue> = split.iter().cloned().collect();

    if template.interesting.has(IE_::FirewallEvent) && quirks.firewall_event_handling {
        if let Some(event) = uint_of(&by_ie, ie::FIREWALL_EVENT) {
            if classify_firewall_event(event) == FirewallDisposition::Drop {
                tracing::trace!(firewall_event = event, "dropping firewall create/update/alert record");
                return Vec::new();
            }
        }
    }

    let time = time_fields_from_raw(&by_ie);
    let (start_ms, duration_ms) = time_gauntlet::resolve(&time, export_time_ms);

    let mut base = Record::new();
    base.start_time_ms = start_ms;
    base.duration_ms = duration_ms;
    if let Some(ip) = ip_of(&by_ie, ie::SOURCE_IPV4_ADDRESS).or_else(|| ip_of(&by_ie, ie::SOURCE_IPV6_ADDRESS)) {
        base.source_ip = ip;
    }
    if let Some(ip) = ip_of(&by_ie, ie::DESTINATION_IPV4_ADDRESS).or_else(|| ip_of(&by_ie, ie::DESTINATION_IPV6_ADDRESS)) {
        base.dest_ip = ip;
    }
    if let Some(ip) = ip_of(&by_ie, ie::IP_NEXT_HOP_IPV4_ADDRESS).or_else(|| ip_of(&by_ie, ie::IP_NEXT_HOP_IPV6_ADDRESS)) {
        base.next_hop_ip = ip;
    }
    base.source_port = uint_of(&by_ie, ie::SOURCE_TRANSPORT_PORT).unwrap_or(0) as u16;
    base.dest_port = uint_of(&by_ie, ie::DESTINATION_TRANSPORT_PORT).unwrap_or(0) as u16;
    base.protocol = uint_of(&by_ie, ie::PROTOCOL_IDENTIFIER).unwrap_or(0) as u8;
    base.packets = uint_of(&by_ie, ie::PACKET_DELTA_COUNT).unwrap_or(0);
    base.bytes = uint_of(&by_ie, ie::OCTET_DELTA_COUNT).unwrap_or(0);
    base.tcp_initial_flags = uint_of(&by_ie, ie::TCP_INITIAL_FLAGS)
    .or_else(|| uint_of(&by_ie, ie::TCP_CONTROL_BITS))
    .unwrap_or(0) as u8;
    base.tcp_session_flags = uint_of(&by_ie, ie::TCP_SESSION_FLAGS).unwrap_or(0) as u8;
    base.tcp_aggregate_flags = uint_of(&by_ie, ie::TCP_AGGREGATE_FLAGS).unwrap_or(0) as u8;
    base.sensor_id = uint_of(&by_ie, ie::SENSOR_ID).unwrap_or(0) as u16;
    base.flowtype_id = uint_of(&by_ie, ie::FLOWTYPE_ID).unwrap_or(0) as u16;
    base.input_interface = uint_of(&by_ie, ie::INGRESS_INTERFACE).unwrap_or(0) as u32;
    base.output_interface = uint_of(&by_ie, ie::EGRESS_INTERFACE).unwrap_or(0) as u32;
    base.application_label = uint_of(&by_ie, ie::APPLICATION_ID).unwrap_or(0) as u32;
    base.flow_end_reason = uint_of(&by_ie, ie::FLOW_END_REASON).unwrap_or(0) as u8;
    base.attribute_bits = uint_of(&by_ie, ie::ATTRIBUTE_BITS).unwrap_or(0) as u8;

    if quirks.firewall_event_handling {
        if let Some(event) = uint_of(&by_ie, ie::FIREWALL_EVENT) {
            if classify_firewall_event(event) == FirewallDisposition::PassWithDenyMarker {
                base.sidecar_set("firewallDenied", SidecarValue::Bool(true));
            }
        }
    }

    for (field_ie, value) in &split {
        if is_consumed(*field_ie) {
            continue;
        }
        base.sidecar_set(sidecar_name(*field_ie), sidecar_value_of(value));
    }

    if base.packets == 0 && !quirks.accept_zero_packets {
        tracing::trace!("dropping zero-packet record (quirks.accept_zero_packets is off)");
        return Vec::new();
    }

    let reverse_octets = uint_of(&by_ie, ie::REVERSE_OCTET_DELTA_COUNT).unwrap_or(0);
    let reverse_packets = uint_of(&by_ie, ie::REVERSE_PACKET_DELTA_COUNT).unwrap_or(0);
    let has_forward = base.packets > 0;
    let has_reverse = reverse_packets > 0 || reverse_octets > 0;

    if has_forward && has_reverse {
        let mut reverse = base.clone();
        reverse.swap_direction();
        reverse.packets = reverse_packets;
        reverse.bytes = reverse_octets;
        reverse.tcp_initial_flags =
        uint_of(&by_ie, ie::REVERSE_TCP_CONTROL_BITS).unwrap_or(0) as u8;
        vec![base, reverse]
    } else if !has_forward && has_reverse {
        let mut swapped = base.clone();
        swapped.swap_direction();
        swapped.packets = reverse_packets;
        swapped.bytes = reverse_octets;
        swapped.tcp_initial_flags =
        uint_of(&by_ie, ie::REVERSE_TCP_CONTROL_BITS).unwrap_or(0) as u8;
        vec![swapped]
    } else {
        vec![base]
    }
}

/// The fixed-field portion of the writer's canonical schema, used to
/// write canonical records back using a negotiated template. IP fields
/// are always declared at their 16-byte (IPv4-mapped-IPv6)
/// width so the same template serves v4 and v6 records interchangeably,
/// matching the Aggregate Bag's key-encoding convention.
pub fn canonical_schema() -> Arc<Schema> {
    SchemaBuilder::new()
    .push(ie::SOURCE_IPV6_ADDRESS, 16)
    .push(ie::DESTINATION_IPV6_ADDRESS, 16)
    .push(ie::IP_NEXT_HOP_IPV6_ADDRESS, 16)
    .push(ie::SOURCE_TRANSPORT_PORT, 2)
    .push(ie::DESTINATION_TRANSPORT_PORT, 2)
    .push(ie::PROTOCOL_IDENTIFIER, 1)
    .push(ie::PACKET_DELTA_COUNT, 8)
    .push(ie::OCTET_DELTA_COUNT, 8)
    .push(ie::FLOW_START_MILLISECONDS, 8)
    .push(ie::FLOW_DURATION_MILLISECONDS, 4)
    .push(ie::TCP_INITIAL_FLAGS, 1)
    .push(ie::TCP_SESSION_FLAGS, 1)
    .push(ie::TCP_AGGREGATE_FLAGS, 1)
    .push(ie::SENSOR_ID, 2)
    .push(ie::FLOWTYPE_ID, 2)
    .push(ie::INGRESS_INTERFACE, 4)
    .push(ie::EGRESS_INTERFACE, 4)
    .push(ie::APPLICATION_ID, 4)
    .push(ie::FLOW_END_REASON, 1)
    .push(ie::ATTRIBUTE_BITS, 1)
    .build()
}

/// Serializes a record's fixed fields against [`canonical_schema`]. The
/// sidecar is written separately, as its own self-describing block.
pub fn encode_core(rec: &Record) -> Vec<u8> {
    let mut buf = Vec::with_capacity(canonical_schema().record_len());
    buf.extend_from_slice(&rec.source_ip.to_be_bytes16());
    buf.extend_from_slice(&rec.dest_ip.to_be_bytes16());
    buf.extend_from_slice(&rec.next_hop_ip.to_be_bytes16());
    buf.extend_from_slice(&rec.source_port.to_be_bytes());
    buf.extend_from_slice(&rec.dest_port.to_be_bytes());
    buf.push(rec.protocol);
    buf.extend_from_slice(&rec.packets.to_be_bytes());
    buf.extend_from_slice(&rec.bytes.to_be_bytes());
    buf.extend_from_slice(&(rec.start_time_ms as u64).to_be_bytes());
    buf.extend_from_slice(&rec.duration_ms.to_be_bytes());
    buf.push(rec.tcp_initial_flags);
    buf.push(rec.tcp_session_flags);
    buf.push(rec.tcp_aggregate_flags);
    buf.extend_from_slice(&rec.sensor_id.to_be_bytes());
    buf.extend_from_slice(&rec.flowtype_id.to_be_bytes());
    buf.extend_from_slice(&rec.input_interface.to_be_bytes());
    buf.extend_from_slice(&rec.output_interface.to_be_bytes());
    buf.extend_from_slice(&rec.application_label.to_be_bytes());
    buf.push(rec.flow_end_reason);
    buf.push(rec.attribute_bits);
    buf
}

/// Parses a 16-byte big-endian address into a [`FlowIp`]; `core` records
/// always carry the field at its full v6-or-mapped-v4 width.
fn parse_core_ip(i: &[u8]) -> IResult<&[u8], FlowIp> {
    let (i, addr) = be_u128(i)?;
    Ok((i, FlowIp::from_be_bytes16(addr.to_be_bytes())))
}

/// Wire layout of a core record, matching [`encode_core`]'s field order.
#[derive(Nom)]
struct RawCoreRecord {
    #[nom(Parse = "parse_core_ip")]
    source_ip: FlowIp,
    #[nom(Parse = "parse_core_ip")]
    dest_ip: FlowIp,
    #[nom(Parse = "parse_core_ip")]
    next_hop_ip: FlowIp,
    source_port: u16,
    dest_port: u16,
    protocol: u8,
    packets: u64,
    bytes: u64,
    start_time_ms: u64,
    duration_ms: u32,
    tcp_initial_flags: u8,
    tcp_session_flags: u8,
    tcp_aggregate_flags: u8,
    sensor_id: u16,
    flowtype_id: u16,
    input_interface: u32,
    output_interface: u32,
    application_label: u32,
    flow_end_reason: u8,
    attribute_bits: u8,
}

/// Inverse of [`encode_core`]; `raw` must be exactly
/// `canonical_schema().record_len()` bytes.
pub fn decode_core(raw: &[u8]) -> Record {
    let (_, raw) =
        RawCoreRecord::parse(raw).expect("caller has already verified raw.len() == canonical_schema().record_len()");
    let mut rec = Record::new();
    rec.source_ip = raw.source_ip;
    rec.dest_ip = raw.dest_ip;
    rec.next_hop_ip = raw.next_hop_ip;
    rec.source_port = raw.source_port;
    rec.dest_port = raw.dest_port;
    rec.protocol = raw.protocol;
    rec.packets = raw.packets;
    rec.bytes = raw.bytes;
    rec.start_time_ms = raw.start_time_ms as i64;
    rec.duration_ms = raw.duration_ms;
    rec.tcp_initial_flags = raw.tcp_initial_flags;
    rec.tcp_session_flags = raw.tcp_session_flags;
    rec.tcp_aggregate_flags = raw.tcp_aggregate_flags;
    rec.sensor_id = raw.sensor_id;
    rec.flowtype_id = raw.flowtype_id;
    rec.input_interface = raw.input_interface;
    rec.output_interface = raw.output_interface;
    rec.application_label = raw.application_label;
    rec.flow_end_reason = raw.flow_end_reason;
    rec.attribute_bits = raw.attribute_bits;
    rec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;

    fn sample_record() -> Record {
        let mut r = Record::new();
        r.source_ip = FlowIp::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));
        r.dest_ip = FlowIp::V4(std::net::Ipv4Addr::new(10, 0, 0, 2));
        r.source_port = 1234;
        r.dest_port = 80;
        r.protocol = 6;
        r.packets = 3;
        r.bytes = 180;
        r.start_time_ms = 1_700_000_000_000;
        r.duration_ms = 500;
        r
    }

    #[test]
    fn core_round_trips() {
        let rec = sample_record();
        let encoded = encode_core(&rec);
        assert_eq!(encoded.len(), canonical_schema().record_len());
        let decoded = decode_core(&encoded);
        assert_eq!(decoded.source_ip, rec.source_ip);
        assert_eq!(decoded.dest_ip, rec.dest_ip);
        assert_eq!(decoded.packets, rec.packets);
        assert_eq!(decoded.bytes, rec.bytes);
        assert_eq!(decoded.start_time_ms, rec.start_time_ms);
        assert_eq!(decoded.duration_ms, rec.duration_ms);
    }

    #[test]
    fn zero_packet_record_is_dropped_without_quirk() {
        let schema = SchemaBuilder::new()
        .push(ie::PACKET_DELTA_COUNT, 8)
        .push(ie::FLOW_START_SECONDS, 4)
        .push(ie::FLOW_END_SECONDS, 4)
        .build();
        let template = Template::new(256, schema, false);
        let mut raw = Vec::new();
        raw.extend_from_slice(&0u64.to_be_bytes());
        raw.extend_from_slice(&100u32.to_be_bytes());
        raw.extend_from_slice(&100u32.to_be_bytes());
        let records = decode_data_record(&template, &raw, 0, Quirks::none());
        assert!(records.is_empty());
    }

    #[test]
    fn firewall_created_event_is_dropped() {
        let schema = SchemaBuilder::new()
        .push(ie::PACKET_DELTA_COUNT, 8)
        .push(ie::FIREWALL_EVENT, 1)
        .build();
        let template = Template::new(256, schema, false);
        let mut raw = Vec::new();
        raw.extend_from_slice(&5u64.to_be_bytes());
        raw.push(1); // flowCreated
        let records = decode_data_record(&template, &raw, 0, Quirks::firewall());
        assert!(records.is_empty());
    }

    #[test]
    fn bidirectional_record_produces_forward_and_reverse() {
        let schema = SchemaBuilder::new()
        .push(ie::SOURCE_IPV4_ADDRESS, 4)
        .push(ie::DESTINATION_IPV4_ADDRESS, 4)
        .push(ie::SOURCE_TRANSPORT_PORT, 2)
        .push(ie::DESTINATION_TRANSPORT_PORT, 2)
        .push(ie::PROTOCOL_IDENTIFIER, 1)
        .push(ie::PACKET_DELTA_COUNT, 8)
        .push(ie::OCTET_DELTA_COUNT, 8)
        .push(ie::REVERSE_PACKET_DELTA_COUNT, 8)
        .push(ie::REVERSE_OCTET_DELTA_COUNT, 8)
        .push(ie::FLOW_START_SECONDS, 4)
        .push(ie::FLOW_END_SECONDS, 4)
        .build();
        let template = Template::new(256, schema, false);
        let mut raw = Vec::new();
        raw.extend_from_slice(&[10, 0, 0, 1]);
        raw.extend_from_slice(&[10, 0, 0, 2]);
        raw.extend_from_slice(&1234u16.to_be_bytes());
        raw.extend_from_slice(&80u16.to_be_bytes());
        raw.push(6);
        raw.extend_from_slice(&3u64.to_be_bytes());
        raw.extend_from_slice(&180u64.to_be_bytes());
        raw.extend_from_slice(&5u64.to_be_bytes());
        raw.extend_from_slice(&300u64.to_be_bytes());
        raw.extend_from_slice(&100u32.to_be_bytes());
        raw.extend_from_slice(&110u32.to_be_bytes());

        let records = decode_data_record(&template, &raw, 0, Quirks::none());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_port, 1234);
        assert_eq!(records[1].source_port, 80);
        assert_eq!(records[1].dest_port, 1234);
        assert_eq!(records[0].start_time_ms, records[1].start_time_ms);
    }

    #[test]
    fn unknown_field_becomes_sidecar() {
        let custom = Ie::enterprise(99999, 7);
        let schema = SchemaBuilder::new()
        .push(ie::PACKET_DELTA_COUNT, 8)
        .push(ie::FLOW_START_SECONDS, 4)
        .push(ie::FLOW_END_SECONDS, 4)
        .push(custom, 4)
        .build();
        let template = Template::new(256, schema, false);
        let mut raw = Vec::new();
        raw.extend_from_slice(&3u64.to_be_bytes());
        raw.extend_from_slice(&100u32.to_be_bytes());
        raw.extend_from_slice(&100u32.to_be_bytes());
        raw.extend_from_slice(&42u32.to_be_bytes());
        let records = decode_data_record(&template, &raw, 0, Quirks::none());
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].sidecar_get("ie_99999_7"),
            Some(&SidecarValue::U64(42))
        );
    }
}
