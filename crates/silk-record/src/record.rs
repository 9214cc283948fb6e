//! The canonical flow record.

use crate::field::FieldTag;
use crate::ip::FlowIp;
use crate::sidecar::{Sidecar, SidecarTypeConflict, SidecarValue};

/// TCP/aggregate flag bytes, application label, flowtype id, etc. are all
/// plain fixed-width integers; only the value type varies by field, so
/// `get_field`/`set_field` return/accept this small variant rather than a
/// bespoke getter per field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Ip(FlowIp),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Sidecar(SidecarValue),
}

/// A fixed-field invariant that a record failed to satisfy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("packets must be >= 1, got {0}")]
    ZeroPackets(u64),
    #[error("bytes ({bytes}) must be >= packets ({packets})")]
    BytesLessThanPackets { bytes: u64, packets: u64 },
    #[error("end_time ({end_time}) must be >= start_time ({start_time})")]
    EndBeforeStart { start_time: i64, end_time: i64 },
}

/// A type mismatch between the requested [`FieldTag`] and the
/// [`FieldValue`] supplied to `set_field`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field {0:?} does not accept this value type")]
pub struct FieldTypeMismatch(pub FieldTag);

/// Canonical in-memory flow record: a fixed-sized core plus an owned
/// sidecar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub source_ip: FlowIp,
    pub dest_ip: FlowIp,
    pub next_hop_ip: FlowIp,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: u8,
    pub packets: u64,
    pub bytes: u64,
    /// Milliseconds since the UNIX epoch.
    pub start_time_ms: i64,
    /// Milliseconds; `end_time_ms - start_time_ms`.
    pub duration_ms: u32,
    pub tcp_initial_flags: u8,
    pub tcp_session_flags: u8,
    pub tcp_aggregate_flags: u8,
    pub sensor_id: u16,
    pub flowtype_id: u16,
    pub input_interface: u32,
    pub output_interface: u32,
    pub application_label: u32,
    pub flow_end_reason: u8,
    pub attribute_bits: u8,
    pub sidecar: Sidecar,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// End time derived from `start_time_ms + duration_ms`, keeping
    /// `duration = end_time - start_time`.
    pub fn end_time_ms(&self) -> i64 {
        self.start_time_ms + self.duration_ms as i64
    }

    /// Zero the fixed fields and drop owned sidecar values.
    pub fn clear(&mut self) {
        *self = Record::default();
    }

    /// Deep copy including sidecar. `Record` already has value semantics
    /// for the fixed fields and owns its sidecar, so a plain `clone()`
    /// satisfies this; the named method exists for call-site clarity.
    pub fn copy_from(&mut self, src: &Record) {
        self.clone_from(src);
    }

    pub fn get_field(&self, tag: &FieldTag) -> Option<FieldValue> {
        Some(match tag {
                FieldTag::SourceIp => FieldValue::Ip(self.source_ip),
                FieldTag::DestIp => FieldValue::Ip(self.dest_ip),
                FieldTag::NextHopIp => FieldValue::Ip(self.next_hop_ip),
                FieldTag::SourcePort => FieldValue::U16(self.source_port),
                FieldTag::DestPort => FieldValue::U16(self.dest_port),
                FieldTag::Protocol => FieldValue::U8(self.protocol),
                FieldTag::Packets => FieldValue::U64(self.packets),
                FieldTag::Bytes => FieldValue::U64(self.bytes),
                FieldTag::StartTime => FieldValue::U64(self.start_time_ms as u64),
                FieldTag::Duration => FieldValue::U32(self.duration_ms),
                FieldTag::TcpInitialFlags => FieldValue::U8(self.tcp_initial_flags),
                FieldTag::TcpSessionFlags => FieldValue::U8(self.tcp_session_flags),
                FieldTag::TcpAggregateFlags => FieldValue::U8(self.tcp_aggregate_flags),
                FieldTag::Sensor => FieldValue::U16(self.sensor_id),
                FieldTag::Flowtype => FieldValue::U16(self.flowtype_id),
                FieldTag::InputInterface => FieldValue::U32(self.input_interface),
                FieldTag::OutputInterface => FieldValue::U32(self.output_interface),
                FieldTag::ApplicationLabel => FieldValue::U32(self.application_label),
                FieldTag::FlowEndReason => FieldValue::U8(self.flow_end_reason),
                FieldTag::AttributeBits => FieldValue::U8(self.attribute_bits),
                FieldTag::Sidecar(name) => FieldValue::Sidecar(self.sidecar.get(name)?.clone()),
        })
    }

    pub fn set_field(
        &mut self,
        tag: FieldTag,
        value: FieldValue,
    ) -> Result<(), FieldTypeMismatch> {
        macro_rules! want {
            ($variant:ident, $dst:expr) => {
                match value {
                    FieldValue::$variant(v) => {
                        $dst = v;
                        Ok(())
                    }
                    _ => Err(FieldTypeMismatch(tag)),
                }
            };
        }
        match tag {
            FieldTag::SourceIp => want!(Ip, self.source_ip),
            FieldTag::DestIp => want!(Ip, self.dest_ip),
            FieldTag::NextHopIp => want!(Ip, self.next_hop_ip),
            FieldTag::SourcePort => want!(U16, self.source_port),
            FieldTag::DestPort => want!(U16, self.dest_port),
            FieldTag::Protocol => want!(U8, self.protocol),
            FieldTag::Packets => want!(U64, self.packets),
            FieldTag::Bytes => want!(U64, self.bytes),
            FieldTag::Duration => want!(U32, self.duration_ms),
            FieldTag::TcpInitialFlags => want!(U8, self.tcp_initial_flags),
            FieldTag::TcpSessionFlags => want!(U8, self.tcp_session_flags),
            FieldTag::TcpAggregateFlags => want!(U8, self.tcp_aggregate_flags),
            FieldTag::Sensor => want!(U16, self.sensor_id),
            FieldTag::Flowtype => want!(U16, self.flowtype_id),
            FieldTag::InputInterface => want!(U32, self.input_interface),
            FieldTag::OutputInterface => want!(U32, self.output_interface),
            FieldTag::ApplicationLabel => want!(U32, self.application_label),
            FieldTag::FlowEndReason => want!(U8, self.flow_end_reason),
            FieldTag::AttributeBits => want!(U8, self.attribute_bits),
            FieldTag::StartTime => match value {
                FieldValue::U64(v) => {
                    self.start_time_ms = v as i64;
                    Ok(())
                }
                _ => Err(FieldTypeMismatch(tag)),
            },
            FieldTag::Sidecar(name) => match value {
                FieldValue::Sidecar(v) => {
                    self.sidecar.set(name, v);
                    Ok(())
                }
                _ => Err(FieldTypeMismatch(FieldTag::Sidecar(name))),
            },
        }
    }

    /// Insert or overwrite a named sidecar value directly, bypassing the
    /// `FieldTag`/`FieldValue` indirection.
    /// The caller is responsible for checking the value's type against
    /// the stream's [`crate::sidecar::SidecarDescriptor`] before calling
    /// this, mirroring how the codec enforces it during decode; this
    /// method itself never conflicts since a record has no descriptor of
    /// its own.
    pub fn sidecar_set(&mut self, name: impl Into<String>, value: SidecarValue) {
        self.sidecar.set(name, value);
    }

    pub fn sidecar_get(&self, name: &str) -> Option<&SidecarValue> {
        self.sidecar.get(name)
    }

    /// Checks the invariants a well-formed record must satisfy. The codec
    /// calls this after decode; callers that construct records by hand (tests,
    /// `rwaggbagtool`'s constant-field injection) should call it too
    /// before trusting a record's shape.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if self.packets == 0 {
            return Err(InvariantViolation::ZeroPackets(self.packets));
        }
        if self.bytes < self.packets {
            return Err(InvariantViolation::BytesLessThanPackets {
                    bytes: self.bytes,
                    packets: self.packets,
            });
        }
        if self.end_time_ms() < self.start_time_ms {
            return Err(InvariantViolation::EndBeforeStart {
                    start_time: self.start_time_ms,
                    end_time: self.end_time_ms(),
            });
        }
        Ok(())
    }

    /// Used by the codec's bidirectional-record handling:
    /// swap source/dest IP, ports (unless ICMP), interfaces, and TCP
    /// flags while keeping the shared start time.
    pub fn swap_direction(&mut self) {
        std::mem::swap(&mut self.source_ip, &mut self.dest_ip);
        if self.protocol != crate::ICMP_PROTOCOL && self.protocol != crate::ICMPV6_PROTOCOL {
            std::mem::swap(&mut self.source_port, &mut self.dest_port);
        }
        std::mem::swap(&mut self.input_interface, &mut self.output_interface);
        std::mem::swap(&mut self.tcp_initial_flags, &mut self.tcp_session_flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> Record {
        let mut r = Record::new();
        r.packets = 3;
        r.bytes = 180;
        r.start_time_ms = 1_000;
        r.duration_ms = 500;
        r
    }

    #[test]
    fn validate_accepts_well_formed_record() {
        assert!(valid_record().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_packets() {
        let mut r = valid_record();
        r.packets = 0;
        assert!(matches!(
                r.validate(),
                Err(InvariantViolation::ZeroPackets(0))
        ));
    }

    #[test]
    fn validate_rejects_bytes_less_than_packets() {
        let mut r = valid_record();
        r.bytes = 1;
        r.packets = 5;
        assert!(matches!(
                r.validate(),
                Err(InvariantViolation::BytesLessThanPackets {.. })
        ));
    }

    #[test]
    fn get_set_field_round_trip() {
        let mut r = Record::new();
        r.set_field(FieldTag::SourcePort, FieldValue::U16(80)).unwrap();
        assert_eq!(r.get_field(&FieldTag::SourcePort), Some(FieldValue::U16(80)));
    }

    #[test]
    fn set_field_rejects_wrong_value_type() {
        let mut r = Record::new();
        let err = r.set_field(FieldTag::SourcePort, FieldValue::U8(1));
        assert!(err.is_err());
    }

    #[test]
    fn sidecar_round_trip() {
        let mut r = Record::new();
        assert_eq!(r.sidecar_get("appName"), None);
        r.sidecar_set("appName", SidecarValue::Str("https".into()));
        assert_eq!(
            r.sidecar_get("appName"),
            Some(&SidecarValue::Str("https".into()))
        );
    }

    #[test]
    fn clear_drops_sidecar_and_zeroes_fields() {
        let mut r = valid_record();
        r.sidecar_set("x", SidecarValue::Bool(true));
        r.clear();
        assert_eq!(r, Record::default());
    }

    #[test]
    fn swap_direction_swaps_ports_except_for_icmp() {
        let mut r = Record::new();
        r.source_port = 1;
        r.dest_port = 2;
        r.protocol = 6; // TCP
        r.swap_direction();
        assert_eq!((r.source_port, r.dest_port), (2, 1));

        let mut icmp = Record::new();
        icmp.source_port = 1;
        icmp.dest_port = 2;
        icmp.protocol = crate::ICMP_PROTOCOL;
        icmp.swap_direction();
        assert_eq!((icmp.source_port, icmp.dest_port), (1, 2));
    }
}
