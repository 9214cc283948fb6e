//! The Aggregate Bag's closed field-type catalog.
//!
//! Every key or counter tuple is built from this catalog. Fields are
//! ordered by [`FieldId::id`], not declaration order: within each tuple
//! the field-type ids must be unique and listed in ascending id order.
//! `FieldId`'s `Ord` impl is defined in terms of `id()` so a plain
//! `Vec::sort` gives the required order.

use silk_record::ip::FlowIp;

/// A field in a bag's key or counter tuple. `Custom` covers the
/// "unmapped field-id falls back to CUSTOM" case, carrying the
/// caller-assigned numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FieldId {
    SIPv4,
    DIPv4,
    NhIPv4,
    SIPv6,
    DIPv6,
    NhIPv6,
    SPort,
    DPort,
    Protocol,
    Packets,
    Bytes,
    StartTime,
    Sensor,
    FtypeClass,
    FtypeType,
    Input,
    Output,
    AppLabel,
    Records,
    SumPackets,
    SumBytes,
    SumDuration,
    /// A single generic 64-bit counter, used by the legacy [`crate::legacy::Bag`]
    /// specialization when no more specific counter meaning applies.
    Value,
    Custom(u32),
}

impl FieldId {
    /// The stable numeric id the ascending-order invariant sorts
    /// by, and the id persisted in the Aggregate Bag file format's
    /// field-list header entry.
    pub fn id(self) -> u32 {
        match self {
            FieldId::SIPv4 => 1,
            FieldId::DIPv4 => 2,
            FieldId::NhIPv4 => 3,
            FieldId::SIPv6 => 4,
            FieldId::DIPv6 => 5,
            FieldId::NhIPv6 => 6,
            FieldId::SPort => 7,
            FieldId::DPort => 8,
            FieldId::Protocol => 9,
            FieldId::Packets => 10,
            FieldId::Bytes => 11,
            FieldId::StartTime => 12,
            FieldId::Sensor => 13,
            FieldId::FtypeClass => 14,
            FieldId::FtypeType => 15,
            FieldId::Input => 16,
            FieldId::Output => 17,
            FieldId::AppLabel => 18,
            FieldId::Records => 19,
            FieldId::SumPackets => 20,
            FieldId::SumBytes => 21,
            FieldId::SumDuration => 22,
            FieldId::Value => 23,
            FieldId::Custom(id) => 1000 + id,
        }
    }

    pub fn from_id(id: u32) -> FieldId {
        match id {
            1 => FieldId::SIPv4,
            2 => FieldId::DIPv4,
            3 => FieldId::NhIPv4,
            4 => FieldId::SIPv6,
            5 => FieldId::DIPv6,
            6 => FieldId::NhIPv6,
            7 => FieldId::SPort,
            8 => FieldId::DPort,
            9 => FieldId::Protocol,
            10 => FieldId::Packets,
            11 => FieldId::Bytes,
            12 => FieldId::StartTime,
            13 => FieldId::Sensor,
            14 => FieldId::FtypeClass,
            15 => FieldId::FtypeType,
            16 => FieldId::Input,
            17 => FieldId::Output,
            18 => FieldId::AppLabel,
            19 => FieldId::Records,
            20 => FieldId::SumPackets,
            21 => FieldId::SumBytes,
            22 => FieldId::SumDuration,
            23 => FieldId::Value,
            other if other >= 1000 => FieldId::Custom(other - 1000),
            other => FieldId::Custom(other),
        }
    }

    pub fn is_ip(self) -> bool {
        matches!(
            self,
            FieldId::SIPv4 | FieldId::DIPv4 | FieldId::NhIPv4 | FieldId::SIPv6 | FieldId::DIPv6 | FieldId::NhIPv6
        )
    }

    /// Encoded width of this field when it appears in a *key* tuple.
    pub fn key_width(self) -> usize {
        match self {
            FieldId::SIPv4 | FieldId::DIPv4 | FieldId::NhIPv4 | FieldId::SIPv6 | FieldId::DIPv6 | FieldId::NhIPv6 => 16,
            FieldId::SPort | FieldId::DPort | FieldId::Sensor | FieldId::FtypeClass | FieldId::FtypeType => 2,
            FieldId::Protocol => 1,
            FieldId::Input | FieldId::Output | FieldId::AppLabel => 4,
            FieldId::Packets
            | FieldId::Bytes
            | FieldId::StartTime
            | FieldId::Records
            | FieldId::SumPackets
            | FieldId::SumBytes
            | FieldId::SumDuration
            | FieldId::Value => 8,
            FieldId::Custom(_) => 4,
        }
    }
}

impl PartialOrd for FieldId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id().cmp(&other.id())
    }
}

/// A key field's value: either an IP (always folded to v6 form on encode)
/// or an unsigned integer (covers protocol/port/sensor/packet-count/
/// timestamp-valued keys alike, distinguished only by the declared
/// [`FieldId::key_width`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldValue {
    Ip(FlowIp),
    Uint(u64),
}

impl FieldValue {
    pub fn as_uint(self) -> Option<u64> {
        match self {
            FieldValue::Uint(v) => Some(v),
            FieldValue::Ip(_) => None,
        }
    }

    pub fn as_ip(self) -> Option<FlowIp> {
        match self {
            FieldValue::Ip(ip) => Some(ip),
            FieldValue::Uint(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trips_through_from_id() {
        for field in [
            FieldId::SIPv4,
            FieldId::SumBytes,
            FieldId::Value,
            FieldId::Custom(42),
        ] {
            assert_eq!(FieldId::from_id(field.id()), field);
        }
    }

    #[test]
    fn ordering_follows_id_not_declaration_order() {
        let mut fields = vec![FieldId::SumBytes, FieldId::SIPv4, FieldId::Protocol];
        fields.sort();
        assert_eq!(fields, vec![FieldId::SIPv4, FieldId::Protocol, FieldId::SumBytes]);
    }
}
