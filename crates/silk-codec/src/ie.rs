//! Information element identity: `(enterprise_id, element_id)` pairs
//! that make up a schema. A small catalog of the elements the time
//! gauntlet and the fixed-field mapping care about; unrecognized elements
//! still round-trip as opaque bytes (they just never become "interesting"
//! to the template bitmap in [`crate::template`]).

/// Identity of an IPFIX/NetFlow-v9 information element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Ie {
    pub enterprise_id: u32,
    pub element_id: u16,
}

impl Ie {
    pub const fn iana(element_id: u16) -> Self {
        Ie {
            enterprise_id: 0,
            element_id,
        }
    }

    pub const fn enterprise(enterprise_id: u32, element_id: u16) -> Self {
        Ie {
            enterprise_id,
            element_id,
        }
    }
}

/// RFC 5103 biflow reverse-information-element private enterprise number.
pub const REVERSE_PEN: u32 = 29305;
/// Cisco ASA's private enterprise number, used here for `firewallEvent`.
pub const CISCO_PEN: u32 = 9;
/// CERT/SEI's private enterprise number, used by SiLK's own IPFIX
/// extension elements (sensor id, flowtype id, the three flag bytes) that
/// have no IANA-assigned element.
pub const SILK_PEN: u32 = 6871;

macro_rules! ies {
    ($($name:ident = $id:expr),* $(,)?) => {
        $(pub const $name: Ie = Ie::iana($id);)*
    };
}

ies! {
    OCTET_DELTA_COUNT = 1,
    PACKET_DELTA_COUNT = 2,
    PROTOCOL_IDENTIFIER = 4,
    TCP_CONTROL_BITS = 6,
    SOURCE_TRANSPORT_PORT = 7,
    SOURCE_IPV4_ADDRESS = 8,
    INGRESS_INTERFACE = 10,
    DESTINATION_TRANSPORT_PORT = 11,
    DESTINATION_IPV4_ADDRESS = 12,
    EGRESS_INTERFACE = 14,
    IP_NEXT_HOP_IPV4_ADDRESS = 15,
    FLOW_END_SYS_UP_TIME = 21,
    FLOW_START_SYS_UP_TIME = 22,
    SOURCE_IPV6_ADDRESS = 27,
    DESTINATION_IPV6_ADDRESS = 28,
    FLOW_START_SECONDS = 150,
    FLOW_END_SECONDS = 151,
    FLOW_START_MILLISECONDS = 152,
    FLOW_END_MILLISECONDS = 153,
    FLOW_START_MICROSECONDS = 154,
    FLOW_END_MICROSECONDS = 155,
    FLOW_START_NANOSECONDS = 156,
    FLOW_END_NANOSECONDS = 157,
    FLOW_START_DELTA_MICROSECONDS = 158,
    FLOW_END_DELTA_MICROSECONDS = 159,
    SYSTEM_INIT_TIME_MILLISECONDS = 160,
    FLOW_DURATION_MILLISECONDS = 161,
    FLOW_DURATION_MICROSECONDS = 162,
    APPLICATION_ID = 95,
    FLOW_END_REASON = 136,
    BIFLOW_DIRECTION = 239,
}

pub const IP_NEXT_HOP_IPV6_ADDRESS: Ie = Ie::iana(62);
pub const FIREWALL_EVENT: Ie = Ie::enterprise(CISCO_PEN, 233);
pub const REVERSE_OCTET_DELTA_COUNT: Ie = Ie::enterprise(REVERSE_PEN, 1);
pub const REVERSE_PACKET_DELTA_COUNT: Ie = Ie::enterprise(REVERSE_PEN, 2);
pub const REVERSE_TCP_CONTROL_BITS: Ie = Ie::enterprise(REVERSE_PEN, 6);

// SiLK-native elements.
pub const SENSOR_ID: Ie = Ie::enterprise(SILK_PEN, 1);
pub const FLOWTYPE_ID: Ie = Ie::enterprise(SILK_PEN, 2);
pub const TCP_INITIAL_FLAGS: Ie = Ie::enterprise(SILK_PEN, 3);
pub const TCP_SESSION_FLAGS: Ie = Ie::enterprise(SILK_PEN, 4);
pub const TCP_AGGREGATE_FLAGS: Ie = Ie::enterprise(SILK_PEN, 5);
pub const ATTRIBUTE_BITS: Ie = Ie::enterprise(SILK_PEN, 6);

/// `firewallEvent` values relevant to the firewall-quirks policy.
pub mod firewall_event {
    pub const DELETED: u64 = 2;
    pub const DENIED: u64 = 3;
    pub const CREATED: u64 = 1;
    pub const UPDATED: u64 = 4;
    pub const ALERT: u64 = 5;
}
