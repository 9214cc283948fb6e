//! IP address representation shared by the record model, the codec, and
//! the Aggregate Bag engine's key encoding.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Either a v4 or v6 address, tagged so callers can tell which
/// representation produced a given value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FlowIp {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl FlowIp {
    pub fn is_v4(&self) -> bool {
        matches!(self, FlowIp::V4(_))
    }

    pub fn is_v6(&self) -> bool {
        matches!(self, FlowIp::V6(_))
    }

    /// Canonical big-endian 16-byte encoding used for Aggregate Bag key
    /// comparison: v4 addresses are widened to their IPv4-mapped-IPv6 form
    /// so mixed-ingest bags compare correctly.
    pub fn to_be_bytes16(self) -> [u8; 16] {
        match self {
            FlowIp::V4(v4) => v4.to_ipv4_mapped().octets(),
            FlowIp::V6(v6) => v6.octets(),
        }
    }

    /// Inverse of [`Self::to_be_bytes16`]: folds an IPv4-mapped-IPv6
    /// address back down to its v4 form, used by wire codecs that widen
    /// every address to 16 bytes on the wire (mirrors the Aggregate Bag's
    /// key encoding convention so the same helper serves both).
    pub fn from_be_bytes16(bytes: [u8; 16]) -> FlowIp {
        let v6 = Ipv6Addr::from(bytes);
        match v6.to_ipv4_mapped() {
            Some(v4) => FlowIp::V4(v4),
            None => FlowIp::V6(v6),
        }
    }
}

/// Extension used only to name the mapped-v6 conversion at the call site.
trait ToIpv4Mapped {
    fn to_ipv4_mapped(self) -> Ipv6Addr;
}

impl ToIpv4Mapped for Ipv4Addr {
    fn to_ipv4_mapped(self) -> Ipv6Addr {
        self.to_ipv6_mapped()
    }
}

impl Default for FlowIp {
    fn default() -> Self {
        FlowIp::V4(Ipv4Addr::UNSPECIFIED)
    }
}

impl std::fmt::Display for FlowIp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowIp::V4(v4) => write!(f, "{v4}"),
            FlowIp::V6(v6) => write!(f, "{v6}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_maps_into_v6_form() {
        let ip = FlowIp::V4(Ipv4Addr::new(10, 0, 0, 1));
        let bytes = ip.to_be_bytes16();
        assert_eq!(&bytes[..12], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff]);
        assert_eq!(&bytes[12..], &[10, 0, 0, 1]);
    }

    #[test]
    fn v6_round_trips_octets() {
        let v6 = Ipv6Addr::new(1, 2, 3, 4, 5, 6, 7, 8);
        let ip = FlowIp::V6(v6);
        assert_eq!(ip.to_be_bytes16(), v6.octets());
    }

    #[test]
    fn to_from_be_bytes16_round_trips_v4() {
        let ip = FlowIp::V4(Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(FlowIp::from_be_bytes16(ip.to_be_bytes16()), ip);
    }

    #[test]
    fn to_from_be_bytes16_round_trips_v6() {
        let ip = FlowIp::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
        assert_eq!(FlowIp::from_be_bytes16(ip.to_be_bytes16()), ip);
    }
}
