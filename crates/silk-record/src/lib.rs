//! Canonical flow-record model and sidecar.
//!
//! This crate holds the in-memory representation shared by the flow codec
//! (`silk-codec`), the filter pipeline (`silk-filter`), and the Aggregate
//! Bag engine (`silk-aggbag`): a fixed-sized record core plus a typed
//! sidecar map, and the `FieldTag`/`FieldValue` accessor pair used to read
//! or write either.

pub mod field;
pub mod ip;
pub mod record;
pub mod sidecar;

pub use field::FieldTag;
pub use ip::FlowIp;
pub use record::{FieldValue, InvariantViolation, Record};
pub use sidecar::{Sidecar, SidecarDescriptor, SidecarType, SidecarTypeConflict, SidecarValue};

/// IANA protocol number for ICMP, used by the codec's bidirectional swap
/// (ports are not swapped for ICMP).
pub const ICMP_PROTOCOL: u8 = 1;
/// IANA protocol number for ICMPv6.
pub const ICMPV6_PROTOCOL: u8 = 58;
