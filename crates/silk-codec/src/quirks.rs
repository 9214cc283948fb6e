//! Per-probe decode quirks: policy knobs that change how a
//! record is accepted or rewritten during decode, keyed by the exporting
//! probe rather than hardcoded into the decoder.

use crate::ie::firewall_event;

/// What to do with a Cisco ASA `firewallEvent` record, per the
/// firewall-quirks policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallDisposition {
    /// Pass the record through unchanged.
    Pass,
    /// Pass the record through, tagging it with a sidecar marker.
    PassWithDenyMarker,
    /// Drop the record silently; it never reaches a destination stream.
    Drop,
}

/// Classifies a `firewallEvent` value using the disposition table below: `flowDeleted`
/// passes through, `flowDenied` passes through but is marked, everything
/// else (`flowCreated`, `flowUpdated`, `flowAlert`) is dropped.
pub fn classify_firewall_event(event: u64) -> FirewallDisposition {
    match event {
        firewall_event::DELETED => FirewallDisposition::Pass,
        firewall_event::DENIED => FirewallDisposition::PassWithDenyMarker,
        firewall_event::CREATED | firewall_event::UPDATED | firewall_event::ALERT => {
            FirewallDisposition::Drop
        }
        _ => FirewallDisposition::Pass,
    }
}

/// Per-probe decode policy. Constructed once per configured probe and
/// consulted by the reader for every record it decodes from that probe's
/// stream: an explicit struct threaded through calls rather than global
/// flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quirks {
    /// Zero-packet records are normally a malformed-export signal; when
    /// set, accept them instead of rejecting the record.
    pub accept_zero_packets: bool,
    /// Apply the firewall-event disposition table above. Probes that
    /// never emit `firewallEvent` can turn this off to skip the check.
    pub firewall_event_handling: bool,
}

impl Quirks {
    pub fn none() -> Self {
        Quirks::default()
    }

    pub fn firewall() -> Self {
        Quirks {
            accept_zero_packets: false,
            firewall_event_handling: true,
        }
    }
}

/// Opaque handle identifying the probe a stream was configured for.
/// Distinct probes can carry distinct [`Quirks`] and distinct schema
/// expectations without the reader needing to know probe internals.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub name: String,
    pub quirks: Quirks,
}

impl ProbeConfig {
    pub fn new(name: impl Into<String>, quirks: Quirks) -> Self {
        ProbeConfig {
            name: name.into(),
            quirks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_deleted_passes_through() {
        assert_eq!(
            classify_firewall_event(firewall_event::DELETED),
            FirewallDisposition::Pass
        );
    }

    #[test]
    fn flow_denied_is_marked() {
        assert_eq!(
            classify_firewall_event(firewall_event::DENIED),
            FirewallDisposition::PassWithDenyMarker
        );
    }

    #[test]
    fn flow_created_is_dropped() {
        assert_eq!(
            classify_firewall_event(firewall_event::CREATED),
            FirewallDisposition::Drop
        );
    }
}
