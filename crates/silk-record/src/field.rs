//! `FieldTag`: the type-checked accessor key names for
//! `get_field`/`set_field`, covering every fixed field plus the sidecar map.

/// Accessor key for a canonical record's fixed fields, or an escape into
/// the sidecar by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldTag {
    SourceIp,
    DestIp,
    NextHopIp,
    SourcePort,
    DestPort,
    Protocol,
    Packets,
    Bytes,
    StartTime,
    Duration,
    TcpInitialFlags,
    TcpSessionFlags,
    TcpAggregateFlags,
    Sensor,
    Flowtype,
    InputInterface,
    OutputInterface,
    ApplicationLabel,
    FlowEndReason,
    AttributeBits,
    Sidecar(String),
}
