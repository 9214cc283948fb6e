//! A minimal IPset: an ordered set of addresses, the target of
//! `rwaggbagtool --to-ipset`.
//!
//! A full IPset implementation is a compressed radix-trie-like structure
//! supporting CIDR-block insertion; the same "optimization, not contract"
//! reasoning that applies to the legacy Bag's trie applies here too: a
//! sorted set of individual addresses satisfies every operation this
//! tool needs.

use std::collections::BTreeSet;
use std::io::{self, Read, Write};

use thiserror::Error;

use silk_codec::header::{FileHeader, HeaderEntry};
use silk_codec::stream::{read_file_header, write_file_header};
use silk_record::ip::FlowIp;

#[derive(Debug, Error)]
pub enum IpSetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("stream header error: {0}")]
    Header(#[from] silk_codec::stream::CodecError),
}

/// An ordered set of [`FlowIp`] addresses, stored and compared by their
/// canonical 16-byte (IPv4-mapped-IPv6) encoding so v4 and v6 members
/// interleave in one consistent order.
#[derive(Debug, Default, Clone)]
pub struct IpSet {
    members: BTreeSet<[u8; 16]>,
}

impl IpSet {
    pub fn new() -> Self {
        IpSet::default()
    }

    pub fn insert(&mut self, ip: FlowIp) -> bool {
        self.members.insert(ip.to_be_bytes16())
    }

    pub fn contains(&self, ip: FlowIp) -> bool {
        self.members.contains(&ip.to_be_bytes16())
    }

    pub fn remove(&mut self, ip: FlowIp) -> bool {
        self.members.remove(&ip.to_be_bytes16())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Yields members in ascending canonical-encoding order, folded back
    /// down to `FlowIp::V4` where the 16-byte form was IPv4-mapped.
    pub fn iter(&self) -> impl Iterator<Item = FlowIp> + '_ {
        self.members.iter().map(|&bytes| FlowIp::from_be_bytes16(bytes))
    }

    pub fn union(&self, other: &IpSet) -> IpSet {
        IpSet { members: self.members.union(&other.members).copied().collect() }
    }

    pub fn intersection(&self, other: &IpSet) -> IpSet {
        IpSet { members: self.members.intersection(&other.members).copied().collect() }
    }
}

impl FromIterator<FlowIp> for IpSet {
    fn from_iter<I: IntoIterator<Item = FlowIp>>(iter: I) -> Self {
        let mut set = IpSet::new();
        for ip in iter {
            set.insert(ip);
        }
        set
    }
}

/// Writes an IPset as a stream file header (no special header entry
/// needed; the body alone identifies member count via length) followed
/// by each member's 16-byte canonical encoding in ascending order.
pub fn write_ipset<W: Write>(w: &mut W, set: &IpSet) -> Result<(), IpSetError> {
    let mut header = FileHeader::new();
    header.push(HeaderEntry::Annotation("ipset".to_string()));
    write_file_header(w, &header)?;
    for &bytes in &set.members {
        w.write_all(&bytes)?;
    }
    Ok(())
}

pub fn read_ipset<R: Read>(r: &mut R) -> Result<IpSet, IpSetError> {
    read_file_header(r)?;
    let mut set = IpSet::new();
    let mut buf = [0u8; 16];
    loop {
        let mut read_total = 0;
        while read_total < 16 {
            let n = r.read(&mut buf[read_total..])?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        if read_total == 0 {
            break;
        }
        set.members.insert(buf);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn insert_and_contains() {
        let mut set = IpSet::new();
        let ip = FlowIp::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(set.insert(ip));
        assert!(set.contains(ip));
        assert!(!set.insert(ip));
    }

    #[test]
    fn iteration_is_ascending() {
        let set: IpSet = [
            FlowIp::V4(Ipv4Addr::new(10, 0, 0, 2)),
            FlowIp::V4(Ipv4Addr::new(10, 0, 0, 1)),
        ]
        .into_iter()
        .collect();
        let members: Vec<_> = set.iter().collect();
        assert_eq!(members, vec![FlowIp::V4(Ipv4Addr::new(10, 0, 0, 1)), FlowIp::V4(Ipv4Addr::new(10, 0, 0, 2))]);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut set = IpSet::new();
        set.insert(FlowIp::V4(Ipv4Addr::new(192, 168, 0, 1)));
        set.insert(FlowIp::V4(Ipv4Addr::new(192, 168, 0, 2)));

        let mut buf = Vec::new();
        write_ipset(&mut buf, &set).unwrap();
        let read_back = read_ipset(&mut buf.as_slice()).unwrap();
        assert_eq!(read_back.len(), 2);
        assert!(read_back.contains(FlowIp::V4(Ipv4Addr::new(192, 168, 0, 1))));
    }
}
