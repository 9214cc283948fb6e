//! Wire encoding for sidecar values and descriptors.
//!
//! This module treats the sidecar descriptor as a concept distinct from a
//! record's [`crate::schema::Schema`] ("Schema" describes the IPFIX-style
//! layout; "Sidecar descriptor" is its own per-stream list). This module
//! follows that split literally: sidecar values never become template
//! elements. Each value is self-describing (a one-byte type tag precedes
//! it), so a record's sidecar block can be decoded without consulting the
//! stream's [`crate::sidecar_wire`] descriptor at all; the descriptor
//! exists purely to let the filter pipeline detect type conflicts when
//! merging input streams.

use std::io::{self, Read, Write};

use nom::number::complete::{be_f32, be_f64, be_u128, be_u16, be_u32, be_u64, be_u8};

use silk_record::ip::FlowIp;
use silk_record::sidecar::{Sidecar, SidecarDescriptor, SidecarType, SidecarValue};

/// Reads `N` bytes off `r` and hands them to a nom parser; the stream side
/// of every primitive reader below follows this split, since nom itself
/// has no notion of an incremental [`Read`] source.
fn read_then_parse<R: Read, T>(
    r: &mut R,
    n: usize,
    parse: impl FnOnce(&[u8]) -> nom::IResult<&[u8], T>,
) -> io::Result<T> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    let (_, v) = parse(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(v)
}

fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    read_then_parse(r, 1, be_u8)
}

fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    read_then_parse(r, 2, be_u16)
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    read_then_parse(r, 4, be_u32)
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    read_then_parse(r, 8, be_u64)
}

fn read_bytes<R: Read>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = read_u32(r)? as usize;
    let bytes = read_bytes(r, len)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(&(s.len() as u32).to_be_bytes())?;
    w.write_all(s.as_bytes())
}

/// One-byte tag preceding every encoded [`SidecarValue`], matching
/// [`SidecarType`]'s variants.
fn type_tag(t: SidecarType) -> u8 {
    match t {
        SidecarType::I8 => 0,
        SidecarType::U8 => 1,
        SidecarType::I16 => 2,
        SidecarType::U16 => 3,
        SidecarType::I32 => 4,
        SidecarType::U32 => 5,
        SidecarType::I64 => 6,
        SidecarType::U64 => 7,
        SidecarType::F32 => 8,
        SidecarType::F64 => 9,
        SidecarType::Ip => 10,
        SidecarType::Str => 11,
        SidecarType::Bytes => 12,
        SidecarType::DatetimeSeconds => 13,
        SidecarType::DatetimeMillis => 14,
        SidecarType::DatetimeMicros => 15,
        SidecarType::DatetimeNanos => 16,
        SidecarType::Bool => 17,
        SidecarType::Mac => 18,
        SidecarType::List => 19,
    }
}

fn tag_type(tag: u8) -> io::Result<SidecarType> {
    Ok(match tag {
            0 => SidecarType::I8,
            1 => SidecarType::U8,
            2 => SidecarType::I16,
            3 => SidecarType::U16,
            4 => SidecarType::I32,
            5 => SidecarType::U32,
            6 => SidecarType::I64,
            7 => SidecarType::U64,
            8 => SidecarType::F32,
            9 => SidecarType::F64,
            10 => SidecarType::Ip,
            11 => SidecarType::Str,
            12 => SidecarType::Bytes,
            13 => SidecarType::DatetimeSeconds,
            14 => SidecarType::DatetimeMillis,
            15 => SidecarType::DatetimeMicros,
            16 => SidecarType::DatetimeNanos,
            17 => SidecarType::Bool,
            18 => SidecarType::Mac,
            19 => SidecarType::List,
            other => return Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown sidecar type tag {other}"))),
    })
}

pub fn write_value<W: Write>(w: &mut W, value: &SidecarValue) -> io::Result<()> {
    w.write_all(&[type_tag(value.type_tag())])?;
    match value {
        SidecarValue::I8(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::U8(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::I16(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::U16(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::I32(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::U32(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::I64(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::U64(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::F32(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::F64(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::Ip(ip) => w.write_all(&ip.to_be_bytes16()),
        SidecarValue::Str(s) => write_string(w, s),
        SidecarValue::Bytes(b) => {
            w.write_all(&(b.len() as u32).to_be_bytes())?;
            w.write_all(b)
        }
        SidecarValue::DatetimeSeconds(v)
        | SidecarValue::DatetimeMillis(v)
        | SidecarValue::DatetimeMicros(v)
        | SidecarValue::DatetimeNanos(v) => w.write_all(&v.to_be_bytes()),
        SidecarValue::Bool(v) => w.write_all(&[*v as u8]),
        SidecarValue::Mac(mac) => w.write_all(mac),
        SidecarValue::List(items) => {
            w.write_all(&(items.len() as u32).to_be_bytes())?;
            for item in items {
                write_value(w, item)?;
            }
            Ok(())
        }
    }
}

pub fn read_value<R: Read>(r: &mut R) -> io::Result<SidecarValue> {
    let tag = tag_type(read_u8(r)?)?;
    Ok(match tag {
            SidecarType::I8 => SidecarValue::I8(read_u8(r)? as i8),
            SidecarType::U8 => SidecarValue::U8(read_u8(r)?),
            SidecarType::I16 => SidecarValue::I16(read_u16(r)? as i16),
            SidecarType::U16 => SidecarValue::U16(read_u16(r)?),
            SidecarType::I32 => SidecarValue::I32(read_u32(r)? as i32),
            SidecarType::U32 => SidecarValue::U32(read_u32(r)?),
            SidecarType::I64 => SidecarValue::I64(read_u64(r)? as i64),
            SidecarType::U64 => SidecarValue::U64(read_u64(r)?),
            SidecarType::F32 => SidecarValue::F32(read_then_parse(r, 4, be_f32)?),
            SidecarType::F64 => SidecarValue::F64(read_then_parse(r, 8, be_f64)?),
            SidecarType::Ip => {
                let addr = read_then_parse(r, 16, be_u128)?;
                SidecarValue::Ip(FlowIp::from_be_bytes16(addr.to_be_bytes()))
            }
            SidecarType::Str => SidecarValue::Str(read_string(r)?),
            SidecarType::Bytes => {
                let len = read_u32(r)? as usize;
                SidecarValue::Bytes(read_bytes(r, len)?)
            }
            SidecarType::DatetimeSeconds => SidecarValue::DatetimeSeconds(read_u64(r)? as i64),
            SidecarType::DatetimeMillis => SidecarValue::DatetimeMillis(read_u64(r)? as i64),
            SidecarType::DatetimeMicros => SidecarValue::DatetimeMicros(read_u64(r)? as i64),
            SidecarType::DatetimeNanos => SidecarValue::DatetimeNanos(read_u64(r)? as i64),
            SidecarType::Bool => SidecarValue::Bool(read_u8(r)? != 0),
            SidecarType::Mac => {
                let bytes: [u8; 6] = read_then_parse(r, 6, |i: &[u8]| {
                    let (i, slice) = nom::bytes::complete::take(6usize)(i)?;
                    Ok((i, slice.try_into().expect("take(6) yields exactly 6 bytes")))
                })?;
                SidecarValue::Mac(bytes)
            }
            SidecarType::List => {
                let len = read_u32(r)? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(read_value(r)?);
                }
                SidecarValue::List(items)
            }
    })
}

/// Writes a record's sidecar as `u16` field count then `(name, value)`
/// pairs, in the sidecar's own (name-sorted) iteration order.
pub fn write_sidecar<W: Write>(w: &mut W, sidecar: &Sidecar) -> io::Result<()> {
    w.write_all(&(sidecar.len() as u16).to_be_bytes())?;
    for (name, value) in sidecar.iter() {
        write_string(w, name)?;
        write_value(w, value)?;
    }
    Ok(())
}

pub fn read_sidecar<R: Read>(r: &mut R) -> io::Result<Sidecar> {
    let count = read_u16(r)?;
    let mut sidecar = Sidecar::new();
    for _ in 0..count {
        let name = read_string(r)?;
        let value = read_value(r)?;
        sidecar.set(name, value);
    }
    Ok(sidecar)
}

/// Encodes a [`SidecarDescriptor`] for the stream-header `Sidecar` entry:
/// `u16` field count then `(name, type-tag, has-list-elem,
/// [list-elem-tag])` per field, in name order (the descriptor is backed
/// by a `BTreeMap`, so iteration is already sorted).
pub fn encode_descriptor(desc: &SidecarDescriptor) -> Vec<u8> {
    let mut buf = Vec::new();
    let fields: Vec<_> = desc.iter().collect();
    buf.extend_from_slice(&(fields.len() as u16).to_be_bytes());
    for (name, (kind, list_elem)) in fields {
        buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.push(type_tag(*kind));
        match list_elem {
            Some(elem) => {
                buf.push(1);
                buf.push(type_tag(*elem));
            }
            None => buf.push(0),
        }
    }
    buf
}

pub fn decode_descriptor(raw: &[u8]) -> io::Result<SidecarDescriptor> {
    let mut cursor = io::Cursor::new(raw);
    let count = read_u16(&mut cursor)?;
    let mut desc = SidecarDescriptor::new();
    for _ in 0..count {
        let name = read_string(&mut cursor)?;
        let kind = tag_type(read_u8(&mut cursor)?)?;
        let has_elem = read_u8(&mut cursor)? != 0;
        let elem = if has_elem {
            Some(tag_type(read_u8(&mut cursor)?)?)
        } else {
            None
        };
        desc.register(&name, kind, elem)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    }
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_round_trips_through_the_wire() {
        for value in [
            SidecarValue::U32(42),
            SidecarValue::Str("https".into()),
            SidecarValue::Bool(true),
            SidecarValue::Ip(FlowIp::V4(std::net::Ipv4Addr::new(10, 0, 0, 1))),
            SidecarValue::List(vec![SidecarValue::U8(1), SidecarValue::U8(2)]),
        ] {
            let mut buf = Vec::new();
            write_value(&mut buf, &value).unwrap();
            let decoded = read_value(&mut &buf[..]).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn sidecar_round_trips() {
        let mut sidecar = Sidecar::new();
        sidecar.set("appName", SidecarValue::Str("https".into()));
        sidecar.set("bytes", SidecarValue::U64(100));
        let mut buf = Vec::new();
        write_sidecar(&mut buf, &sidecar).unwrap();
        let decoded = read_sidecar(&mut &buf[..]).unwrap();
        assert_eq!(decoded, sidecar);
    }

    #[test]
    fn descriptor_round_trips() {
        let mut desc = SidecarDescriptor::new();
        desc.register("appName", SidecarType::Str, None).unwrap();
        desc.register("tags", SidecarType::List, Some(SidecarType::U8)).unwrap();
        let encoded = encode_descriptor(&desc);
        let decoded = decode_descriptor(&encoded).unwrap();
        assert_eq!(decoded.type_of("appName"), Some(SidecarType::Str));
        assert_eq!(decoded.type_of("tags"), Some(SidecarType::List));
    }
}
