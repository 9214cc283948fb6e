//! Aggregate Bag file format:
//! a stream file header carrying a `BagSchema` entry that lists the key
//! and counter field-ids and widths, followed by the concatenation of
//! each entry's encoded key bytes and big-endian counters.

use std::io::{self, Read, Write};

use nom::number::complete::{be_u32, be_u64, be_u8};
use thiserror::Error;

use silk_codec::header::{FileHeader, HeaderEntry};
use silk_codec::stream::{read_file_header, write_file_header};

use crate::bag::{AggregateBag, BagError};
use crate::field::FieldId;
use crate::schema::{AggregateBagSchema, SchemaError};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("stream header error: {0}")]
    Header(#[from] silk_codec::stream::CodecError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Bag(#[from] BagError),
    #[error("truncated entry: expected {expected} bytes, read {got}")]
    ShortEntry { expected: usize, got: usize },
}

fn encode_field_list(fields: &[FieldId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(fields.len() * 5);
    for &field in fields {
        out.extend_from_slice(&field.id().to_be_bytes());
        out.push(field.key_width() as u8);
    }
    out
}

/// Each entry is a 4-byte field-id followed by a 1-byte key width; the
/// list runs to the end of `raw` with no count prefix, so this walks it
/// the way a template-driven field-set decoder consumes a data set: loop
/// while input remains rather than a fixed, pre-known repeat count.
fn decode_field_list(raw: &[u8]) -> Vec<FieldId> {
    let mut fields = Vec::new();
    let mut remaining = raw;
    while !remaining.is_empty() {
        let (rest, id) = be_u32::<_, nom::error::Error<&[u8]>>(remaining).expect("chunk is at least 4 bytes");
        let (rest, _key_width) = be_u8::<_, nom::error::Error<&[u8]>>(rest).expect("chunk is at least 1 more byte");
        fields.push(FieldId::from_id(id));
        remaining = rest;
    }
    fields
}

/// Builds the `BagSchema` header entry for `schema`, to be pushed onto a
/// [`FileHeader`] before writing.
pub fn schema_header_entry(schema: &AggregateBagSchema) -> HeaderEntry {
    HeaderEntry::BagSchema {
        key_fields: encode_field_list(schema.key_fields()),
        counter_fields: encode_field_list(schema.counter_fields()),
    }
}

fn find_schema_entry(header: &FileHeader) -> Option<(&[u8], &[u8])> {
    header.entries.iter().find_map(|e| match e {
            HeaderEntry::BagSchema { key_fields, counter_fields } => Some((key_fields.as_slice(), counter_fields.as_slice())),
            _ => None,
    })
}

/// Writes `bag` to `w`: file header (with a `BagSchema` entry describing
/// its shape) followed by each entry's raw key bytes and big-endian
/// counters, with no inter-record framing.
pub fn write_bag<W: Write>(w: &mut W, bag: &AggregateBag) -> Result<(), WireError> {
    let mut header = FileHeader::new();
    header.push(schema_header_entry(bag.schema()));
    write_file_header(w, &header)?;

    for (key_bytes, counter) in bag.iter() {
        w.write_all(key_bytes)?;
        for &value in counter {
            w.write_all(&value.to_be_bytes())?;
        }
    }
    Ok(())
}

/// Reads a bag previously written by [`write_bag`]. The schema is taken
/// from the stream's `BagSchema` header entry; when the header carries no
/// such entry, the stream predates the per-field schema format and is
/// read as a single 4-byte `Custom` key with one 8-byte counter, matching
/// the pre-SiLK-3.0 on-disk shape. The body is read until EOF either way.
pub fn read_bag<R: Read>(r: &mut R) -> Result<AggregateBag, WireError> {
    let header = read_file_header(r)?;
    let schema = match find_schema_entry(&header) {
        Some((key_raw, counter_raw)) => {
            let key_fields = decode_field_list(key_raw);
            let counter_fields = decode_field_list(counter_raw);
            AggregateBagSchema::new(key_fields, counter_fields)?
        }
        None => AggregateBagSchema::new(vec![FieldId::Custom(0)], vec![FieldId::Value])?,
    };

    let key_width = schema.key_width();
    let counter_width = schema.counter_fields().len() * 8;
    let entry_width = key_width + counter_width;

    let mut bag = AggregateBag::new(schema);
    let mut buf = vec![0u8; entry_width];
    loop {
        let mut read_total = 0;
        while read_total < entry_width {
            let n = r.read(&mut buf[read_total..])?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        if read_total == 0 {
            break;
        }
        if read_total != entry_width {
            return Err(WireError::ShortEntry { expected: entry_width, got: read_total });
        }

        let key_bytes = buf[..key_width].to_vec();
        let mut counter = Vec::with_capacity(counter_width / 8);
        let mut remaining = &buf[key_width..];
        while !remaining.is_empty() {
            let (rest, value) = be_u64::<_, nom::error::Error<&[u8]>>(remaining).expect("entry_width is a multiple of 8 per counter field");
            counter.push(value);
            remaining = rest;
        }
        bag.set_raw(key_bytes, counter)?;
    }
    Ok(bag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldValue;
    use silk_record::ip::FlowIp;
    use std::net::Ipv4Addr;

    #[test]
    fn write_then_read_round_trips_a_bag_with_unequal_key_and_counter_field_counts() {
        let schema = AggregateBagSchema::new(vec![FieldId::SIPv4, FieldId::DPort], vec![FieldId::Bytes]).unwrap();
        let mut bag = AggregateBag::new(schema);
        let key = vec![FieldValue::Ip(FlowIp::V4(Ipv4Addr::new(10, 0, 0, 1))), FieldValue::Uint(443)];
        bag.set(&key, vec![9000]).unwrap();

        let mut buf = Vec::new();
        write_bag(&mut buf, &bag).unwrap();

        let read_back = read_bag(&mut buf.as_slice()).unwrap();
        assert_eq!(read_back.get(&key).unwrap(), Some(vec![9000]));
    }

    #[test]
    fn read_bag_falls_back_to_single_custom_key_and_value_counter_without_a_schema_entry() {
        // A stream with no BagSchema header entry is a pre-SiLK-3.0 file:
        // a single 4-byte key and one 8-byte counter, with no field
        // identity recorded on disk.
        let header = FileHeader::new();
        let mut buf = Vec::new();
        write_file_header(&mut buf, &header).unwrap();
        buf.extend_from_slice(&7u32.to_be_bytes()); // key
        buf.extend_from_slice(&99u64.to_be_bytes()); // counter

        let bag = read_bag(&mut buf.as_slice()).unwrap();
        assert_eq!(bag.schema().key_fields(), &[FieldId::Custom(0)]);
        assert_eq!(bag.schema().counter_fields(), &[FieldId::Value]);
        let key = vec![FieldValue::Uint(7)];
        assert_eq!(bag.get(&key).unwrap(), Some(vec![99]));
    }

    #[test]
    fn write_then_read_round_trips_a_bag() {
        let schema = AggregateBagSchema::new(vec![FieldId::SIPv4], vec![FieldId::Bytes]).unwrap();
        let mut bag = AggregateBag::new(schema);
        let key = vec![FieldValue::Ip(FlowIp::V4(Ipv4Addr::new(10, 0, 0, 1)))];
        bag.set(&key, vec![1234]).unwrap();

        let mut buf = Vec::new();
        write_bag(&mut buf, &bag).unwrap();

        let read_back = read_bag(&mut buf.as_slice()).unwrap();
        assert_eq!(read_back.get(&key).unwrap(), Some(vec![1234]));
    }
}
