//! The flow codec's stream abstraction: `open_reader`,
//! `next_record`, `write_record`, `read_header_entries`.
//!
//! Wire layout: a [`FileHeader`] (magic, byte order, record format,
//! compression, header entries) followed by a sequence of *blocks*. A
//! block is either a template definition (tagged with
//! [`TEMPLATE_MARKER`]) or a data record bound to a previously-defined
//! template id. This is a deliberately simplified stand-in for the real
//! IPFIX message/set nesting; template negotiation, the time
//! gauntlet, bidirectional records, and quirks handling are unabridged.
//!
//! Every fixed-layout chunk (the file header prefix, a header entry's
//! type/length tag, a template's field list) is read into a buffer with
//! `Read::read_exact` once its size is known, then parsed off that buffer
//! with `nom`/`nom-derive`, the same split the netflow collector this
//! codec is descended from uses between socket reads and packet parsing.
//! Serialization stays hand-rolled, since nom has nothing to say about
//! writing.

use std::io::{self, Read, Write};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use nom::number::complete::{be_u16, be_u32};
use nom_derive::{Nom, Parse};
use silk_record::record::Record;

use crate::header::{CompressionMethod, FileHeader, HeaderEntry, RecordFormat};
use crate::ie::Ie;
use crate::quirks::Quirks;
use crate::record_mapping;
use crate::schema::{Schema, SchemaBuilder};
use crate::sidecar_wire;
use crate::template::{Template, TemplateTable};

const MAGIC: [u8; 4] = *b"SiLK";
const MAGIC_TAG: u32 = u32::from_be_bytes(MAGIC);
/// Reserved template id marking a block as a template definition rather
/// than a data record.
const TEMPLATE_MARKER: u16 = 0xFFFF;
/// Template id the writer assigns its own canonical schema.
const CANONICAL_TEMPLATE_ID: u16 = 256;

/// Errors the codec surfaces: the `Read`/`Write`/`Header`
/// kinds.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("short read: expected {expected} bytes, stream ended after {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("unknown template id {0}")]
    TemplateUnknown(u16),
    #[error("unsupported record version {0}")]
    BadVersion(u8),
    #[error("unsupported compression method")]
    UnsupportedCompression,
    #[error("bad magic bytes")]
    BadMagic,
    #[error("malformed wire data: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn to_parse_err(e: nom::Err<nom::error::Error<&[u8]>>) -> CodecError {
    CodecError::Parse(e.to_string())
}

fn nom_u16(i: &[u8]) -> Result<u16, CodecError> {
    be_u16::<&[u8], nom::error::Error<&[u8]>>(i).map(|(_, v)| v).map_err(to_parse_err)
}

fn nom_u32(i: &[u8]) -> Result<u32, CodecError> {
    be_u32::<&[u8], nom::error::Error<&[u8]>>(i).map(|(_, v)| v).map_err(to_parse_err)
}

fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, CodecError> {
    let mut total = 0;
    while total < buf.len() {
        let n = r.read(&mut buf[total..])?;
        if n == 0 {
            if total == 0 {
                return Ok(false);
            }
            return Err(CodecError::ShortRead {
                    expected: buf.len(),
                    got: total,
            });
        }
        total += n;
    }
    Ok(true)
}

fn read_u16<R: Read>(r: &mut R) -> Result<Option<u16>, CodecError> {
    let mut buf = [0u8; 2];
    if !read_exact_or_eof(r, &mut buf)? {
        return Ok(None);
    }
    Ok(Some(nom_u16(&buf)?))
}

fn read_u32_req<R: Read>(r: &mut R) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    nom_u32(&buf)
}

fn read_bytes_req<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn parse_utf8(bytes: Vec<u8>) -> Result<String, CodecError> {
    String::from_utf8(bytes).map_err(|e| CodecError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// The fixed `entry_type`/`len` tag preceding every header entry's payload.
#[derive(Nom)]
struct HeaderEntryPrefix {
    pub entry_type: u32,
    pub len: u32,
}

fn read_header_entry<R: Read>(r: &mut R) -> Result<HeaderEntry, CodecError> {
    let mut prefix_buf = [0u8; 8];
    r.read_exact(&mut prefix_buf)?;
    let (_, prefix) = HeaderEntryPrefix::parse(&prefix_buf).map_err(to_parse_err)?;
    let payload = read_bytes_req(r, prefix.len as usize)?;
    Ok(match prefix.entry_type {
            1 => HeaderEntry::Annotation(parse_utf8(payload)?),
            2 => HeaderEntry::Invocation(parse_utf8(payload)?),
            3 => HeaderEntry::Sidecar {
                field_descriptors: payload,
            },
            4 => {
                if payload.len() < 4 {
                    return Err(CodecError::ShortRead { expected: 4, got: payload.len() });
                }
                let key_len = nom_u32(&payload)? as usize;
                let raw = &payload[4..];
                if key_len > raw.len() {
                    return Err(CodecError::ShortRead { expected: key_len, got: raw.len() });
                }
                HeaderEntry::BagSchema {
                    key_fields: raw[..key_len].to_vec(),
                    counter_fields: raw[key_len..].to_vec(),
                }
            }
            5 => HeaderEntry::TemplateCollection { raw: payload },
            other => HeaderEntry::Unknown {
                entry_type: other,
                raw: payload,
            },
    })
}

fn write_header_entry<W: Write>(w: &mut W, entry: &HeaderEntry) -> io::Result<()> {
    w.write_all(&entry.entry_type().to_be_bytes())?;
    match entry {
        HeaderEntry::Annotation(s) | HeaderEntry::Invocation(s) => {
            w.write_all(&(s.len() as u32).to_be_bytes())?;
            w.write_all(s.as_bytes())
        }
        HeaderEntry::Sidecar { field_descriptors } => {
            w.write_all(&(field_descriptors.len() as u32).to_be_bytes())?;
            w.write_all(field_descriptors)
        }
        HeaderEntry::BagSchema {
            key_fields,
            counter_fields,
        } => {
            w.write_all(&((4 + key_fields.len() + counter_fields.len()) as u32).to_be_bytes())?;
            w.write_all(&(key_fields.len() as u32).to_be_bytes())?;
            w.write_all(key_fields)?;
            w.write_all(counter_fields)
        }
        HeaderEntry::TemplateCollection { raw } | HeaderEntry::Unknown { raw,.. } => {
            w.write_all(&(raw.len() as u32).to_be_bytes())?;
            w.write_all(raw)
        }
    }
}

fn record_format_tag(fmt: RecordFormat) -> u8 {
    match fmt {
        RecordFormat::Generic => 0,
        RecordFormat::TemplateDriven => 1,
    }
}

fn record_format_of(tag: u8) -> Option<RecordFormat> {
    match tag {
        0 => Some(RecordFormat::Generic),
        1 => Some(RecordFormat::TemplateDriven),
        _ => None,
    }
}

/// The file header's fixed 12-byte prefix: magic, byte-order flag (0 =
/// big-endian, the only form this codec writes or accepts), record
/// format, record version, compression method, then the entry count.
#[derive(Nom)]
struct FileHeaderPrefix {
    pub magic: u32,
    pub byte_order: u8,
    pub record_format_tag: u8,
    pub record_version: u8,
    pub compression_tag: u8,
    pub entry_count: u32,
}

/// Reads a [`FileHeader`] from the start of `r`: the fixed prefix
/// followed by `entry_count` header entries.
pub fn read_file_header<R: Read>(r: &mut R) -> Result<FileHeader, CodecError> {
    let mut buf = [0u8; 12];
    r.read_exact(&mut buf)?;
    let (_, prefix) = FileHeaderPrefix::parse(&buf).map_err(to_parse_err)?;
    if prefix.magic != MAGIC_TAG {
        return Err(CodecError::BadMagic);
    }
    let _byte_order = prefix.byte_order;
    let record_format = record_format_of(prefix.record_format_tag);
    if prefix.record_version != 1 {
        return Err(CodecError::BadVersion(prefix.record_version));
    }
    let compression = CompressionMethod::from_tag(prefix.compression_tag);
    let mut header = FileHeader::new();
    header.record_format = record_format;
    header.compression = compression;
    for _ in 0..prefix.entry_count {
        header.push(read_header_entry(r)?);
    }
    Ok(header)
}

pub fn write_file_header<W: Write>(w: &mut W, header: &FileHeader) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&[0u8])?; // byte order: big-endian
    w.write_all(&[record_format_tag(
                header.record_format.unwrap_or(RecordFormat::TemplateDriven),
    )])?;
    w.write_all(&[1u8])?; // record version
    w.write_all(&[header
            .compression
            .unwrap_or(CompressionMethod::None)
            .tag()])?;
    w.write_all(&(header.entries.len() as u32).to_be_bytes())?;
    for entry in &header.entries {
        write_header_entry(w, entry)?;
    }
    Ok(())
}

fn encode_field_id(ie: Ie) -> (u16, Option<u32>) {
    if ie.enterprise_id == 0 {
        (ie.element_id, None)
    } else {
        (ie.element_id | 0x8000, Some(ie.enterprise_id))
    }
}

fn write_template<W: Write>(w: &mut W, template_id: u16, schema: &Schema) -> io::Result<()> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&template_id.to_be_bytes());
    payload.push(0); // is_options_template
    payload.extend_from_slice(&(schema.fields().len() as u16).to_be_bytes());
    for field in schema.fields() {
        let (tagged_id, enterprise) = encode_field_id(field.ie);
        payload.extend_from_slice(&tagged_id.to_be_bytes());
        payload.extend_from_slice(&field.length.to_be_bytes());
        if let Some(pen) = enterprise {
            payload.extend_from_slice(&pen.to_be_bytes());
        }
    }
    w.write_all(&TEMPLATE_MARKER.to_be_bytes())?;
    w.write_all(&(payload.len() as u32).to_be_bytes())?;
    w.write_all(&payload)
}

/// One field descriptor inside a template payload: a tagged element id
/// (high bit marks an enterprise-specific IE) and its length, with the
/// 32-bit enterprise number present only when that bit is set.
#[derive(Nom)]
struct RawTemplateField {
    pub tagged_id: u16,
    pub length: u16,
    #[nom(Cond = "tagged_id & 0x8000 != 0")]
    pub pen: Option<u32>,
}

#[derive(Nom)]
struct RawTemplate {
    pub template_id: u16,
    pub is_options: u8,
    pub field_count: u16,
    #[nom(Count = "field_count as usize")]
    pub fields: Vec<RawTemplateField>,
}

fn read_template<R: Read>(r: &mut R) -> Result<(u16, Template), CodecError> {
    let payload_len = read_u32_req(r)? as usize;
    let payload = read_bytes_req(r, payload_len)?;
    let (_, raw) = RawTemplate::parse(&payload).map_err(to_parse_err)?;

    let mut builder = SchemaBuilder::new();
    for field in &raw.fields {
        let has_enterprise = field.tagged_id & 0x8000 != 0;
        let element_id = field.tagged_id & 0x7FFF;
        let ie = if has_enterprise {
            Ie::enterprise(field.pen.unwrap_or(0), element_id)
        } else {
            Ie::iana(element_id)
        };
        builder = builder.push(ie, field.length);
    }
    let schema = builder.build();
    Ok((raw.template_id, Template::new(raw.template_id, schema, raw.is_options != 0)))
}

/// Reads and negotiates templates from a stream, decoding data records
/// into canonical [`Record`]s. The body reader is boxed
/// once the file header's compression method is known, so the same type
/// serves plain and deflate-compressed streams alike.
pub struct FlowReader {
    inner: Box<dyn Read + Send>,
    header: FileHeader,
    templates: TemplateTable,
    export_time_ms: i64,
    quirks: Quirks,
    pending: std::collections::VecDeque<Record>,
}

impl FlowReader {
    /// Opens a reader over `inner`: reads the file header, then wires up
    /// compression if the header calls for it. `export_time_ms` seeds
    /// the time gauntlet's no-time-fields fallback;
    /// callers typically refresh it as IPFIX Message Headers are
    /// encountered upstream of this abstraction.
    pub fn open<R: Read + Send + 'static>(
        mut inner: R,
        quirks: Quirks,
        export_time_ms: i64,
    ) -> Result<Self, CodecError> {
        let header = read_file_header(&mut inner)?;
        if let Some(method) = header.compression {
            if !method.is_supported() {
                return Err(CodecError::UnsupportedCompression);
            }
        }
        let body = maybe_deflate_reader(inner, header.compression);
        Ok(FlowReader {
                inner: body,
                header,
                templates: TemplateTable::default(),
                export_time_ms,
                quirks,
                pending: std::collections::VecDeque::new(),
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn read_header_entries(&self) -> &[HeaderEntry] {
        &self.header.entries
    }

    pub fn set_export_time_ms(&mut self, export_time_ms: i64) {
        self.export_time_ms = export_time_ms;
    }

    /// Decodes and returns the next canonical record.
    /// Returns `Ok(None)` on clean end-of-stream. A decode error on a
    /// single record is the caller's responsibility to log-and-skip by
    /// calling this again (this method itself only returns `Err` for
    /// stream-fatal conditions: short reads, unknown templates, bad
    /// version).
    pub fn next_record(&mut self) -> Result<Option<Record>, CodecError> {
        loop {
            if let Some(rec) = self.pending.pop_front() {
                return Ok(Some(rec));
            }
            let Some(marker_or_id) = read_u16(&mut self.inner)? else {
                return Ok(None);
            };
            if marker_or_id == TEMPLATE_MARKER {
                let (template_id, template) = read_template(&mut self.inner)?;
                tracing::debug!(
                    template_id,
                    field_count = template.schema.fields().len(),
                    options = template.is_options_template,
                    "negotiated template"
                );
                self.templates.insert(template);
                continue;
            }
            let payload_len = read_u32_req(&mut self.inner)? as usize;
            let payload = read_bytes_req(&mut self.inner, payload_len)?;
            let template = self
            .templates
            .get(marker_or_id)
            .ok_or(CodecError::TemplateUnknown(marker_or_id))?;
            let core_len = template.schema.record_len();
            if payload.len() < core_len {
                return Err(CodecError::ShortRead {
                        expected: core_len,
                        got: payload.len(),
                });
            }
            let records = record_mapping::decode_data_record(
                &template,
                &payload[..core_len],
                self.export_time_ms,
                self.quirks,
            );
            if payload.len() > core_len && !records.is_empty() {
                let sidecar = sidecar_wire::read_sidecar(&mut &payload[core_len..])?;
                for mut rec in records {
                    rec.sidecar = merge_sidecar(rec.sidecar, sidecar.clone());
                    self.pending.push_back(rec);
                }
            } else {
                for rec in records {
                    self.pending.push_back(rec);
                }
            }
        }
    }
}

fn merge_sidecar(
    mut base: silk_record::sidecar::Sidecar,
    extra: silk_record::sidecar::Sidecar,
) -> silk_record::sidecar::Sidecar {
    for (name, value) in extra.iter() {
        base.set(name.clone(), value.clone());
    }
    base
}

/// Writes canonical records using a single negotiated template per
/// stream, emitting the template once before the first record is
/// written. The file header is written uncompressed
/// immediately on `open`; everything after it is wrapped in a deflate
/// encoder when the header calls for it, mirroring [`FlowReader`]'s
/// split between header and (possibly compressed) body.
pub struct FlowWriter {
    inner: Box<dyn Write + Send>,
    template_written: bool,
    schema: Arc<Schema>,
}

impl FlowWriter {
    pub fn open<W: Write + Send + 'static>(mut inner: W, header: FileHeader) -> Result<Self, CodecError> {
        write_file_header(&mut inner, &header)?;
        let body = maybe_deflate_writer(inner, header.compression);
        Ok(FlowWriter {
                inner: body,
                template_written: false,
                schema: record_mapping::canonical_schema(),
        })
    }

    /// Serializes `rec`, emitting the canonical template first if this is
    /// the first record written to the stream.
    pub fn write_record(&mut self, rec: &Record) -> Result<(), CodecError> {
        if !self.template_written {
            write_template(&mut self.inner, CANONICAL_TEMPLATE_ID, &self.schema)?;
            self.template_written = true;
        }
        let core = record_mapping::encode_core(rec);
        let mut sidecar_bytes = Vec::new();
        sidecar_wire::write_sidecar(&mut sidecar_bytes, &rec.sidecar)?;
        let payload_len = core.len() + sidecar_bytes.len();
        self.inner.write_all(&CANONICAL_TEMPLATE_ID.to_be_bytes())?;
        self.inner.write_all(&(payload_len as u32).to_be_bytes())?;
        self.inner.write_all(&core)?;
        self.inner.write_all(&sidecar_bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wraps a reader in a deflate decoder when the header calls for it;
/// returns the original reader unchanged for `CompressionMethod::None`.
pub fn maybe_deflate_reader<R: Read + Send + 'static>(
    r: R,
    method: Option<CompressionMethod>,
) -> Box<dyn Read + Send> {
    match method {
        Some(CompressionMethod::Deflate) => Box::new(DeflateDecoder::new(r)),
        _ => Box::new(r),
    }
}

/// Wraps a writer in a deflate encoder when `method` calls for it.
pub fn maybe_deflate_writer<W: Write + Send + 'static>(
    w: W,
    method: Option<CompressionMethod>,
) -> Box<dyn Write + Send> {
    match method {
        Some(CompressionMethod::Deflate) => Box::new(DeflateEncoder::new(w, Compression::default())),
        _ => Box::new(w),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silk_record::ip::FlowIp;

    fn sample_record(n: u16) -> Record {
        let mut r = Record::new();
        r.source_ip = FlowIp::V4(std::net::Ipv4Addr::new(10, 0, 0, n as u8));
        r.dest_ip = FlowIp::V4(std::net::Ipv4Addr::new(10, 0, 1, n as u8));
        r.source_port = 1000 + n;
        r.dest_port = 80;
        r.protocol = 6;
        r.packets = 3;
        r.bytes = 180;
        r.start_time_ms = 1_700_000_000_000;
        r.duration_ms = 500;
        r
    }

    #[test]
    fn write_then_read_round_trips_records() {
        let mut buf = Vec::new();
        {
            let mut writer = FlowWriter::open(&mut buf, FileHeader::new()).unwrap();
            writer.write_record(&sample_record(1)).unwrap();
            writer.write_record(&sample_record(2)).unwrap();
            writer.flush().unwrap();
        }
        let mut reader = FlowReader::open(&buf[..], Quirks::none(), 0).unwrap();
        let r1 = reader.next_record().unwrap().unwrap();
        let r2 = reader.next_record().unwrap().unwrap();
        assert_eq!(r1.source_port, 1001);
        assert_eq!(r2.source_port, 1002);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn sidecar_survives_round_trip() {
        let mut rec = sample_record(1);
        rec.sidecar_set("appName", silk_record::sidecar::SidecarValue::Str("https".into()));
        let mut buf = Vec::new();
        {
            let mut writer = FlowWriter::open(&mut buf, FileHeader::new()).unwrap();
            writer.write_record(&rec).unwrap();
            writer.flush().unwrap();
        }
        let mut reader = FlowReader::open(&buf[..], Quirks::none(), 0).unwrap();
        let decoded = reader.next_record().unwrap().unwrap();
        assert_eq!(
            decoded.sidecar_get("appName"),
            Some(&silk_record::sidecar::SidecarValue::Str("https".into()))
        );
    }

    #[test]
    fn unknown_template_id_is_fatal() {
        let mut buf = Vec::new();
        write_file_header(&mut buf, &FileHeader::new()).unwrap();
        buf.extend_from_slice(&999u16.to_be_bytes());
        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 0]);
        let mut reader = FlowReader::open(&buf[..], Quirks::none(), 0).unwrap();
        assert!(matches!(
                reader.next_record(),
                Err(CodecError::TemplateUnknown(999))
        ));
    }

    #[test]
    fn bag_schema_entry_round_trips_with_unequal_field_counts() {
        // Two key fields (10 bytes) vs. one counter field (5 bytes): a
        // naive even split of the raw bytes would misplace the boundary.
        let mut header = FileHeader::new();
        header.push(HeaderEntry::BagSchema {
                key_fields: vec![0, 0, 0, 1, 16, 0, 0, 0, 8, 2],
                counter_fields: vec![0, 0, 0, 11, 8],
        });
        let mut buf = Vec::new();
        write_file_header(&mut buf, &header).unwrap();
        let read_back = read_file_header(&mut &buf[..]).unwrap();
        match &read_back.entries[0] {
            HeaderEntry::BagSchema { key_fields, counter_fields } => {
                assert_eq!(key_fields, &vec![0, 0, 0, 1, 16, 0, 0, 0, 8, 2]);
                assert_eq!(counter_fields, &vec![0, 0, 0, 11, 8]);
            }
            other => panic!("expected BagSchema, got {other:?}"),
        }
    }

    #[test]
    fn header_entries_round_trip() {
        let mut header = FileHeader::new();
        header.push(HeaderEntry::Annotation("test run".into()));
        header.push(HeaderEntry::Invocation("rwfilter --foo".into()));
        let mut buf = Vec::new();
        write_file_header(&mut buf, &header).unwrap();
        let read_back = read_file_header(&mut &buf[..]).unwrap();
        assert_eq!(read_back.annotations().collect::<Vec<_>>(), vec!["test run"]);
        assert_eq!(read_back.invocations().collect::<Vec<_>>(), vec!["rwfilter --foo"]);
    }
}
