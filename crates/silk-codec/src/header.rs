//! Stream file headers: the entries that precede a stream's records.

use std::collections::BTreeMap;

/// How a stream's record body is compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Deflate,
    Lzo,
    Snappy,
    Zstd,
}

impl CompressionMethod {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
                0 => CompressionMethod::None,
                1 => CompressionMethod::Deflate,
                2 => CompressionMethod::Lzo,
                3 => CompressionMethod::Snappy,
                4 => CompressionMethod::Zstd,
                _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Deflate => 1,
            CompressionMethod::Lzo => 2,
            CompressionMethod::Snappy => 3,
            CompressionMethod::Zstd => 4,
        }
    }

    /// Only `None` and `Deflate` are implemented end-to-end; the rest are
    /// recognized on read (so a stream tagged with them fails with a
    /// specific error rather than silently misparsing) but not decodable.
    pub fn is_supported(self) -> bool {
        matches!(self, CompressionMethod::None | CompressionMethod::Deflate)
    }
}

/// The on-disk/wire record encoding family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// Canonical fixed-field SiLK record packing.
    Generic,
    /// IPFIX/NetFlow-v9 template-driven records.
    TemplateDriven,
}

/// A single entry in a stream's header. Unrecognized entry types are kept
/// as raw bytes under [`HeaderEntry::Unknown`] rather than rejected, so a
/// reader can skip past header content it doesn't understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderEntry {
    Annotation(String),
    Invocation(String),
    Sidecar { field_descriptors: Vec<u8> },
    BagSchema { key_fields: Vec<u8>, counter_fields: Vec<u8> },
    TemplateCollection { raw: Vec<u8> },
    Unknown { entry_type: u32, raw: Vec<u8> },
}

impl HeaderEntry {
    pub fn entry_type(&self) -> u32 {
        match self {
            HeaderEntry::Annotation(_) => 1,
            HeaderEntry::Invocation(_) => 2,
            HeaderEntry::Sidecar {.. } => 3,
            HeaderEntry::BagSchema {.. } => 4,
            HeaderEntry::TemplateCollection {.. } => 5,
            HeaderEntry::Unknown { entry_type,.. } => *entry_type,
        }
    }
}

/// The full header of a stream: format, compression, and the ordered list
/// of entries that preceded the first record.
#[derive(Debug, Clone, Default)]
pub struct FileHeader {
    pub record_format: Option<RecordFormat>,
    pub compression: Option<CompressionMethod>,
    pub entries: Vec<HeaderEntry>,
}

impl FileHeader {
    pub fn new() -> Self {
        FileHeader::default()
    }

    pub fn push(&mut self, entry: HeaderEntry) {
        self.entries.push(entry);
    }

    pub fn annotations(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
                HeaderEntry::Annotation(text) => Some(text.as_str()),
                _ => None,
        })
    }

    pub fn invocations(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
                HeaderEntry::Invocation(text) => Some(text.as_str()),
                _ => None,
        })
    }

    /// Merges another stream's header entries into this one, for the
    /// filter pipeline's multi-input header merge: all
    /// annotations/invocations are concatenated, later entries appended
    /// after earlier ones, in input order.
    pub fn merge(&mut self, other: &FileHeader) {
        self.entries.extend(other.entries.iter().cloned());
    }
}

/// Counts entries by type, used by diagnostics/logging to summarize a
/// merged header without dumping every entry.
pub fn entry_counts(header: &FileHeader) -> BTreeMap<u32, usize> {
    let mut counts = BTreeMap::new();
    for entry in &header.entries {
        *counts.entry(entry.entry_type()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_compression_is_recognized_but_rejected() {
        let lzo = CompressionMethod::from_tag(2).unwrap();
        assert_eq!(lzo, CompressionMethod::Lzo);
        assert!(!lzo.is_supported());
    }

    #[test]
    fn merge_concatenates_entries_in_input_order() {
        let mut a = FileHeader::new();
        a.push(HeaderEntry::Annotation("a".into()));
        let mut b = FileHeader::new();
        b.push(HeaderEntry::Annotation("b".into()));
        a.merge(&b);
        let texts: Vec<_> = a.annotations().collect();
        assert_eq!(texts, vec!["a", "b"]);
    }
}
