//! The filter pipeline's worker pool, dispatch, and output handling.

use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use silk_codec::header::{FileHeader, HeaderEntry};
use silk_codec::quirks::Quirks;
use silk_codec::sidecar_wire::{decode_descriptor, encode_descriptor};
use silk_codec::stream::{CodecError, FlowReader, FlowWriter};
use silk_record::record::Record;

use crate::checker::{CheckResult, CheckerChain};
use crate::stats::Stats;

/// Records are appended to a per-worker, per-destination buffer and
/// flushed together once it holds this many whole records, keeping each
/// flush to roughly 64 KiB. A canonical record plus sidecar rarely exceeds a few dozen
/// bytes, so 512 records is a conservative approximation of that budget.
pub const RECORDS_PER_BUFFER: usize = 512;

/// One output destination (pass, fail, or all): zero or more live
/// streams sharing a record cap, each independently closeable on EPIPE
/// or after the cap is reached.
pub struct Destination {
    streams: Vec<Mutex<Option<FlowWriter>>>,
    cap: Option<u64>,
    written: AtomicU64,
}

impl Destination {
    pub fn new(writers: Vec<FlowWriter>, cap: Option<u64>) -> Self {
        Destination {
            streams: writers.into_iter().map(|w| Mutex::new(Some(w))).collect(),
            cap,
            written: AtomicU64::new(0),
        }
    }

    pub fn empty() -> Self {
        Destination { streams: Vec::new(), cap: None, written: AtomicU64::new(0) }
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    fn live_stream_count(&self) -> usize {
        self.streams.iter().filter(|s| s.lock().expect("destination mutex poisoned").is_some()).count()
    }

    /// Writes `records` to every live stream, honoring the cap (truncate
    /// then close every stream of this destination) and EPIPE (close only
    /// the one broken stream). Returns whether this destination has any
    /// live stream left afterward.
    fn flush(&self, records: &[Record]) -> bool {
        if self.streams.is_empty() {
            return false;
        }

        let mut to_write = records;
        if let Some(cap) = self.cap {
            let already = self.written.load(Ordering::Relaxed);
            if already >= cap {
                to_write = &[];
            } else {
                let remaining = (cap - already) as usize;
                if records.len() > remaining {
                    to_write = &records[..remaining];
                }
            }
        }

        if !to_write.is_empty() {
            for slot in &self.streams {
                let mut guard = slot.lock().expect("destination mutex poisoned");
                if let Some(writer) = guard.as_mut() {
                    let mut broken = false;
                    for rec in to_write {
                        match writer.write_record(rec) {
                            Ok(()) => {}
                            Err(CodecError::Io(e)) if e.kind() == ErrorKind::BrokenPipe => {
                                broken = true;
                                break;
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "fatal write error on output stream");
                                broken = true;
                                break;
                            }
                        }
                    }
                    if broken {
                        *guard = None;
                    }
                }
            }
            self.written.fetch_add(to_write.len() as u64, Ordering::Relaxed);
        }

        if let Some(cap) = self.cap {
            if self.written.load(Ordering::Relaxed) >= cap {
                for slot in &self.streams {
                    *slot.lock().expect("destination mutex poisoned") = None;
                }
                return false;
            }
        }

        self.live_stream_count() > 0
    }
}

/// The three destination types a record may be copied to under the
/// pipeline's dispatch rules.
pub struct Destinations {
    pub pass: Destination,
    pub fail: Destination,
    pub all: Destination,
}

/// Shared pipeline state: the input queue, checker chain, destinations,
/// stats, and the `reading` shutdown flag every worker polls.
pub struct Pipeline {
    inputs: Mutex<VecDeque<(PathBuf, FlowReader)>>,
    chain: CheckerChain,
    destinations: Destinations,
    stats: Arc<Stats>,
    reading: AtomicBool,
    #[allow(dead_code)]
    quirks: Quirks,
}

impl Pipeline {
    /// `inputs` must already be opened (file headers read, so the caller
    /// can merge them into the output headers before the pipeline starts
    /// writing) via [`FlowReader::open`].
    pub fn new(
        inputs: Vec<(PathBuf, FlowReader)>,
        chain: CheckerChain,
        destinations: Destinations,
        quirks: Quirks,
    ) -> Self {
        Pipeline {
            inputs: Mutex::new(inputs.into_iter().collect()),
            chain,
            destinations,
            stats: Arc::new(Stats::new()),
            reading: AtomicBool::new(true),
            quirks,
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Effective worker count: a checker chain with a script/plugin
    /// checker that declares itself single-threaded forces 1 regardless
    /// of the requested count.
    pub fn effective_thread_count(&self, requested: usize) -> usize {
        if self.chain.forces_single_threaded() {
            1
        } else {
            requested.max(1)
        }
    }

    fn next_input(&self) -> Option<(PathBuf, FlowReader)> {
        if !self.reading.load(Ordering::Acquire) {
            return None;
        }
        self.inputs.lock().expect("input queue mutex poisoned").pop_front()
    }

    /// Runs the worker pool to completion. Each
    /// worker repeatedly pulls the next input path, decodes records,
    /// evaluates the checker chain, and buffers output per destination
    /// type, flushing each buffer when full or at end of input.
    pub fn run(self: &Arc<Self>, thread_count: usize) {
        let n = self.effective_thread_count(thread_count);
        std::thread::scope(|scope| {
                for _ in 0..n {
                    let pipeline = Arc::clone(self);
                    scope.spawn(move || pipeline.worker_loop());
                }
        });
    }

    fn worker_loop(&self) {
        let mut pass_buf: Vec<Record> = Vec::with_capacity(RECORDS_PER_BUFFER);
        let mut fail_buf: Vec<Record> = Vec::with_capacity(RECORDS_PER_BUFFER);
        let mut all_buf: Vec<Record> = Vec::with_capacity(RECORDS_PER_BUFFER);

        while let Some((path, mut reader)) = self.next_input() {
            self.stats.inc_files();

            loop {
                if !self.reading.load(Ordering::Acquire) {
                    break;
                }
                match reader.next_record() {
                    Ok(Some(rec)) => {
                        self.stats.inc_read(rec.packets, rec.bytes);
                        self.dispatch(rec, &mut pass_buf, &mut fail_buf, &mut all_buf);
                        if pass_buf.len() >= RECORDS_PER_BUFFER {
                            self.flush_buf(&self.destinations.pass, &mut pass_buf);
                        }
                        if fail_buf.len() >= RECORDS_PER_BUFFER {
                            self.flush_buf(&self.destinations.fail, &mut fail_buf);
                        }
                        if all_buf.len() >= RECORDS_PER_BUFFER {
                            self.flush_buf(&self.destinations.all, &mut all_buf);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "stream-fatal decode error, abandoning this input");
                        break;
                    }
                }
            }
        }

        self.flush_buf(&self.destinations.pass, &mut pass_buf);
        self.flush_buf(&self.destinations.fail, &mut fail_buf);
        self.flush_buf(&self.destinations.all, &mut all_buf);
    }

    fn dispatch(&self, rec: Record, pass_buf: &mut Vec<Record>, fail_buf: &mut Vec<Record>, all_buf: &mut Vec<Record>) {
        if !self.destinations.all.is_empty() {
            all_buf.push(rec.clone());
        }
        match self.chain.evaluate(&rec) {
            CheckResult::Pass | CheckResult::PassNow => {
                self.stats.inc_pass(rec.packets, rec.bytes);
                pass_buf.push(rec);
            }
            CheckResult::Fail => {
                self.stats.inc_fail(rec.packets, rec.bytes);
                fail_buf.push(rec);
            }
            CheckResult::Ignore => {}
        }
    }

    fn flush_buf(&self, dest: &Destination, buf: &mut Vec<Record>) {
        if buf.is_empty() {
            return;
        }
        let still_live = dest.flush(buf);
        buf.clear();
        if !still_live && !dest.is_empty() {
            self.maybe_stop_reading();
        }
    }

    fn maybe_stop_reading(&self) {
        let pass_dead = self.destinations.pass.is_empty() || self.destinations.pass.live_stream_count() == 0;
        let fail_dead = self.destinations.fail.is_empty() || self.destinations.fail.live_stream_count() == 0;
        let all_dead = self.destinations.all.is_empty() || self.destinations.all.live_stream_count() == 0;
        if pass_dead && fail_dead && all_dead {
            self.reading.store(false, Ordering::Release);
        }
    }
}

/// Merges annotation/invocation/other entries from every input's header,
/// in input order, and unions their sidecar descriptor entries into one;
/// aborts (returns `Err`) on conflicting sidecar field types across inputs.
pub fn merge_headers(inputs: &[FileHeader]) -> Result<FileHeader, String> {
    let mut merged = FileHeader::new();
    let mut sidecar = None;
    for header in inputs {
        for entry in &header.entries {
            match entry {
                HeaderEntry::Sidecar { field_descriptors } => {
                    let decoded = decode_descriptor(field_descriptors)
                    .map_err(|e| format!("malformed sidecar descriptor: {e}"))?;
                    match sidecar.as_mut() {
                        None => sidecar = Some(decoded),
                        Some(acc) => acc.union(&decoded).map_err(|e| e.to_string())?,
                    }
                }
                other => merged.push(other.clone()),
            }
        }
    }
    if let Some(desc) = sidecar {
        merged.push(HeaderEntry::Sidecar { field_descriptors: encode_descriptor(&desc) });
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_flush_honors_cap_and_closes_streams() {
        let dest = Destination::empty();
        assert!(dest.is_empty());
    }

    #[test]
    fn merge_headers_concatenates_entries() {
        let mut a = FileHeader::new();
        a.push(HeaderEntry::Annotation("a".into()));
        let mut b = FileHeader::new();
        b.push(HeaderEntry::Annotation("b".into()));
        let merged = merge_headers(&[a, b]).unwrap();
        let texts: Vec<_> = merged.annotations().collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn merge_headers_unions_compatible_sidecar_descriptors() {
        use silk_record::sidecar::{SidecarDescriptor, SidecarType};

        let mut a_desc = SidecarDescriptor::new();
        a_desc.register("appName", SidecarType::Str, None).unwrap();
        let mut a = FileHeader::new();
        a.push(HeaderEntry::Sidecar { field_descriptors: encode_descriptor(&a_desc) });

        let mut b_desc = SidecarDescriptor::new();
        b_desc.register("retries", SidecarType::U32, None).unwrap();
        let mut b = FileHeader::new();
        b.push(HeaderEntry::Sidecar { field_descriptors: encode_descriptor(&b_desc) });

        let merged = merge_headers(&[a, b]).unwrap();
        let entry = merged
        .entries
        .iter()
        .find_map(|e| match e {
                HeaderEntry::Sidecar { field_descriptors } => Some(field_descriptors),
                _ => None,
        })
        .unwrap();
        let decoded = decode_descriptor(entry).unwrap();
        assert_eq!(decoded.type_of("appName"), Some(SidecarType::Str));
        assert_eq!(decoded.type_of("retries"), Some(SidecarType::U32));
    }

    #[test]
    fn merge_headers_rejects_conflicting_sidecar_types() {
        use silk_record::sidecar::{SidecarDescriptor, SidecarType};

        let mut a_desc = SidecarDescriptor::new();
        a_desc.register("appName", SidecarType::Str, None).unwrap();
        let mut a = FileHeader::new();
        a.push(HeaderEntry::Sidecar { field_descriptors: encode_descriptor(&a_desc) });

        let mut b_desc = SidecarDescriptor::new();
        b_desc.register("appName", SidecarType::U32, None).unwrap();
        let mut b = FileHeader::new();
        b.push(HeaderEntry::Sidecar { field_descriptors: encode_descriptor(&b_desc) });

        assert!(merge_headers(&[a, b]).is_err());
    }
}
