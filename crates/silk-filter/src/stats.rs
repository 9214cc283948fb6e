//! Statistics accumulation and rendering for the filter pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared across all worker tasks via atomics, since workers
/// update them concurrently without going through the output mutexes.
#[derive(Debug, Default)]
pub struct Stats {
    pub files: AtomicU64,
    pub read: AtomicU64,
    pub pass: AtomicU64,
    pub fail: AtomicU64,
    pub total_packets: AtomicU64,
    pub total_bytes: AtomicU64,
    pub pass_packets: AtomicU64,
    pub pass_bytes: AtomicU64,
    pub fail_packets: AtomicU64,
    pub fail_bytes: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn inc_files(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a record read from the input, before the checker chain
    /// runs: counted toward the Total row's records/packets/bytes.
    pub fn inc_read(&self, packets: u64, bytes: u64) {
        self.read.fetch_add(1, Ordering::Relaxed);
        self.total_packets.fetch_add(packets, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_pass(&self, packets: u64, bytes: u64) {
        self.pass.fetch_add(1, Ordering::Relaxed);
        self.pass_packets.fetch_add(packets, Ordering::Relaxed);
        self.pass_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_fail(&self, packets: u64, bytes: u64) {
        self.fail.fetch_add(1, Ordering::Relaxed);
        self.fail_packets.fetch_add(packets, Ordering::Relaxed);
        self.fail_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files: self.files.load(Ordering::Relaxed),
            read: self.read.load(Ordering::Relaxed),
            pass: self.pass.load(Ordering::Relaxed),
            fail: self.fail.load(Ordering::Relaxed),
            total_packets: self.total_packets.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            pass_packets: self.pass_packets.load(Ordering::Relaxed),
            pass_bytes: self.pass_bytes.load(Ordering::Relaxed),
            fail_packets: self.fail_packets.load(Ordering::Relaxed),
            fail_bytes: self.fail_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub files: u64,
    pub read: u64,
    pub pass: u64,
    pub fail: u64,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub pass_packets: u64,
    pub pass_bytes: u64,
    pub fail_packets: u64,
    pub fail_bytes: u64,
}

impl StatsSnapshot {
    /// The "simple" one-line rendering:
    /// `Files 1. Read 2. Pass 2. Fail 0.`.
    pub fn render_simple(&self) -> String {
        format!("Files {}. Read {}. Pass {}. Fail {}.", self.files, self.read, self.pass, self.fail)
    }

    /// The six-pipe-delimited-column "volume" form: a leading blank
    /// column, then Recs/Packets/Bytes/Files, then the trailing delimiter
    /// that closes out the row — with three data rows (Total/Pass/Fail).
    pub fn render_volume(&self) -> String {
        let files = self.files;
        format!(
            "||{}|{}|{}|{}|\n||{}|{}|{}|{}|\n||{}|{}|{}|{}|",
            self.read, self.total_packets, self.total_bytes, files,
            self.pass, self.pass_packets, self.pass_bytes, files,
            self.fail, self.fail_packets, self.fail_bytes, files,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_rendering_matches_the_documented_form() {
        let stats = Stats::new();
        stats.inc_files();
        stats.inc_read(1, 40);
        stats.inc_read(1, 40);
        stats.inc_pass(1, 40);
        stats.inc_pass(1, 40);
        assert_eq!(stats.snapshot().render_simple(), "Files 1. Read 2. Pass 2. Fail 0.");
    }

    #[test]
    fn volume_rendering_has_three_rows_of_six_pipe_delimited_columns() {
        let stats = Stats::new();
        stats.inc_files();
        stats.inc_read(100, 2000);
        stats.inc_pass(100, 2000);
        let rendered = stats.snapshot().render_volume();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            assert_eq!(line.matches('|').count(), 6);
        }
        assert_eq!(lines[0], "||1|100|2000|1|");
        assert_eq!(lines[1], "||1|100|2000|1|");
        assert_eq!(lines[2], "||0|0|0|1|");
    }

    #[test]
    fn ignored_records_do_not_count_toward_the_fail_row() {
        // A checker returning `Ignore` drops a record without counting it
        // as pass or fail, so Pass + Fail must come up short of Read by
        // exactly the ignored count, not have the shortfall land in Fail.
        let stats = Stats::new();
        stats.inc_files();
        stats.inc_read(10, 100);
        stats.inc_read(10, 100);
        stats.inc_read(10, 100);
        stats.inc_pass(10, 100);
        stats.inc_fail(10, 100);
        // the third record was ignored: no inc_pass/inc_fail call for it
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pass + snapshot.fail, snapshot.read - 1);
        let rendered = snapshot.render_volume();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines[2], "||1|10|100|1|");
    }
}
