//! `rwfilter`: the multi-threaded flow-record partitioning tool.

use std::fs::File;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use silk_codec::header::{CompressionMethod, FileHeader};
use silk_codec::quirks::Quirks;
use silk_codec::stream::{FlowReader, FlowWriter};
use silk_filter::checker::{CheckerChain, PrimaryChecker};
use silk_filter::pipeline::{merge_headers, Destination, Destinations, Pipeline};

/// Multi-threaded flow-record partitioning tool.
#[derive(Parser, Debug)]
#[command(name = "rwfilter", version, about)]
struct Cli {
    /// Flow-record input files. Use `-` to read one path per line from stdin.
    inputs: Vec<PathBuf>,

    /// Read input paths from this file instead of the positional arguments.
    #[arg(long)]
    xargs: Option<PathBuf>,

    /// Only pass records matching this protocol (repeatable via commas).
    #[arg(long, value_delimiter = ',')]
    protocol: Option<Vec<u8>>,

    /// Only pass records whose source port is in this list.
    #[arg(long = "sport", value_delimiter = ',')]
    sport: Option<Vec<u16>>,

    /// Only pass records whose destination port is in this list.
    #[arg(long = "dport", value_delimiter = ',')]
    dport: Option<Vec<u16>>,

    /// Only pass records whose source IP falls in one of these CIDR blocks.
    #[arg(long = "scidr", value_delimiter = ',')]
    scidr: Option<Vec<String>>,

    /// Only pass records whose destination IP falls in one of these CIDR blocks.
    #[arg(long = "dcidr", value_delimiter = ',')]
    dcidr: Option<Vec<String>>,

    /// Destination(s) for passing records: a path, or `stdout`.
    #[arg(long = "pass-destination")]
    pass_destination: Vec<String>,

    /// Destination(s) for failing records.
    #[arg(long = "fail-destination")]
    fail_destination: Vec<String>,

    /// Destination(s) receiving every record regardless of disposition.
    #[arg(long = "all-destination")]
    all_destination: Vec<String>,

    /// Stop writing the pass destination(s) after this many records.
    #[arg(long = "max-pass-records")]
    max_pass_records: Option<u64>,

    /// Stop writing the fail destination(s) after this many records.
    #[arg(long = "max-fail-records")]
    max_fail_records: Option<u64>,

    /// Print the simple one-line statistics summary after completion.
    #[arg(long = "print-statistics")]
    print_statistics: bool,

    /// Print the six-column pipe-delimited volume statistics.
    #[arg(long = "print-volume-statistics")]
    print_volume_statistics: bool,

    /// Worker thread count. Defaults to `SILK_RWFILTER_THREADS` or 1.
    #[arg(long)]
    threads: Option<usize>,

    /// List the inputs that would be processed and exit without filtering.
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Compression method applied to output streams.
    #[arg(long = "compression-method", default_value = "none")]
    compression_method: String,
}

fn parse_compression(name: &str) -> Option<CompressionMethod> {
    match name {
        "none" => Some(CompressionMethod::None),
        "deflate" => Some(CompressionMethod::Deflate),
        "lzo" => Some(CompressionMethod::Lzo),
        "snappy" => Some(CompressionMethod::Snappy),
        "zstd" => Some(CompressionMethod::Zstd),
        _ => None,
    }
}

/// Opens one `--*-destination` value into a writer, stamped with the
/// already-merged header. `stdout` is handled specially; anything else is
/// treated as a file path.
fn open_destination(spec: &str, header: FileHeader) -> io::Result<FlowWriter> {
    if spec == "stdout" {
        FlowWriter::open(io::stdout(), header).map_err(codec_to_io)
    } else {
        let file = File::create(spec)?;
        FlowWriter::open(file, header).map_err(codec_to_io)
    }
}

fn codec_to_io(e: silk_codec::stream::CodecError) -> io::Error {
    match e {
        silk_codec::stream::CodecError::Io(e) => e,
        other => io::Error::other(other.to_string()),
    }
}

fn build_destination(specs: &[String], cap: Option<u64>, header: &FileHeader) -> io::Result<Destination> {
    if specs.is_empty() {
        return Ok(Destination::empty());
    }
    let mut writers = Vec::with_capacity(specs.len());
    for spec in specs {
        writers.push(open_destination(spec, header.clone())?);
    }
    Ok(Destination::new(writers, cap))
}

fn resolve_inputs(cli: &Cli) -> io::Result<Vec<PathBuf>> {
    if let Some(xargs_path) = &cli.xargs {
        let contents = std::fs::read_to_string(xargs_path)?;
        return Ok(contents.lines().filter(|l| !l.is_empty()).map(PathBuf::from).collect());
    }
    Ok(cli.inputs.clone())
}

/// Opens every input path's stream (reading just its file header),
/// logging and skipping any that can't be opened. Returns the live
/// readers alongside the headers the pipeline needs for the output
/// header merge.
fn open_inputs(inputs: Vec<PathBuf>, quirks: Quirks) -> Vec<(PathBuf, FlowReader)> {
    let mut opened = Vec::with_capacity(inputs.len());
    for path in inputs {
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable input file, skipping");
                continue;
            }
        };
        match FlowReader::open(file, quirks, 0) {
            Ok(reader) => opened.push((path, reader)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open stream header, skipping");
            }
        }
    }
    opened
}

fn parse_cidr(spec: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = spec.split_once('/')?;
    Some((addr.parse().ok()?, prefix.parse().ok()?))
}

fn parse_cidr_list(specs: &[String]) -> io::Result<Vec<(IpAddr, u8)>> {
    specs
    .iter()
    .map(|s| parse_cidr(s).ok_or_else(|| io::Error::other(format!("bad CIDR block: {s}"))))
    .collect()
}

fn main() {
    tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("rwfilter: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> io::Result<()> {
    let inputs = resolve_inputs(&cli)?;

    if cli.dry_run {
        for path in &inputs {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let compression = parse_compression(&cli.compression_method)
    .ok_or_else(|| io::Error::other(format!("unknown compression method: {}", cli.compression_method)))?;

    let mut chain = CheckerChain::new();
    let mut primary = PrimaryChecker::new();
    primary.protocols = cli.protocol.clone();
    primary.sports = cli.sport.clone();
    primary.dports = cli.dport.clone();
    if let Some(scidr) = &cli.scidr {
        primary.saddr_nets = Some(parse_cidr_list(scidr)?);
    }
    if let Some(dcidr) = &cli.dcidr {
        primary.daddr_nets = Some(parse_cidr_list(dcidr)?);
    }
    chain.push(Arc::new(primary));

    let quirks = Quirks::none();
    let opened = open_inputs(inputs, quirks);

    // Merge every opened input's header (annotations, invocations, unioned
    // sidecar descriptor) before any output stream is opened, so each
    // destination carries the merged header rather than an empty one.
    let input_headers: Vec<FileHeader> = opened.iter().map(|(_, r)| r.header().clone()).collect();
    let mut merged = merge_headers(&input_headers).map_err(io::Error::other)?;
    merged.compression = Some(compression);

    let destinations = Destinations {
        pass: build_destination(&cli.pass_destination, cli.max_pass_records, &merged)?,
        fail: build_destination(&cli.fail_destination, cli.max_fail_records, &merged)?,
        all: build_destination(&cli.all_destination, None, &merged)?,
    };

    let thread_count = cli
    .threads
    .or_else(|| std::env::var("SILK_RWFILTER_THREADS").ok().and_then(|v| v.parse().ok()))
    .unwrap_or(1);

    let pipeline = Arc::new(Pipeline::new(opened, chain, destinations, quirks));
    let stats = pipeline.stats();
    let start_time = std::time::SystemTime::now();
    pipeline.run(thread_count);
    let end_time = std::time::SystemTime::now();

    let snapshot = stats.snapshot();
    if cli.print_volume_statistics {
        println!("{}", snapshot.render_volume());
    }
    if cli.print_statistics {
        println!("{}", snapshot.render_simple());
    }

    if let Ok(logstats) = std::env::var("SILK_LOGSTATS_RWFILTER").or_else(|_| std::env::var("SILK_LOGSTATS")) {
        invoke_logstats(&logstats, &snapshot, start_time, end_time);
    }

    io::stdout().flush()?;
    Ok(())
}

/// Seconds since the UNIX epoch, for the `--start-time`/`--end-time`
/// arguments passed to the `SILK_LOGSTATS` executable.
fn unix_seconds(t: std::time::SystemTime) -> u64 {
    t.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn invoke_logstats(
    executable: &str,
    snapshot: &silk_filter::stats::StatsSnapshot,
    start_time: std::time::SystemTime,
    end_time: std::time::SystemTime,
) {
    let status = std::process::Command::new(executable)
    .arg(format!("--start-time={}", unix_seconds(start_time)))
    .arg(format!("--end-time={}", unix_seconds(end_time)))
    .arg(format!("--files={}", snapshot.files))
    .arg(format!("--records-read={}", snapshot.read))
    .arg(format!("--records-written={}", snapshot.pass))
    .status();
    if let Err(e) = status {
        tracing::warn!(executable, error = %e, "SILK_LOGSTATS invocation failed");
    }
}
