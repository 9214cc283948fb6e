//! `rwaggbagtool`: the bag algebra tool.
//!
//! Composes one or more Aggregate Bags under `add`/`subtract`, optionally
//! reshapes the schema with `insert-field`/`remove-fields`/`select-fields`,
//! then emits the result as an Aggregate Bag or converts it to a legacy
//! `Bag` or an `IPset`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use silk_aggbag::{read_bag, write_bag, AggregateBag, BagError, FieldId, FieldValue};
use silk_ipset::{write_ipset, IpSet};
use silk_record::ip::FlowIp;

/// Bag algebra tool: composes Aggregate Bags and converts to Bag or IPset.
#[derive(Parser, Debug)]
#[command(name = "rwaggbagtool", version, about)]
struct Cli {
    /// Input files. Use `-` or `stdin` to read from standard input.
    inputs: Vec<PathBuf>,

    /// Merge inputs by field-wise addition (mutually exclusive with `--subtract`).
    #[arg(long)]
    add: bool,

    /// Merge inputs by field-wise subtraction (mutually exclusive with `--add`).
    #[arg(long)]
    subtract: bool,

    /// Extend the schema with a constant-valued field, `NAME=VALUE`. Repeatable.
    #[arg(long = "insert-field")]
    insert_field: Vec<String>,

    /// Drop the named fields from the key, summing counters on collision.
    #[arg(long = "remove-fields", value_delimiter = ',')]
    remove_fields: Option<Vec<String>>,

    /// Keep only the named fields in the key, summing counters on collision.
    #[arg(long = "select-fields", value_delimiter = ',')]
    select_fields: Option<Vec<String>>,

    /// Convert the result to an IPset over this single field.
    #[arg(long = "to-ipset")]
    to_ipset: Option<String>,

    /// Convert the result to a legacy Bag: `KEYFIELD,COUNTERFIELD`.
    #[arg(long = "to-bag", value_delimiter = ',')]
    to_bag: Option<Vec<String>>,

    /// Output file path, or `stdout` (the default).
    #[arg(long = "output-path", default_value = "stdout")]
    output_path: String,
}

#[derive(Debug, Error)]
enum ToolError {
    #[error("{0}")]
    Input(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Bag(#[from] BagError),
    #[error(transparent)]
    LegacyBag(#[from] silk_aggbag::LegacyBagError),
    #[error("aggregate bag wire error: {0}")]
    Wire(#[from] silk_aggbag::WireError),
    #[error("ipset error: {0}")]
    IpSet(#[from] silk_ipset::IpSetError),
}

/// Maps a CLI field name to its [`FieldId`]. Names not in the table fall
/// back to `Custom`. Extensible by adding match arms; no plugin
/// mechanism is needed here.
fn field_by_name(name: &str) -> FieldId {
    match name {
        "sIPv4" => FieldId::SIPv4,
        "dIPv4" => FieldId::DIPv4,
        "nhIPv4" => FieldId::NhIPv4,
        "sIPv6" => FieldId::SIPv6,
        "dIPv6" => FieldId::DIPv6,
        "nhIPv6" => FieldId::NhIPv6,
        "sPort" => FieldId::SPort,
        "dPort" => FieldId::DPort,
        "protocol" => FieldId::Protocol,
        "packets" => FieldId::Packets,
        "bytes" => FieldId::Bytes,
        "sTime" => FieldId::StartTime,
        "sensor" => FieldId::Sensor,
        "class" => FieldId::FtypeClass,
        "type" => FieldId::FtypeType,
        "input" => FieldId::Input,
        "output" => FieldId::Output,
        "application" => FieldId::AppLabel,
        "records" => FieldId::Records,
        "sum-packets" => FieldId::SumPackets,
        "sum-bytes" => FieldId::SumBytes,
        "sum-duration" => FieldId::SumDuration,
        other => {
            let id = other
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(131).wrapping_add(b as u32));
            FieldId::Custom(id)
        }
    }
}

/// Parses a constant value for `--insert-field NAME=VALUE` against the
/// named field's declared type: IP fields parse as an address, everything
/// else as an unsigned integer (covers port/protocol/timestamp/TCP-flags
/// constants).
fn parse_constant(field: FieldId, text: &str) -> Result<FieldValue, ToolError> {
    if field.is_ip() {
        let ip: std::net::IpAddr = text
        .parse()
        .map_err(|_| ToolError::Input(format!("invalid IP constant: {text}")))?;
        let flow_ip = match ip {
            std::net::IpAddr::V4(v4) => FlowIp::V4(v4),
            std::net::IpAddr::V6(v6) => FlowIp::V6(v6),
        };
        Ok(FieldValue::Ip(flow_ip))
    } else {
        let v: u64 = text
        .parse()
        .map_err(|_| ToolError::Input(format!("invalid integer constant: {text}")))?;
        Ok(FieldValue::Uint(v))
    }
}

fn open_input(spec: &std::path::Path) -> io::Result<Box<dyn io::Read>> {
    if spec == std::path::Path::new("-") || spec == std::path::Path::new("stdin") {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(BufReader::new(File::open(spec)?)))
    }
}

fn open_output(spec: &str) -> io::Result<Box<dyn io::Write>> {
    if spec == "stdout" || spec == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(BufWriter::new(File::create(spec)?)))
    }
}

/// Applies `--insert-field`/`--remove-fields`/`--select-fields` to a
/// freshly loaded bag, in that order.
fn apply_schema_manipulation(mut bag: AggregateBag, cli: &Cli) -> Result<AggregateBag, ToolError> {
    for spec in &cli.insert_field {
        let (name, value) = spec
        .split_once('=')
        .ok_or_else(|| ToolError::Input(format!("--insert-field must be NAME=VALUE, got {spec}")))?;
        let field = field_by_name(name);
        let constant = parse_constant(field, value)?;
        // Open question resolution: insert always overwrites
        // a field already present in the bag rather than erroring.
        if bag.schema().key_index(field).is_some() || bag.schema().counter_index(field).is_some() {
            bag = bag.remove_fields(&[field])?;
        }
        bag.insert_field(field, constant)?;
    }

    if let Some(names) = &cli.remove_fields {
        let ids: Vec<FieldId> = names.iter().map(|n| field_by_name(n)).collect();
        bag = bag.remove_fields(&ids)?;
    }
    if let Some(names) = &cli.select_fields {
        let ids: Vec<FieldId> = names.iter().map(|n| field_by_name(n)).collect();
        bag = bag.select_fields(&ids)?;
    }
    Ok(bag)
}

fn to_bag_legacy(bag: &AggregateBag, key_field: FieldId, counter_field: FieldId) -> Result<silk_aggbag::Bag, ToolError> {
    let key_idx = bag
    .schema()
    .key_index(key_field)
    .ok_or_else(|| ToolError::Input(format!("field {key_field:?} is not a key field of this bag")))?;
    let counter_idx = bag
    .schema()
    .counter_index(counter_field)
    .ok_or_else(|| ToolError::Input(format!("field {counter_field:?} is not a counter field of this bag")))?;

    let mut legacy = silk_aggbag::Bag::new(key_field)?;
    for (raw_key, counter) in bag.iter() {
        let key_value = decode_key_field(bag, raw_key, key_idx, key_field);
        legacy.add(key_value, counter[counter_idx])?;
    }
    Ok(legacy)
}

fn decode_key_field(bag: &AggregateBag, raw_key: &[u8], field_index: usize, field: FieldId) -> FieldValue {
    let mut offset = 0usize;
    for (i, f) in bag.schema().key_fields().iter().enumerate() {
        let width = f.key_width();
        if i == field_index {
            let chunk = &raw_key[offset..offset + width];
            return if field.is_ip() {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(chunk);
                FieldValue::Ip(FlowIp::from_be_bytes16(buf))
            } else {
                let mut buf = [0u8; 8];
                buf[8 - width..].copy_from_slice(chunk);
                FieldValue::Uint(u64::from_be_bytes(buf))
            };
        }
        offset += width;
    }
    unreachable!("field_index must be a valid key index")
}

fn to_ipset(bag: &AggregateBag, field: FieldId) -> Result<IpSet, ToolError> {
    let field_index = bag
    .schema()
    .key_index(field)
    .ok_or_else(|| ToolError::Input(format!("field {field:?} is not a key field of this bag")))?;
    if !field.is_ip() {
        return Err(ToolError::Input(format!("--to-ipset field {field:?} is not IP-valued")));
    }
    let mut set = IpSet::new();
    for (raw_key, _) in bag.iter() {
        if let FieldValue::Ip(ip) = decode_key_field(bag, raw_key, field_index, field) {
            set.insert(ip);
        }
    }
    Ok(set)
}

fn run(cli: Cli) -> Result<(), ToolError> {
    if cli.add && cli.subtract {
        return Err(ToolError::Input("--add and --subtract are mutually exclusive".into()));
    }

    let conversions_active = [
        cli.to_bag.is_some(),
        cli.to_ipset.is_some(),
        cli.remove_fields.is_some(),
        cli.select_fields.is_some(),
    ]
    .iter()
    .filter(|&&b| b)
    .count();
    if conversions_active > 1 {
        return Err(ToolError::Input(
                "at most one of --to-bag, --to-ipset, --remove-fields, --select-fields may be given".into(),
        ));
    }

    if cli.inputs.is_empty() {
        return Err(ToolError::Input("at least one input is required".into()));
    }
    if let Some(fields) = &cli.to_bag {
        if fields.len() != 2 {
            return Err(ToolError::Input("--to-bag requires exactly KEYFIELD,COUNTERFIELD".into()));
        }
    }

    let mut inputs = cli.inputs.iter();
    let first_path = inputs.next().expect("checked non-empty above");
    let mut accumulator = read_bag(&mut open_input(first_path)?)?;
    accumulator = apply_schema_manipulation(accumulator, &cli)?;

    for path in inputs {
        let mut next = read_bag(&mut open_input(path)?)?;
        next = apply_schema_manipulation(next, &cli)?;
        if cli.subtract {
            accumulator.subtract_bag(&next)?;
        } else {
            accumulator.add_bag(&next)?;
        }
    }

    let mut out = open_output(&cli.output_path)?;
    if let Some(fields) = &cli.to_bag {
        let key_field = field_by_name(&fields[0]);
        let counter_field = field_by_name(&fields[1]);
        let legacy = to_bag_legacy(&accumulator, key_field, counter_field)?;
        write_bag(&mut out, &legacy.into_aggregate_bag())?;
    } else if let Some(name) = &cli.to_ipset {
        if accumulator.schema().key_fields().len() != 1 {
            return Err(ToolError::Input(
                    "--to-ipset requires exactly one selected key field".into(),
            ));
        }
        let field = field_by_name(name);
        let set = to_ipset(&accumulator, field)?;
        write_ipset(&mut out, &set)?;
    } else {
        write_bag(&mut out, &accumulator)?;
    }
    out.flush()?;
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("rwaggbagtool: {e}");
        std::process::exit(1);
    }
}
