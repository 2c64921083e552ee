//! Decode Dump CLI Tool
//!
//! Decodes a text file of raw crate buffers with a crate map and prints the
//! per-slot data and scaler rates of every event.
//!
//! # Usage
//!
//! ```bash
//! # Decode events of crate 1
//! cargo run --bin decode-dump -- --config config/decoder.toml --crate 1 events.txt
//!
//! # Print the module configuration first, with debug logging
//! cargo run --bin decode-dump -- -c config/decoder.toml --print-modules -v events.txt
//! ```
//!
//! # Event file format
//!
//! One event per line, 32-bit words in hex (with or without `0x`). A line may
//! start with `<crate>:` to select the crate; otherwise `--crate` is used.
//! Blank lines and lines starting with `#` are ignored.

use anyhow::{bail, Context, Result};
use clap::Parser;
use daq_decode::config::DecoderConfig;
use daq_decode::decoder::CrateDecoder;
use daq_decode::registry::ModuleTypeRegistry;
use daq_decode::telemetry::{self, OutputFormat, TracingConfig};
use daq_decode::Module;
use std::fs;
use std::path::PathBuf;
use tracing::{info, Level};

// =============================================================================
// CLI Argument Structure
// =============================================================================

/// Decode Dump - decode raw crate buffers and print slot data
#[derive(Parser, Debug)]
#[command(name = "decode-dump")]
#[command(version = "0.1.0")]
#[command(about = "Decode raw DAQ crate buffers and print slot data and scaler rates", long_about = None)]
struct Args {
    /// Text file with one event buffer per line
    #[arg(value_name = "EVENT_FILE")]
    events: PathBuf,

    /// Decoder configuration (application settings and crate map)
    #[arg(short, long, value_name = "CONFIG", default_value = "config/decoder.toml")]
    config: PathBuf,

    /// Crate for lines without a `<crate>:` prefix
    #[arg(long = "crate", value_name = "CRATE")]
    crate_num: Option<u32>,

    /// Log the configuration of every module before decoding
    #[arg(long)]
    print_modules: bool,

    /// Log output format (pretty, compact, json)
    #[arg(long, default_value = "compact")]
    log_format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    let config = DecoderConfig::load_from(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    config.validate().context("validating configuration")?;

    let tracing_config = if args.verbose {
        TracingConfig::new(Level::DEBUG)
    } else {
        TracingConfig::from_config(&config).map_err(anyhow::Error::msg)?
    };
    telemetry::init(tracing_config.with_format(args.log_format)).map_err(anyhow::Error::msg)?;

    let mut decoder = CrateDecoder::from_crate_map(&config.crate_map, ModuleTypeRegistry::global())
        .context("building modules from crate map")?;
    if args.print_modules {
        decoder.do_print();
    }

    let text = fs::read_to_string(&args.events)
        .with_context(|| format!("reading events {}", args.events.display()))?;

    let mut events = 0;
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (crate_num, buffer) = parse_event(line, args.crate_num)
            .with_context(|| format!("{}:{}", args.events.display(), line_no + 1))?;
        events += 1;
        dump_event(&mut decoder, events, crate_num, &buffer)?;
    }

    info!(events, "Done");
    Ok(())
}

// =============================================================================
// Core Logic
// =============================================================================

/// Split an event line into its crate number and words.
fn parse_event(line: &str, default_crate: Option<u32>) -> Result<(u32, Vec<u32>)> {
    let (crate_num, words) = match line.split_once(':') {
        Some((prefix, rest)) => (
            prefix
                .trim()
                .parse::<u32>()
                .with_context(|| format!("invalid crate number '{}'", prefix.trim()))?,
            rest,
        ),
        None => match default_crate {
            Some(crate_num) => (crate_num, line),
            None => bail!("line has no crate prefix and --crate was not given"),
        },
    };

    let buffer = words
        .split_whitespace()
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            u32::from_str_radix(digits, 16).with_context(|| format!("invalid word '{}'", token))
        })
        .collect::<Result<Vec<u32>>>()?;
    Ok((crate_num, buffer))
}

fn dump_event(decoder: &mut CrateDecoder, event: usize, crate_num: u32, buffer: &[u32]) -> Result<()> {
    let summary = decoder
        .decode_crate(crate_num, buffer)
        .with_context(|| format!("decoding event {}", event))?;
    println!(
        "event {} crate {}: {} words, {} blocks, {} unclaimed",
        event, crate_num, summary.words, summary.modules_matched, summary.unclaimed_words
    );

    let slots: Vec<_> = decoder.slots().filter(|id| id.crate_num == crate_num).collect();
    for identity in slots {
        if let Some(scaler) = decoder.scaler(identity.crate_num, identity.slot) {
            if !scaler.is_decoded() {
                continue;
            }
            let dt = decoder
                .time_since_prev(identity.crate_num, identity.slot)
                .unwrap_or(0.0);
            println!("  scaler {}  dt {}", identity, dt);
            for chan in 0..scaler.num_chan() {
                println!(
                    "    ch {:2}  count {:10}  rate {:.3}",
                    chan,
                    scaler.data(chan),
                    scaler.rate(chan)
                );
            }
            continue;
        }
        let Some(data) = decoder.slot_data(identity.crate_num, identity.slot) else {
            continue;
        };
        if data.num_raw() == 0 {
            continue;
        }
        println!("  slot {}  {} hits", identity, data.num_raw());
        for &chan in data.channels_hit() {
            let values: Vec<String> = (0..data.num_hits(chan))
                .filter_map(|hit| data.data(chan, hit))
                .map(|v| v.to_string())
                .collect();
            println!("    ch {:3}  {}", chan, values.join(" "));
        }
    }
    Ok(())
}
