//! # perfring - Main Entry Point
//!
//! Opens a pinned perf event array, streams every record to stdout, and closes
//! the reader on Ctrl+C (which interrupts the blocked read).

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::time::Instant;

use perfring::cli::Args;
use perfring::cpu_utils::possible_cpus;
use perfring::output::{write_record, ReadStats};
use perfring::preflight::run_preflight_checks;
use perfring::reader::Reader;
use perfring::source::{BpfEventArray, EventArray};
use perfring::ReaderError;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let is_config = |e: &ReaderError| matches!(e, ReaderError::Config(_));
    if err.chain().any(|e| e.downcast_ref::<ReaderError>().is_some_and(is_config)) {
        return EXIT_USAGE;
    }
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

/// Warn when some CPUs have no slot in the routing table
fn check_cpu_coverage(max_entries: u32) {
    match possible_cpus() {
        Ok(cpus) if cpus.iter().any(|cpu| cpu.0 >= max_entries) => {
            warn!(
                "Perf event array has {max_entries} slots but the host has {} possible CPUs; \
                 output from the remaining CPUs can't be routed",
                cpus.len()
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Could not determine possible CPUs: {e}"),
    }
}

/// Blocking read loop, run on its own thread until closed or `count` is reached
fn read_loop(reader: &Reader, json: bool, count: u64) -> Result<ReadStats> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut stats = ReadStats::default();
    let mut seen = 0u64;

    loop {
        match reader.read() {
            Ok(record) => {
                if let Some(lost) = record.lost() {
                    warn!("{} lost {lost} samples", record.cpu());
                }
                stats.record(&record);
                write_record(&mut out, &record, json)?;
                out.flush()?;

                seen += 1;
                if count > 0 && seen >= count {
                    break;
                }
            }
            Err(e) if e.is_closed() => break,
            Err(e) if e.is_unknown_event() => {
                warn!("Skipping record: {e}");
                stats.unknown += 1;
            }
            Err(e @ ReaderError::Malformed { .. }) => warn!("{e}, resynchronizing"),
            Err(e) => return Err(e).context("Failed to read perf ring"),
        }
    }

    out.flush()?;
    Ok(stats)
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    run_preflight_checks(&args.pin)?;

    let array = BpfEventArray::from_pin(&args.pin)
        .with_context(|| format!("Failed to open perf event array {}", args.pin.display()))?;
    check_cpu_coverage(array.max_entries());

    let reader = Reader::with_options(&array, args.buffer_size, args.reader_options())
        .context("Failed to create perf reader")?;
    let reader = Arc::new(reader);
    // The reader holds its own handle to the map
    drop(array);

    if !quiet {
        eprintln!("perfring v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("map: {}", args.pin.display());
        eprintln!("cpus: {}", reader.cpu_count());
    }
    info!("Reading with {} byte rings, watermark {}", args.buffer_size, args.watermark);

    let started = Instant::now();
    let mut worker = {
        let reader = Arc::clone(&reader);
        let (json, count) = (args.json, args.count);
        tokio::task::spawn_blocking(move || read_loop(&reader, json, count))
    };

    let (stats, exit_reason) = tokio::select! {
        res = &mut worker => (res??, "count reached"),
        _ = tokio::signal::ctrl_c() => {
            // Wakes the blocked read, which then returns Closed
            reader.close()?;
            (worker.await??, "interrupted")
        }
    };
    reader.close()?;

    if !quiet {
        eprintln!(
            "\n{exit_reason}: {:.1}s, {} samples ({} bytes), {} lost, {} unknown",
            started.elapsed().as_secs_f64(),
            stats.samples,
            stats.sample_bytes,
            stats.lost,
            stats.unknown,
        );
    }

    Ok(())
}
