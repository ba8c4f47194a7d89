//! # Record Output
//!
//! Formats records for the command-line tool and keeps running totals.
//!
//! - **Text**: `[SAMPLE] CPU:0 16 bytes` followed by a hex dump
//! - **JSON**: one object per line, samples hex-encoded

use serde::Serialize;
use std::io::{self, Write};

use crate::domain::{Payload, Record};

/// Totals over one reading session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    pub samples: u64,
    pub sample_bytes: u64,
    /// Samples the kernel reported as dropped
    pub lost: u64,
    pub unknown: u64,
}

impl ReadStats {
    pub fn record(&mut self, record: &Record) {
        match &record.payload {
            Payload::Sample(data) => {
                self.samples += 1;
                self.sample_bytes += data.len() as u64;
            }
            Payload::Lost(count) => self.lost += count,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum JsonRecord<'a> {
    Sample { cpu: u32, len: usize, data: &'a str },
    Lost { cpu: u32, count: u64 },
}

/// Write one record as text or a JSON line
///
/// # Errors
/// Returns an error if writing to `out` fails
pub fn write_record<W: Write>(out: &mut W, record: &Record, json: bool) -> io::Result<()> {
    let cpu = record.cpu;
    match (&record.payload, json) {
        (Payload::Sample(data), false) => {
            writeln!(out, "[SAMPLE] {cpu} {} bytes", data.len())?;
            for chunk in data.chunks(16) {
                writeln!(out, "  {}", hex_row(chunk))?;
            }
        }
        (Payload::Lost(count), false) => writeln!(out, "[LOST] {cpu} {count} samples")?,
        (Payload::Sample(data), true) => {
            let encoded = hex::encode(data);
            let line = JsonRecord::Sample { cpu: cpu.0, len: data.len(), data: &encoded };
            serde_json::to_writer(&mut *out, &line)?;
            writeln!(out)?;
        }
        (Payload::Lost(count), true) => {
            serde_json::to_writer(&mut *out, &JsonRecord::Lost { cpu: cpu.0, count: *count })?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// One dump row: space-separated byte pairs
fn hex_row(chunk: &[u8]) -> String {
    chunk.iter().map(|b| hex::encode([*b])).collect::<Vec<_>>().join(" ")
}
