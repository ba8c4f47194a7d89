//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::reader::ReaderOptions;

#[derive(Parser, Debug)]
#[command(
    name = "perfring",
    about = "Stream records from a BPF perf event array",
    after_help = "\
EXAMPLES:
    sudo perfring --pin /sys/fs/bpf/events                  Print every record
    sudo perfring --pin /sys/fs/bpf/events --json           One JSON object per line
    sudo perfring --pin /sys/fs/bpf/events --watermark 512  Wake after 512 buffered bytes"
)]
pub struct Args {
    /// Pinned perf event array map to read from
    #[arg(long, value_name = "PATH")]
    pub pin: PathBuf,

    /// Per-CPU ring size in bytes (rounded up to a power-of-two page count)
    #[arg(long, value_name = "BYTES", default_value = "65536")]
    pub buffer_size: usize,

    /// Bytes buffered before a ring wakes the reader (0 = every record)
    #[arg(long, value_name = "BYTES", default_value = "0")]
    pub watermark: usize,

    /// Stop after N records (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub count: u64,

    /// Print records as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions { watermark: self.watermark }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["perfring", "--pin", "/sys/fs/bpf/events"]).unwrap();
        assert_eq!(args.buffer_size, 65536);
        assert_eq!(args.reader_options().watermark, 0);
        assert_eq!(args.count, 0);
        assert!(!args.json);
    }

    #[test]
    fn test_pin_required() {
        assert!(Args::try_parse_from(["perfring"]).is_err());
    }
}
