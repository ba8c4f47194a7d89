//! CPU utility functions
//!
//! Utilities for querying CPU information from /sys filesystem.

use anyhow::{Context, Result};
use std::fs;

use crate::domain::CpuId;

/// Get list of possible CPU IDs from /sys/devices/system/cpu/possible
///
/// The kernel sizes per-CPU structures by possible (not online) CPUs, so a perf
/// event array needs at least this many slots for every CPU to be routed.
pub fn possible_cpus() -> Result<Vec<CpuId>> {
    let content = fs::read_to_string("/sys/devices/system/cpu/possible")
        .context("Failed to read /sys/devices/system/cpu/possible")?;
    parse_cpu_list(&content)
}

/// Parse a kernel CPU list like "0-3" or "0-3,8-11"
pub fn parse_cpu_list(content: &str) -> Result<Vec<CpuId>> {
    let mut cpus = Vec::new();

    for range in content.trim().split(',') {
        if let Some((start, end)) = range.split_once('-') {
            // Range like "0-3"
            let start: u32 = start.parse().with_context(|| format!("bad CPU range {range}"))?;
            let end: u32 = end.parse().with_context(|| format!("bad CPU range {range}"))?;
            cpus.extend((start..=end).map(CpuId));
        } else {
            // Single CPU like "5"
            let cpu: u32 = range.parse().with_context(|| format!("bad CPU id {range}"))?;
            cpus.push(CpuId(cpu));
        }
    }

    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        let cpus = parse_cpu_list("0-3,8-9,12\n").unwrap();
        let ids: Vec<u32> = cpus.iter().map(|c| c.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 8, 9, 12]);
    }

    #[test]
    fn test_parse_cpu_list_rejects_garbage() {
        assert!(parse_cpu_list("0-x").is_err());
    }

    #[test]
    fn test_possible_cpus() {
        let result = possible_cpus();

        #[cfg(target_os = "linux")]
        {
            let cpus = result.expect("Failed to read possible CPUs");
            // CPU 0 should always exist
            assert!(cpus.contains(&CpuId(0)));
        }

        #[cfg(not(target_os = "linux"))]
        assert!(result.is_err());
    }
}
