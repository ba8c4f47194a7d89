//! Pre-flight checks for perfring
//!
//! Validates system requirements before opening perf events.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Minimum kernel version: `PERF_COUNT_SW_BPF_OUTPUT` arrived in 4.4
const MIN_KERNEL_VERSION: (u32, u32) = (4, 4);

/// Run all pre-flight checks before opening the reader
pub fn run_preflight_checks(pin: &Path) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_pin_exists(pin)?;
    Ok(())
}

/// Check if running with sufficient privileges for perf events and bpf maps
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // CAP_BPF + CAP_PERFMON would also do, but checking them needs more than libc
    bail!(
        "Permission denied: perfring requires root privileges to open perf events.\n\n\
         Run with: sudo perfring ..."
    );
}

/// Check if the kernel version is sufficient for BPF output events
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 5.15.0-generic ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some((major, minor)) = parse_kernel_release(release) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             perfring requires Linux {}.{} or newer for BPF perf output.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// Extract (major, minor) from a release string like "6.1.0-arch1-1"
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?))
}

/// Check that the pinned map exists
fn check_pin_exists(pin: &Path) -> Result<()> {
    if !pin.exists() {
        bail!(
            "Pinned map not found: {}\n\n\
             Pin the perf event array with bpftool or your loader, and check\n\
             that bpffs is mounted at /sys/fs/bpf.",
            pin.display()
        );
    }
    Ok(())
}
