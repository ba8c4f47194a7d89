//! # Per-CPU Event Descriptors
//!
//! Each ring is backed by one descriptor per CPU. The kernel writes records into
//! the descriptor's mapping and reports it readable once at least `watermark`
//! bytes are buffered.
//!
//! The production source opens a `PERF_COUNT_SW_BPF_OUTPUT` software event with
//! `perf_event_open(2)`, the target of `bpf_perf_event_output`.

#![allow(unsafe_code)] // perf_event_open has no safe wrapper

use std::io;
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd};

use crate::domain::CpuId;
use crate::reader::RingLayout;

const PERF_TYPE_SOFTWARE: u32 = 1;
const PERF_COUNT_SW_BPF_OUTPUT: u64 = 10;
const PERF_SAMPLE_RAW: u64 = 1 << 10;
const PERF_FLAG_FD_CLOEXEC: libc::c_ulong = 1 << 3;
const PERF_ATTR_FLAG_WATERMARK: u64 = 1 << 14;
const PERF_ATTR_SIZE_VER0: u32 = 64;

/// A per-CPU descriptor a ring is mapped from
///
/// `as_fd` is the descriptor that gets mapped and inserted into the routing
/// table. Readiness is polled on [`RingEvent::readiness_fd`], which for perf
/// events is the same descriptor.
pub trait RingEvent: AsFd + Send {
    fn readiness_fd(&self) -> BorrowedFd<'_> {
        self.as_fd()
    }

    /// Clear a latched readiness signal before the head is snapshotted
    ///
    /// Perf events are level-triggered on buffered data, so there is nothing to do.
    ///
    /// # Errors
    /// Returns an error if the readiness descriptor cannot be reset
    fn acknowledge(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens the descriptor backing one CPU's ring
pub trait EventSource {
    type Event: RingEvent + 'static;

    /// # Errors
    /// Returns the OS error if the descriptor cannot be created
    fn open(&mut self, cpu: CpuId, layout: &RingLayout) -> io::Result<Self::Event>;
}

/// `PERF_COUNT_SW_BPF_OUTPUT` event bound to one CPU
#[derive(Debug)]
pub struct PerfEvent(OwnedFd);

impl AsFd for PerfEvent {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl RingEvent for PerfEvent {}

/// Opens BPF output events with `perf_event_open(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct PerfEventSource;

impl EventSource for PerfEventSource {
    type Event = PerfEvent;

    fn open(&mut self, cpu: CpuId, layout: &RingLayout) -> io::Result<PerfEvent> {
        let attr = PerfEventAttr::bpf_output(layout.watermark);
        let cpu = libc::c_int::try_from(cpu.0)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "unsupported CPU number"))?;

        // SAFETY: attr is a live, fully initialized perf_event_attr whose size
        // field matches its layout; the kernel only reads it during the call
        let ret = unsafe {
            libc::syscall(
                libc::SYS_perf_event_open,
                std::ptr::from_ref(&attr),
                -1 as libc::pid_t,
                cpu,
                -1 as libc::c_int,
                PERF_FLAG_FD_CLOEXEC,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        #[allow(clippy::cast_possible_truncation)]
        let fd = ret as libc::c_int;
        // SAFETY: the kernel returned a fresh descriptor we now own
        Ok(PerfEvent(unsafe { OwnedFd::from_raw_fd(fd) }))
    }
}

/// First version of `struct perf_event_attr`, enough for BPF output events
#[repr(C)]
#[derive(Default)]
struct PerfEventAttr {
    kind: u32,
    size: u32,
    config: u64,
    sample_period: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
    wakeup: u32,
    bp_type: u32,
    config1: u64,
}

impl PerfEventAttr {
    fn bpf_output(watermark: u32) -> Self {
        let mut attr = Self {
            kind: PERF_TYPE_SOFTWARE,
            size: PERF_ATTR_SIZE_VER0,
            config: PERF_COUNT_SW_BPF_OUTPUT,
            sample_period: 1,
            sample_type: PERF_SAMPLE_RAW,
            ..Self::default()
        };
        if watermark == 0 {
            // wakeup_events: notify on every record
            attr.wakeup = 1;
        } else {
            attr.flags |= PERF_ATTR_FLAG_WATERMARK;
            attr.wakeup = watermark;
        }
        attr
    }
}

const _: () = assert!(std::mem::size_of::<PerfEventAttr>() == PERF_ATTR_SIZE_VER0 as usize);
