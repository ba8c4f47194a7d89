//! # Per-CPU Ring Buffer
//!
//! One memory-mapped perf ring: a metadata page holding the producer cursor
//! (`data_head`, written by the kernel) and consumer cursor (`data_tail`,
//! written by us), followed by a power-of-two data area.
//!
//! ```text
//! ┌──────────────┬───────────────────────────────────────────┐
//! │ metadata page│ data area (2^n pages)                     │
//! └──────────────┴───────────────────────────────────────────┘
//!                  tail ──▶ unread records ──▶ head
//! ```
//!
//! Cursors grow monotonically and are masked into the data area. A drain burst
//! starts with [`RingBuffer::load_head`]; [`RingBuffer::next_record`] then only
//! reads up to that snapshot, so "caught up" is stable for the whole burst.

#![allow(unsafe_code)] // shared memory with the kernel

use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use perfring_common::{HEADER_LEN, META_DATA_HEAD, META_DATA_OFFSET, META_DATA_SIZE, META_DATA_TAIL};

use super::decoder;
use crate::domain::{CpuId, Record, ReaderError};
use crate::source::{EventSource, RingEvent};

/// Geometry of one per-CPU ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pub page_size: usize,
    /// Data pages, always a power of two
    pub data_pages: usize,
    /// Bytes buffered before the descriptor reports readable (0 = any record)
    pub watermark: u32,
}

impl RingLayout {
    /// Round `size_bytes` up to whole pages, then to a power-of-two page count
    ///
    /// # Errors
    /// Returns `Config` if `size_bytes` is zero or `watermark >= size_bytes`
    pub fn new(size_bytes: usize, watermark: usize) -> Result<Self, ReaderError> {
        Self::with_page_size(size_bytes, watermark, page_size())
    }

    pub(crate) fn with_page_size(
        size_bytes: usize,
        watermark: usize,
        page_size: usize,
    ) -> Result<Self, ReaderError> {
        if size_bytes < 1 {
            return Err(ReaderError::Config("per-CPU buffer must be larger than 0".into()));
        }
        if watermark >= size_bytes {
            return Err(ReaderError::Config(format!(
                "watermark ({watermark}) must be smaller than the per-CPU buffer ({size_bytes})"
            )));
        }
        let watermark = u32::try_from(watermark)
            .map_err(|_| ReaderError::Config(format!("watermark {watermark} out of range")))?;

        let data_pages = size_bytes.div_ceil(page_size).next_power_of_two();
        Ok(Self { page_size, data_pages, watermark })
    }

    /// Length of the whole mapping, metadata page included
    #[must_use]
    pub fn mmap_len(&self) -> usize {
        (self.data_pages + 1) * self.page_size
    }
}

/// Host page size
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(4096)
}

/// Shared mapping of a ring's descriptor, unmapped on drop
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is only touched through &mut RingBuffer or atomics.
unsafe impl Send for Mapping {}

impl Mapping {
    fn new(fd: BorrowedFd<'_>, len: usize) -> Result<Self, ReaderError> {
        let length = NonZeroUsize::new(len)
            .ok_or_else(|| ReaderError::Config("empty ring mapping".into()))?;
        // SAFETY: a fresh shared mapping that does not alias any Rust object
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
        }
        .map_err(|e| ReaderError::setup("ring mapping", e))?;
        Ok(Self { ptr: ptr.cast(), len })
    }

    fn cursor(&self, offset: usize) -> &AtomicU64 {
        // SAFETY: offset lies inside the metadata page and is 8-byte aligned;
        // the kernel accesses these fields atomically too
        unsafe { &*self.ptr.as_ptr().add(offset).cast::<AtomicU64>() }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping created in Mapping::new
        if let Err(e) = unsafe { munmap(self.ptr.cast(), self.len) } {
            warn!("Failed to unmap ring: {e}");
        }
    }
}

/// Mapping plus the descriptor it was created from
struct Resources {
    // Field order: unmap before closing the descriptor
    mapping: Mapping,
    event: Box<dyn RingEvent>,
}

pub struct RingBuffer {
    cpu: CpuId,
    resources: Option<Resources>,
    data_offset: usize,
    data_size: usize,
    head: u64,
    tail: u64,
    scratch: Vec<u8>,
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("cpu", &self.cpu)
            .field("data_offset", &self.data_offset)
            .field("data_size", &self.data_size)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish_non_exhaustive()
    }
}

impl RingBuffer {
    /// Open and map the ring for `cpu`
    ///
    /// # Errors
    /// - `Config` for an invalid size or watermark
    /// - `Setup` if the descriptor cannot be opened or mapped
    pub fn create<S: EventSource>(
        cpu: CpuId,
        size_bytes: usize,
        watermark: usize,
        source: &mut S,
    ) -> Result<Self, ReaderError> {
        let layout = RingLayout::new(size_bytes, watermark)?;
        Self::with_layout(cpu, &layout, source)
    }

    pub(crate) fn with_layout<S: EventSource>(
        cpu: CpuId,
        layout: &RingLayout,
        source: &mut S,
    ) -> Result<Self, ReaderError> {
        let event = source
            .open(cpu, layout)
            .map_err(|e| ReaderError::setup(format!("perf event for {cpu}"), e))?;
        let mapping = Mapping::new(event.as_fd(), layout.mmap_len())?;

        let (mut data_offset, mut data_size) = (
            read_meta(&mapping, META_DATA_OFFSET),
            read_meta(&mapping, META_DATA_SIZE),
        );
        if data_size == 0 {
            // Kernels before 4.1 leave these unset
            data_offset = layout.page_size;
            data_size = layout.mmap_len() - layout.page_size;
        }
        if !data_size.is_power_of_two() || data_offset + data_size > layout.mmap_len() {
            return Err(ReaderError::Config(format!(
                "ring for {cpu} reports an unusable data area ({data_size} bytes at {data_offset})"
            )));
        }

        let head = mapping.cursor(META_DATA_HEAD).load(Ordering::Acquire);
        let tail = mapping.cursor(META_DATA_TAIL).load(Ordering::Acquire);

        Ok(Self {
            cpu,
            resources: Some(Resources { mapping, event: Box::new(event) }),
            data_offset,
            data_size,
            head,
            tail,
            scratch: Vec::new(),
        })
    }

    #[must_use]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    /// Descriptor inserted into the routing table, `None` once closed
    #[must_use]
    pub fn event_fd(&self) -> Option<RawFd> {
        self.resources.as_ref().map(|r| r.event.as_fd().as_raw_fd())
    }

    /// Descriptor watched for readiness, `None` once closed
    #[must_use]
    pub fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        self.resources.as_ref().map(|r| r.event.readiness_fd())
    }

    /// Clear a latched readiness signal ahead of [`Self::load_head`]
    ///
    /// # Errors
    /// Returns the OS error from the ring event
    pub fn acknowledge(&self) -> Result<(), ReaderError> {
        if let Some(r) = &self.resources {
            r.event.acknowledge()?;
        }
        Ok(())
    }

    /// Snapshot the producer cursor for the next drain burst
    pub fn load_head(&mut self) {
        if let Some(r) = &self.resources {
            self.head = r.mapping.cursor(META_DATA_HEAD).load(Ordering::Acquire);
        }
    }

    /// Decode the record at the tail, or `None` once the snapshotted head is reached
    ///
    /// Advances the local tail only; [`Self::commit_tail`] publishes it.
    ///
    /// # Errors
    /// - `UnknownEventKind` for an unrecognized record (which is skipped)
    /// - `Malformed` for a corrupt header (the ring skips to the snapshotted head)
    pub fn next_record(&mut self) -> Result<Option<Record>, ReaderError> {
        let Some(resources) = &self.resources else {
            return Ok(None);
        };
        let available = self.head.wrapping_sub(self.tail);
        if available == 0 {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        let size = if available >= HEADER_LEN as u64 {
            copy_out(resources, self.data_offset, self.data_size, self.tail, &mut header);
            let header = decoder::decode_header(self.cpu, &header)?;
            usize::from(header.size)
        } else {
            0
        };
        if size < HEADER_LEN || size as u64 > available || size > self.data_size {
            self.tail = self.head;
            return Err(ReaderError::Malformed { cpu: self.cpu, reason: "bad record size" });
        }

        self.scratch.resize(size, 0);
        copy_out(resources, self.data_offset, self.data_size, self.tail, &mut self.scratch);
        self.tail = self.tail.wrapping_add(size as u64);

        decoder::decode(self.cpu, &self.scratch).map(Some)
    }

    /// Publish the local tail so the kernel can reuse the space
    pub fn commit_tail(&mut self) {
        if let Some(r) = &self.resources {
            r.mapping.cursor(META_DATA_TAIL).store(self.tail, Ordering::Release);
        }
    }

    /// Unmap the ring and close its descriptor; later calls do nothing
    pub fn close(&mut self) {
        self.resources = None;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.resources.is_none()
    }
}

fn read_meta(mapping: &Mapping, offset: usize) -> usize {
    usize::try_from(mapping.cursor(offset).load(Ordering::Acquire)).unwrap_or(0)
}

/// Copy `out.len()` bytes starting at cursor `pos`, wrapping at the end of the data area
fn copy_out(resources: &Resources, data_offset: usize, data_size: usize, pos: u64, out: &mut [u8]) {
    #[allow(clippy::cast_possible_truncation)]
    let start = (pos & (data_size as u64 - 1)) as usize;
    let first = out.len().min(data_size - start);
    // SAFETY: both ranges lie within the data area; the kernel does not write
    // between tail and head until data_tail moves past them
    unsafe {
        let data = resources.mapping.ptr.as_ptr().add(data_offset);
        std::ptr::copy_nonoverlapping(data.add(start), out.as_mut_ptr(), first);
        std::ptr::copy_nonoverlapping(data, out.as_mut_ptr().add(first), out.len() - first);
    }
}
